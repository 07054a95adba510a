use serde::Serialize;
use swc_core::ecma::ast::Program;

use crate::context::DeobfuscatorContext;
use crate::error::DetectionError;
use crate::transform::Transform;

/// Identity and description of a deobfuscation target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetMeta {
    /// Stable id used for registration and explicit selection.
    pub id: &'static str,

    /// Human-readable name.
    pub name: &'static str,

    pub description: Option<&'static str>,

    pub tags: &'static [&'static str],
}

/// The outcome of running a target's detection heuristics.
#[derive(Debug, Clone, Serialize)]
pub struct Detection {
    /// Confidence in [0, 1]. Zero-confidence detections are dropped by
    /// the registry.
    pub confidence: f64,

    /// What the heuristics saw, for host-side reporting.
    pub details: Option<String>,
}

impl Detection {
    /// Creates a detection, clamping confidence into [0, 1].
    pub fn new(confidence: f64, details: Option<String>) -> Self {
        Self {
            confidence: confidence.clamp(0.0, 1.0),
            details,
        }
    }
}

/// A family of obfuscation the registry can dispatch to.
pub trait Target {
    fn meta(&self) -> &TargetMeta;

    /// Scores how likely the program is output of this family.
    /// `Ok(None)` means the target has no detection heuristics.
    fn detect(&self, _program: &mut Program) -> Result<Option<Detection>, DetectionError> {
        Ok(None)
    }

    /// Runs the family's pipeline against the context's tree.
    fn deobfuscate(&self, ctx: &mut DeobfuscatorContext<'_>);

    /// Transforms applied after [Target::deobfuscate] returns.
    fn post_transforms(&self) -> Vec<Box<dyn Transform>> {
        Vec::new()
    }
}
