use std::cmp::Ordering;
use std::sync::Arc;

use swc_core::ecma::ast::Program;

use crate::context::Logger;
use crate::error::UnknownTargetError;
use crate::target::{Detection, Target};

/// How the caller wants the target chosen.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum TargetSelection {
    /// Run detection; fall back to the registry default below the
    /// threshold.
    #[default]
    Auto,

    /// Do not run any target.
    Skip,

    /// Run exactly this target, or fail with [UnknownTargetError].
    Id(String),
}

/// Holds the known targets and picks one per run.
#[derive(Default)]
pub struct TargetRegistry {
    targets: Vec<Arc<dyn Target>>,
    default_id: Option<String>,
}

impl TargetRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in targets registered and
    /// `obfuscator-io` as the default.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::targets::obfuscator_io::ObfuscatorIo));
        registry.register(Arc::new(crate::targets::abba::Abba));
        registry
            .set_default("obfuscator-io")
            .expect("built-in target must be registered");
        registry
    }

    /// Registers a target. Replacing an existing id is allowed and
    /// logged.
    pub fn register(&mut self, target: Arc<dyn Target>) {
        let id = target.meta().id;
        if let Some(existing) = self.targets.iter_mut().find(|t| t.meta().id == id) {
            tracing::debug!("overwriting registered target {id}");
            *existing = target;
        } else {
            self.targets.push(target);
        }
    }

    /// Removes a target, returning it if it was registered.
    pub fn unregister(&mut self, id: &str) -> Option<Arc<dyn Target>> {
        let index = self.targets.iter().position(|t| t.meta().id == id)?;
        if self.default_id.as_deref() == Some(id) {
            self.default_id = None;
        }
        Some(self.targets.remove(index))
    }

    pub fn get(&self, id: &str) -> Option<&Arc<dyn Target>> {
        self.targets.iter().find(|t| t.meta().id == id)
    }

    pub fn get_all(&self) -> &[Arc<dyn Target>] {
        &self.targets
    }

    pub fn list(&self) -> Vec<&'static str> {
        self.targets.iter().map(|t| t.meta().id).collect()
    }

    pub fn has(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn default_target(&self) -> Option<&Arc<dyn Target>> {
        self.default_id.as_deref().and_then(|id| self.get(id))
    }

    pub fn set_default(&mut self, id: &str) -> Result<(), UnknownTargetError> {
        if !self.has(id) {
            return Err(UnknownTargetError { id: id.to_string() });
        }
        self.default_id = Some(id.to_string());
        Ok(())
    }

    /// Runs every target's detection and returns candidates sorted by
    /// descending confidence. Targets without heuristics and
    /// zero-confidence results are omitted; per-target failures are
    /// swallowed and logged.
    pub fn detect(
        &self,
        program: &mut Program,
        logger: &Logger<'_>,
    ) -> Vec<(&Arc<dyn Target>, Detection)> {
        let mut detections = Vec::new();
        for target in &self.targets {
            match target.detect(program) {
                Ok(Some(detection)) if detection.confidence > 0.0 => {
                    logger.debug(&format!(
                        "detect {}: confidence {:.2}",
                        target.meta().id,
                        detection.confidence
                    ));
                    detections.push((target, detection));
                }
                Ok(_) => {}
                Err(e) => {
                    logger.info(&format!("detection failed for {}: {}", target.meta().id, e));
                }
            }
        }
        detections.sort_by(|a, b| {
            b.1.confidence
                .partial_cmp(&a.1.confidence)
                .unwrap_or(Ordering::Equal)
        });
        detections
    }

    /// Resolves the selection to a target, or to nothing when detection
    /// stays under the threshold and no default is set.
    pub fn resolve(
        &self,
        selection: &TargetSelection,
        program: &mut Program,
        threshold: f64,
        logger: &Logger<'_>,
    ) -> Result<Option<&Arc<dyn Target>>, UnknownTargetError> {
        match selection {
            TargetSelection::Skip => Ok(None),
            TargetSelection::Id(id) => match self.get(id) {
                Some(target) => Ok(Some(target)),
                None => Err(UnknownTargetError { id: id.clone() }),
            },
            TargetSelection::Auto => {
                let detections = self.detect(program, logger);
                if let Some((target, detection)) = detections.first() {
                    if detection.confidence >= threshold {
                        logger.info(&format!(
                            "detected {} (confidence {:.2})",
                            target.meta().id,
                            detection.confidence
                        ));
                        return Ok(Some(target));
                    }
                }
                Ok(self.default_target())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;
    use crate::context::DeobfuscatorContext;
    use crate::error::DetectionError;
    use crate::target::TargetMeta;

    struct Fixed {
        meta: TargetMeta,
        confidence: f64,
    }

    impl Fixed {
        fn new(id: &'static str, confidence: f64) -> Self {
            Self {
                meta: TargetMeta {
                    id,
                    name: id,
                    description: None,
                    tags: &[],
                },
                confidence,
            }
        }
    }

    impl Target for Fixed {
        fn meta(&self) -> &TargetMeta {
            &self.meta
        }

        fn detect(&self, _program: &mut Program) -> Result<Option<Detection>, DetectionError> {
            Ok(Some(Detection::new(self.confidence, None)))
        }

        fn deobfuscate(&self, _ctx: &mut DeobfuscatorContext<'_>) {}
    }

    struct Failing;

    impl Target for Failing {
        fn meta(&self) -> &TargetMeta {
            static META: TargetMeta = TargetMeta {
                id: "failing",
                name: "failing",
                description: None,
                tags: &[],
            };
            &META
        }

        fn detect(&self, _program: &mut Program) -> Result<Option<Detection>, DetectionError> {
            Err(DetectionError("boom".into()))
        }

        fn deobfuscate(&self, _ctx: &mut DeobfuscatorContext<'_>) {}
    }

    #[test]
    fn test_detect_sorts_and_swallows_failures() {
        let mut registry = TargetRegistry::new();
        registry.register(Arc::new(Fixed::new("low", 0.2)));
        registry.register(Arc::new(Fixed::new("high", 0.9)));
        registry.register(Arc::new(Fixed::new("zero", 0.0)));
        registry.register(Arc::new(Failing));

        let mut program = parse_program("1;").unwrap();
        let detections = registry.detect(&mut program, &Logger::silent());
        let ids: Vec<_> = detections.iter().map(|(t, _)| t.meta().id).collect();
        assert_eq!(ids, vec!["high", "low"]);
    }

    #[test]
    fn test_resolution_rules() {
        let mut registry = TargetRegistry::new();
        registry.register(Arc::new(Fixed::new("weak", 0.1)));
        registry.register(Arc::new(Fixed::new("fallback", 0.0)));
        registry.set_default("fallback").unwrap();

        let mut program = parse_program("1;").unwrap();
        let logger = Logger::silent();

        // Explicit id wins regardless of detection.
        let target = registry
            .resolve(
                &TargetSelection::Id("weak".into()),
                &mut program,
                0.3,
                &logger,
            )
            .unwrap();
        assert_eq!(target.unwrap().meta().id, "weak");

        // Unknown id is fatal.
        assert!(registry
            .resolve(
                &TargetSelection::Id("nope".into()),
                &mut program,
                0.3,
                &logger
            )
            .is_err());

        // Under the threshold, auto falls back to the default.
        let target = registry
            .resolve(&TargetSelection::Auto, &mut program, 0.3, &logger)
            .unwrap();
        assert_eq!(target.unwrap().meta().id, "fallback");

        // Over the threshold, the best detection wins.
        let target = registry
            .resolve(&TargetSelection::Auto, &mut program, 0.05, &logger)
            .unwrap();
        assert_eq!(target.unwrap().meta().id, "weak");

        // Skip runs nothing.
        let target = registry
            .resolve(&TargetSelection::Skip, &mut program, 0.3, &logger)
            .unwrap();
        assert!(target.is_none());
    }

    #[test]
    fn test_detection_report_serializes() {
        let mut registry = TargetRegistry::new();
        registry.register(Arc::new(Fixed::new("family", 0.7)));

        let mut program = parse_program("1;").unwrap();
        let report: Vec<_> = registry
            .detect(&mut program, &Logger::silent())
            .into_iter()
            .map(|(target, detection)| (target.meta().clone(), detection))
            .collect();

        let json = serde_json::to_string(&report).expect("report failed to serialize");
        assert!(json.contains("\"id\":\"family\""));
        assert!(json.contains("\"confidence\":0.7"));
    }

    #[test]
    fn test_set_default_requires_registration() {
        let mut registry = TargetRegistry::new();
        assert!(registry.set_default("missing").is_err());

        registry.register(Arc::new(Fixed::new("present", 0.5)));
        assert!(registry.set_default("present").is_ok());
        assert_eq!(registry.default_target().unwrap().meta().id, "present");

        registry.unregister("present");
        assert!(registry.default_target().is_none());
        assert!(!registry.has("present"));
    }
}
