//! Removes obfuscation-specific indirection from JavaScript programs:
//! literal strings are restored, array/proxy/loader indirection is
//! inlined, control-flow flatteners are unwound, and declarations that
//! become unreferenced along the way are erased.
//!
//! The entry point is [run_deobfuscation]: hand it a parsed tree and
//! options, and the registry picks the obfuscation family (by detection
//! heuristics or explicit selection) whose pipeline then rewrites the
//! tree in place. [deobfuscate_source] wraps parsing and code
//! generation around it for source-to-source use.
//!
//! No attempt is made to execute the whole input program, and original
//! identifier names are not recovered. Transforms tagged unsafe are
//! best-effort rewrites whose correctness depends on the obfuscator
//! honoring its own patterns.

use swc_core::common::{Globals, Mark, GLOBALS};
use swc_core::ecma::ast::Program;
use swc_core::ecma::visit::VisitMutWith;
use swc_ecma_transforms::resolver;

pub mod ast;
pub mod context;
pub mod dead_code;
pub mod error;
pub mod registry;
pub mod sandbox;
pub mod scope;
pub mod target;
pub mod targets;
pub mod transform;

pub use ast::{generate, parse_program};
pub use context::{DeobfuscatorContext, LogLevel, Logger, OnLog};
pub use error::{
    DeobfuscateError, DetectionError, EvalError, ParseError, PatternMismatch, UnknownTargetError,
};
pub use registry::{TargetRegistry, TargetSelection};
pub use sandbox::{EvalOutcome, Evaluate, Sandbox};
pub use target::{Detection, Target, TargetMeta};
pub use transform::{Tag, Transform, TransformState};

/// Minimum detection confidence required before auto mode trusts the
/// best-scoring target over the registry default.
pub const DEFAULT_DETECTION_THRESHOLD: f64 = 0.3;

/// Options for a deobfuscation run.
pub struct DeobfuscationOptions {
    /// How to choose the target.
    pub target: TargetSelection,

    /// Detection threshold for auto mode.
    pub threshold: f64,

    /// The evaluator handed to targets that execute fragments of the
    /// input. Without one, the obfuscator.io pipeline is a no-op.
    pub sandbox: Option<Box<dyn Evaluate>>,

    /// Host log callback. When absent, log lines go to `tracing`.
    pub on_log: Option<Box<OnLog>>,

    /// Emit per-node debug traces.
    pub debug_logging: bool,
}

impl Default for DeobfuscationOptions {
    fn default() -> Self {
        Self {
            target: TargetSelection::Auto,
            threshold: DEFAULT_DETECTION_THRESHOLD,
            sandbox: None,
            on_log: None,
            debug_logging: false,
        }
    }
}

impl DeobfuscationOptions {
    /// Default options with the built-in [Sandbox] installed.
    pub fn with_sandbox() -> Self {
        Self {
            sandbox: Some(Box::new(Sandbox::new())),
            ..Self::default()
        }
    }
}

/// Runs deobfuscation against the built-in registry.
/// Returns the accumulated change count.
pub fn run_deobfuscation(
    program: &mut Program,
    options: &DeobfuscationOptions,
) -> Result<TransformState, DeobfuscateError> {
    let registry = TargetRegistry::with_defaults();
    run_deobfuscation_with(&registry, program, options)
}

/// Runs deobfuscation against a caller-supplied registry.
///
/// The tree is rewritten in place; identifier resolution runs first so
/// every pipeline sees accurate bindings. Fatal errors are limited to
/// an unknown target id — everything local (evaluation failures,
/// pattern mismatches, detection errors) is logged and skipped.
pub fn run_deobfuscation_with(
    registry: &TargetRegistry,
    program: &mut Program,
    options: &DeobfuscationOptions,
) -> Result<TransformState, DeobfuscateError> {
    let logger = Logger::new(options.on_log.as_deref(), options.debug_logging);

    let globals = Globals::new();
    GLOBALS.set(&globals, || {
        program.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));

        let mut state = TransformState::default();
        let target = registry.resolve(&options.target, program, options.threshold, &logger)?;

        match target {
            Some(target) => {
                logger.info(&format!("running target {}", target.meta().id));
                {
                    let mut ctx = DeobfuscatorContext {
                        program,
                        state: &mut state,
                        sandbox: options.sandbox.as_deref(),
                        logger,
                    };
                    target.deobfuscate(&mut ctx);
                }
                for mut post in target.post_transforms() {
                    transform::apply_transform(post.as_mut(), program, &mut state, &logger);
                }
            }
            None => {
                logger.info("no target matched, tree left unchanged");
            }
        }
        Ok(state)
    })
}

/// Parses, deobfuscates, and regenerates source in one call.
pub fn deobfuscate_source(
    source: &str,
    options: &DeobfuscationOptions,
) -> Result<String, DeobfuscateError> {
    let mut program = ast::parse_program(source)?;
    run_deobfuscation(&mut program, options)?;
    Ok(ast::generate(&program))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_obfuscator_io_happy_path() {
        let source = concat!(
            "var f = (function () {",
            "  var A = [\"hello\", \"world\"];",
            "  return function (i) { return A[i]; };",
            "})();",
            "console.log(f(0) + \" \" + f(1));",
        );

        let options = DeobfuscationOptions::with_sandbox();
        let output = deobfuscate_source(source, &options).expect("deobfuscation failed");

        assert!(output.contains("console.log(\"hello world\")"));
        assert!(!output.contains("\"hello\", \"world\""));
        assert!(!output.contains("var f"));
        assert!(!output.contains("var A"));
    }

    #[test]
    fn test_second_run_converges() {
        let source = concat!(
            "var f = (function () {",
            "  var A = [\"hello\", \"world\"];",
            "  return function (i) { return A[i]; };",
            "})();",
            "console.log(f(0) + \" \" + f(1));",
        );

        let options = DeobfuscationOptions::with_sandbox();
        let first = deobfuscate_source(source, &options).unwrap();

        let mut program = ast::parse_program(&first).unwrap();
        let second_options = DeobfuscationOptions::with_sandbox();
        let state = run_deobfuscation(&mut program, &second_options).unwrap();
        assert_eq!(state.changes, 0);
        assert_eq!(ast::generate(&program), first);
    }

    #[test]
    fn test_abba_pipeline_by_id() {
        let source = concat!(
            "var _0x1 = (function (a, b) { return [\"alpha\", \"beta\"]; }(this, 0x42));",
            "use(_0x1[0]);",
        );

        let options = DeobfuscationOptions {
            target: TargetSelection::Id("abba".into()),
            ..DeobfuscationOptions::default()
        };
        let output = deobfuscate_source(source, &options).unwrap();
        assert!(output.contains("\"alpha\""));
        assert!(!output.contains("0x42"));
    }

    #[test]
    fn test_unknown_target_id_is_fatal() {
        let options = DeobfuscationOptions {
            target: TargetSelection::Id("nope".into()),
            ..DeobfuscationOptions::default()
        };
        let err = deobfuscate_source("1;", &options).unwrap_err();
        assert!(matches!(err, DeobfuscateError::UnknownTarget(_)));
    }

    #[test]
    fn test_skip_runs_nothing() {
        let options = DeobfuscationOptions {
            target: TargetSelection::Skip,
            ..DeobfuscationOptions::default()
        };
        let mut program = ast::parse_program("var f = (function () { return 1; })();").unwrap();
        let state = run_deobfuscation(&mut program, &options).unwrap();
        assert_eq!(state.changes, 0);
    }

    #[test]
    fn test_without_evaluator_obfuscator_io_is_a_no_op() {
        let source = "var A = ['a', 'b']; function dec(i) { return A[i]; } use(dec(0));";
        let options = DeobfuscationOptions::default();
        let mut program = ast::parse_program(source).unwrap();
        let state = run_deobfuscation(&mut program, &options).unwrap();
        assert_eq!(state.changes, 0);
    }

    #[test]
    fn test_log_callback_receives_summaries() {
        use std::sync::{Arc, Mutex};

        let lines: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&lines);
        let options = DeobfuscationOptions {
            on_log: Some(Box::new(move |level, message| {
                if level == LogLevel::Info {
                    sink.lock().unwrap().push(message.to_string());
                }
            })),
            ..DeobfuscationOptions::with_sandbox()
        };

        deobfuscate_source("console.log(1);", &options).unwrap();
        assert!(!lines.lock().unwrap().is_empty());
    }
}
