use swc_core::ecma::ast::Program;

use crate::sandbox::Evaluate;
use crate::transform::TransformState;

/// A log severity, per the host log contract: `Info` carries one line
/// per transform, `Debug` carries per-node traces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Debug,
}

/// The host's log callback.
pub type OnLog = dyn Fn(LogLevel, &str);

/// Routes log lines to the host callback when one is installed, and to
/// `tracing` otherwise. Debug lines are dropped entirely unless debug
/// logging was requested.
#[derive(Clone, Copy)]
pub struct Logger<'a> {
    on_log: Option<&'a OnLog>,
    debug_logging: bool,
}

impl<'a> Logger<'a> {
    pub fn new(on_log: Option<&'a OnLog>, debug_logging: bool) -> Self {
        Self {
            on_log,
            debug_logging,
        }
    }

    /// A logger that only feeds `tracing`.
    pub fn silent() -> Self {
        Self {
            on_log: None,
            debug_logging: false,
        }
    }

    pub fn info(&self, message: &str) {
        match self.on_log {
            Some(on_log) => on_log(LogLevel::Info, message),
            None => tracing::info!("{message}"),
        }
    }

    pub fn debug(&self, message: &str) {
        if !self.debug_logging {
            return;
        }
        match self.on_log {
            Some(on_log) => on_log(LogLevel::Debug, message),
            None => tracing::debug!("{message}"),
        }
    }
}

/// Everything a running target gets to work with: the tree, the change
/// counter, an optional evaluator, and the log sinks.
pub struct DeobfuscatorContext<'a> {
    pub program: &'a mut Program,
    pub state: &'a mut TransformState,
    pub sandbox: Option<&'a dyn Evaluate>,
    pub logger: Logger<'a>,
}
