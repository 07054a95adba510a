use serde::Serialize;
use swc_core::ecma::ast::Program;

use crate::context::Logger;

/// Whether a transform preserves semantics unconditionally, or only
/// when the obfuscator honored its own patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tag {
    Safe,
    Unsafe,
}

/// The running mutation count for a deobfuscation run. Every transform
/// adds the mutations it performed; the final count is the run's sole
/// observable summary.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransformState {
    pub changes: u32,
}

impl TransformState {
    pub fn add(&mut self, changes: u32) {
        self.changes += changes;
    }
}

/// A named tree rewrite.
///
/// Most implementations wrap a `VisitMut` visitor that counts its own
/// mutations; transforms that need custom control over traversal (the
/// dead-code pass, the decoded-string inliner) implement `apply`
/// directly.
pub trait Transform {
    fn name(&self) -> &'static str;

    fn tag(&self) -> Tag;

    fn apply(&mut self, program: &mut Program, state: &mut TransformState);
}

/// Applies one transform and logs its change count.
/// Returns the number of mutations the transform performed.
pub fn apply_transform(
    transform: &mut dyn Transform,
    program: &mut Program,
    state: &mut TransformState,
    logger: &Logger<'_>,
) -> u32 {
    let before = state.changes;
    transform.apply(program, state);
    let delta = state.changes - before;
    logger.info(&format!("{}: {} changes", transform.name(), delta));
    delta
}

/// Applies a sequence of transforms in list order. Each transform
/// observes all mutations of the previous one.
pub fn apply_transforms(
    transforms: &mut [&mut dyn Transform],
    program: &mut Program,
    state: &mut TransformState,
    logger: &Logger<'_>,
) -> u32 {
    let before = state.changes;
    for transform in transforms.iter_mut() {
        apply_transform(&mut **transform, program, state, logger);
    }
    state.changes - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;

    struct Counter(u32);

    impl Transform for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        fn tag(&self) -> Tag {
            Tag::Safe
        }

        fn apply(&mut self, _program: &mut Program, state: &mut TransformState) {
            state.add(self.0);
        }
    }

    #[test]
    fn test_apply_transform_reports_delta() {
        let mut program = parse_program("1;").unwrap();
        let mut state = TransformState::default();
        let logger = Logger::silent();

        let delta = apply_transform(&mut Counter(3), &mut program, &mut state, &logger);
        assert_eq!(delta, 3);
        assert_eq!(state.changes, 3);

        let delta = apply_transforms(
            &mut [&mut Counter(1), &mut Counter(2)],
            &mut program,
            &mut state,
            &logger,
        );
        assert_eq!(delta, 3);
        assert_eq!(state.changes, 6);
    }
}
