use swc_core::ecma::ast::{op, Expr, Lit, Program};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Folds `"a" + "b"` into `"ab"`. Inlined decoder strings arrive as
/// chains of small concatenations; visiting bottom-up collapses a whole
/// left-leaning chain in one traversal.
pub struct MergeStrings;

impl Transform for MergeStrings {
    fn name(&self) -> &'static str {
        "merge strings"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut visitor = Merger { changes: 0 };
        program.visit_mut_with(&mut visitor);
        state.add(visitor.changes);
    }
}

struct Merger {
    changes: u32,
}

impl VisitMut for Merger {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let bin = match expr {
            Expr::Bin(bin) if bin.op == op!(bin, "+") => bin,
            _ => return,
        };
        let (left, right) = match (&*bin.left, &*bin.right) {
            (Expr::Lit(Lit::Str(left)), Expr::Lit(Lit::Str(right))) => (left, right),
            _ => return,
        };

        let merged = format!("{}{}", left.value, right.value);
        *expr = ast::string_literal(merged);
        self.changes += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{generate, parse_program};

    fn run(source: &str) -> (String, u32) {
        let mut program = parse_program(source).expect("parse failed");
        let mut state = TransformState::default();
        MergeStrings.apply(&mut program, &mut state);
        (generate(&program), state.changes)
    }

    #[test]
    fn test_merges_chains() {
        let (output, changes) = run("console.log(\"hello\" + \" \" + \"world\");");
        assert_eq!(changes, 2);
        assert!(output.contains("\"hello world\""));
    }

    #[test]
    fn test_leaves_non_string_operands() {
        let (output, changes) = run("use(1 + 2, 'a' + b);");
        assert_eq!(changes, 0);
        assert!(output.contains("'a' + b") || output.contains("\"a\" + b"));
    }
}
