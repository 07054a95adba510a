use swc_core::ecma::ast::{
    ArrayLit, CallExpr, Callee, Expr, ExprOrSpread, Lit, Pat, Program, ReturnStmt, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::sandbox::{Evaluate, Sandbox};
use crate::transform::{Tag, Transform, TransformState};

/// Rewrites string-array initializers built by an IIFE into plain array
/// literals.
///
/// ```js
/// var _0x1 = (function (a, b) { return ["alpha", "beta"]; }(this, 0x42));
/// ```
///
/// becomes
///
/// ```js
/// var _0x1 = ["alpha", "beta"];
/// ```
///
/// The IIFE is evaluated in a fresh sandbox with the declared name bound
/// to `undefined`, since these initializers sometimes reference their
/// own binding. Non-array results and evaluation failures leave the
/// declarator unchanged.
pub struct StringArrayExtractor;

impl Transform for StringArrayExtractor {
    fn name(&self) -> &'static str {
        "string-array extractor"
    }

    fn tag(&self) -> Tag {
        Tag::Unsafe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut visitor = Extractor { changes: 0 };
        program.visit_mut_with(&mut visitor);
        state.add(visitor.changes);
    }
}

/// Whether the program contains at least one extractable declarator.
/// Used by detection; nothing is evaluated.
pub fn find_candidate(program: &mut Program) -> bool {
    struct Probe(bool);

    impl VisitMut for Probe {
        fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
            if self.0 {
                return;
            }
            if matches_candidate(declarator) {
                self.0 = true;
                return;
            }
            declarator.visit_mut_children_with(self);
        }
    }

    let mut probe = Probe(false);
    program.visit_mut_with(&mut probe);
    probe.0
}

/// The probe: the initializer is an immediately-invoked function
/// expression that either takes a string-literal argument or returns an
/// array literal.
fn matches_candidate(declarator: &VarDeclarator) -> bool {
    if !matches!(&declarator.name, Pat::Ident(_)) {
        return false;
    }
    let init = match &declarator.init {
        Some(init) => ast::unwrap_parens(init),
        None => return false,
    };
    let call = match init {
        Expr::Call(call) => call,
        _ => return false,
    };
    let callee = match &call.callee {
        Callee::Expr(expr) => ast::unwrap_parens(expr),
        _ => return false,
    };
    let fn_expr = match callee {
        Expr::Fn(f) => f,
        _ => return false,
    };

    has_string_argument(call) || returns_array_literal(fn_expr)
}

fn has_string_argument(call: &CallExpr) -> bool {
    call.args
        .iter()
        .any(|arg| matches!(&*arg.expr, Expr::Lit(Lit::Str(_))))
}

fn returns_array_literal(fn_expr: &swc_core::ecma::ast::FnExpr) -> bool {
    struct Finder(bool);

    impl VisitMut for Finder {
        fn visit_mut_return_stmt(&mut self, ret: &mut ReturnStmt) {
            if let Some(arg) = &ret.arg {
                if matches!(ast::unwrap_parens(arg), Expr::Array(_)) {
                    self.0 = true;
                }
            }
            ret.visit_mut_children_with(self);
        }
    }

    let mut fn_expr = fn_expr.clone();
    let mut finder = Finder(false);
    fn_expr.visit_mut_with(&mut finder);
    finder.0
}

struct Extractor {
    changes: u32,
}

impl VisitMut for Extractor {
    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if !matches_candidate(declarator) {
            return;
        }
        let name = match &declarator.name {
            Pat::Ident(id) => id.sym.to_string(),
            _ => return,
        };
        let init = match &declarator.init {
            Some(init) => init,
            None => return,
        };

        let sandbox = Sandbox::new();
        sandbox.bind_undefined(&name);
        let source = format!("({})", ast::generate(&**init));

        let strings = match sandbox.eval(&source) {
            Ok(outcome) => match outcome.into_string_array() {
                Some(strings) => strings,
                None => return,
            },
            Err(_) => return,
        };

        declarator.init = Some(Box::new(Expr::Array(ArrayLit {
            span: Default::default(),
            elems: strings
                .into_iter()
                .map(|s| {
                    Some(ExprOrSpread {
                        spread: None,
                        expr: Box::new(ast::string_literal(s)),
                    })
                })
                .collect(),
        })));
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
        StringArrayExtractor.apply(&mut program, &mut state);
        (generate(&program), state.changes)
    }

    #[test]
    fn test_extracts_array_iife() {
        let (output, changes) = run(
            "var _0x1 = (function (a, b) { return ['alpha', 'beta']; }(this, 0x42));",
        );
        assert!(changes >= 1);
        assert!(output.contains("\"alpha\""));
        assert!(output.contains("\"beta\""));
        assert!(!output.contains("function"));
    }

    #[test]
    fn test_self_referencing_initializer() {
        let (output, changes) = run(
            "var list = (function () { return typeof list === 'undefined' ? ['a'] : []; }());",
        );
        assert_eq!(changes, 1);
        assert!(output.contains("\"a\""));
    }

    #[test]
    fn test_non_array_result_is_left_alone() {
        let (output, changes) = run("var n = (function () { return 42; }('tag'));");
        assert_eq!(changes, 0);
        assert!(output.contains("function"));
    }

    #[test]
    fn test_plain_initializers_are_left_alone() {
        let (_, changes) = run("var a = [1, 2]; var b = f();");
        assert_eq!(changes, 0);
    }
}
