use swc_core::common::Span;
use swc_core::ecma::ast::{
    op, CallExpr, Callee, Expr, ExprStmt, Id, Lit, Pat, Program, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Applies the load-time rotation an IIFE performs on a string array,
/// then deletes the IIFE.
///
/// The shape is a call like `(function (e, f) { ... }(arr, 2))` whose
/// body moves elements with `push`/`shift`. A prefix `++` handed to an
/// inner call bumps the rotation by one before the loop runs, so it is
/// added to the detected count.
pub struct StringArrayRotator;

impl Transform for StringArrayRotator {
    fn name(&self) -> &'static str {
        "string-array rotator"
    }

    fn tag(&self) -> Tag {
        Tag::Unsafe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut collector = Collector::default();
        program.visit_mut_with(&mut collector);

        for candidate in collector.candidates {
            let mut rotate = Rotate {
                array_id: &candidate.array_id,
                rotation: candidate.rotation,
                rotated: false,
            };
            program.visit_mut_with(&mut rotate);

            if rotate.rotated {
                ast::remove_stmt_by_span(program, candidate.stmt_span);
                state.add(1);
            }
        }
    }
}

/// Whether the program contains a rotator-shaped IIFE. Used by
/// detection.
pub fn find_candidate(program: &mut Program) -> bool {
    let mut collector = Collector::default();
    program.visit_mut_with(&mut collector);
    !collector.candidates.is_empty()
}

struct Candidate {
    array_id: Id,
    rotation: usize,
    stmt_span: Span,
}

#[derive(Default)]
struct Collector {
    candidates: Vec<Candidate>,
}

impl VisitMut for Collector {
    fn visit_mut_expr_stmt(&mut self, stmt: &mut ExprStmt) {
        stmt.visit_mut_children_with(self);

        let call = match ast::unwrap_parens(&stmt.expr) {
            Expr::Call(call) => call,
            _ => return,
        };
        let fn_expr = match &call.callee {
            Callee::Expr(callee) => match ast::unwrap_parens(callee) {
                Expr::Fn(f) => f,
                _ => return,
            },
            _ => return,
        };
        if fn_expr.function.params.len() != 2 {
            return;
        }

        // Arguments must be (identifier, numericLiteral).
        let array_id = match call.args.first().map(|a| &*a.expr) {
            Some(Expr::Ident(id)) => id.to_id(),
            _ => return,
        };
        let base_rotation = match call.args.get(1).map(|a| &*a.expr) {
            Some(Expr::Lit(Lit::Num(n))) if n.value >= 0.0 => n.value as usize,
            _ => return,
        };

        let body = ast::generate(&*stmt.expr);
        if !body.contains("push") || !body.contains("shift") {
            return;
        }

        let mut increments = PrefixIncrementArg(false);
        let mut fn_probe = fn_expr.clone();
        fn_probe.visit_mut_with(&mut increments);
        let rotation = base_rotation + usize::from(increments.0);

        self.candidates.push(Candidate {
            array_id,
            rotation,
            stmt_span: stmt.span,
        });
    }
}

/// Detects an inner call receiving a prefix `++` update expression as
/// its first argument.
struct PrefixIncrementArg(bool);

impl VisitMut for PrefixIncrementArg {
    fn visit_mut_call_expr(&mut self, call: &mut CallExpr) {
        call.visit_mut_children_with(self);

        if let Some(arg) = call.args.first() {
            if let Expr::Update(update) = &*arg.expr {
                if update.prefix && update.op == op!("++") {
                    self.0 = true;
                }
            }
        }
    }
}

struct Rotate<'a> {
    array_id: &'a Id,
    rotation: usize,
    rotated: bool,
}

impl<'a> VisitMut for Rotate<'a> {
    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if self.rotated {
            return;
        }
        match &declarator.name {
            Pat::Ident(name) if name.to_id() == *self.array_id => {}
            _ => return,
        }
        let array = match declarator.init.as_deref_mut() {
            Some(Expr::Array(array)) => array,
            _ => return,
        };

        // shift-then-push R times is a left rotation by R mod length.
        let len = array.elems.len();
        if len > 0 {
            array.elems.rotate_left(self.rotation % len);
        }
        self.rotated = true;
    }
}
