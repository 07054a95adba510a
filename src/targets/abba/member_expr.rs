use swc_core::ecma::ast::{Expr, Ident, Lit, MemberExpr, MemberProp, Program};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Replaces computed member properties with identifiers.
///
/// `obj["name"]` becomes `obj.name` when the property is a valid,
/// non-reserved identifier; anything else (`obj["content-type"]`,
/// `obj["class"]`, `obj["1.2.3"]`) is left in bracket form.
pub struct MemberExpressionSimplifier;

impl Transform for MemberExpressionSimplifier {
    fn name(&self) -> &'static str {
        "member-expression simplifier"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut visitor = Simplifier { changes: 0 };
        program.visit_mut_with(&mut visitor);
        state.add(visitor.changes);
    }
}

struct Simplifier {
    changes: u32,
}

impl VisitMut for Simplifier {
    fn visit_mut_member_expr(&mut self, member_expr: &mut MemberExpr) {
        member_expr.visit_mut_children_with(self);

        if let MemberProp::Computed(property) = &member_expr.prop {
            if let Expr::Lit(Lit::Str(s)) = &*property.expr {
                let name = s.value.to_string();
                if !ast::is_valid_identifier(&name) || ast::is_reserved_word(&name) {
                    return;
                }
                member_expr.prop = MemberProp::Ident(Ident::new(s.value.clone(), property.span));
                self.changes += 1;
            }
        }
    }
}
