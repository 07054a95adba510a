use swc_core::ecma::ast::{Expr, Lit, Number, Program, Str};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Drops the retained source text on string and numeric literals so
/// regeneration emits the cleanest form: hex escapes become plain
/// characters, `0x1a` becomes `26`, and so on.
pub struct LiteralNormalizer;

impl Transform for LiteralNormalizer {
    fn name(&self) -> &'static str {
        "literal normalizer"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut visitor = Normalizer { changes: 0 };
        program.visit_mut_with(&mut visitor);
        state.add(visitor.changes);
    }
}

struct Normalizer {
    changes: u32,
}

impl VisitMut for Normalizer {
    fn visit_mut_str(&mut self, s: &mut Str) {
        if let Some(raw) = s.raw.take() {
            let canonical = ast::generate(&Expr::Lit(Lit::Str(Str::from(s.value.clone()))));
            if *raw != canonical {
                self.changes += 1;
            }
        }
    }

    fn visit_mut_number(&mut self, n: &mut Number) {
        if let Some(raw) = n.raw.take() {
            let canonical = ast::generate(&Expr::Lit(Lit::Num(Number::from(n.value))));
            if *raw != canonical {
                self.changes += 1;
            }
        }
    }
}
