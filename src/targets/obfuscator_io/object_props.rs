use std::collections::HashMap;

use swc_core::ecma::ast::{
    CallExpr, Callee, Expr, Id, Lit, MemberExpr, ObjectLit, Pat, Program, Prop, PropName,
    PropOrSpread, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Collapses constant-object lookups: an object whose properties are
/// all literals is a dictionary the obfuscator routes values through,
/// so `o["kMhzQ"]` becomes the literal it names. The emptied-out object
/// itself is left for the dead-code pass.
pub struct InlineObjectProps;

impl Transform for InlineObjectProps {
    fn name(&self) -> &'static str {
        "inline object props"
    }

    fn tag(&self) -> Tag {
        Tag::Unsafe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut collector = Collector::default();
        program.visit_mut_with(&mut collector);
        if collector.objects.is_empty() {
            return;
        }

        let mut rewriter = Rewriter {
            objects: &collector.objects,
            changes: 0,
        };
        program.visit_mut_with(&mut rewriter);
        state.add(rewriter.changes);
    }
}

#[derive(Default)]
struct Collector {
    objects: HashMap<Id, HashMap<String, Expr>>,
}

impl VisitMut for Collector {
    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        let name = match &declarator.name {
            Pat::Ident(name) => name,
            _ => return,
        };
        let object = match declarator.init.as_deref() {
            Some(Expr::Object(object)) => object,
            _ => return,
        };
        if let Some(props) = literal_props(object) {
            self.objects.insert(name.to_id(), props);
        }
    }
}

/// Accepts the object only when every property is a literal keyed by a
/// plain name; a single out-of-shape property disqualifies it.
fn literal_props(object: &ObjectLit) -> Option<HashMap<String, Expr>> {
    if object.props.is_empty() {
        return None;
    }
    let mut props = HashMap::with_capacity(object.props.len());
    for prop in &object.props {
        let kv = match prop {
            PropOrSpread::Prop(p) => match &**p {
                Prop::KeyValue(kv) => kv,
                _ => return None,
            },
            PropOrSpread::Spread(_) => return None,
        };
        let key = match &kv.key {
            PropName::Ident(id) => id.sym.to_string(),
            PropName::Str(s) => s.value.to_string(),
            _ => return None,
        };
        if !matches!(&*kv.value, Expr::Lit(Lit::Str(_) | Lit::Num(_) | Lit::Bool(_))) {
            return None;
        }
        props.insert(key, (*kv.value).clone());
    }
    Some(props)
}

struct Rewriter<'a> {
    objects: &'a HashMap<Id, HashMap<String, Expr>>,
    changes: u32,
}

impl<'a> Rewriter<'a> {
    fn lookup(&self, member: &MemberExpr) -> Option<&Expr> {
        let obj = match &*member.obj {
            Expr::Ident(id) => self.objects.get(&id.to_id())?,
            _ => return None,
        };
        obj.get(&ast::member_prop_name(member)?)
    }
}

impl<'a> VisitMut for Rewriter<'a> {
    // A lookup in callee position must not become `"literal"()`.
    fn visit_mut_call_expr(&mut self, call: &mut CallExpr) {
        if let Callee::Expr(callee) = &mut call.callee {
            let skip = matches!(&**callee, Expr::Member(member) if self.lookup(member).is_some());
            if !skip {
                callee.visit_mut_with(self);
            }
        }
        call.args.visit_mut_with(self);
    }

    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        if let Expr::Member(member) = expr {
            if let Some(value) = self.lookup(member) {
                *expr = value.clone();
                self.changes += 1;
            }
        }
    }
}
