use std::collections::HashMap;

use swc_core::ecma::ast::{
    op, Expr, ExportDecl, Id, MemberExpr, MemberProp, Pat, PatOrExpr, Program, Prop, PropName,
    PropOrSpread, UnaryOp, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

/// What kind of declaration a binding comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    /// A function declaration. Always safe to remove when unreferenced.
    Function,

    /// A variable declarator. Safe to remove only when its initializer
    /// is pure.
    Variable { pure_init: bool },
}

/// A named declaration together with its live reference and write
/// counts.
#[derive(Debug, Clone)]
pub struct Binding {
    pub kind: DeclarationKind,
    /// Reads of the binding outside its own declaration subtree.
    pub references: usize,
    /// Assignments to the binding outside its own declaration subtree.
    pub writes: usize,
}

impl Binding {
    /// Whether the dead-code pass may delete this binding.
    pub fn removable(&self) -> bool {
        self.references == 0
            && self.writes == 0
            && match self.kind {
                DeclarationKind::Function => true,
                DeclarationKind::Variable { pure_init } => pure_init,
            }
    }
}

/// A snapshot of every binding in the program with live counts.
///
/// Built by walking the current tree, so counts never include references
/// under nodes that earlier transforms already deleted. References found
/// inside a binding's own declaration subtree (recursion, the
/// self-rebinding trick obfuscators use) are not counted either; a
/// declaration that only mentions itself is dead.
pub struct ScopeIndex {
    bindings: HashMap<Id, Binding>,
}

impl ScopeIndex {
    /// Walks the program and collects all bindings with their counts.
    pub fn crawl(program: &mut Program) -> Self {
        let mut collector = Collector::default();
        program.visit_mut_with(&mut collector);
        Self {
            bindings: collector.bindings,
        }
    }

    /// All bindings that [Binding::removable] approves.
    pub fn removable(&self) -> impl Iterator<Item = &Id> {
        self.bindings
            .iter()
            .filter(|(_, binding)| binding.removable())
            .map(|(id, _)| id)
    }

    pub fn get(&self, id: &Id) -> Option<&Binding> {
        self.bindings.get(id)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Whether an initializer is free of observable side effects: literals,
/// functions, identifiers, member expressions, and arrays, objects,
/// unary, binary, and conditional expressions over pure operands.
/// Calls and `new` are never pure.
pub fn is_pure(expr: &Expr) -> bool {
    match expr {
        Expr::Lit(_) | Expr::Ident(_) | Expr::Fn(_) | Expr::Arrow(_) | Expr::This(_) => true,
        Expr::Member(_) => true,
        Expr::Array(array) => array.elems.iter().all(|elem| match elem {
            Some(e) => e.spread.is_none() && is_pure(&e.expr),
            None => true,
        }),
        Expr::Object(object) => object.props.iter().all(|prop| match prop {
            PropOrSpread::Prop(p) => match &**p {
                Prop::KeyValue(kv) => prop_name_is_pure(&kv.key) && is_pure(&kv.value),
                Prop::Shorthand(_) => true,
                Prop::Method(m) => prop_name_is_pure(&m.key),
                Prop::Getter(g) => prop_name_is_pure(&g.key),
                Prop::Setter(s) => prop_name_is_pure(&s.key),
                Prop::Assign(_) => false,
            },
            PropOrSpread::Spread(_) => false,
        }),
        Expr::Unary(unary) => unary.op != UnaryOp::Delete && is_pure(&unary.arg),
        Expr::Bin(bin) => is_pure(&bin.left) && is_pure(&bin.right),
        Expr::Cond(cond) => is_pure(&cond.test) && is_pure(&cond.cons) && is_pure(&cond.alt),
        Expr::Paren(paren) => is_pure(&paren.expr),
        Expr::Seq(seq) => seq.exprs.iter().all(|e| is_pure(e)),
        Expr::Tpl(tpl) => tpl.exprs.iter().all(|e| is_pure(e)),
        _ => false,
    }
}

fn prop_name_is_pure(name: &PropName) -> bool {
    match name {
        PropName::Computed(computed) => is_pure(&computed.expr),
        _ => true,
    }
}

#[derive(Default)]
struct Collector {
    bindings: HashMap<Id, Binding>,

    /// Declarations whose subtree the walk is currently inside; used to
    /// discard self-references.
    declaration_stack: Vec<Id>,

    /// Whether the walk is inside an export declaration. Exported
    /// bindings are part of the module's surface and never recorded.
    in_export: bool,
}

impl Collector {
    fn record(&mut self, id: Id, kind: DeclarationKind) {
        if self.in_export {
            return;
        }
        self.bindings.entry(id).or_insert(Binding {
            kind,
            references: 0,
            writes: 0,
        });
    }

    fn count_reference(&mut self, id: &Id) {
        if self.declaration_stack.contains(id) {
            return;
        }
        if let Some(binding) = self.bindings.get_mut(id) {
            binding.references += 1;
        }
    }

    fn count_write(&mut self, id: &Id) {
        if self.declaration_stack.contains(id) {
            return;
        }
        if let Some(binding) = self.bindings.get_mut(id) {
            binding.writes += 1;
        }
    }
}

impl VisitMut for Collector {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut swc_core::ecma::ast::FnDecl) {
        let id = fn_decl.ident.to_id();
        self.record(id.clone(), DeclarationKind::Function);

        self.declaration_stack.push(id);
        fn_decl.function.visit_mut_with(self);
        self.declaration_stack.pop();
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        if let Pat::Ident(name) = &declarator.name {
            let id = name.to_id();
            let pure_init = declarator.init.as_deref().map_or(true, is_pure);
            self.record(id.clone(), DeclarationKind::Variable { pure_init });

            self.declaration_stack.push(id);
            declarator.init.visit_mut_with(self);
            self.declaration_stack.pop();
        } else {
            // Destructuring declarators are never candidates; walk the
            // initializer for references only.
            declarator.init.visit_mut_with(self);
        }
    }

    fn visit_mut_ident(&mut self, ident: &mut swc_core::ecma::ast::Ident) {
        let id = ident.to_id();
        self.count_reference(&id);
    }

    // Non-computed member properties are names, not references.
    fn visit_mut_member_expr(&mut self, member: &mut MemberExpr) {
        member.obj.visit_mut_with(self);
        if let MemberProp::Computed(computed) = &mut member.prop {
            computed.expr.visit_mut_with(self);
        }
    }

    // Object literal keys are names unless computed.
    fn visit_mut_prop_name(&mut self, name: &mut PropName) {
        if let PropName::Computed(computed) = name {
            computed.expr.visit_mut_with(self);
        }
    }

    fn visit_mut_assign_expr(&mut self, assign: &mut swc_core::ecma::ast::AssignExpr) {
        match &mut assign.left {
            PatOrExpr::Pat(pat) => {
                if let Pat::Ident(name) = &**pat {
                    let id = name.to_id();
                    self.count_write(&id);
                    // Compound assignments read before they write.
                    if assign.op != op!("=") {
                        self.count_reference(&id);
                    }
                } else {
                    pat.visit_mut_with(self);
                }
            }
            PatOrExpr::Expr(expr) => {
                if let Expr::Ident(ident) = &**expr {
                    let id = ident.to_id();
                    self.count_write(&id);
                    if assign.op != op!("=") {
                        self.count_reference(&id);
                    }
                } else {
                    expr.visit_mut_with(self);
                }
            }
        }
        assign.right.visit_mut_with(self);
    }

    fn visit_mut_update_expr(&mut self, update: &mut swc_core::ecma::ast::UpdateExpr) {
        if let Expr::Ident(ident) = &*update.arg {
            let id = ident.to_id();
            self.count_write(&id);
            self.count_reference(&id);
        } else {
            update.arg.visit_mut_with(self);
        }
    }

    fn visit_mut_export_decl(&mut self, export: &mut ExportDecl) {
        let old = self.in_export;
        self.in_export = true;
        export.visit_mut_children_with(self);
        self.in_export = old;
    }

    // Labels are not identifier references.
    fn visit_mut_labeled_stmt(&mut self, stmt: &mut swc_core::ecma::ast::LabeledStmt) {
        stmt.body.visit_mut_with(self);
    }

    fn visit_mut_continue_stmt(&mut self, _stmt: &mut swc_core::ecma::ast::ContinueStmt) {}

    fn visit_mut_break_stmt(&mut self, _stmt: &mut swc_core::ecma::ast::BreakStmt) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;

    fn crawl(source: &str) -> ScopeIndex {
        let mut program = parse_program(source).expect("parse failed");
        ScopeIndex::crawl(&mut program)
    }

    #[test]
    fn test_counts_references() {
        let index = crawl("var a = 1; console.log(a);");
        let binding = index
            .bindings
            .values()
            .next()
            .expect("binding not collected");
        assert_eq!(binding.references, 1);
        assert_eq!(binding.writes, 0);
    }

    #[test]
    fn test_self_reference_not_counted() {
        let index = crawl("function f() { return f(); }");
        let binding = index.bindings.values().next().unwrap();
        assert_eq!(binding.references, 0);
        assert!(binding.removable());
    }

    #[test]
    fn test_call_initializer_not_removable() {
        let index = crawl("var a = doWork();");
        let binding = index.bindings.values().next().unwrap();
        assert!(!binding.removable());
    }

    #[test]
    fn test_member_property_is_not_a_reference() {
        let index = crawl("var log = 1; console.log;");
        let binding = index.bindings.values().next().unwrap();
        assert_eq!(binding.references, 0);
    }

    #[test]
    fn test_purity() {
        for source in ["1", "'a'", "[1, 'b']", "{ a: 1 }", "x => x", "a.b", "1 + 2"] {
            let mut program = parse_program(&format!("({})", source)).unwrap();
            if let Program::Script(script) = &mut program {
                if let swc_core::ecma::ast::Stmt::Expr(e) = &script.body[0] {
                    assert!(is_pure(&e.expr), "{} should be pure", source);
                }
            }
        }
        let mut program = parse_program("(f())").unwrap();
        if let Program::Script(script) = &mut program {
            if let swc_core::ecma::ast::Stmt::Expr(e) = &script.body[0] {
                assert!(!is_pure(&e.expr));
            }
        }
    }
}
