use std::collections::HashMap;

use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::{
    BinExpr, BinaryOp, CallExpr, Callee, Decl, Expr, Id, Lit, MemberExpr, ObjectLit, Pat, Program,
    Prop, PropName, PropOrSpread, Stmt, SwitchStmt, UnaryOp, UpdateExpr, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Flattens control-flow objects: dictionaries whose properties are
/// short template functions or string constants, used to hide plain
/// operators and calls.
///
/// ```js
/// var o = { add: function (a, b) { return a + b; }, word: "start" };
/// o.add(x, 2) + o.word  // becomes  x + 2 + "start"
/// ```
pub struct ControlFlowObject;

impl Transform for ControlFlowObject {
    fn name(&self) -> &'static str {
        "control-flow object"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
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

#[derive(Clone)]
enum PropTemplate {
    /// A constant the member access resolves to.
    Literal(Expr),

    /// `function (a, b) { return a OP b; }`
    Binary(BinaryOp),

    /// `function (f, x, y, ...) { return f(x, y, ...); }`
    Call,
}

#[derive(Default)]
struct Collector {
    objects: HashMap<Id, HashMap<String, PropTemplate>>,
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
        if let Some(props) = template_props(object) {
            self.objects.insert(name.to_id(), props);
        }
    }
}

/// Every property must be a recognizable template, otherwise the object
/// may be real application state and is left alone.
fn template_props(object: &ObjectLit) -> Option<HashMap<String, PropTemplate>> {
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
        let template = classify(&kv.value)?;
        props.insert(key, template);
    }
    Some(props)
}

fn classify(value: &Expr) -> Option<PropTemplate> {
    if matches!(value, Expr::Lit(Lit::Str(_) | Lit::Num(_))) {
        return Some(PropTemplate::Literal(value.clone()));
    }
    let function = match value {
        Expr::Fn(fn_expr) => &fn_expr.function,
        _ => return None,
    };
    let params: Vec<Id> = function
        .params
        .iter()
        .map(|p| match &p.pat {
            Pat::Ident(name) => Some(name.to_id()),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    let body = function.body.as_ref()?;
    if body.stmts.len() != 1 {
        return None;
    }
    let ret = match &body.stmts[0] {
        Stmt::Return(ret) => ret.arg.as_deref()?,
        _ => return None,
    };

    match ret {
        // a OP b over exactly the two parameters
        Expr::Bin(bin) if params.len() == 2 => {
            let left_is_first = matches!(&*bin.left, Expr::Ident(id) if id.to_id() == params[0]);
            let right_is_second = matches!(&*bin.right, Expr::Ident(id) if id.to_id() == params[1]);
            if left_is_first && right_is_second {
                Some(PropTemplate::Binary(bin.op))
            } else {
                None
            }
        }
        // f(x, y, ...) forwarding the parameters in order
        Expr::Call(call) if !params.is_empty() => {
            match ast::callee_ident(call) {
                Some(callee) if callee.to_id() == params[0] => {}
                _ => return None,
            }
            if call.args.len() != params.len() - 1 {
                return None;
            }
            let forwards = call.args.iter().zip(&params[1..]).all(|(arg, param)| {
                arg.spread.is_none()
                    && matches!(&*arg.expr, Expr::Ident(id) if id.to_id() == *param)
            });
            forwards.then_some(PropTemplate::Call)
        }
        _ => None,
    }
}

struct Rewriter<'a> {
    objects: &'a HashMap<Id, HashMap<String, PropTemplate>>,
    changes: u32,
}

impl<'a> Rewriter<'a> {
    fn lookup(&self, member: &MemberExpr) -> Option<PropTemplate> {
        let obj = match &*member.obj {
            Expr::Ident(id) => self.objects.get(&id.to_id())?,
            _ => return None,
        };
        obj.get(&ast::member_prop_name(member)?).cloned()
    }

    fn template_for_callee(&self, call: &CallExpr) -> Option<PropTemplate> {
        match &call.callee {
            Callee::Expr(callee) => match &**callee {
                Expr::Member(member) => self.lookup(member),
                _ => None,
            },
            _ => None,
        }
    }
}

impl<'a> VisitMut for Rewriter<'a> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        // Dispatch calls through the object before ordinary descent
        // would misread the callee member as a value lookup.
        if let Expr::Call(call) = expr {
            if let Some(template) = self.template_for_callee(call) {
                call.args.visit_mut_with(self);

                if call.args.iter().any(|arg| arg.spread.is_some()) {
                    return;
                }
                match template {
                    PropTemplate::Binary(op) if call.args.len() >= 2 => {
                        let mut args = std::mem::take(&mut call.args).into_iter();
                        let left = args.next().map(|a| a.expr);
                        let right = args.next().map(|a| a.expr);
                        if let (Some(left), Some(right)) = (left, right) {
                            *expr = Expr::Bin(BinExpr {
                                span: DUMMY_SP,
                                op,
                                left,
                                right,
                            });
                            self.changes += 1;
                        }
                    }
                    PropTemplate::Call if !call.args.is_empty() => {
                        let mut args = std::mem::take(&mut call.args);
                        let callee = args.remove(0).expr;
                        *expr = Expr::Call(CallExpr {
                            span: DUMMY_SP,
                            callee: Callee::Expr(callee),
                            args,
                            type_args: None,
                        });
                        self.changes += 1;
                    }
                    _ => {}
                }
                return;
            }
        }

        expr.visit_mut_children_with(self);

        if let Expr::Member(member) = expr {
            if let Some(PropTemplate::Literal(value)) = self.lookup(member) {
                *expr = value;
                self.changes += 1;
            }
        }
    }
}

/// Unwinds the flattened `while (true) { switch (order[i++]) { ... } }`
/// dispatcher back into straight-line statements.
pub struct ControlFlowSwitch;

impl Transform for ControlFlowSwitch {
    fn name(&self) -> &'static str {
        "control-flow switch"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        let mut visitor = SwitchUnwinder { changes: 0 };
        program.visit_mut_with(&mut visitor);
        state.add(visitor.changes);
        ast::sweep(program);
    }
}

struct SwitchUnwinder {
    changes: u32,
}

impl VisitMut for SwitchUnwinder {
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);

        let mut i = 0;
        while i < stmts.len() {
            match try_unwind(stmts, i) {
                Some(unwound) => {
                    remove_declarator(stmts, &unwound.order_id);
                    remove_declarator(stmts, &unwound.index_id);
                    stmts.splice(i..=i, unwound.body);
                    self.changes += 1;
                }
                None => i += 1,
            }
        }
    }
}

struct Unwound {
    body: Vec<Stmt>,
    order_id: Id,
    index_id: Id,
}

fn try_unwind(stmts: &[Stmt], index: usize) -> Option<Unwound> {
    let while_stmt = match &stmts[index] {
        Stmt::While(w) => w,
        _ => return None,
    };
    if !is_truthy_const(&while_stmt.test) {
        return None;
    }
    let switch_stmt = match &*while_stmt.body {
        Stmt::Block(block) => match block.stmts.as_slice() {
            [Stmt::Switch(s)] => s,
            [Stmt::Switch(s), Stmt::Break(b)] if b.label.is_none() => s,
            _ => return None,
        },
        _ => return None,
    };

    let (order_id, index_id) = match_discriminant(switch_stmt)?;
    let (sequence, start) = resolve_order(stmts, index, &order_id, &index_id)?;

    let mut body = Vec::new();
    for key in sequence.iter().skip(start) {
        let case = switch_stmt.cases.iter().find(|case| {
            matches!(
                case.test.as_deref(),
                Some(Expr::Lit(Lit::Str(s))) if *s.value == **key
            )
        })?;
        let mut stmts: Vec<Stmt> = case.cons.clone();
        if matches!(stmts.last(), Some(Stmt::Continue(c)) if c.label.is_none()) {
            stmts.pop();
        }
        // Any other jump out of the case means the dispatch order is
        // not straight-line; leave the loop alone.
        if stmts
            .iter()
            .any(|s| matches!(s, Stmt::Continue(_) | Stmt::Break(_)))
        {
            return None;
        }
        body.extend(stmts);
    }

    Some(Unwound {
        body,
        order_id,
        index_id,
    })
}

/// `order[i++]`
fn match_discriminant(switch_stmt: &SwitchStmt) -> Option<(Id, Id)> {
    let member = match &*switch_stmt.discriminant {
        Expr::Member(member) => member,
        _ => return None,
    };
    let order_id = match &*member.obj {
        Expr::Ident(id) => id.to_id(),
        _ => return None,
    };
    let computed = match &member.prop {
        swc_core::ecma::ast::MemberProp::Computed(c) => c,
        _ => return None,
    };
    let index_id = match &*computed.expr {
        Expr::Update(UpdateExpr { op, arg, .. }) if *op == swc_core::ecma::ast::op!("++") => {
            match &**arg {
                Expr::Ident(id) => id.to_id(),
                _ => return None,
            }
        }
        _ => return None,
    };
    Some((order_id, index_id))
}

/// Finds `var order = "4|0|2".split("|"), i = 0;` among the preceding
/// statements.
fn resolve_order(
    stmts: &[Stmt],
    before: usize,
    order_id: &Id,
    index_id: &Id,
) -> Option<(Vec<String>, usize)> {
    let mut sequence = None;
    let mut start = None;

    for stmt in &stmts[..before] {
        let var = match stmt {
            Stmt::Decl(Decl::Var(var)) => var,
            _ => continue,
        };
        for declarator in &var.decls {
            let name = match &declarator.name {
                Pat::Ident(name) => name,
                _ => continue,
            };
            let id = name.to_id();
            if id == *order_id {
                sequence = split_call_sequence(declarator.init.as_deref()?);
            } else if id == *index_id {
                if let Some(Expr::Lit(Lit::Num(n))) = declarator.init.as_deref() {
                    start = Some(n.value as usize);
                }
            }
        }
    }

    Some((sequence?, start?))
}

/// `"a|b|c".split("|")`
fn split_call_sequence(init: &Expr) -> Option<Vec<String>> {
    let call = match ast::unwrap_parens(init) {
        Expr::Call(call) => call,
        _ => return None,
    };
    let member = match &call.callee {
        Callee::Expr(callee) => match &**callee {
            Expr::Member(member) => member,
            _ => return None,
        },
        _ => return None,
    };
    if ast::member_prop_name(member)? != "split" {
        return None;
    }
    let subject = match &*member.obj {
        Expr::Lit(Lit::Str(s)) => s.value.to_string(),
        _ => return None,
    };
    let separator = match call.args.first().map(|a| &*a.expr) {
        Some(Expr::Lit(Lit::Str(s))) => s.value.to_string(),
        _ => return None,
    };
    Some(subject.split(&separator).map(str::to_string).collect())
}

fn is_truthy_const(test: &Expr) -> bool {
    match ast::unwrap_parens(test) {
        Expr::Lit(Lit::Bool(b)) => b.value,
        Expr::Lit(Lit::Num(n)) => n.value != 0.0,
        // !![]
        Expr::Unary(outer) if outer.op == UnaryOp::Bang => match ast::unwrap_parens(&outer.arg) {
            Expr::Unary(inner) if inner.op == UnaryOp::Bang => {
                matches!(ast::unwrap_parens(&inner.arg), Expr::Array(_))
            }
            _ => false,
        },
        _ => false,
    }
}

fn remove_declarator(stmts: &mut Vec<Stmt>, id: &Id) {
    for stmt in stmts.iter_mut() {
        if let Stmt::Decl(Decl::Var(var)) = stmt {
            var.decls.retain(|declarator| {
                !matches!(&declarator.name, Pat::Ident(name) if name.to_id() == *id)
            });
        }
    }
    stmts.retain(|stmt| {
        !matches!(stmt, Stmt::Decl(Decl::Var(var)) if var.decls.is_empty())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{generate, parse_program};
    use swc_core::common::{Globals, Mark, GLOBALS};
    use swc_ecma_transforms::resolver;

    fn run_object(source: &str) -> (String, u32) {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = parse_program(source).expect("parse failed");
            program.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));
            let mut state = TransformState::default();
            ControlFlowObject.apply(&mut program, &mut state);
            (generate(&program), state.changes)
        })
    }

    fn run_switch(source: &str) -> (String, u32) {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = parse_program(source).expect("parse failed");
            program.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));
            let mut state = TransformState::default();
            ControlFlowSwitch.apply(&mut program, &mut state);
            (generate(&program), state.changes)
        })
    }

    #[test]
    fn test_binary_template() {
        let (output, changes) = run_object(
            "var o = { add: function (a, b) { return a + b; } }; use(o.add(x, 2));",
        );
        assert_eq!(changes, 1);
        assert!(output.contains("x + 2"));
    }

    #[test]
    fn test_call_template_and_literal() {
        let (output, changes) = run_object(concat!(
            "var o = { run: function (f, x) { return f(x); }, word: 'start' };",
            "use(o.run(callback, 1), o['word']);",
        ));
        assert_eq!(changes, 2);
        assert!(output.contains("callback(1)"));
        // Cloned literals keep their original quoting.
        assert!(output.contains("'start'"));
    }

    #[test]
    fn test_mixed_object_is_left_alone() {
        let (_, changes) = run_object(
            "var o = { add: function (a, b) { return a + b; }, state: window }; use(o.add(1, 2));",
        );
        assert_eq!(changes, 0);
    }

    #[test]
    fn test_unwinds_switch_dispatcher() {
        let (output, changes) = run_switch(concat!(
            "var order = '2|0|1'.split('|'), i = 0;",
            "while (true) {",
            "  switch (order[i++]) {",
            "    case '0': second(); continue;",
            "    case '1': third(); continue;",
            "    case '2': first(); continue;",
            "  }",
            "  break;",
            "}",
        ));
        assert_eq!(changes, 1);
        let first = output.find("first()").unwrap();
        let second = output.find("second()").unwrap();
        let third = output.find("third()").unwrap();
        assert!(first < second && second < third);
        assert!(!output.contains("switch"));
        assert!(!output.contains("order"));
    }

    #[test]
    fn test_missing_case_aborts_unwind() {
        let (output, changes) = run_switch(concat!(
            "var order = '0|9'.split('|'), i = 0;",
            "while (true) {",
            "  switch (order[i++]) { case '0': a(); continue; }",
            "  break;",
            "}",
        ));
        assert_eq!(changes, 0);
        assert!(output.contains("switch"));
    }
}
