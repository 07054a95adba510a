use std::collections::HashMap;

use swc_core::common::util::take::Take;
use swc_core::ecma::ast::{
    op, AssignExpr, BinExpr, Expr, FnDecl, Function, Id, Lit, MemberExpr, MemberProp, Pat,
    PatOrExpr, Program, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::context::Logger;
use crate::error::PatternMismatch;
use crate::transform::{Tag, Transform, TransformState};

/// A recognized proxy function over a string array.
struct ProxyDescriptor {
    /// The array binding the proxy dereferences.
    array_id: Id,

    /// Subtracted from the call's index argument.
    offset: f64,

    /// The array's elements, captured once the array resolves.
    strings: Vec<String>,
}

/// Replaces calls to string-array proxy functions with the string they
/// select, then removes the proxies.
///
/// A proxy takes one or two parameters, reads a free identifier with a
/// computed member expression, and normalizes its index with an
/// assignment like `d = d - 0x10`. Call sites pass the index as a
/// numeric literal or as a decimal/hex string; out-of-range indices
/// leave the call in place.
pub struct ProxyInliner<'a> {
    logger: Logger<'a>,
}

impl<'a> ProxyInliner<'a> {
    pub fn new(logger: Logger<'a>) -> Self {
        Self { logger }
    }
}

impl<'a> Transform for ProxyInliner<'a> {
    fn name(&self) -> &'static str {
        "proxy inliner"
    }

    fn tag(&self) -> Tag {
        Tag::Unsafe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        // Phase 1: find proxy-shaped functions and the arrays they read.
        let mut finder = ProxyFinder::default();
        program.visit_mut_with(&mut finder);

        let mut proxies: HashMap<Id, ProxyDescriptor> = HashMap::new();
        for (proxy_id, array_id, offset) in finder.candidates {
            let mut capture = CaptureStrings {
                array_id: &array_id,
                strings: None,
            };
            program.visit_mut_with(&mut capture);
            match capture.strings {
                Some(strings) => {
                    proxies.insert(
                        proxy_id,
                        ProxyDescriptor {
                            array_id,
                            offset,
                            strings,
                        },
                    );
                }
                None => {
                    let mismatch = PatternMismatch::new(
                        "an array-of-strings declarator",
                        format!("binding {} resolves to something else", array_id.0),
                    );
                    self.logger
                        .debug(&format!("skipping proxy candidate {}: {}", proxy_id.0, mismatch));
                }
            }
        }
        if proxies.is_empty() {
            return;
        }
        for (id, proxy) in &proxies {
            self.logger.debug(&format!(
                "proxy {} over array {} (offset {}, {} strings)",
                id.0,
                proxy.array_id.0,
                proxy.offset,
                proxy.strings.len()
            ));
        }

        // Phase 2: rewrite literal-index call sites.
        let mut inliner = CallSiteInliner {
            proxies: &proxies,
            changes: 0,
        };
        program.visit_mut_with(&mut inliner);
        state.add(inliner.changes);

        // Phase 3: drop the proxy declarations.
        let mut remover = RemoveProxies {
            proxies: &proxies,
            removed: 0,
        };
        program.visit_mut_with(&mut remover);
        ast::sweep(program);
        state.add(remover.removed);
    }
}

/// Whether the program contains a proxy-shaped function. Used by
/// detection; arrays are not resolved.
pub fn find_candidate(program: &mut Program) -> bool {
    let mut finder = ProxyFinder::default();
    program.visit_mut_with(&mut finder);
    !finder.candidates.is_empty()
}

#[derive(Default)]
struct ProxyFinder {
    /// (proxy binding, array binding, offset)
    candidates: Vec<(Id, Id, f64)>,
}

impl ProxyFinder {
    fn inspect(&mut self, proxy_id: Id, function: &Function) {
        let param_count = function.params.len();
        if !(1..=2).contains(&param_count) {
            return;
        }
        let param_ids: Vec<Id> = function
            .params
            .iter()
            .filter_map(|p| match &p.pat {
                Pat::Ident(name) => Some(name.to_id()),
                _ => None,
            })
            .collect();

        let mut body = BodyScan {
            param_ids: &param_ids,
            array_id: None,
            offset: None,
        };
        let mut function_probe = function.clone();
        function_probe.body.visit_mut_with(&mut body);

        if let Some(array_id) = body.array_id {
            self.candidates
                .push((proxy_id, array_id, body.offset.unwrap_or(0.0)));
        }
    }
}

impl VisitMut for ProxyFinder {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        fn_decl.visit_mut_children_with(self);
        self.inspect(fn_decl.ident.to_id(), &fn_decl.function);
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if let (Pat::Ident(name), Some(init)) = (&declarator.name, declarator.init.as_deref()) {
            if let Expr::Fn(fn_expr) = ast::unwrap_parens(init) {
                self.inspect(name.to_id(), &fn_expr.function);
            }
        }
    }
}

/// Scans a candidate body for the computed read of a free identifier
/// and the `param - literal` offset assignment.
struct BodyScan<'a> {
    param_ids: &'a [Id],
    array_id: Option<Id>,
    offset: Option<f64>,
}

impl<'a> VisitMut for BodyScan<'a> {
    fn visit_mut_member_expr(&mut self, member: &mut MemberExpr) {
        member.visit_mut_children_with(self);

        if self.array_id.is_some() {
            return;
        }
        if let (Expr::Ident(obj), MemberProp::Computed(_)) = (&*member.obj, &member.prop) {
            let id = obj.to_id();
            if !self.param_ids.contains(&id) {
                self.array_id = Some(id);
            }
        }
    }

    fn visit_mut_assign_expr(&mut self, assign: &mut AssignExpr) {
        assign.visit_mut_children_with(self);

        if self.offset.is_some() || assign.op != op!("=") {
            return;
        }
        let assigns_param = match &assign.left {
            PatOrExpr::Pat(pat) => matches!(&**pat, Pat::Ident(name) if self.param_ids.contains(&name.to_id())),
            PatOrExpr::Expr(expr) => {
                matches!(&**expr, Expr::Ident(id) if self.param_ids.contains(&id.to_id()))
            }
        };
        if !assigns_param {
            return;
        }
        if let Expr::Bin(BinExpr {
            op: bin_op,
            left,
            right,
            ..
        }) = &*assign.right
        {
            if *bin_op == op!(bin, "-") {
                if let (Expr::Ident(left_id), Expr::Lit(Lit::Num(n))) = (&**left, &**right) {
                    if self.param_ids.contains(&left_id.to_id()) {
                        self.offset = Some(n.value);
                    }
                }
            }
        }
    }
}

/// Resolves an array binding to its string elements.
struct CaptureStrings<'a> {
    array_id: &'a Id,
    strings: Option<Vec<String>>,
}

impl<'a> VisitMut for CaptureStrings<'a> {
    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if self.strings.is_some() {
            return;
        }
        match &declarator.name {
            Pat::Ident(name) if name.to_id() == *self.array_id => {}
            _ => return,
        }
        let array = match declarator.init.as_deref() {
            Some(Expr::Array(array)) => array,
            _ => return,
        };

        let mut strings = Vec::with_capacity(array.elems.len());
        for elem in &array.elems {
            match elem {
                Some(e) if e.spread.is_none() => match &*e.expr {
                    Expr::Lit(Lit::Str(s)) => strings.push(s.value.to_string()),
                    _ => return,
                },
                _ => return,
            }
        }
        self.strings = Some(strings);
    }
}

struct CallSiteInliner<'a> {
    proxies: &'a HashMap<Id, ProxyDescriptor>,
    changes: u32,
}

impl<'a> VisitMut for CallSiteInliner<'a> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let call = match expr {
            Expr::Call(call) => call,
            _ => return,
        };
        let proxy = match ast::callee_ident(call).and_then(|id| self.proxies.get(&id.to_id())) {
            Some(proxy) => proxy,
            None => return,
        };
        let raw_index = match call.args.first().map(|a| &*a.expr).and_then(ast::literal_index) {
            Some(value) => value,
            None => return,
        };

        let index = raw_index - proxy.offset;
        if index < 0.0 || index.fract() != 0.0 || index as usize >= proxy.strings.len() {
            // Out of range: the call stays.
            return;
        }

        *expr = ast::string_literal(proxy.strings[index as usize].as_str());
        self.changes += 1;
    }
}

struct RemoveProxies<'a> {
    proxies: &'a HashMap<Id, ProxyDescriptor>,
    removed: u32,
}

impl<'a> VisitMut for RemoveProxies<'a> {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        if self.proxies.contains_key(&fn_decl.ident.to_id()) {
            fn_decl.take();
            self.removed += 1;
            return;
        }
        fn_decl.visit_mut_children_with(self);
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        if let Pat::Ident(name) = &declarator.name {
            if self.proxies.contains_key(&name.to_id()) {
                declarator.name.take();
                self.removed += 1;
                return;
            }
        }
        declarator.visit_mut_children_with(self);
    }
}
