use std::collections::HashMap;

use swc_core::common::util::take::Take;
use swc_core::common::DUMMY_SP;
use swc_core::ecma::ast::{
    op, AssignExpr, CallExpr, Callee, ComputedPropName, Expr, ExprOrSpread, FnDecl, Id, Lit,
    MemberExpr, MemberProp, ParenExpr, Pat, PatOrExpr, Program, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::transform::{Tag, Transform, TransformState};

/// Resolves a custom module loader into direct registry assignments.
///
/// The loader is a two-parameter function that splits a dotted path and
/// routes a factory through the value at that path in some registry
/// object:
///
/// ```js
/// M("A.B", function (v) { return v || {}; });
/// ```
///
/// becomes
///
/// ```js
/// R["A"]["B"] = (function (v) { return v || {}; })(R["A"]["B"]);
/// ```
///
/// The loader declaration itself is removed once every call is
/// rewritten.
pub struct ModuleLoaderResolver;

impl Transform for ModuleLoaderResolver {
    fn name(&self) -> &'static str {
        "module-loader resolver"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        // Phase 1: find loader functions and their registries.
        let mut finder = LoaderFinder::default();
        program.visit_mut_with(&mut finder);
        if finder.loaders.is_empty() {
            return;
        }

        // Phase 2: rewrite loader calls into registry assignments.
        let mut rewriter = CallRewriter {
            loaders: &finder.loaders,
            changes: 0,
        };
        program.visit_mut_with(&mut rewriter);
        state.add(rewriter.changes);

        // Phase 3: drop the loader declarations.
        let mut remover = RemoveLoaders {
            loaders: &finder.loaders,
            removed: 0,
        };
        program.visit_mut_with(&mut remover);
        ast::sweep(program);
        state.add(remover.removed);
    }
}

/// Whether the program contains a loader-shaped function. Used by
/// detection.
pub fn find_candidate(program: &mut Program) -> bool {
    let mut finder = LoaderFinder::default();
    program.visit_mut_with(&mut finder);
    !finder.loaders.is_empty()
}

/// loader binding → registry binding
#[derive(Default)]
struct LoaderFinder {
    loaders: HashMap<Id, Id>,
}

impl VisitMut for LoaderFinder {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        fn_decl.visit_mut_children_with(self);

        if fn_decl.function.params.len() != 2 {
            return;
        }
        let body_source = ast::generate(&Expr::Fn(swc_core::ecma::ast::FnExpr {
            ident: None,
            function: fn_decl.function.clone(),
        }));
        if !body_source.contains("split") {
            return;
        }

        let param_ids: Vec<Id> = fn_decl
            .function
            .params
            .iter()
            .filter_map(|p| match &p.pat {
                Pat::Ident(name) => Some(name.to_id()),
                _ => None,
            })
            .collect();

        // The registry is whatever identifier the loader aliases into a
        // local that is not one of its parameters.
        let mut alias = AliasScan {
            param_ids: &param_ids,
            registry: None,
        };
        let mut body_probe = fn_decl.function.body.clone();
        body_probe.visit_mut_with(&mut alias);

        if let Some(registry) = alias.registry {
            self.loaders.insert(fn_decl.ident.to_id(), registry);
        }
    }
}

struct AliasScan<'a> {
    param_ids: &'a [Id],
    registry: Option<Id>,
}

impl<'a> VisitMut for AliasScan<'a> {
    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if self.registry.is_some() {
            return;
        }
        if let Some(Expr::Ident(init)) = declarator.init.as_deref() {
            let id = init.to_id();
            if !self.param_ids.contains(&id) {
                self.registry = Some(id);
            }
        }
    }
}

struct CallRewriter<'a> {
    loaders: &'a HashMap<Id, Id>,
    changes: u32,
}

impl<'a> VisitMut for CallRewriter<'a> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let call = match expr {
            Expr::Call(call) => call,
            _ => return,
        };
        let registry = match ast::callee_ident(call).and_then(|id| self.loaders.get(&id.to_id()))
        {
            Some(registry) => registry,
            None => return,
        };
        if call.args.len() != 2 {
            return;
        }
        let path = match &*call.args[0].expr {
            Expr::Lit(Lit::Str(s)) => s.value.to_string(),
            _ => return,
        };
        let factory = match &*call.args[1].expr {
            f @ (Expr::Fn(_) | Expr::Arrow(_)) => f.clone(),
            _ => return,
        };

        let slot = member_chain(registry, path.split('.'));
        *expr = Expr::Assign(AssignExpr {
            span: DUMMY_SP,
            op: op!("="),
            left: PatOrExpr::Expr(Box::new(slot.clone())),
            right: Box::new(Expr::Call(CallExpr {
                span: DUMMY_SP,
                callee: Callee::Expr(Box::new(Expr::Paren(ParenExpr {
                    span: DUMMY_SP,
                    expr: Box::new(factory),
                }))),
                args: vec![ExprOrSpread {
                    spread: None,
                    expr: Box::new(slot),
                }],
                type_args: None,
            })),
        });
        self.changes += 1;
    }
}

/// Builds `registry["a"]["b"]…` from path segments.
fn member_chain<'a>(registry: &Id, segments: impl Iterator<Item = &'a str>) -> Expr {
    let mut expr = ast::ident_expr(registry);
    for segment in segments {
        expr = Expr::Member(MemberExpr {
            span: DUMMY_SP,
            obj: Box::new(expr),
            prop: MemberProp::Computed(ComputedPropName {
                span: DUMMY_SP,
                expr: Box::new(ast::string_literal(segment)),
            }),
        });
    }
    expr
}

struct RemoveLoaders<'a> {
    loaders: &'a HashMap<Id, Id>,
    removed: u32,
}

impl<'a> VisitMut for RemoveLoaders<'a> {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        if self.loaders.contains_key(&fn_decl.ident.to_id()) {
            fn_decl.take();
            self.removed += 1;
            return;
        }
        fn_decl.visit_mut_children_with(self);
    }
}
