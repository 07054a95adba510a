use std::collections::{HashMap, HashSet};

use swc_core::common::util::take::Take;
use swc_core::common::{Mark, Span};
use swc_core::ecma::ast::{
    CallExpr, Expr, ExprStmt, FnDecl, Id, Ident, Pat, Program, ReturnStmt, Stmt, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};
use swc_ecma_transforms::optimization::simplify::expr_simplifier;

use crate::ast;
use crate::context::Logger;
use crate::error::EvalError;
use crate::sandbox::{Evaluate, EvalOutcome};
use crate::transform::{Tag, Transform, TransformState};

use super::string_array::{Decoder, Rotator, StringArray};

/// Drives the external evaluator with the obfuscator's own code: the
/// array declaration, the rotator (if any), and every decoder are
/// defined once, then each decoder call is evaluated verbatim. The
/// decoding codec is therefore the obfuscator's, not ours.
pub struct VMDecoder<'a> {
    sandbox: &'a dyn Evaluate,
    decoder_ids: HashSet<Id>,
    setup_error: Option<EvalError>,
}

impl<'a> VMDecoder<'a> {
    pub fn new(
        sandbox: &'a dyn Evaluate,
        array: &StringArray,
        rotator: Option<&Rotator>,
        decoders: &[Decoder],
    ) -> Self {
        let mut setup = String::with_capacity(array.source.len() + 256);
        setup.push_str(&array.source);
        setup.push('\n');
        if let Some(rotator) = rotator {
            setup.push_str(&rotator.source);
            setup.push('\n');
        }
        for decoder in decoders {
            setup.push_str(&decoder.source);
            setup.push('\n');
        }

        let setup_error = sandbox.eval(&setup).err();
        Self {
            sandbox,
            decoder_ids: decoders.iter().map(|d| d.id.clone()).collect(),
            setup_error,
        }
    }

    /// Whether the array, rotator, and decoders evaluated cleanly.
    pub fn is_ready(&self) -> bool {
        self.setup_error.is_none()
    }

    pub fn setup_error(&self) -> Option<&EvalError> {
        self.setup_error.as_ref()
    }

    pub fn knows(&self, id: &Id) -> bool {
        self.decoder_ids.contains(id)
    }

    /// Evaluates one canonicalized decoder call and returns the string
    /// it produces.
    pub fn decode(&self, call_source: &str) -> Result<String, EvalError> {
        match self.sandbox.eval(call_source)? {
            EvalOutcome::Str(s) => Ok(s),
            other => Err(EvalError::Conversion(format!(
                "decoder returned {:?} instead of a string",
                other
            ))),
        }
    }
}

/// Rewrites alias variables and wrapper functions of one decoder so
/// every call site calls the canonical decoder directly.
///
/// Two shapes are handled, iterated together to a fixed point so chains
/// collapse:
///
/// ```js
/// var b = decode;                                  // alias
/// function c(x, y) { return decode(x - 0x12e, y); } // wrapper
/// ```
///
/// Alias declarators are deleted on the spot; wrapper declarations go
/// dead once their call sites are rewritten and fall to the dead-code
/// pass.
pub struct InlineDecoderWrappers {
    decoder_id: Id,
}

impl InlineDecoderWrappers {
    pub fn new(decoder: &Decoder) -> Self {
        Self {
            decoder_id: decoder.id.clone(),
        }
    }
}

impl Transform for InlineDecoderWrappers {
    fn name(&self) -> &'static str {
        "inline decoder wrappers"
    }

    fn tag(&self) -> Tag {
        Tag::Unsafe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        // Anything that forwards to the decoder, directly or through
        // another wrapper, counts as reachable; chains resolve one
        // layer per pass.
        let mut reachable: HashSet<Id> = HashSet::new();
        reachable.insert(self.decoder_id.clone());
        let mut known_wrappers: HashMap<Id, Wrapper> = HashMap::new();

        for _ in 0..10 {
            let mut pass_changes = 0;

            // Aliases: `var b = decode;` — drop the declarator and
            // redirect every reference.
            let mut aliases = AliasFinder {
                reachable: &reachable,
                replacements: HashMap::new(),
            };
            program.visit_mut_with(&mut aliases);
            if !aliases.replacements.is_empty() {
                pass_changes += aliases.replacements.len() as u32;
                let mut replacer = ReplaceIdents {
                    replacements: &aliases.replacements,
                };
                program.visit_mut_with(&mut replacer);
                ast::sweep(program);
            }

            // Wrappers: single-return functions forwarding to a
            // reachable function with rearranged arguments. Known
            // wrappers stay active so call sites exposed by a later
            // alias rewrite still collapse.
            let mut finder = WrapperFinder {
                reachable: &reachable,
                wrappers: HashMap::new(),
            };
            program.visit_mut_with(&mut finder);
            for (id, wrapper) in finder.wrappers {
                reachable.insert(id.clone());
                known_wrappers.insert(id, wrapper);
            }
            if !known_wrappers.is_empty() {
                let mut rewriter = WrapperCallRewriter {
                    wrappers: &known_wrappers,
                    changes: 0,
                };
                program.visit_mut_with(&mut rewriter);
                pass_changes += rewriter.changes;
            }

            if pass_changes == 0 {
                break;
            }
            state.add(pass_changes);
        }
    }
}

struct AliasFinder<'a> {
    reachable: &'a HashSet<Id>,
    replacements: HashMap<Id, Ident>,
}

impl<'a> VisitMut for AliasFinder<'a> {
    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if let (Pat::Ident(name), Some(Expr::Ident(init))) =
            (&declarator.name, declarator.init.as_deref())
        {
            if self.reachable.contains(&init.to_id()) {
                self.replacements.insert(name.to_id(), init.clone());
                declarator.name.take();
            }
        }
    }
}

/// Replaces identifiers with their replacement.
struct ReplaceIdents<'a> {
    replacements: &'a HashMap<Id, Ident>,
}

impl<'a> VisitMut for ReplaceIdents<'a> {
    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if let Some(replacement) = self.replacements.get(&ident.to_id()) {
            *ident = replacement.clone();
        }
    }
}

struct Wrapper {
    params: Vec<Id>,
    /// The forwarded call, with parameter identifiers still in place.
    template: CallExpr,
}

struct WrapperFinder<'a> {
    reachable: &'a HashSet<Id>,
    wrappers: HashMap<Id, Wrapper>,
}

impl<'a> WrapperFinder<'a> {
    fn inspect(&mut self, id: Id, function: &swc_core::ecma::ast::Function) {
        if self.reachable.contains(&id) {
            return;
        }
        let params: Vec<Id> = match function
            .params
            .iter()
            .map(|p| match &p.pat {
                Pat::Ident(name) => Some(name.to_id()),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
        {
            Some(params) => params,
            None => return,
        };

        let body = match &function.body {
            Some(body) if body.stmts.len() == 1 => body,
            _ => return,
        };
        let ret = match &body.stmts[0] {
            Stmt::Return(ReturnStmt { arg: Some(arg), .. }) => arg,
            _ => return,
        };
        let call = match ast::unwrap_parens(ret) {
            Expr::Call(call) => call,
            _ => return,
        };
        match ast::callee_ident(call) {
            Some(callee) if self.reachable.contains(&callee.to_id()) => {}
            _ => return,
        }

        // The forwarded arguments may only mix parameters and literals;
        // anything else cannot be inlined at the call site.
        let mut free = FreeIdentCheck {
            allowed: &params,
            clean: true,
        };
        let mut args_probe = call.args.clone();
        for arg in &mut args_probe {
            arg.expr.visit_mut_with(&mut free);
        }
        if !free.clean {
            return;
        }

        self.wrappers.insert(
            id,
            Wrapper {
                params,
                template: call.clone(),
            },
        );
    }
}

impl<'a> VisitMut for WrapperFinder<'a> {
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

struct FreeIdentCheck<'a> {
    allowed: &'a [Id],
    clean: bool,
}

impl<'a> VisitMut for FreeIdentCheck<'a> {
    fn visit_mut_ident(&mut self, ident: &mut Ident) {
        if !self.allowed.contains(&ident.to_id()) {
            self.clean = false;
        }
    }
}

struct WrapperCallRewriter<'a> {
    wrappers: &'a HashMap<Id, Wrapper>,
    changes: u32,
}

impl<'a> VisitMut for WrapperCallRewriter<'a> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        let call = match expr {
            Expr::Call(call) => call,
            _ => return,
        };
        let wrapper = match ast::callee_ident(call).and_then(|id| self.wrappers.get(&id.to_id()))
        {
            Some(wrapper) => wrapper,
            None => return,
        };

        let mut substitutions: HashMap<Id, Expr> = HashMap::new();
        for (position, param) in wrapper.params.iter().enumerate() {
            let value = call
                .args
                .get(position)
                .map(|arg| (*arg.expr).clone())
                .unwrap_or_else(ast::undefined_expr);
            substitutions.insert(param.clone(), value);
        }

        let mut canonical = wrapper.template.clone();
        let mut subst = SubstituteParams {
            substitutions: &substitutions,
        };
        for arg in &mut canonical.args {
            arg.expr.visit_mut_with(&mut subst);
        }

        *expr = Expr::Call(canonical);
        self.changes += 1;
    }
}

struct SubstituteParams<'a> {
    substitutions: &'a HashMap<Id, Expr>,
}

impl<'a> VisitMut for SubstituteParams<'a> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        expr.visit_mut_children_with(self);

        if let Expr::Ident(ident) = expr {
            if let Some(replacement) = self.substitutions.get(&ident.to_id()) {
                *expr = replacement.clone();
            }
        }
    }
}

/// Replaces every literal-argument call to a known decoder with the
/// string the sandbox returns for it. Calls whose arguments are not
/// literals, and calls the sandbox fails on, stay untouched.
pub struct InlineDecodedStrings<'a> {
    vm: &'a VMDecoder<'a>,
    logger: Logger<'a>,
}

impl<'a> InlineDecodedStrings<'a> {
    pub fn new(vm: &'a VMDecoder<'a>, logger: Logger<'a>) -> Self {
        Self { vm, logger }
    }
}

impl<'a> Transform for InlineDecodedStrings<'a> {
    fn name(&self) -> &'static str {
        "inline decoded strings"
    }

    fn tag(&self) -> Tag {
        Tag::Unsafe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        if !self.vm.is_ready() {
            return;
        }
        let mut visitor = InlineVisitor {
            vm: self.vm,
            logger: self.logger,
            changes: 0,
        };
        program.visit_mut_with(&mut visitor);
        state.add(visitor.changes);
    }
}

struct InlineVisitor<'a> {
    vm: &'a VMDecoder<'a>,
    logger: Logger<'a>,
    changes: u32,
}

impl<'a> VisitMut for InlineVisitor<'a> {
    fn visit_mut_expr(&mut self, expr: &mut Expr) {
        // Children first: a decoder call nested in another decoder
        // call's argument list resolves to a literal before the outer
        // call is inspected.
        expr.visit_mut_children_with(self);

        let call = match expr {
            Expr::Call(call) => call,
            _ => return,
        };
        match ast::callee_ident(call) {
            Some(callee) if self.vm.knows(&callee.to_id()) => {}
            _ => return,
        }

        // Call sites usually carry folded-apart arithmetic like
        // `dec(-0x12e + 0x400)`; squash it before the literal gate.
        let canonical = if ast::has_only_literal_args(call) {
            call.clone()
        } else {
            match fold_constant_args(call) {
                Some(folded) if ast::has_only_literal_args(&folded) => folded,
                _ => return,
            }
        };

        let source = ast::generate(&Expr::Call(canonical));
        match self.vm.decode(&source) {
            Ok(value) => {
                *expr = ast::string_literal(value);
                self.changes += 1;
            }
            Err(e) => {
                self.logger
                    .debug(&format!("leaving decoder call {}: {}", source.trim(), e));
            }
        }
    }
}

/// Evaluates constant expressions in the call's argument list.
fn fold_constant_args(call: &CallExpr) -> Option<CallExpr> {
    let mut stmt = Stmt::Expr(ExprStmt {
        span: Default::default(),
        expr: Box::new(Expr::Call(call.clone())),
    });
    let mut simplifier = expr_simplifier(Mark::new(), Default::default());
    stmt.visit_mut_with(&mut simplifier);

    if let Stmt::Expr(expr_stmt) = stmt {
        if let Expr::Call(folded) = *expr_stmt.expr {
            return Some(folded);
        }
    }
    None
}

/// Deletes the string array declaration, the rotator statement, and the
/// decoder declarations once their strings are inlined.
pub struct RemoveInfrastructure<'a> {
    pub array_id: &'a Id,
    pub decoder_ids: &'a HashSet<Id>,
    pub rotator_span: Option<Span>,
}

impl<'a> VisitMut for RemoveInfrastructure<'a> {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        let id = fn_decl.ident.to_id();
        if id == *self.array_id || self.decoder_ids.contains(&id) {
            fn_decl.take();
            return;
        }
        fn_decl.visit_mut_children_with(self);
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        if let Pat::Ident(name) = &declarator.name {
            let id = name.to_id();
            if id == *self.array_id || self.decoder_ids.contains(&id) {
                declarator.name.take();
                return;
            }
        }
        declarator.visit_mut_children_with(self);
    }

    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        if let (Stmt::Expr(expr_stmt), Some(span)) = (&*stmt, self.rotator_span) {
            if expr_stmt.span == span {
                stmt.take();
                return;
            }
        }
        stmt.visit_mut_children_with(self);
    }
}
