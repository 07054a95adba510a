use std::collections::HashSet;

use swc_core::common::util::take::Take;
use swc_core::ecma::ast::{FnDecl, Id, Pat, Program, VarDeclarator};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;
use crate::scope::ScopeIndex;
use crate::transform::{Tag, Transform, TransformState};

/// Upper bound on fixpoint passes. Real cascades (string array →
/// rotator → decoders → proxies → loader) settle in a handful; the cap
/// only stops a cycle caused by tree corruption.
const MAX_PASSES: u32 = 64;

/// Removes declarations nothing references.
///
/// Runs crawl-and-remove passes until a fixed point: deleting one
/// binding routinely strands the bindings it referenced, so a single
/// pass would orphan the tail of a cascade without deleting it. Only
/// function declarations and variable declarators with pure
/// initializers are eligible; a declarator whose initializer is a call
/// is always retained.
pub struct DeadCode;

impl Transform for DeadCode {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn tag(&self) -> Tag {
        Tag::Safe
    }

    fn apply(&mut self, program: &mut Program, state: &mut TransformState) {
        for _ in 0..MAX_PASSES {
            let index = ScopeIndex::crawl(program);
            let dead: HashSet<Id> = index.removable().cloned().collect();
            if dead.is_empty() {
                break;
            }

            let mut remover = Remover {
                dead: &dead,
                removed: 0,
            };
            program.visit_mut_with(&mut remover);
            ast::sweep(program);

            if remover.removed == 0 {
                break;
            }
            state.add(remover.removed);
        }
    }
}

struct Remover<'a> {
    dead: &'a HashSet<Id>,
    removed: u32,
}

impl<'a> VisitMut for Remover<'a> {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        if self.dead.contains(&fn_decl.ident.to_id()) {
            fn_decl.take();
            self.removed += 1;
            return;
        }
        fn_decl.visit_mut_children_with(self);
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        if let Pat::Ident(name) = &declarator.name {
            if self.dead.contains(&name.to_id()) {
                declarator.name.take();
                self.removed += 1;
                return;
            }
        }
        declarator.visit_mut_children_with(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{generate, parse_program};
    use swc_core::common::{Globals, Mark, GLOBALS};
    use swc_ecma_transforms::resolver;

    fn run(source: &str) -> String {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = parse_program(source).expect("parse failed");
            program.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));
            let mut state = TransformState::default();
            DeadCode.apply(&mut program, &mut state);
            generate(&program)
        })
    }

    #[test]
    fn test_removes_cascading_chain() {
        let output = run("var a = ['x']; var b = a; var c = b; console.log('done');");
        assert!(!output.contains("var a"));
        assert!(!output.contains("var b"));
        assert!(!output.contains("var c"));
        assert!(output.contains("console.log"));
    }

    #[test]
    fn test_removes_unreferenced_functions() {
        let output = run("function helper() { return other(); } function other() {} keep();");
        assert!(!output.contains("helper"));
        assert!(!output.contains("other"));
        assert!(output.contains("keep()"));
    }

    #[test]
    fn test_retains_call_initializers() {
        let output = run("var a = sideEffect();");
        assert!(output.contains("sideEffect()"));
    }

    #[test]
    fn test_retains_referenced_bindings() {
        let output = run("var x = 1; console.log(x);");
        assert!(output.contains("var x = 1"));
    }

    #[test]
    fn test_self_recursive_function_is_dead() {
        let output = run("function f() { return f(); } live();");
        assert!(!output.contains("function f"));
        assert!(output.contains("live()"));
    }

    #[test]
    fn test_shadowed_names_are_scope_aware() {
        // The inner `a` is dead, the outer `a` is referenced.
        let output = run("var a = 1; function g() { var a = 2; } g(); console.log(a);");
        assert!(output.contains("var a = 1"));
        assert!(!output.contains("var a = 2"));
    }
}
