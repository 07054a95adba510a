use swc_core::common::Span;
use swc_core::ecma::ast::{
    ArrayLit, Decl, Expr, ExprStmt, FnDecl, Id, Lit, Pat, Program, Stmt, VarDeclarator,
};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};

use crate::ast;

/// How the string array is declared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StringArrayForm {
    /// `var _0x1234 = ["...", ...];`
    Variable,

    /// The self-rebinding accessor the newer obfuscator versions emit:
    /// `function _0x1234() { var a = [...]; _0x1234 = function () { return a; }; return _0x1234(); }`
    Function,
}

/// The canonical string array: its binding, its shape, and the source
/// of its declaration for the sandbox.
#[derive(Debug, Clone)]
pub struct StringArray {
    pub id: Id,
    pub name: String,
    pub form: StringArrayForm,
    pub length: usize,
    pub source: String,
}

/// The IIFE that pre-rotates the array at load time.
#[derive(Debug, Clone)]
pub struct Rotator {
    pub source: String,
    pub stmt_span: Span,
}

/// Which decoding scheme a decoder implements. The sandbox executes the
/// decoder as-is either way; the variant only informs logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderVariant {
    Plain,
    Keyed,
    Base64,
}

/// A function that maps an index (and optional key) to a string from
/// the array.
#[derive(Debug, Clone)]
pub struct Decoder {
    pub id: Id,
    pub name: String,
    pub variant: DecoderVariant,
    pub source: String,
}

/// Locates the canonical string array declaration.
///
/// The function form wins over the variable form when both match; the
/// newer emitters wrap the array so the variable alone is not the whole
/// declaration.
pub fn find_string_array(program: &mut Program) -> Option<StringArray> {
    let mut finder = ArrayFinder::default();
    program.visit_mut_with(&mut finder);
    finder.function_form.or(finder.variable_form)
}

#[derive(Default)]
struct ArrayFinder {
    function_form: Option<StringArray>,
    variable_form: Option<StringArray>,
}

impl VisitMut for ArrayFinder {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        fn_decl.visit_mut_children_with(self);

        if self.function_form.is_some() {
            return;
        }
        // Zero parameters and an all-strings array literal in the body.
        if !fn_decl.function.params.is_empty() {
            return;
        }
        let Some(length) = contained_string_array_len(&fn_decl.function) else {
            return;
        };
        self.function_form = Some(StringArray {
            id: fn_decl.ident.to_id(),
            name: fn_decl.ident.sym.to_string(),
            form: StringArrayForm::Function,
            length,
            source: ast::generate(&Stmt::Decl(Decl::Fn(fn_decl.clone()))),
        });
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        if self.variable_form.is_some() {
            return;
        }
        let name = match &declarator.name {
            Pat::Ident(name) => name,
            _ => return,
        };
        let array = match declarator.init.as_deref() {
            Some(Expr::Array(array)) => array,
            _ => return,
        };
        // A single-string array is far more likely to be ordinary code.
        if array.elems.len() < 2 || !all_string_elements(array) {
            return;
        }
        self.variable_form = Some(StringArray {
            id: name.to_id(),
            name: name.sym.to_string(),
            form: StringArrayForm::Variable,
            length: array.elems.len(),
            source: format!(
                "var {} = {};",
                name.sym,
                ast::generate(&Expr::Array(array.clone()))
            ),
        });
    }
}

fn all_string_elements(array: &ArrayLit) -> bool {
    !array.elems.is_empty()
        && array.elems.iter().all(|elem| match elem {
            Some(e) => e.spread.is_none() && matches!(&*e.expr, Expr::Lit(Lit::Str(_))),
            None => false,
        })
}

fn contained_string_array_len(function: &swc_core::ecma::ast::Function) -> Option<usize> {
    struct Finder(Option<usize>);

    impl VisitMut for Finder {
        fn visit_mut_array_lit(&mut self, array: &mut ArrayLit) {
            if self.0.is_none() && array.elems.len() >= 2 && all_string_elements(array) {
                self.0 = Some(array.elems.len());
            }
        }
    }

    let mut probe = function.clone();
    let mut finder = Finder(None);
    probe.visit_mut_with(&mut finder);
    finder.0
}

/// Locates the rotator IIFE: a call statement whose callee is a
/// function expression mentioning `push` and `shift`, referencing the
/// array binding. Absence is non-fatal; newer emitters guard the
/// rotation with a `parseInt` checksum loop, which the sandbox simply
/// executes.
pub fn find_array_rotator(program: &mut Program, array: &StringArray) -> Option<Rotator> {
    struct Finder<'a> {
        array: &'a StringArray,
        found: Option<Rotator>,
    }

    impl<'a> VisitMut for Finder<'a> {
        fn visit_mut_expr_stmt(&mut self, stmt: &mut ExprStmt) {
            stmt.visit_mut_children_with(self);

            if self.found.is_some() {
                return;
            }
            let call = match ast::unwrap_parens(&stmt.expr) {
                Expr::Call(call) => call,
                _ => return,
            };
            if !matches!(
                call.callee,
                swc_core::ecma::ast::Callee::Expr(ref callee)
                    if matches!(ast::unwrap_parens(callee), Expr::Fn(_))
            ) {
                return;
            }
            let mut probe_expr = (*stmt.expr).clone();
            if !references_id(&mut probe_expr, &self.array.id) {
                return;
            }
            let source = ast::generate(&*stmt.expr);
            if !source.contains("push") || !source.contains("shift") {
                return;
            }
            self.found = Some(Rotator {
                source: format!("({});", source),
                stmt_span: stmt.span,
            });
        }
    }

    let mut finder = Finder {
        array,
        found: None,
    };
    program.visit_mut_with(&mut finder);
    finder.found
}

/// Finds the decoder functions associated with the array: one-or-two
/// parameter functions that reach the array binding, either directly or
/// by calling the array accessor. An array may have several (keyed
/// variants are emitted as separate functions); each is recognized
/// independently.
pub fn find_decoders(program: &mut Program, array: &StringArray) -> Vec<Decoder> {
    let mut finder = DecoderFinder {
        array,
        decoders: Vec::new(),
    };
    program.visit_mut_with(&mut finder);
    finder.decoders
}

struct DecoderFinder<'a> {
    array: &'a StringArray,
    decoders: Vec<Decoder>,
}

impl<'a> DecoderFinder<'a> {
    fn classify(source: &str, params: usize) -> DecoderVariant {
        if source.contains("fromCharCode") || source.contains("charCodeAt") {
            DecoderVariant::Base64
        } else if params == 2 {
            DecoderVariant::Keyed
        } else {
            DecoderVariant::Plain
        }
    }
}

impl<'a> VisitMut for DecoderFinder<'a> {
    fn visit_mut_fn_decl(&mut self, fn_decl: &mut FnDecl) {
        fn_decl.visit_mut_children_with(self);

        let id = fn_decl.ident.to_id();
        if id == self.array.id {
            return;
        }
        let params = fn_decl.function.params.len();
        if !(1..=2).contains(&params) {
            return;
        }
        let mut probe = fn_decl.function.clone();
        if !references_id(&mut probe, &self.array.id) {
            return;
        }
        let source = ast::generate(&Stmt::Decl(Decl::Fn(fn_decl.clone())));
        self.decoders.push(Decoder {
            id,
            name: fn_decl.ident.sym.to_string(),
            variant: Self::classify(&source, params),
            source,
        });
    }

    fn visit_mut_var_declarator(&mut self, declarator: &mut VarDeclarator) {
        declarator.visit_mut_children_with(self);

        let name = match &declarator.name {
            Pat::Ident(name) => name,
            _ => return,
        };
        let id = name.to_id();
        if id == self.array.id {
            return;
        }
        let init = match declarator.init.as_deref() {
            Some(init) => init,
            None => return,
        };

        match ast::unwrap_parens(init) {
            // var dec = function (i, k) { ... array ... };
            Expr::Fn(fn_expr) => {
                let params = fn_expr.function.params.len();
                if !(1..=2).contains(&params) {
                    return;
                }
                let mut probe = fn_expr.function.clone();
                if !references_id(&mut probe, &self.array.id) {
                    return;
                }
                let source = format!("var {} = {};", name.sym, ast::generate(init));
                self.decoders.push(Decoder {
                    id,
                    name: name.sym.to_string(),
                    variant: Self::classify(&source, params),
                    source,
                });
            }
            // var dec = (function () { var a = [...]; return function (i) { ... }; })();
            // The closure owns the array; calling the binding decodes.
            Expr::Call(call) => {
                let callee_is_fn = matches!(
                    &call.callee,
                    swc_core::ecma::ast::Callee::Expr(callee)
                        if matches!(ast::unwrap_parens(callee), Expr::Fn(_))
                );
                if !callee_is_fn {
                    return;
                }
                let mut probe = call.clone();
                if !references_id(&mut probe, &self.array.id) {
                    return;
                }
                let source = format!("var {} = {};", name.sym, ast::generate(init));
                self.decoders.push(Decoder {
                    id,
                    name: name.sym.to_string(),
                    variant: Self::classify(&source, 1),
                    source,
                });
            }
            _ => {}
        }
    }
}

/// Whether the node's subtree mentions the binding.
fn references_id<N: VisitMutWith<RefProbe>>(node: &mut N, id: &Id) -> bool {
    let mut probe = RefProbe {
        id: id.clone(),
        found: false,
    };
    node.visit_mut_with(&mut probe);
    probe.found
}

pub(crate) struct RefProbe {
    id: Id,
    found: bool,
}

impl VisitMut for RefProbe {
    fn visit_mut_ident(&mut self, ident: &mut swc_core::ecma::ast::Ident) {
        if ident.to_id() == self.id {
            self.found = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::parse_program;
    use swc_core::common::{Globals, Mark, GLOBALS};
    use swc_ecma_transforms::resolver;

    fn resolved(source: &str) -> Program {
        let mut program = parse_program(source).expect("parse failed");
        program.visit_mut_with(&mut resolver(Mark::new(), Mark::new(), false));
        program
    }

    #[test]
    fn test_finds_variable_form() {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = resolved("var _0x1 = ['a', 'b', 'c']; use(_0x1);");
            let array = find_string_array(&mut program).expect("array not found");
            assert_eq!(array.form, StringArrayForm::Variable);
            assert_eq!(array.length, 3);
            assert_eq!(array.name, "_0x1");
        });
    }

    #[test]
    fn test_finds_function_form() {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = resolved(concat!(
                "function _0x3544() {",
                "  var a = ['x', 'y'];",
                "  _0x3544 = function () { return a; };",
                "  return _0x3544();",
                "}",
            ));
            let array = find_string_array(&mut program).expect("array not found");
            assert_eq!(array.form, StringArrayForm::Function);
            assert_eq!(array.length, 2);
        });
    }

    #[test]
    fn test_mixed_arrays_are_not_string_arrays() {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = resolved("var a = ['x', 1, 'y'];");
            assert!(find_string_array(&mut program).is_none());
        });
    }

    #[test]
    fn test_finds_rotator_and_decoder() {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = resolved(concat!(
                "var arr = ['a', 'b', 'c'];",
                "(function (a, n) { while (n--) { a['push'](a['shift']()); } }(arr, 2));",
                "function dec(i) { return arr[i]; }",
                "use(dec(0));",
            ));
            let array = find_string_array(&mut program).unwrap();
            let rotator = find_array_rotator(&mut program, &array);
            assert!(rotator.is_some());

            let decoders = find_decoders(&mut program, &array);
            assert_eq!(decoders.len(), 1);
            assert_eq!(decoders[0].name, "dec");
            assert_eq!(decoders[0].variant, DecoderVariant::Plain);
        });
    }

    #[test]
    fn test_finds_closure_decoder() {
        let globals = Globals::new();
        GLOBALS.set(&globals, || {
            let mut program = resolved(concat!(
                "var f = (function () {",
                "  var a = ['hello', 'world'];",
                "  return function (i) { return a[i]; };",
                "})();",
                "console.log(f(0));",
            ));
            let array = find_string_array(&mut program).expect("closure array not found");
            let decoders = find_decoders(&mut program, &array);
            assert_eq!(decoders.len(), 1);
            assert_eq!(decoders[0].name, "f");
        });
    }
}
