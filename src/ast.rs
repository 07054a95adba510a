use swc_core::common::sync::Lrc;
use swc_core::common::util::take::Take;
use swc_core::common::{FileName, SourceMap, Span, DUMMY_SP};
use swc_core::ecma::ast::{
    op, CallExpr, Callee, Decl, Expr, Id, Ident, Lit, MemberExpr, MemberProp, ModuleItem, Number,
    Program, Stmt, Str,
};
use swc_core::ecma::codegen::text_writer::JsWriter;
use swc_core::ecma::codegen::{Config, Emitter, Node};
use swc_core::ecma::visit::{VisitMut, VisitMutWith};
use swc_ecma_parser::{EsConfig, Parser, StringInput, Syntax};

use crate::error::ParseError;

/// Parses JavaScript source into a [Program].
///
/// The tree is parsed with the latest syntax; scripts and modules are
/// both accepted.
pub fn parse_program(source: &str) -> Result<Program, ParseError> {
    let cm: Lrc<SourceMap> = Default::default();
    let fm = cm.new_source_file(FileName::Custom("input.js".into()), source.into());

    let mut parser = Parser::new(
        Syntax::Es(EsConfig::default()),
        StringInput::from(&*fm),
        None,
    );
    parser
        .parse_program()
        .map_err(|e| ParseError(anyhow::anyhow!("{:?}", e)))
}

/// Generates source from any emittable node.
///
/// Spans in the tree are not required to resolve to real files; the
/// writer is given a fresh source map and no mapping output.
pub fn generate<N: Node>(node: &N) -> String {
    let cm: Lrc<SourceMap> = Default::default();
    let mut buf = Vec::new();
    {
        let mut emitter = Emitter {
            cfg: Config::default(),
            cm: cm.clone(),
            comments: None,
            wr: JsWriter::new(cm, "\n", &mut buf, None),
        };
        // The writer targets a Vec, so emission cannot fail.
        node.emit_with(&mut emitter)
            .expect("emitting to an in-memory buffer failed");
    }
    String::from_utf8(buf).expect("codegen produced invalid UTF-8")
}

/// Creates a string literal expression with no retained formatting.
pub fn string_literal(value: impl Into<Str>) -> Expr {
    Expr::Lit(Lit::Str(value.into()))
}

/// Creates a numeric literal expression.
pub fn number_literal(value: f64) -> Expr {
    Expr::Lit(Lit::Num(Number::from(value)))
}

/// Creates an identifier expression from a resolved [Id].
pub fn ident_expr(id: &Id) -> Expr {
    Expr::Ident(Ident::new(id.0.clone(), DUMMY_SP.with_ctxt(id.1)))
}

/// The `undefined` identifier.
pub fn undefined_expr() -> Expr {
    Expr::Ident(Ident::new("undefined".into(), DUMMY_SP))
}

/// Peels parentheses off an expression.
pub fn unwrap_parens(expr: &Expr) -> &Expr {
    let mut current = expr;
    while let Expr::Paren(paren) = current {
        current = &paren.expr;
    }
    current
}

/// Returns the identifier a call's callee resolves to, if it is a plain
/// identifier call like `f(...)`.
pub fn callee_ident(call: &CallExpr) -> Option<&Ident> {
    if let Callee::Expr(expr) = &call.callee {
        if let Expr::Ident(id) = &**expr {
            return Some(id);
        }
    }
    None
}

/// Returns the property name of a member expression, for both `a.b` and
/// `a["b"]` forms.
pub fn member_prop_name(member: &MemberExpr) -> Option<String> {
    match &member.prop {
        MemberProp::Ident(id) => Some(id.sym.to_string()),
        MemberProp::Computed(computed) => {
            if let Expr::Lit(Lit::Str(s)) = &*computed.expr {
                Some(s.value.to_string())
            } else {
                None
            }
        }
        MemberProp::PrivateName(_) => None,
    }
}

/// Parses a literal index argument: a numeric literal, a negated numeric
/// literal, or a string holding a decimal or hexadecimal number.
pub fn literal_index(expr: &Expr) -> Option<f64> {
    match expr {
        Expr::Lit(Lit::Num(n)) => Some(n.value),
        Expr::Lit(Lit::Str(s)) => {
            let text = s.value.trim().to_string();
            if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
                i64::from_str_radix(hex, 16).ok().map(|v| v as f64)
            } else {
                text.parse::<f64>().ok()
            }
        }
        Expr::Unary(unary) if unary.op == op!(unary, "-") => {
            literal_index(&unary.arg).map(|v| -v)
        }
        _ => None,
    }
}

/// Whether every argument of a call is a literal [literal_index] would
/// accept, or a plain string.
pub fn has_only_literal_args(call: &CallExpr) -> bool {
    call.args.iter().all(|arg| {
        arg.spread.is_none()
            && match &*arg.expr {
                Expr::Lit(Lit::Str(_)) | Expr::Lit(Lit::Num(_)) => true,
                Expr::Unary(unary) => matches!(&*unary.arg, Expr::Lit(Lit::Num(_))),
                _ => false,
            }
    })
}

/// ECMAScript reserved words, including the always-reserved strict-mode
/// set. Property shorthand like `obj.class` is legal, but these are kept
/// in bracket form so the output stays valid in every position.
const RESERVED_WORDS: &[&str] = &[
    "break",
    "case",
    "catch",
    "class",
    "const",
    "continue",
    "debugger",
    "default",
    "delete",
    "do",
    "else",
    "enum",
    "export",
    "extends",
    "false",
    "finally",
    "for",
    "function",
    "if",
    "implements",
    "import",
    "in",
    "instanceof",
    "interface",
    "let",
    "new",
    "null",
    "package",
    "private",
    "protected",
    "public",
    "return",
    "static",
    "super",
    "switch",
    "this",
    "throw",
    "true",
    "try",
    "typeof",
    "var",
    "void",
    "while",
    "with",
    "yield",
];

/// Whether `name` is a reserved word.
pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// Whether `name` is a valid identifier: `/^[A-Za-z_$][A-Za-z0-9_$]*$/`.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

/// Sweeps nodes that transforms marked for deletion with [Take::take]:
/// invalid expressions, declarators with an invalid name, function
/// declarations with a dummy identifier, and the empty statements left
/// behind by all of the above.
#[derive(Default)]
pub struct Sweeper;

impl VisitMut for Sweeper {
    fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
        stmt.visit_mut_children_with(self);

        match stmt {
            Stmt::Expr(expr_stmt) => {
                if matches!(&*expr_stmt.expr, Expr::Invalid(..)) {
                    stmt.take();
                }
            }
            Stmt::Decl(Decl::Fn(fn_decl)) => {
                if fn_decl.ident.is_dummy() {
                    stmt.take();
                }
            }
            Stmt::Decl(Decl::Var(var)) => {
                var.decls.retain(|decl| !decl.name.is_invalid());
                if var.decls.is_empty() {
                    stmt.take();
                }
            }
            _ => {}
        }
    }

    // Remove empty statements
    fn visit_mut_stmts(&mut self, stmts: &mut Vec<Stmt>) {
        stmts.visit_mut_children_with(self);

        stmts.retain(|s| !matches!(s, Stmt::Empty(..)));
    }

    // Remove empty ModuleItem's
    fn visit_mut_module_items(&mut self, stmts: &mut Vec<ModuleItem>) {
        stmts.visit_mut_children_with(self);

        stmts.retain(|stmt| !matches!(stmt, ModuleItem::Stmt(Stmt::Empty(..))));
    }

    // Remove invalid expressions from expression lists
    fn visit_mut_exprs(&mut self, exprs: &mut Vec<Box<Expr>>) {
        exprs.visit_mut_children_with(self);

        exprs.retain(|expr| !matches!(**expr, Expr::Invalid(..)));
    }
}

/// Runs a [Sweeper] over the program.
pub fn sweep(program: &mut Program) {
    program.visit_mut_with(&mut Sweeper);
}

/// Removes the statement spanning `span` from the program.
///
/// Used for nodes located by a probe in an earlier, read-only phase;
/// spans are unique per parsed node, so this is an identity lookup.
pub fn remove_stmt_by_span(program: &mut Program, span: Span) {
    struct Remover(Span);

    impl VisitMut for Remover {
        fn visit_mut_stmt(&mut self, stmt: &mut Stmt) {
            if let Stmt::Expr(expr_stmt) = stmt {
                if expr_stmt.span == self.0 {
                    stmt.take();
                    return;
                }
            }
            stmt.visit_mut_children_with(self);
        }
    }

    program.visit_mut_with(&mut Remover(span));
    sweep(program);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_generate() {
        let program = parse_program("var a = 1; console.log(a);").expect("parse failed");
        let code = generate(&program);
        assert!(code.contains("var a = 1"));
        assert!(code.contains("console.log(a)"));
    }

    #[test]
    fn test_literal_index() {
        let hex = parse_program("\"0x11\"").unwrap();
        let num = parse_program("17").unwrap();
        for program in [hex, num] {
            if let Program::Script(script) = &program {
                if let Stmt::Expr(e) = &script.body[0] {
                    assert_eq!(literal_index(&e.expr), Some(17.0));
                }
            }
        }
    }

    #[test]
    fn test_identifier_validity() {
        assert!(is_valid_identifier("name"));
        assert!(is_valid_identifier("_private$2"));
        assert!(!is_valid_identifier("content-type"));
        assert!(!is_valid_identifier("1.2.3"));
        assert!(!is_valid_identifier(""));
        assert!(is_reserved_word("class"));
        assert!(!is_reserved_word("className"));
    }
}
