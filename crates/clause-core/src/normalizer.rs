//! Canonical normalizer — renders a compiled program in one deterministic form
//!
//! The canonical listing is the output of the `canonical` target and the
//! input to the program hash recorded with every compilation.
//!
//! # Pipeline
//!
//! `Program → normalize_program → serialize_canonical → SHA-256`
//!
//! # Guarantees
//!
//! - **Deterministic**: same program always produces the same listing
//! - **Order-insensitive**: declaration order across logic files does not
//!   change the listing (clauses, functions and constants are sorted by name)
//! - **Fully qualified**: every type name appears resolved

use sha2::{Digest, Sha256};

use crate::parser::ast::*;

// ── Public API ─────────────────────────────────────────────

/// Sort declarations by name
pub fn normalize_program(mut program: Program) -> Program {
    program.functions.sort_by(|a, b| a.name.cmp(&b.name));
    program.constants.sort_by(|a, b| a.name.cmp(&b.name));
    if let Some(contract) = program.contract.as_mut() {
        contract.clauses.sort_by(|a, b| a.name.cmp(&b.name));
    }
    program
}

/// Render a program as its canonical listing
pub fn serialize_canonical(program: &Program) -> String {
    let program = normalize_program(program.clone());
    let mut out = String::new();

    for constant in &program.constants {
        out.push_str("define constant ");
        out.push_str(&constant.name);
        out.push_str(" = ");
        write_expr(&mut out, &constant.value);
        out.push('\n');
    }

    for function in &program.functions {
        out.push_str("define function ");
        write_signature(&mut out, &function.name, &function.params, function.output.as_ref());
        write_block(&mut out, &function.body, 0);
        out.push('\n');
    }

    if let Some(contract) = &program.contract {
        out.push_str("contract ");
        out.push_str(&contract.name);
        out.push_str(" over ");
        out.push_str(&contract.template);
        if let Some(state) = &contract.state {
            out.push_str(" state ");
            out.push_str(state);
        }
        out.push_str(" {\n");
        for clause in &contract.clauses {
            write_indent(&mut out, 2);
            out.push_str("clause ");
            write_signature(&mut out, &clause.name, &clause.params, clause.output.as_ref());
            if let Some(emits) = &clause.emits {
                out.push_str(" emits ");
                write_type(&mut out, emits);
            }
            write_block(&mut out, &clause.body, 2);
            out.push('\n');
        }
        out.push_str("}\n");
    }

    out
}

/// SHA-256 of the canonical listing, lowercase hex
pub fn compute_program_hash(program: &Program) -> String {
    hash_listing(&serialize_canonical(program))
}

pub fn hash_listing(listing: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(listing.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ── Serializers ────────────────────────────────────────────

fn write_signature(out: &mut String, name: &str, params: &[Param], output: Option<&TypeRef>) {
    out.push_str(name);
    out.push('(');
    for (i, param) in params.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        out.push_str(&param.name);
        out.push_str(" : ");
        write_type(out, &param.ty);
    }
    out.push(')');
    if let Some(output) = output {
        out.push_str(" : ");
        write_type(out, output);
    }
}

fn write_type(out: &mut String, ty: &TypeRef) {
    out.push_str(&ty.name);
    if ty.array {
        out.push_str("[]");
    }
}

fn write_block(out: &mut String, body: &[Stmt], indent: usize) {
    out.push_str(" {\n");
    for stmt in body {
        write_stmt(out, stmt, indent + 2);
    }
    write_indent(out, indent);
    out.push('}');
}

fn write_stmt(out: &mut String, stmt: &Stmt, indent: usize) {
    write_indent(out, indent);
    match stmt {
        Stmt::Let { name, value } => {
            out.push_str("let ");
            out.push_str(name);
            out.push_str(" = ");
            write_expr(out, value);
        }
        Stmt::SetState(value) => {
            out.push_str("set state ");
            write_expr(out, value);
        }
        Stmt::Emit(value) => {
            out.push_str("emit ");
            write_expr(out, value);
        }
        Stmt::Enforce { condition, message } => {
            out.push_str("enforce ");
            write_expr(out, condition);
            if let Some(message) = message {
                out.push_str(" else throw ");
                write_expr(out, message);
            }
        }
        Stmt::Throw(value) => {
            out.push_str("throw ");
            write_expr(out, value);
        }
        Stmt::If {
            condition,
            then,
            otherwise,
        } => {
            out.push_str("if ");
            write_expr(out, condition);
            write_block(out, then, indent);
            if !otherwise.is_empty() {
                out.push_str(" else");
                write_block(out, otherwise, indent);
            }
        }
        Stmt::While { condition, body } => {
            out.push_str("while ");
            write_expr(out, condition);
            write_block(out, body, indent);
        }
        Stmt::Return(value) => {
            out.push_str("return");
            if let Some(value) = value {
                out.push(' ');
                write_expr(out, value);
            }
        }
        Stmt::Expr(value) => write_expr(out, value),
    }
    out.push_str(";\n");
}

/// Expressions are fully parenthesized so precedence never needs restating
fn write_expr(out: &mut String, expr: &Expr) {
    match expr {
        Expr::Literal(literal) => write_literal(out, literal),
        Expr::Var(name) => out.push_str(name),
        Expr::Field { target, name } => {
            write_expr(out, target);
            out.push('.');
            out.push_str(name);
        }
        Expr::Record { class, fields } => {
            out.push_str(class);
            out.push('{');
            let mut sorted: Vec<&(String, Expr)> = fields.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(&b.0));
            for (i, (name, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(name);
                out.push_str(": ");
                write_expr(out, value);
            }
            out.push('}');
        }
        Expr::Array(items) => {
            out.push('[');
            write_list(out, items);
            out.push(']');
        }
        Expr::Unary { op, operand } => {
            out.push_str(match op {
                UnaryOp::Not => "!",
                UnaryOp::Neg => "-",
            });
            out.push('(');
            write_expr(out, operand);
            out.push(')');
        }
        Expr::Binary { op, lhs, rhs } => {
            out.push('(');
            write_expr(out, lhs);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            write_expr(out, rhs);
            out.push(')');
        }
        Expr::If {
            condition,
            then,
            otherwise,
        } => {
            out.push_str("(if ");
            write_expr(out, condition);
            out.push_str(" then ");
            write_expr(out, then);
            out.push_str(" else ");
            write_expr(out, otherwise);
            out.push(')');
        }
        Expr::Call { function, args } => {
            out.push_str(function);
            out.push('(');
            write_list(out, args);
            out.push(')');
        }
    }
}

fn write_list(out: &mut String, items: &[Expr]) {
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(", ");
        }
        write_expr(out, item);
    }
}

fn write_literal(out: &mut String, literal: &Literal) {
    match literal {
        Literal::Nil => out.push_str("nil"),
        Literal::Boolean(b) => out.push_str(&b.to_string()),
        Literal::Integer(i) => out.push_str(&i.to_string()),
        Literal::Double(f) => {
            let s = format!("{}", f);
            out.push_str(&s);
            if !s.contains('.') && !s.contains("inf") && !s.contains("NaN") {
                out.push_str(".0");
            }
        }
        Literal::String(s) => {
            out.push('"');
            for c in s.chars() {
                match c {
                    '"' => out.push_str("\\\""),
                    '\\' => out.push_str("\\\\"),
                    '\n' => out.push_str("\\n"),
                    '\t' => out.push_str("\\t"),
                    c => out.push(c),
                }
            }
            out.push('"');
        }
    }
}

fn write_indent(out: &mut String, n: usize) {
    for _ in 0..n {
        out.push(' ');
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn program(functions: Vec<&str>) -> Program {
        Program {
            contract: Some(ContractInfo {
                name: "org.acme.Echo".into(),
                template: "org.acme.Template".into(),
                state: None,
                clauses: vec![ClauseDecl {
                    name: "bar".into(),
                    params: vec![Param {
                        name: "request".into(),
                        ty: TypeRef::named("org.acme.Foo"),
                    }],
                    output: Some(TypeRef::named("org.acme.Foo")),
                    emits: None,
                    body: vec![Stmt::Return(Some(Expr::Var("request".into())))],
                }],
            }),
            functions: functions
                .into_iter()
                .map(|name| FunctionDecl {
                    name: name.into(),
                    params: vec![],
                    output: None,
                    body: vec![Stmt::Return(Some(Expr::Binary {
                        op: BinaryOp::Mul,
                        lhs: Box::new(Expr::Literal(Literal::Double(2.0))),
                        rhs: Box::new(Expr::Literal(Literal::Integer(3))),
                    }))],
                })
                .collect(),
            constants: vec![],
            supertypes: Default::default(),
        }
    }

    #[test]
    fn test_canonical_listing_shape() {
        let listing = serialize_canonical(&program(vec!["f"]));
        assert!(listing.contains("define function f() {\n  return (2.0 * 3);\n}"), "{}", listing);
        assert!(listing.contains("contract org.acme.Echo over org.acme.Template {"));
        assert!(listing.contains("  clause bar(request : org.acme.Foo) : org.acme.Foo {\n    return request;\n  }"));
    }

    #[test]
    fn test_declaration_order_does_not_change_hash() {
        let a = compute_program_hash(&program(vec!["f", "g"]));
        let b = compute_program_hash(&program(vec!["g", "f"]));
        assert_eq!(a, b);
        assert_eq!(a.len(), 64, "Hash should be 64 hex chars, got: {}", a);
    }

    #[test]
    fn test_string_escaping() {
        let mut out = String::new();
        write_literal(&mut out, &Literal::String("say \"hi\"\n".into()));
        assert_eq!(out, r#""say \"hi\"\n""#);
    }

    #[test]
    fn test_hash_determinism_100_iterations() {
        let first = compute_program_hash(&program(vec!["f"]));
        for i in 0..100 {
            assert_eq!(first, compute_program_hash(&program(vec!["f"])), "Determinism failure at {}", i);
        }
    }
}
