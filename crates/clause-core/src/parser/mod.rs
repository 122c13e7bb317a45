//! Clause language parser — tokenizer, AST types, and recursive descent parser
//!
//! Converts logic source text into a [`Module`]. The [`Cursor`] is shared
//! with the model-language parser in [`crate::model`].
//!
//! # Grammar (informal)
//!
//! ```text
//! module    := ("namespace" dotted)? ("import" dotted ("." "*")?)* decl*
//! decl      := "contract" Ident "over" type ("state" type)? "{" clause* "}"
//!            | "define" "function" Ident "(" params ")" (":" type)? block
//!            | "define" "constant" Ident "=" expr
//! clause    := "clause" Ident "(" params ")" (":" type)? ("emits" type)? block
//! block     := "{" (stmt (";" stmt)*)? ";"? "}"
//! ```

pub mod ast;
pub mod tokenizer;

use ast::*;
use tokenizer::{Span, SpannedToken, SyntaxError, Token, Tokenizer};

/// Words that cannot be used as variable, parameter or function names
const RESERVED: &[&str] = &[
    "namespace", "import", "contract", "over", "clause", "emits", "define", "function",
    "constant", "let", "set", "emit", "enforce", "throw", "return", "if", "then", "else",
    "while", "and", "or", "nil",
];

/// Parse clause language text into a [`Module`]
///
/// # Errors
/// Returns a [`SyntaxError`] with line:column for the first violation.
pub fn parse_module(input: &str) -> Result<Module, SyntaxError> {
    let tokens = Tokenizer::new(input).tokenize()?;
    let mut parser = LogicParser {
        cursor: Cursor::new(tokens),
    };
    parser.module()
}

// ── Token cursor ──────────────────────────────────────────

/// Position over a token stream with the lookahead helpers both parsers use
pub(crate) struct Cursor {
    tokens: Vec<SpannedToken>,
    pos: usize,
}

impl Cursor {
    pub(crate) fn new(tokens: Vec<SpannedToken>) -> Self {
        Cursor { tokens, pos: 0 }
    }

    pub(crate) fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx].token
    }

    pub(crate) fn span(&self) -> Span {
        self.tokens[self.pos.min(self.tokens.len() - 1)].span
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn at_end(&self) -> bool {
        matches!(self.peek(), Token::Eof)
    }

    pub(crate) fn check(&self, expected: &Token) -> bool {
        self.peek() == expected
    }

    pub(crate) fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect(&mut self, expected: &Token) -> Result<(), SyntaxError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.unexpected(&expected.describe()))
        }
    }

    pub(crate) fn is_keyword(&self, word: &str) -> bool {
        matches!(self.peek(), Token::Identifier(s) if s == word)
    }

    pub(crate) fn eat_keyword(&mut self, word: &str) -> bool {
        if self.is_keyword(word) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn expect_keyword(&mut self, word: &str) -> Result<(), SyntaxError> {
        if self.eat_keyword(word) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", word)))
        }
    }

    pub(crate) fn expect_identifier(&mut self) -> Result<String, SyntaxError> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.unexpected("an identifier")),
        }
    }

    /// `a.b.c`, also accepting a trailing `.*` when `allow_wildcard` is set
    pub(crate) fn dotted_name(&mut self, allow_wildcard: bool) -> Result<String, SyntaxError> {
        let mut name = self.expect_identifier()?;
        while self.check(&Token::Dot) {
            self.advance();
            if allow_wildcard && self.eat(&Token::Star) {
                name.push_str(".*");
                break;
            }
            name.push('.');
            name.push_str(&self.expect_identifier()?);
        }
        Ok(name)
    }

    pub(crate) fn unexpected(&self, expected: &str) -> SyntaxError {
        SyntaxError::new(
            format!("Expected {}, found {}", expected, self.peek().describe()),
            self.span(),
        )
    }
}

// ── Clause language parser ────────────────────────────────

struct LogicParser {
    cursor: Cursor,
}

impl LogicParser {
    fn module(&mut self) -> Result<Module, SyntaxError> {
        let namespace = if self.cursor.eat_keyword("namespace") {
            Some(self.cursor.dotted_name(false)?)
        } else {
            None
        };

        let mut imports = Vec::new();
        while self.cursor.eat_keyword("import") {
            imports.push(self.cursor.dotted_name(true)?);
        }

        let mut decls = Vec::new();
        while !self.cursor.at_end() {
            decls.push(self.decl()?);
        }

        Ok(Module {
            namespace,
            imports,
            decls,
        })
    }

    fn decl(&mut self) -> Result<Decl, SyntaxError> {
        if self.cursor.eat_keyword("contract") {
            return Ok(Decl::Contract(self.contract()?));
        }
        if self.cursor.eat_keyword("define") {
            if self.cursor.eat_keyword("function") {
                let name = self.binding_name()?;
                let params = self.params()?;
                let output = self.output_type()?;
                let body = self.block()?;
                return Ok(Decl::Function(FunctionDecl {
                    name,
                    params,
                    output,
                    body,
                }));
            }
            if self.cursor.eat_keyword("constant") {
                let name = self.binding_name()?;
                self.cursor.expect(&Token::Assign)?;
                let value = self.expr()?;
                self.cursor.eat(&Token::Semicolon);
                return Ok(Decl::Constant(ConstantDecl { name, value }));
            }
            return Err(self.cursor.unexpected("'function' or 'constant'"));
        }
        Err(self.cursor.unexpected("'contract' or 'define'"))
    }

    fn contract(&mut self) -> Result<ContractDecl, SyntaxError> {
        let name = self.cursor.expect_identifier()?;
        self.cursor.expect_keyword("over")?;
        let template = self.type_ref()?;
        let state = if self.cursor.eat_keyword("state") {
            Some(self.type_ref()?)
        } else {
            None
        };

        self.cursor.expect(&Token::LBrace)?;
        let mut clauses = Vec::new();
        while !self.cursor.check(&Token::RBrace) {
            self.cursor.expect_keyword("clause")?;
            let name = self.binding_name()?;
            let params = self.params()?;
            let output = self.output_type()?;
            let emits = if self.cursor.eat_keyword("emits") {
                Some(self.type_ref()?)
            } else {
                None
            };
            let body = self.block()?;
            clauses.push(ClauseDecl {
                name,
                params,
                output,
                emits,
                body,
            });
        }
        self.cursor.expect(&Token::RBrace)?;

        Ok(ContractDecl {
            name,
            template,
            state,
            clauses,
        })
    }

    fn params(&mut self) -> Result<Vec<Param>, SyntaxError> {
        self.cursor.expect(&Token::LParen)?;
        let mut params = Vec::new();
        if !self.cursor.check(&Token::RParen) {
            loop {
                let name = self.binding_name()?;
                self.cursor.expect(&Token::Colon)?;
                let ty = self.type_ref()?;
                params.push(Param { name, ty });
                if !self.cursor.eat(&Token::Comma) {
                    break;
                }
            }
        }
        self.cursor.expect(&Token::RParen)?;
        Ok(params)
    }

    fn output_type(&mut self) -> Result<Option<TypeRef>, SyntaxError> {
        if self.cursor.eat(&Token::Colon) {
            Ok(Some(self.type_ref()?))
        } else {
            Ok(None)
        }
    }

    fn type_ref(&mut self) -> Result<TypeRef, SyntaxError> {
        let name = self.cursor.dotted_name(false)?;
        let array = if self.cursor.check(&Token::LBracket) {
            self.cursor.advance();
            self.cursor.expect(&Token::RBracket)?;
            true
        } else {
            false
        };
        Ok(TypeRef { name, array })
    }

    fn binding_name(&mut self) -> Result<String, SyntaxError> {
        let span = self.cursor.span();
        let name = self.cursor.expect_identifier()?;
        if RESERVED.contains(&name.as_str()) {
            return Err(SyntaxError::new(
                format!("'{}' is a reserved word", name),
                span,
            ));
        }
        Ok(name)
    }

    // ── Statements ─────────────────────────────────────────

    fn block(&mut self) -> Result<Vec<Stmt>, SyntaxError> {
        self.cursor.expect(&Token::LBrace)?;
        let mut stmts = Vec::new();
        while !self.cursor.check(&Token::RBrace) {
            let stmt = self.stmt()?;
            let block_like = matches!(stmt, Stmt::If { .. } | Stmt::While { .. });
            stmts.push(stmt);
            if !self.cursor.eat(&Token::Semicolon)
                && !block_like
                && !self.cursor.check(&Token::RBrace)
            {
                return Err(self.cursor.unexpected("';'"));
            }
        }
        self.cursor.expect(&Token::RBrace)?;
        Ok(stmts)
    }

    fn stmt(&mut self) -> Result<Stmt, SyntaxError> {
        if self.cursor.eat_keyword("let") {
            let name = self.binding_name()?;
            if self.cursor.eat(&Token::Colon) {
                // declared type is documentation only
                self.type_ref()?;
            }
            self.cursor.expect(&Token::Assign)?;
            let value = self.expr()?;
            return Ok(Stmt::Let { name, value });
        }
        if self.cursor.eat_keyword("set") {
            self.cursor.expect_keyword("state")?;
            return Ok(Stmt::SetState(self.expr()?));
        }
        if self.cursor.eat_keyword("emit") {
            return Ok(Stmt::Emit(self.expr()?));
        }
        if self.cursor.eat_keyword("enforce") {
            let condition = self.expr()?;
            let message = if self.cursor.eat_keyword("else") {
                self.cursor.expect_keyword("throw")?;
                Some(self.expr()?)
            } else {
                None
            };
            return Ok(Stmt::Enforce { condition, message });
        }
        if self.cursor.eat_keyword("throw") {
            return Ok(Stmt::Throw(self.expr()?));
        }
        if self.cursor.eat_keyword("return") {
            if self.cursor.check(&Token::Semicolon) || self.cursor.check(&Token::RBrace) {
                return Ok(Stmt::Return(None));
            }
            return Ok(Stmt::Return(Some(self.expr()?)));
        }
        if self.cursor.eat_keyword("if") {
            return self.if_stmt();
        }
        if self.cursor.eat_keyword("while") {
            let condition = self.expr()?;
            let body = self.block()?;
            return Ok(Stmt::While { condition, body });
        }
        Ok(Stmt::Expr(self.expr()?))
    }

    fn if_stmt(&mut self) -> Result<Stmt, SyntaxError> {
        let condition = self.expr()?;
        let then = self.block()?;
        let otherwise = if self.cursor.eat_keyword("else") {
            if self.cursor.eat_keyword("if") {
                vec![self.if_stmt()?]
            } else {
                self.block()?
            }
        } else {
            Vec::new()
        };
        Ok(Stmt::If {
            condition,
            then,
            otherwise,
        })
    }

    // ── Expressions ────────────────────────────────────────

    fn expr(&mut self) -> Result<Expr, SyntaxError> {
        self.or_expr()
    }

    fn or_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.and_expr()?;
        while self.cursor.eat_keyword("or") {
            let rhs = self.and_expr()?;
            lhs = binary(BinaryOp::Or, lhs, rhs);
        }
        Ok(lhs)
    }

    fn and_expr(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.equality()?;
        while self.cursor.eat_keyword("and") {
            let rhs = self.equality()?;
            lhs = binary(BinaryOp::And, lhs, rhs);
        }
        Ok(lhs)
    }

    fn equality(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.comparison()?;
        loop {
            let op = match self.cursor.peek() {
                Token::EqEq => BinaryOp::Eq,
                Token::NotEq => BinaryOp::Ne,
                _ => return Ok(lhs),
            };
            self.cursor.advance();
            let rhs = self.comparison()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn comparison(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.additive()?;
        loop {
            let op = match self.cursor.peek() {
                Token::Less => BinaryOp::Lt,
                Token::LessEq => BinaryOp::Le,
                Token::Greater => BinaryOp::Gt,
                Token::GreaterEq => BinaryOp::Ge,
                _ => return Ok(lhs),
            };
            self.cursor.advance();
            let rhs = self.additive()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn additive(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.multiplicative()?;
        loop {
            let op = match self.cursor.peek() {
                Token::Plus => BinaryOp::Add,
                Token::Minus => BinaryOp::Sub,
                Token::Concat => BinaryOp::Concat,
                _ => return Ok(lhs),
            };
            self.cursor.advance();
            let rhs = self.multiplicative()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn multiplicative(&mut self) -> Result<Expr, SyntaxError> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.cursor.peek() {
                Token::Star => BinaryOp::Mul,
                Token::Slash => BinaryOp::Div,
                Token::Percent => BinaryOp::Rem,
                _ => return Ok(lhs),
            };
            self.cursor.advance();
            let rhs = self.unary()?;
            lhs = binary(op, lhs, rhs);
        }
    }

    fn unary(&mut self) -> Result<Expr, SyntaxError> {
        let op = match self.cursor.peek() {
            Token::Bang => UnaryOp::Not,
            Token::Minus => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        self.cursor.advance();
        let operand = self.unary()?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn postfix(&mut self) -> Result<Expr, SyntaxError> {
        let mut expr = self.primary()?;
        while self.cursor.eat(&Token::Dot) {
            let name = self.cursor.expect_identifier()?;
            expr = Expr::Field {
                target: Box::new(expr),
                name,
            };
        }
        Ok(expr)
    }

    fn primary(&mut self) -> Result<Expr, SyntaxError> {
        let span = self.cursor.span();
        match self.cursor.peek().clone() {
            Token::StringLiteral(s) => {
                self.cursor.advance();
                Ok(Expr::Literal(Literal::String(s)))
            }
            Token::IntegerLiteral(i) => {
                self.cursor.advance();
                Ok(Expr::Literal(Literal::Integer(i)))
            }
            Token::FloatLiteral(f) => {
                self.cursor.advance();
                Ok(Expr::Literal(Literal::Double(f)))
            }
            Token::BooleanLiteral(b) => {
                self.cursor.advance();
                Ok(Expr::Literal(Literal::Boolean(b)))
            }
            Token::LParen => {
                self.cursor.advance();
                let inner = self.expr()?;
                self.cursor.expect(&Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                self.cursor.advance();
                let items = self.comma_separated(&Token::RBracket, |p| p.expr())?;
                Ok(Expr::Array(items))
            }
            Token::Identifier(word) if word == "nil" => {
                self.cursor.advance();
                Ok(Expr::Literal(Literal::Nil))
            }
            Token::Identifier(word) if word == "if" => {
                self.cursor.advance();
                let condition = self.expr()?;
                self.cursor.expect_keyword("then")?;
                let then = self.expr()?;
                self.cursor.expect_keyword("else")?;
                let otherwise = self.expr()?;
                Ok(Expr::If {
                    condition: Box::new(condition),
                    then: Box::new(then),
                    otherwise: Box::new(otherwise),
                })
            }
            Token::Identifier(word) => {
                if RESERVED.contains(&word.as_str()) {
                    return Err(SyntaxError::new(
                        format!("Unexpected keyword '{}'", word),
                        span,
                    ));
                }
                self.cursor.advance();
                if self.cursor.check(&Token::LParen) {
                    self.cursor.advance();
                    let args = self.comma_separated(&Token::RParen, |p| p.expr())?;
                    return Ok(Expr::Call {
                        function: word,
                        args,
                    });
                }
                // Record construction needs a capitalized type name so that
                // `while ready { ... }` still reads as a condition and a block.
                if self.cursor.check(&Token::LBrace) && starts_uppercase(&word) {
                    self.cursor.advance();
                    let fields = self.comma_separated(&Token::RBrace, |p| {
                        let name = p.cursor.expect_identifier()?;
                        p.cursor.expect(&Token::Colon)?;
                        Ok((name, p.expr()?))
                    })?;
                    return Ok(Expr::Record {
                        class: word,
                        fields,
                    });
                }
                Ok(Expr::Var(word))
            }
            _ => Err(self.cursor.unexpected("an expression")),
        }
    }

    /// Parses `item, item, ...` up to and including `close`
    fn comma_separated<T>(
        &mut self,
        close: &Token,
        mut item: impl FnMut(&mut Self) -> Result<T, SyntaxError>,
    ) -> Result<Vec<T>, SyntaxError> {
        let mut items = Vec::new();
        if !self.cursor.check(close) {
            loop {
                items.push(item(self)?);
                if !self.cursor.eat(&Token::Comma) {
                    break;
                }
                if self.cursor.check(close) {
                    break;
                }
            }
        }
        self.cursor.expect(close)?;
        Ok(items)
    }
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr::Binary {
        op,
        lhs: Box::new(lhs),
        rhs: Box::new(rhs),
    }
}

fn starts_uppercase(word: &str) -> bool {
    word.chars().next().is_some_and(|c| c.is_ascii_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO: &str = r#"
namespace org.acme.test
import clause.runtime.*

contract Echo over Template state Counter {
  clause bar(request : Foo) : Foo {
    return request
  }

  clause bump(request : Bump) : Done emits Notice {
    enforce request.by > 0 else throw "by must be positive";
    set state Counter{ count: state.count + request.by };
    emit Notice{ message: "bumped" };
    return Done{}
  }
}
"#;

    #[test]
    fn test_parse_contract_header() {
        let module = parse_module(ECHO).unwrap();
        assert_eq!(module.namespace.as_deref(), Some("org.acme.test"));
        assert_eq!(module.imports, vec!["clause.runtime.*".to_string()]);
        let Decl::Contract(contract) = &module.decls[0] else {
            panic!("expected a contract");
        };
        assert_eq!(contract.name, "Echo");
        assert_eq!(contract.template, TypeRef::named("Template"));
        assert_eq!(contract.state, Some(TypeRef::named("Counter")));
        assert_eq!(contract.clauses.len(), 2);
    }

    #[test]
    fn test_parse_clause_body() {
        let module = parse_module(ECHO).unwrap();
        let Decl::Contract(contract) = &module.decls[0] else {
            panic!("expected a contract");
        };
        let bump = &contract.clauses[1];
        assert_eq!(bump.params[0].ty.name, "Bump");
        assert_eq!(bump.emits, Some(TypeRef::named("Notice")));
        assert_eq!(bump.body.len(), 4);
        assert!(matches!(bump.body[0], Stmt::Enforce { message: Some(_), .. }));
        assert!(matches!(bump.body[1], Stmt::SetState(Expr::Record { .. })));
        assert!(matches!(bump.body[2], Stmt::Emit(_)));
        assert_eq!(
            bump.body[3],
            Stmt::Return(Some(Expr::Record {
                class: "Done".into(),
                fields: vec![]
            }))
        );
    }

    #[test]
    fn test_operator_precedence() {
        let module = parse_module("define constant X = 1 + 2 * 3 == 7 and true").unwrap();
        let Decl::Constant(c) = &module.decls[0] else {
            panic!("expected a constant");
        };
        let Expr::Binary { op, lhs, .. } = &c.value else {
            panic!("expected a binary expression");
        };
        assert_eq!(*op, BinaryOp::And);
        let Expr::Binary { op: eq, lhs: sum, .. } = lhs.as_ref() else {
            panic!("expected equality");
        };
        assert_eq!(*eq, BinaryOp::Eq);
        assert!(matches!(sum.as_ref(), Expr::Binary { op: BinaryOp::Add, .. }));
    }

    #[test]
    fn test_while_condition_is_not_a_record() {
        let src = "define function spin(x : Boolean) : Boolean { while x { } return x }";
        let module = parse_module(src).unwrap();
        let Decl::Function(f) = &module.decls[0] else {
            panic!("expected a function");
        };
        assert!(matches!(
            &f.body[0],
            Stmt::While { condition: Expr::Var(v), body } if v == "x" && body.is_empty()
        ));
        assert_eq!(f.body[1], Stmt::Return(Some(Expr::Var("x".into()))));
    }

    #[test]
    fn test_if_expression_and_calls() {
        let src = r#"define constant Y = if length([1, 2]) > 1 then "many" else "few""#;
        let module = parse_module(src).unwrap();
        let Decl::Constant(c) = &module.decls[0] else {
            panic!("expected a constant");
        };
        assert!(matches!(c.value, Expr::If { .. }));
    }

    #[test]
    fn test_missing_semicolon_between_statements() {
        let src = "define function f() { let a = 1 let b = 2 }";
        let err = parse_module(src).unwrap_err();
        assert!(err.message.contains("Expected ';'"), "{}", err);
        assert_eq!(err.span.line, 1);
    }

    #[test]
    fn test_reserved_word_as_parameter() {
        let err = parse_module("define function f(let : Double) { return 1 }").unwrap_err();
        assert!(err.message.contains("reserved word"));
    }

    #[test]
    fn test_unexpected_top_level_token() {
        let err = parse_module("clause lonely() { }").unwrap_err();
        assert!(err.message.contains("Expected 'contract' or 'define'"));
    }

    #[test]
    fn test_parse_determinism_100_iterations() {
        let first = parse_module(ECHO).unwrap();
        for i in 0..100 {
            assert_eq!(first, parse_module(ECHO).unwrap(), "Determinism failure at {}", i);
        }
    }
}
