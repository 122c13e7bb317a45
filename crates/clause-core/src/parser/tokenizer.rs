//! Tokenizer shared by the model language and the clause language
//!
//! Handles: identifiers, string literals, integer/float literals, booleans,
//! operators and punctuation. Line (`//`) and block (`/* */`) comments are
//! discarded. Keywords are not reserved here; each parser recognizes its own
//! keywords contextually, so a model field may be called `state` or `emit`.
//!
//! Guarantees:
//! - Deterministic: same input always produces same token stream
//! - Every error carries the line:column where it was detected

use std::fmt;

/// Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    // Literals
    StringLiteral(String),
    IntegerLiteral(i64),
    FloatLiteral(f64),
    BooleanLiteral(bool),

    // Punctuation
    LBrace,    // {
    RBrace,    // }
    LBracket,  // [
    RBracket,  // ]
    LParen,    // (
    RParen,    // )
    Colon,     // :
    Comma,     // ,
    Semicolon, // ;
    Dot,       // .
    Arrow,     // -->
    Assign,    // =

    // Operators
    Plus,      // +
    Minus,     // -
    Star,      // *
    Slash,     // /
    Percent,   // %
    Concat,    // ++
    Less,      // <
    LessEq,    // <=
    Greater,   // >
    GreaterEq, // >=
    EqEq,      // ==
    NotEq,     // !=
    Bang,      // !

    // Other
    Identifier(String),
    Eof,
}

impl Token {
    /// Short human-readable rendering for "expected X, found Y" messages
    pub fn describe(&self) -> String {
        match self {
            Token::StringLiteral(s) => format!("string \"{}\"", s),
            Token::IntegerLiteral(i) => format!("integer {}", i),
            Token::FloatLiteral(f) => format!("double {}", f),
            Token::BooleanLiteral(b) => format!("boolean {}", b),
            Token::Identifier(name) => format!("'{}'", name),
            Token::Eof => "end of input".to_string(),
            other => format!("'{}'", other.symbol()),
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LParen => "(",
            Token::RParen => ")",
            Token::Colon => ":",
            Token::Comma => ",",
            Token::Semicolon => ";",
            Token::Dot => ".",
            Token::Arrow => "-->",
            Token::Assign => "=",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Concat => "++",
            Token::Less => "<",
            Token::LessEq => "<=",
            Token::Greater => ">",
            Token::GreaterEq => ">=",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Bang => "!",
            _ => "?",
        }
    }
}

/// Position in source text for error reporting
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Span {
    pub line: usize,
    pub column: usize,
    pub offset: usize,
}

impl fmt::Display for Span {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Token with source position
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// A lexical or grammatical error at a known position
#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxError {
    pub message: String,
    pub span: Span,
}

impl SyntaxError {
    pub fn new(message: impl Into<String>, span: Span) -> Self {
        SyntaxError {
            message: message.into(),
            span,
        }
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.span)
    }
}

/// Tokenizer over a single source text
pub struct Tokenizer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Tokenizer {
    /// Create a new tokenizer for the given input text
    pub fn new(text: &str) -> Self {
        Tokenizer {
            input: text.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input into a stream of spanned tokens
    pub fn tokenize(&mut self) -> Result<Vec<SpannedToken>, SyntaxError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_whitespace_and_comments()?;

            if self.is_at_end() {
                tokens.push(SpannedToken {
                    token: Token::Eof,
                    span: self.current_span(),
                });
                break;
            }

            let token = self.next_token()?;
            tokens.push(token);
        }

        Ok(tokens)
    }

    // ── Character helpers ──────────────────────────────────

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn peek_ahead(&self, offset: usize) -> Option<char> {
        self.input.get(self.position + offset).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.input.get(self.position).copied();
        if let Some(c) = ch {
            self.position += 1;
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        ch
    }

    fn current_span(&self) -> Span {
        Span {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    // ── Whitespace & Comments ──────────────────────────────

    fn skip_whitespace_and_comments(&mut self) -> Result<(), SyntaxError> {
        loop {
            while let Some(ch) = self.peek() {
                if ch.is_whitespace() {
                    self.advance();
                } else {
                    break;
                }
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('/') {
                while let Some(ch) = self.peek() {
                    if ch == '\n' {
                        break;
                    }
                    self.advance();
                }
                continue;
            }

            if self.peek() == Some('/') && self.peek_ahead(1) == Some('*') {
                let start = self.current_span();
                self.advance();
                self.advance();
                loop {
                    match self.peek() {
                        None => {
                            return Err(SyntaxError::new("Unterminated block comment", start));
                        }
                        Some('*') if self.peek_ahead(1) == Some('/') => {
                            self.advance();
                            self.advance();
                            break;
                        }
                        Some(_) => {
                            self.advance();
                        }
                    }
                }
                continue;
            }

            return Ok(());
        }
    }

    // ── Main dispatch ──────────────────────────────────────

    fn next_token(&mut self) -> Result<SpannedToken, SyntaxError> {
        let span = self.current_span();
        let ch = match self.peek() {
            Some(c) => c,
            None => return Ok(SpannedToken { token: Token::Eof, span }),
        };

        let token = match ch {
            '"' => return self.read_string(span),
            c if c.is_ascii_digit() => return self.read_number(span),
            c if c.is_ascii_alphabetic() || c == '_' => return Ok(self.read_identifier(span)),
            '{' => self.single(Token::LBrace),
            '}' => self.single(Token::RBrace),
            '[' => self.single(Token::LBracket),
            ']' => self.single(Token::RBracket),
            '(' => self.single(Token::LParen),
            ')' => self.single(Token::RParen),
            ':' => self.single(Token::Colon),
            ',' => self.single(Token::Comma),
            ';' => self.single(Token::Semicolon),
            '.' => self.single(Token::Dot),
            '*' => self.single(Token::Star),
            '/' => self.single(Token::Slash),
            '%' => self.single(Token::Percent),
            '+' => {
                if self.peek_ahead(1) == Some('+') {
                    self.double(Token::Concat)
                } else {
                    self.single(Token::Plus)
                }
            }
            '-' => {
                if self.peek_ahead(1) == Some('-') && self.peek_ahead(2) == Some('>') {
                    self.advance();
                    self.double(Token::Arrow)
                } else {
                    self.single(Token::Minus)
                }
            }
            '<' => {
                if self.peek_ahead(1) == Some('=') {
                    self.double(Token::LessEq)
                } else {
                    self.single(Token::Less)
                }
            }
            '>' => {
                if self.peek_ahead(1) == Some('=') {
                    self.double(Token::GreaterEq)
                } else {
                    self.single(Token::Greater)
                }
            }
            '=' => {
                if self.peek_ahead(1) == Some('=') {
                    self.double(Token::EqEq)
                } else {
                    self.single(Token::Assign)
                }
            }
            '!' => {
                if self.peek_ahead(1) == Some('=') {
                    self.double(Token::NotEq)
                } else {
                    self.single(Token::Bang)
                }
            }
            _ => {
                return Err(SyntaxError::new(
                    format!("Unexpected character '{}'", ch),
                    span,
                ))
            }
        };

        Ok(SpannedToken { token, span })
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance();
        token
    }

    fn double(&mut self, token: Token) -> Token {
        self.advance();
        self.advance();
        token
    }

    // ── String literals ────────────────────────────────────

    fn read_string(&mut self, span: Span) -> Result<SpannedToken, SyntaxError> {
        self.advance(); // opening "
        let mut value = String::new();

        loop {
            match self.advance() {
                None => {
                    return Err(SyntaxError::new("Unterminated string", span));
                }
                Some('"') => break,
                Some('\\') => match self.advance() {
                    Some('n') => value.push('\n'),
                    Some('t') => value.push('\t'),
                    Some('\\') => value.push('\\'),
                    Some('"') => value.push('"'),
                    Some(c) => {
                        return Err(SyntaxError::new(
                            format!("Invalid escape sequence '\\{}'", c),
                            self.current_span(),
                        ));
                    }
                    None => {
                        return Err(SyntaxError::new(
                            "Unterminated escape sequence",
                            self.current_span(),
                        ));
                    }
                },
                Some(c) => value.push(c),
            }
        }

        Ok(SpannedToken {
            token: Token::StringLiteral(value),
            span,
        })
    }

    // ── Numbers ────────────────────────────────────────────

    fn read_number(&mut self, span: Span) -> Result<SpannedToken, SyntaxError> {
        let start = self.position;
        let mut has_dot = false;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_digit() {
                self.advance();
            } else if ch == '.'
                && !has_dot
                && self.peek_ahead(1).is_some_and(|c| c.is_ascii_digit())
            {
                has_dot = true;
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = if has_dot {
            let val: f64 = text
                .parse()
                .map_err(|_| SyntaxError::new(format!("Invalid double '{}'", text), span))?;
            Token::FloatLiteral(val)
        } else {
            let val: i64 = text
                .parse()
                .map_err(|_| SyntaxError::new(format!("Invalid integer '{}'", text), span))?;
            Token::IntegerLiteral(val)
        };

        Ok(SpannedToken { token, span })
    }

    // ── Identifiers ────────────────────────────────────────

    fn read_identifier(&mut self, span: Span) -> SpannedToken {
        let start = self.position;

        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                self.advance();
            } else {
                break;
            }
        }

        let text: String = self.input[start..self.position].iter().collect();

        let token = match text.as_str() {
            "true" => Token::BooleanLiteral(true),
            "false" => Token::BooleanLiteral(false),
            _ => Token::Identifier(text),
        };

        SpannedToken { token, span }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Tokenizer::new(input)
            .tokenize()
            .unwrap()
            .into_iter()
            .map(|st| st.token)
            .collect()
    }

    fn tokenize_err(input: &str) -> String {
        Tokenizer::new(input).tokenize().unwrap_err().to_string()
    }

    fn ident(s: &str) -> Token {
        Token::Identifier(s.to_string())
    }

    #[test]
    fn test_tokenize_model_declaration() {
        let tokens = tokenize("concept Foo { o Double amount optional --> Party owner }");
        assert_eq!(
            tokens,
            vec![
                ident("concept"),
                ident("Foo"),
                Token::LBrace,
                ident("o"),
                ident("Double"),
                ident("amount"),
                ident("optional"),
                Token::Arrow,
                ident("Party"),
                ident("owner"),
                Token::RBrace,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_operators() {
        let tokens = tokenize("+ ++ - * / % < <= > >= == != ! =");
        assert_eq!(
            tokens,
            vec![
                Token::Plus,
                Token::Concat,
                Token::Minus,
                Token::Star,
                Token::Slash,
                Token::Percent,
                Token::Less,
                Token::LessEq,
                Token::Greater,
                Token::GreaterEq,
                Token::EqEq,
                Token::NotEq,
                Token::Bang,
                Token::Assign,
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_tokenize_numbers() {
        let tokens = tokenize("42 3.25 0");
        assert_eq!(
            tokens,
            vec![
                Token::IntegerLiteral(42),
                Token::FloatLiteral(3.25),
                Token::IntegerLiteral(0),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_dot_after_integer_is_not_a_fraction() {
        let tokens = tokenize("xs.1");
        assert_eq!(
            tokens,
            vec![ident("xs"), Token::Dot, Token::IntegerLiteral(1), Token::Eof]
        );
    }

    #[test]
    fn test_tokenize_string_escape_sequences() {
        let tokens = tokenize(r#""line\none\ttab\\slash\"quote""#);
        assert_eq!(
            tokens,
            vec![
                Token::StringLiteral("line\none\ttab\\slash\"quote".to_string()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_unterminated_string() {
        let err = tokenize_err(r#""hello"#);
        assert!(err.contains("Unterminated string"));
    }

    #[test]
    fn test_booleans_and_dotted_names() {
        let tokens = tokenize("namespace org.acme true");
        assert_eq!(
            tokens,
            vec![
                ident("namespace"),
                ident("org"),
                Token::Dot,
                ident("acme"),
                Token::BooleanLiteral(true),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn test_skip_comments() {
        let tokens = tokenize("a // line\n/* block\n comment */ b");
        assert_eq!(tokens, vec![ident("a"), ident("b"), Token::Eof]);
    }

    #[test]
    fn test_unterminated_block_comment() {
        let err = tokenize_err("a /* never closed");
        assert!(err.contains("Unterminated block comment"));
    }

    #[test]
    fn test_span_tracking() {
        let tokens = Tokenizer::new("clause {\n  x\n}").tokenize().unwrap();
        assert_eq!(tokens[0].span, Span { line: 1, column: 1, offset: 0 });
        assert_eq!(tokens[1].span, Span { line: 1, column: 8, offset: 7 });
        assert_eq!(tokens[2].span, Span { line: 2, column: 3, offset: 11 });
        assert_eq!(tokens[3].span, Span { line: 3, column: 1, offset: 13 });
    }

    #[test]
    fn test_unexpected_character_reports_position() {
        let err = tokenize_err("a\n  @");
        assert_eq!(err, "Unexpected character '@' at 2:3");
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(tokenize(""), vec![Token::Eof]);
        assert_eq!(tokenize("   \n\t // only a comment"), vec![Token::Eof]);
    }
}
