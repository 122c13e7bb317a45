//! Model language parser
//!
//! ```text
//! namespace org.acme.test
//! import clause.contract.Party
//! abstract concept Base { o String name }
//! asset Loan identified by loanId extends Base { o String loanId  --> Party borrower }
//! enum Color { o RED o GREEN }
//! ```

use super::{ClassDecl, DeclKind, FieldDecl, ModelFile};
use crate::parser::tokenizer::{SyntaxError, Token, Tokenizer};
use crate::parser::Cursor;
use crate::{Error, Result};

/// Parse model text into a [`ModelFile`]
///
/// # Errors
/// `ModelError` naming the file and the line:column of the first violation.
pub fn parse_model_file(content: &str, name: &str) -> Result<ModelFile> {
    parse(content, name).map_err(|e| Error::Model(format!("{}: {}", name, e)))
}

fn parse(content: &str, name: &str) -> std::result::Result<ModelFile, SyntaxError> {
    let tokens = Tokenizer::new(content).tokenize()?;
    let mut cursor = Cursor::new(tokens);

    cursor.expect_keyword("namespace")?;
    let namespace = cursor.dotted_name(false)?;

    let mut imports = Vec::new();
    while cursor.eat_keyword("import") {
        imports.push(cursor.dotted_name(true)?);
    }

    let mut decls = Vec::new();
    while !cursor.at_end() {
        decls.push(class_decl(&mut cursor)?);
    }

    Ok(ModelFile {
        name: name.to_string(),
        namespace,
        content: content.to_string(),
        imports,
        decls,
    })
}

fn class_decl(cursor: &mut Cursor) -> std::result::Result<ClassDecl, SyntaxError> {
    let is_abstract = cursor.eat_keyword("abstract");

    let span = cursor.span();
    let kind = match cursor.expect_identifier()?.as_str() {
        "concept" => DeclKind::Concept,
        "asset" => DeclKind::Asset,
        "participant" => DeclKind::Participant,
        "transaction" => DeclKind::Transaction,
        "event" => DeclKind::Event,
        "enum" => DeclKind::Enum,
        other => {
            return Err(SyntaxError::new(
                format!("Unknown declaration kind '{}'", other),
                span,
            ))
        }
    };
    let name = cursor.expect_identifier()?;

    let mut identified_by = None;
    let mut super_type = None;
    loop {
        if cursor.eat_keyword("identified") {
            cursor.expect_keyword("by")?;
            identified_by = Some(cursor.expect_identifier()?);
        } else if cursor.eat_keyword("extends") {
            super_type = Some(cursor.dotted_name(false)?);
        } else {
            break;
        }
    }

    cursor.expect(&Token::LBrace)?;
    let mut fields = Vec::new();
    let mut enum_values = Vec::new();
    while !cursor.check(&Token::RBrace) {
        if kind == DeclKind::Enum {
            cursor.expect_keyword("o")?;
            enum_values.push(cursor.expect_identifier()?);
            continue;
        }
        let relationship = if cursor.eat(&Token::Arrow) {
            true
        } else if cursor.eat_keyword("o") {
            false
        } else {
            return Err(cursor.unexpected("'o' or '-->'"));
        };
        let ty = cursor.dotted_name(false)?;
        let array = if cursor.eat(&Token::LBracket) {
            cursor.expect(&Token::RBracket)?;
            true
        } else {
            false
        };
        let field_name = cursor.expect_identifier()?;
        let optional = cursor.eat_keyword("optional");
        fields.push(FieldDecl {
            name: field_name,
            ty,
            array,
            optional,
            relationship,
        });
    }
    cursor.expect(&Token::RBrace)?;

    Ok(ClassDecl {
        name,
        kind,
        is_abstract,
        super_type,
        identified_by,
        fields,
        enum_values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_model_file() {
        let text = r#"
namespace org.acme.test
import clause.contract.Party

/* a concept */
concept Foo {
  o Double amount
  o String[] tags optional
  --> Party owner
}

abstract asset Loan identified by loanId extends Base {
  o String loanId
}

enum Color { o RED o GREEN }
"#;
        let file = parse_model_file(text, "test.cto").unwrap();
        assert_eq!(file.namespace, "org.acme.test");
        assert_eq!(file.imports, vec!["clause.contract.Party".to_string()]);
        assert_eq!(file.decls.len(), 3);

        let foo = &file.decls[0];
        assert_eq!(foo.kind, DeclKind::Concept);
        assert_eq!(foo.fields.len(), 3);
        assert!(foo.fields[1].array && foo.fields[1].optional);
        assert!(foo.fields[2].relationship);

        let loan = &file.decls[1];
        assert!(loan.is_abstract);
        assert_eq!(loan.identified_by.as_deref(), Some("loanId"));
        assert_eq!(loan.super_type.as_deref(), Some("Base"));

        assert_eq!(file.decls[2].enum_values, vec!["RED", "GREEN"]);
    }

    #[test]
    fn test_missing_namespace_is_model_error() {
        let err = parse_model_file("concept Foo {}", "bad.cto").unwrap_err();
        assert!(matches!(err, Error::Model(_)));
        assert!(err.to_string().contains("bad.cto"));
        assert!(err.to_string().contains("1:1"));
    }

    #[test]
    fn test_unknown_declaration_kind() {
        let err = parse_model_file("namespace a.b\nwidget Foo {}", "w.cto").unwrap_err();
        assert!(err.to_string().contains("Unknown declaration kind 'widget'"));
    }
}
