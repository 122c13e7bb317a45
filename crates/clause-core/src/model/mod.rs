//! Model binding — type system, serializer and factory over the loaded model files
//!
//! A [`ModelManager`] holds one [`ModelFile`] per namespace, always including
//! the built-in namespaces the runtime relies on (`clause.runtime` for
//! requests, responses, state and events; `clause.contract` for contracts and
//! parties). Conversion between wire JSON and [`TypedValue`]s lives in
//! [`serializer`].

pub mod parser;
pub mod serializer;

use std::collections::{BTreeMap, BTreeSet};

use crate::{Error, Result};

pub use parser::parse_model_file;
pub use serializer::{Resource, TypedValue};

/// Namespace of the runtime base types
pub const RUNTIME_NAMESPACE: &str = "clause.runtime";
/// Namespace of the contract and party base types
pub const CONTRACT_NAMESPACE: &str = "clause.contract";
/// Namespaces owned by the runtime; callers cannot add or replace them
pub const BUILTIN_NAMESPACES: &[&str] = &[RUNTIME_NAMESPACE, CONTRACT_NAMESPACE];
/// Class of the canonical default contract state
pub const DEFAULT_STATE_CLASS: &str = "clause.runtime.State";

/// Primitive field types
pub const PRIMITIVES: &[&str] = &["Boolean", "String", "Double", "Integer", "Long", "DateTime"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Concept,
    Asset,
    Participant,
    Transaction,
    Event,
    Enum,
}

/// A declared type
#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub kind: DeclKind,
    pub is_abstract: bool,
    /// Super type as written in the source
    pub super_type: Option<String>,
    pub identified_by: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub enum_values: Vec<String>,
}

/// A declared field; `ty` is the type name as written in the source
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub ty: String,
    pub array: bool,
    pub optional: bool,
    pub relationship: bool,
}

/// A field with its type resolved to a primitive or a fully-qualified name
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedField {
    pub name: String,
    pub ty: String,
    pub array: bool,
    pub optional: bool,
    pub relationship: bool,
}

/// One model file: the unit of identity is its namespace
#[derive(Debug, Clone, PartialEq)]
pub struct ModelFile {
    pub name: String,
    pub namespace: String,
    pub content: String,
    pub imports: Vec<String>,
    pub decls: Vec<ClassDecl>,
}

impl ModelFile {
    pub fn decl(&self, name: &str) -> Option<&ClassDecl> {
        self.decls.iter().find(|d| d.name == name)
    }
}

/// Registry of model files plus the type queries built on top of them
#[derive(Debug, Clone)]
pub struct ModelManager {
    files: BTreeMap<String, ModelFile>,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// A manager holding only the built-in namespaces
    pub fn new() -> Self {
        let mut files = BTreeMap::new();
        for file in builtin_files() {
            files.insert(file.namespace.clone(), file);
        }
        ModelManager { files }
    }

    pub fn is_builtin(namespace: &str) -> bool {
        BUILTIN_NAMESPACES.contains(&namespace)
    }

    /// All namespaces, built-ins included, in sorted order
    pub fn namespaces(&self) -> Vec<String> {
        self.files.keys().cloned().collect()
    }

    pub fn model_file(&self, namespace: &str) -> Option<&ModelFile> {
        self.files.get(namespace)
    }

    pub fn model_file_by_name(&self, name: &str) -> Option<&ModelFile> {
        self.files
            .values()
            .find(|f| f.name == name && !Self::is_builtin(&f.namespace))
    }

    pub fn model_files(&self) -> impl Iterator<Item = &ModelFile> {
        self.files.values()
    }

    /// Register a new namespace
    ///
    /// # Errors
    /// `ModelError` if the namespace is built in or already present.
    pub fn add_model_file(&mut self, file: ModelFile) -> Result<()> {
        if Self::is_builtin(&file.namespace) {
            return Err(Error::Model(format!(
                "namespace '{}' is built in and cannot be replaced",
                file.namespace
            )));
        }
        if self.files.contains_key(&file.namespace) {
            return Err(Error::Model(format!(
                "namespace '{}' is already defined",
                file.namespace
            )));
        }
        self.files.insert(file.namespace.clone(), file);
        Ok(())
    }

    /// Replace the content of an existing namespace in place
    pub fn update_model_file(&mut self, file: ModelFile) -> Result<()> {
        match self.files.get_mut(&file.namespace) {
            Some(existing) if !Self::is_builtin(&file.namespace) => {
                *existing = file;
                Ok(())
            }
            _ => Err(Error::Model(format!(
                "namespace '{}' is not defined",
                file.namespace
            ))),
        }
    }

    pub fn delete_model_file(&mut self, namespace: &str) -> Result<()> {
        if Self::is_builtin(namespace) || self.files.remove(namespace).is_none() {
            return Err(Error::Model(format!(
                "namespace '{}' cannot be deleted",
                namespace
            )));
        }
        Ok(())
    }

    // ── Type queries ──────────────────────────────────────

    /// Look up a declaration by fully-qualified name
    pub fn class(&self, fqn: &str) -> Option<&ClassDecl> {
        let (namespace, name) = split_fqn(fqn)?;
        self.files.get(namespace)?.decl(name)
    }

    /// Resolve a type name as seen from `namespace` with `imports`
    ///
    /// Primitives resolve to themselves. Short names are looked up in the
    /// namespace itself, then explicit imports, then wildcard imports, then
    /// the built-in namespaces.
    pub fn resolve(&self, namespace: &str, imports: &[String], name: &str) -> Option<String> {
        if PRIMITIVES.contains(&name) {
            return Some(name.to_string());
        }
        if name.contains('.') {
            return self.class(name).map(|_| name.to_string());
        }

        let local = format!("{}.{}", namespace, name);
        if self.class(&local).is_some() {
            return Some(local);
        }
        for import in imports {
            if import.rsplit('.').next() == Some(name) && self.class(import).is_some() {
                return Some(import.clone());
            }
        }
        for import in imports {
            if let Some(prefix) = import.strip_suffix(".*") {
                let candidate = format!("{}.{}", prefix, name);
                if self.class(&candidate).is_some() {
                    return Some(candidate);
                }
            }
        }
        BUILTIN_NAMESPACES
            .iter()
            .map(|ns| format!("{}.{}", ns, name))
            .find(|candidate| self.class(candidate).is_some())
    }

    fn resolve_from(&self, fqn: &str, name: &str) -> Option<String> {
        let (namespace, _) = split_fqn(fqn)?;
        let file = self.files.get(namespace)?;
        self.resolve(namespace, &file.imports, name)
    }

    /// Fully-qualified super type of `fqn`, if any
    pub fn super_type(&self, fqn: &str) -> Option<String> {
        let decl = self.class(fqn)?;
        let written = decl.super_type.as_ref()?;
        self.resolve_from(fqn, written)
    }

    /// `fqn` followed by its ancestors, stopping at any cycle
    pub fn ancestry(&self, fqn: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = Some(fqn.to_string());
        while let Some(class) = current {
            if chain.contains(&class) || self.class(&class).is_none() {
                break;
            }
            current = self.super_type(&class);
            chain.push(class);
        }
        chain
    }

    pub fn is_subtype(&self, sub: &str, sup: &str) -> bool {
        self.ancestry(sub).iter().any(|c| c == sup)
    }

    /// All fields of `fqn`, inherited fields first, with resolved types
    ///
    /// Unresolvable field types are kept as written; model validation
    /// reports them.
    pub fn fields(&self, fqn: &str) -> Vec<ResolvedField> {
        let mut fields = Vec::new();
        for class in self.ancestry(fqn).iter().rev() {
            let Some(decl) = self.class(class) else { continue };
            for field in &decl.fields {
                let ty = self
                    .resolve_from(class, &field.ty)
                    .unwrap_or_else(|| field.ty.clone());
                fields.push(ResolvedField {
                    name: field.name.clone(),
                    ty,
                    array: field.array,
                    optional: field.optional,
                    relationship: field.relationship,
                });
            }
        }
        fields
    }

    /// Name of the identifying field of `fqn`, inherited if necessary
    pub fn identifier_field(&self, fqn: &str) -> Option<String> {
        self.ancestry(fqn)
            .iter()
            .filter_map(|c| self.class(c))
            .find_map(|d| d.identified_by.clone())
    }

    // ── Validation ────────────────────────────────────────

    /// Structural validation of every loaded model file
    ///
    /// All problems are collected and reported together.
    ///
    /// # Errors
    /// `ModelError` listing unresolved imports and types, inheritance
    /// cycles, missing identifying fields, duplicates and empty enums.
    pub fn validate_model_files(&self) -> Result<()> {
        let mut problems = Vec::new();

        for file in self.files.values() {
            for import in &file.imports {
                let namespace = import
                    .strip_suffix(".*")
                    .map(str::to_string)
                    .or_else(|| split_fqn(import).map(|(ns, _)| ns.to_string()))
                    .unwrap_or_default();
                let known = if import.ends_with(".*") {
                    self.files.contains_key(&namespace)
                } else {
                    self.class(import).is_some()
                };
                if !known {
                    problems.push(format!("{}: cannot resolve import '{}'", file.name, import));
                }
            }

            let mut seen = BTreeSet::new();
            for decl in &file.decls {
                let fqn = format!("{}.{}", file.namespace, decl.name);
                if !seen.insert(decl.name.as_str()) {
                    problems.push(format!("duplicate type '{}'", fqn));
                }
                self.validate_decl(file, decl, &fqn, &mut problems);
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(Error::Model(problems.join("; ")))
        }
    }

    fn validate_decl(
        &self,
        file: &ModelFile,
        decl: &ClassDecl,
        fqn: &str,
        problems: &mut Vec<String>,
    ) {
        if decl.kind == DeclKind::Enum {
            if decl.enum_values.is_empty() {
                problems.push(format!("enum '{}' declares no values", fqn));
            }
            return;
        }

        if let Some(written) = &decl.super_type {
            match self.resolve(&file.namespace, &file.imports, written) {
                None => problems.push(format!(
                    "'{}' extends unknown type '{}'",
                    fqn, written
                )),
                Some(sup) if PRIMITIVES.contains(&sup.as_str()) => problems.push(format!(
                    "'{}' cannot extend primitive type '{}'",
                    fqn, sup
                )),
                Some(_) => {
                    if self.has_cycle(fqn) {
                        problems.push(format!("inheritance cycle through '{}'", fqn));
                        return;
                    }
                }
            }
        }

        let mut names = BTreeSet::new();
        for field in self.fields(fqn) {
            if !names.insert(field.name.clone()) {
                problems.push(format!("'{}' declares field '{}' twice", fqn, field.name));
            }
        }

        for field in &decl.fields {
            match self.resolve(&file.namespace, &file.imports, &field.ty) {
                None => problems.push(format!(
                    "field '{}.{}' has unknown type '{}'",
                    fqn, field.name, field.ty
                )),
                Some(ty) if field.relationship => {
                    if PRIMITIVES.contains(&ty.as_str()) || self.identifier_field(&ty).is_none() {
                        problems.push(format!(
                            "relationship '{}.{}' must point to an identified type",
                            fqn, field.name
                        ));
                    }
                }
                Some(_) => {}
            }
        }

        if let Some(id) = self.identifier_field(fqn) {
            let fields = self.fields(fqn);
            match fields.iter().find(|f| f.name == id) {
                Some(f) if f.ty == "String" && !f.array && !f.relationship => {}
                Some(_) => problems.push(format!(
                    "identifying field '{}.{}' must be a String",
                    fqn, id
                )),
                None => problems.push(format!(
                    "'{}' is identified by missing field '{}'",
                    fqn, id
                )),
            }
        }
    }

    fn has_cycle(&self, fqn: &str) -> bool {
        let mut seen = vec![fqn.to_string()];
        let mut current = self.super_type(fqn);
        while let Some(class) = current {
            if seen.contains(&class) {
                return true;
            }
            current = self.super_type(&class);
            seen.push(class);
        }
        false
    }
}

/// Split `a.b.Type` into (`a.b`, `Type`)
pub fn split_fqn(fqn: &str) -> Option<(&str, &str)> {
    fqn.rsplit_once('.')
}

fn builtin_files() -> Vec<ModelFile> {
    fn class(name: &str, kind: DeclKind, identified_by: Option<&str>) -> ClassDecl {
        let fields = identified_by
            .map(|id| {
                vec![FieldDecl {
                    name: id.to_string(),
                    ty: "String".to_string(),
                    array: false,
                    optional: false,
                    relationship: false,
                }]
            })
            .unwrap_or_default();
        ClassDecl {
            name: name.to_string(),
            kind,
            is_abstract: false,
            super_type: None,
            identified_by: identified_by.map(str::to_string),
            fields,
            enum_values: Vec::new(),
        }
    }

    vec![
        ModelFile {
            name: "@runtime.cto".to_string(),
            namespace: RUNTIME_NAMESPACE.to_string(),
            content: String::new(),
            imports: Vec::new(),
            decls: vec![
                class("Request", DeclKind::Transaction, None),
                class("Response", DeclKind::Transaction, None),
                class("State", DeclKind::Concept, None),
                class("Event", DeclKind::Event, None),
            ],
        },
        ModelFile {
            name: "@contract.cto".to_string(),
            namespace: CONTRACT_NAMESPACE.to_string(),
            content: String::new(),
            imports: Vec::new(),
            decls: vec![
                class("Contract", DeclKind::Asset, Some("contractId")),
                class("Party", DeclKind::Participant, Some("partyId")),
            ],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager_with(text: &str) -> ModelManager {
        let mut manager = ModelManager::new();
        manager
            .add_model_file(parse_model_file(text, "test.cto").unwrap())
            .unwrap();
        manager
    }

    const MODEL: &str = r#"
namespace org.acme.test
concept Foo { o Double amount }
transaction Bump extends Request { o Integer by }
concept Counter extends State { o Integer count }
asset Loan identified by loanId { o String loanId  --> Party borrower }
"#;

    #[test]
    fn test_builtins_present() {
        let manager = ModelManager::new();
        assert_eq!(
            manager.namespaces(),
            vec!["clause.contract".to_string(), "clause.runtime".to_string()]
        );
        assert!(manager.class(DEFAULT_STATE_CLASS).is_some());
        assert_eq!(
            manager.identifier_field("clause.contract.Party").as_deref(),
            Some("partyId")
        );
    }

    #[test]
    fn test_builtin_namespace_cannot_be_added() {
        let mut manager = ModelManager::new();
        let file = parse_model_file("namespace clause.runtime\nconcept X {}", "x.cto").unwrap();
        assert!(matches!(manager.add_model_file(file), Err(Error::Model(_))));
    }

    #[test]
    fn test_resolution_order() {
        let manager = manager_with(MODEL);
        let imports = vec![];
        assert_eq!(
            manager.resolve("org.acme.test", &imports, "Foo").as_deref(),
            Some("org.acme.test.Foo")
        );
        assert_eq!(
            manager.resolve("org.acme.test", &imports, "Request").as_deref(),
            Some("clause.runtime.Request")
        );
        assert_eq!(
            manager.resolve("org.acme.test", &imports, "Double").as_deref(),
            Some("Double")
        );
        assert_eq!(manager.resolve("org.acme.test", &imports, "Nope"), None);
    }

    #[test]
    fn test_inherited_fields_and_subtyping() {
        let manager = manager_with(MODEL);
        assert!(manager.is_subtype("org.acme.test.Counter", DEFAULT_STATE_CLASS));
        assert!(!manager.is_subtype(DEFAULT_STATE_CLASS, "org.acme.test.Counter"));
        let fields = manager.fields("org.acme.test.Loan");
        assert_eq!(fields[1].ty, "clause.contract.Party");
        assert!(fields[1].relationship);
    }

    #[test]
    fn test_validate_good_model() {
        assert!(manager_with(MODEL).validate_model_files().is_ok());
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let manager = manager_with(
            r#"namespace org.bad
import org.missing.*
concept A extends Nowhere { o Widget w }
asset B identified by id { o Integer id }
enum Empty { }
concept C { --> Foo friend }
"#,
        );
        let err = manager.validate_model_files().unwrap_err().to_string();
        assert!(err.contains("cannot resolve import 'org.missing.*'"), "{}", err);
        assert!(err.contains("extends unknown type 'Nowhere'"), "{}", err);
        assert!(err.contains("unknown type 'Widget'"), "{}", err);
        assert!(err.contains("must be a String"), "{}", err);
        assert!(err.contains("declares no values"), "{}", err);
        assert!(err.contains("unknown type 'Foo'"), "{}", err);
    }

    #[test]
    fn test_inheritance_cycle_detected() {
        let manager = manager_with("namespace org.loop\nconcept A extends B {}\nconcept B extends A {}");
        let err = manager.validate_model_files().unwrap_err().to_string();
        assert!(err.contains("inheritance cycle"), "{}", err);
    }

    #[test]
    fn test_update_and_delete() {
        let mut manager = manager_with(MODEL);
        let replacement =
            parse_model_file("namespace org.acme.test\nconcept Foo { o String note }", "test.cto")
                .unwrap();
        manager.update_model_file(replacement).unwrap();
        assert_eq!(manager.fields("org.acme.test.Foo")[0].name, "note");

        manager.delete_model_file("org.acme.test").unwrap();
        assert!(manager.model_file("org.acme.test").is_none());
        assert!(manager.delete_model_file("clause.runtime").is_err());
    }
}
