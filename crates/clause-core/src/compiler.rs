//! Clause compiler — checks and combines logic fragments into one program
//!
//! # Architecture
//!
//! Every fragment is parsed on its own; the compiler then resolves each type
//! reference against the model (in the fragment's own namespace and imports),
//! checks names, and merges the fragments into one [`Program`]. Like the
//! verifier it is modelled on, it accumulates every diagnostic rather than
//! stopping at the first, and reports them together as one `CompileError`.
//!
//! # Checks
//!
//! 1. **Syntax** — each fragment parses
//! 2. **Types** — every type name resolves in the model
//! 3. **Duplicates** — one contract at most; unique clause, function and
//!    constant names
//! 4. **Names** — every variable is bound, every call targets a known function
//!    with the right number of arguments

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::model::ModelManager;
use crate::normalizer;
use crate::parser::ast::*;
use crate::parser::parse_module;
use crate::script::LogicFile;
use crate::{Error, Result};

/// Names every clause body can read
pub const CLAUSE_BINDINGS: &[&str] = &["contract", "state", "now", "utcOffset"];

/// Built-in functions and their arity
pub const BUILTIN_FUNCTIONS: &[(&str, usize)] = &[
    ("length", 1),
    ("toString", 1),
    ("abs", 1),
    ("min", 2),
    ("max", 2),
];

// ── Targets and output ─────────────────────────────────────

/// Code-generation target
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    /// Resolved program as JSON; executable by the sandboxes
    #[default]
    Ast,
    /// Normalized listing for inspection; renders no calls
    Canonical,
}

impl Target {
    pub fn label(self) -> &'static str {
        match self {
            Target::Ast => "ast",
            Target::Canonical => "canonical",
        }
    }

    /// Whether this target can render dispatch and named-clause calls
    pub fn supports_calls(self) -> bool {
        matches!(self, Target::Ast)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl std::str::FromStr for Target {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ast" => Ok(Target::Ast),
            "canonical" => Ok(Target::Canonical),
            other => Err(format!("unknown target '{}'", other)),
        }
    }
}

/// The combined compilation of every logic fragment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompiledOutput {
    /// Contract identity, when the logic declares a contract
    pub contract_name: Option<String>,
    pub target: Target,
    /// Target code
    pub code: String,
    /// SHA-256 of the canonical listing
    pub hash: String,
}

/// Turns logic fragments into target code
pub trait LogicCompiler: Send + Sync {
    fn compile(
        &self,
        sources: &[&LogicFile],
        models: &ModelManager,
        target: Target,
    ) -> Result<CompiledOutput>;
}

// ── Diagnostics ────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    Syntax,
    UnresolvedType,
    Duplicate,
    UnboundName,
    Arity,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            DiagnosticKind::Syntax => write!(f, "syntax"),
            DiagnosticKind::UnresolvedType => write!(f, "type"),
            DiagnosticKind::Duplicate => write!(f, "duplicate"),
            DiagnosticKind::UnboundName => write!(f, "name"),
            DiagnosticKind::Arity => write!(f, "arity"),
        }
    }
}

/// A single compiler diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub file: String,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.kind, self.file, self.message)
    }
}

/// Accumulates diagnostics across every fragment
#[derive(Debug, Clone, Default)]
pub struct Diagnostics {
    pub diagnostics: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn is_empty(&self) -> bool {
        self.diagnostics.is_empty()
    }

    fn add(&mut self, kind: DiagnosticKind, file: &str, message: String) {
        self.diagnostics.push(Diagnostic {
            kind,
            file: file.to_string(),
            message,
        });
    }

    fn into_result(self) -> Result<()> {
        if self.is_empty() {
            return Ok(());
        }
        let joined: Vec<String> = self.diagnostics.iter().map(|d| d.to_string()).collect();
        Err(Error::Compile(joined.join("; ")))
    }
}

// ── Compiler ───────────────────────────────────────────────

/// The built-in compiler for the clause language
#[derive(Debug, Clone, Copy, Default)]
pub struct ClauseCompiler;

impl LogicCompiler for ClauseCompiler {
    fn compile(
        &self,
        sources: &[&LogicFile],
        models: &ModelManager,
        target: Target,
    ) -> Result<CompiledOutput> {
        let program = build_program(sources, models)?;
        let listing = normalizer::serialize_canonical(&program);
        let hash = normalizer::hash_listing(&listing);
        let code = match target {
            Target::Ast => serde_json::to_string(&program)
                .map_err(|e| Error::Compile(format!("cannot encode program: {}", e)))?,
            Target::Canonical => listing,
        };

        let contract_name = program.contract.as_ref().map(|c| c.name.clone());
        debug!(
            contract = contract_name.as_deref().unwrap_or("<none>"),
            %target,
            %hash,
            "logic compiled"
        );
        Ok(CompiledOutput {
            contract_name,
            target,
            code,
            hash,
        })
    }
}

/// Parse, resolve and check the fragments, producing one program
pub fn build_program(sources: &[&LogicFile], models: &ModelManager) -> Result<Program> {
    let mut diagnostics = Diagnostics::default();

    let mut modules = Vec::new();
    for file in sources {
        match parse_module(&file.content) {
            Ok(module) => modules.push((file.name.as_str(), module)),
            Err(e) => diagnostics.add(DiagnosticKind::Syntax, &file.name, e.to_string()),
        }
    }

    // Signatures first: bodies may call functions declared in any fragment
    let mut arities: BTreeMap<String, usize> = BUILTIN_FUNCTIONS
        .iter()
        .map(|(name, arity)| (name.to_string(), *arity))
        .collect();
    let mut constants = BTreeSet::new();
    for (file, module) in &modules {
        for decl in &module.decls {
            match decl {
                Decl::Function(f) => {
                    if arities.insert(f.name.clone(), f.params.len()).is_some() {
                        diagnostics.add(
                            DiagnosticKind::Duplicate,
                            file,
                            format!("function '{}' is defined more than once", f.name),
                        );
                    }
                }
                Decl::Constant(c) => {
                    if !constants.insert(c.name.clone()) {
                        diagnostics.add(
                            DiagnosticKind::Duplicate,
                            file,
                            format!("constant '{}' is defined more than once", c.name),
                        );
                    }
                }
                Decl::Contract(_) => {}
            }
        }
    }

    let mut program = Program {
        contract: None,
        functions: Vec::new(),
        constants: Vec::new(),
        supertypes: supertypes(models),
    };

    for (file, module) in modules {
        let mut checker = Checker {
            file,
            namespace: module.namespace.clone().unwrap_or_default(),
            imports: &module.imports,
            models,
            arities: &arities,
            constants: &constants,
            diagnostics: &mut diagnostics,
        };

        for decl in module.decls.clone() {
            match decl {
                Decl::Contract(contract) => {
                    let info = checker.contract(contract);
                    if let Some(existing) = &program.contract {
                        checker.report(
                            DiagnosticKind::Duplicate,
                            format!(
                                "contract '{}' declared but '{}' already exists",
                                info.name, existing.name
                            ),
                        );
                    } else {
                        program.contract = Some(info);
                    }
                }
                Decl::Function(function) => program.functions.push(checker.function(function)),
                Decl::Constant(mut constant) => {
                    checker.expr(&mut constant.value, &mut Vec::new());
                    program.constants.push(constant);
                }
            }
        }
    }

    diagnostics.into_result()?;
    Ok(program)
}

fn supertypes(models: &ModelManager) -> BTreeMap<String, String> {
    let mut table = BTreeMap::new();
    for file in models.model_files() {
        for decl in &file.decls {
            let fqn = format!("{}.{}", file.namespace, decl.name);
            if let Some(parent) = models.super_type(&fqn) {
                table.insert(fqn, parent);
            }
        }
    }
    table
}

struct Checker<'a> {
    file: &'a str,
    namespace: String,
    imports: &'a [String],
    models: &'a ModelManager,
    arities: &'a BTreeMap<String, usize>,
    constants: &'a BTreeSet<String>,
    diagnostics: &'a mut Diagnostics,
}

impl Checker<'_> {
    fn report(&mut self, kind: DiagnosticKind, message: String) {
        self.diagnostics.add(kind, self.file, message);
    }

    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }

    fn resolve_name(&mut self, name: &str) -> String {
        match self.models.resolve(&self.namespace, self.imports, name) {
            Some(resolved) => resolved,
            None => {
                self.report(
                    DiagnosticKind::UnresolvedType,
                    format!("cannot resolve type '{}'", name),
                );
                name.to_string()
            }
        }
    }

    fn resolve_type(&mut self, ty: &mut TypeRef) {
        ty.name = self.resolve_name(&ty.name);
    }

    fn contract(&mut self, mut contract: ContractDecl) -> ContractInfo {
        let template = self.resolve_name(&contract.template.name);
        let state = contract
            .state
            .as_ref()
            .map(|s| s.name.clone())
            .map(|name| self.resolve_name(&name));

        let mut seen = BTreeSet::new();
        for clause in &mut contract.clauses {
            if !seen.insert(clause.name.clone()) {
                self.report(
                    DiagnosticKind::Duplicate,
                    format!("clause '{}' is defined more than once", clause.name),
                );
            }
            for param in &mut clause.params {
                self.resolve_type(&mut param.ty);
            }
            if let Some(output) = clause.output.as_mut() {
                self.resolve_type(output);
            }
            if let Some(emits) = clause.emits.as_mut() {
                self.resolve_type(emits);
            }

            let mut scope: Vec<String> = CLAUSE_BINDINGS.iter().map(|s| s.to_string()).collect();
            scope.extend(clause.params.iter().map(|p| p.name.clone()));
            self.block(&mut clause.body, &mut scope);
        }

        ContractInfo {
            name: self.qualify(&contract.name),
            template,
            state,
            clauses: contract.clauses,
        }
    }

    fn function(&mut self, mut function: FunctionDecl) -> FunctionDecl {
        for param in &mut function.params {
            self.resolve_type(&mut param.ty);
        }
        if let Some(output) = function.output.as_mut() {
            self.resolve_type(output);
        }
        let mut scope: Vec<String> = function.params.iter().map(|p| p.name.clone()).collect();
        self.block(&mut function.body, &mut scope);
        function
    }

    /// Check a block; bindings introduced inside do not escape it
    fn block(&mut self, body: &mut [Stmt], scope: &mut Vec<String>) {
        let depth = scope.len();
        for stmt in body.iter_mut() {
            self.stmt(stmt, scope);
        }
        scope.truncate(depth);
    }

    fn stmt(&mut self, stmt: &mut Stmt, scope: &mut Vec<String>) {
        match stmt {
            Stmt::Let { name, value } => {
                self.expr(value, scope);
                scope.push(name.clone());
            }
            Stmt::SetState(value) | Stmt::Emit(value) | Stmt::Throw(value) | Stmt::Expr(value) => {
                self.expr(value, scope)
            }
            Stmt::Return(value) => {
                if let Some(value) = value {
                    self.expr(value, scope);
                }
            }
            Stmt::Enforce { condition, message } => {
                self.expr(condition, scope);
                if let Some(message) = message {
                    self.expr(message, scope);
                }
            }
            Stmt::If {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition, scope);
                self.block(then, scope);
                self.block(otherwise, scope);
            }
            Stmt::While { condition, body } => {
                self.expr(condition, scope);
                self.block(body, scope);
            }
        }
    }

    fn expr(&mut self, expr: &mut Expr, scope: &mut Vec<String>) {
        match expr {
            Expr::Literal(_) => {}
            Expr::Var(name) => {
                if !scope.contains(name) && !self.constants.contains(name.as_str()) {
                    self.report(
                        DiagnosticKind::UnboundName,
                        format!("'{}' is not bound", name),
                    );
                }
            }
            Expr::Field { target, .. } => self.expr(target, scope),
            Expr::Record { class, fields } => {
                *class = self.resolve_name(class);
                for (_, value) in fields.iter_mut() {
                    self.expr(value, scope);
                }
            }
            Expr::Array(items) => {
                for item in items.iter_mut() {
                    self.expr(item, scope);
                }
            }
            Expr::Unary { operand, .. } => self.expr(operand, scope),
            Expr::Binary { lhs, rhs, .. } => {
                self.expr(lhs, scope);
                self.expr(rhs, scope);
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                self.expr(condition, scope);
                self.expr(then, scope);
                self.expr(otherwise, scope);
            }
            Expr::Call { function, args } => {
                match self.arities.get(function.as_str()).copied() {
                    None => self.report(
                        DiagnosticKind::UnboundName,
                        format!("unknown function '{}'", function),
                    ),
                    Some(arity) if arity != args.len() => self.report(
                        DiagnosticKind::Arity,
                        format!(
                            "'{}' takes {} argument(s) but {} were given",
                            function,
                            arity,
                            args.len()
                        ),
                    ),
                    Some(_) => {}
                }
                for arg in args.iter_mut() {
                    self.expr(arg, scope);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::parse_model_file;

    const MODEL: &str = r#"
namespace org.acme.test
concept Template { o String name }
concept Foo { o Double amount }
transaction Bump extends Request { o Integer by }
concept Counter extends State { o Integer count }
"#;

    const LOGIC: &str = r#"
namespace org.acme.test
define constant STEP = 1
define function twice(x : Double) : Double { return x * 2.0 }
contract Echo over Template state Counter {
  clause bar(request : Foo) : Foo { return Foo{ amount: twice(request.amount) } }
  clause bump(request : Bump) : Response {
    set state Counter{ count: state.count + request.by + STEP };
    return Response{}
  }
}
"#;

    fn models() -> ModelManager {
        let mut m = ModelManager::new();
        m.add_model_file(parse_model_file(MODEL, "test.cto").unwrap()).unwrap();
        m
    }

    fn compile(sources: &[(&str, &str)], target: Target) -> Result<CompiledOutput> {
        let files: Vec<LogicFile> = sources
            .iter()
            .map(|(name, content)| LogicFile::new(content, name))
            .collect();
        let refs: Vec<&LogicFile> = files.iter().collect();
        ClauseCompiler.compile(&refs, &models(), target)
    }

    #[test]
    fn test_compile_resolves_names() {
        let out = compile(&[("logic.clause", LOGIC)], Target::Ast).unwrap();
        assert_eq!(out.contract_name.as_deref(), Some("org.acme.test.Echo"));
        let program: Program = serde_json::from_str(&out.code).unwrap();
        let contract = program.contract.unwrap();
        assert_eq!(contract.template, "org.acme.test.Template");
        assert_eq!(contract.state.as_deref(), Some("org.acme.test.Counter"));
        assert_eq!(contract.clauses[1].params[0].ty.name, "org.acme.test.Bump");
        assert_eq!(
            contract.clauses[1].output.as_ref().map(|t| t.name.as_str()),
            Some("clause.runtime.Response")
        );
    }

    #[test]
    fn test_hash_is_target_independent() {
        let ast = compile(&[("logic.clause", LOGIC)], Target::Ast).unwrap();
        let canonical = compile(&[("logic.clause", LOGIC)], Target::Canonical).unwrap();
        assert_eq!(ast.hash, canonical.hash);
        assert!(canonical.code.starts_with("define constant STEP = 1\n"));
    }

    #[test]
    fn test_fragments_are_combined() {
        let helpers = "namespace org.acme.test\ndefine function half(x : Double) : Double { return x / 2.0 }";
        let logic = LOGIC.replace("twice(request.amount)", "half(request.amount)");
        let out = compile(&[("a.clause", helpers), ("b.clause", &logic)], Target::Ast);
        assert!(out.is_ok(), "{:?}", out);
    }

    #[test]
    fn test_diagnostics_are_reported_together() {
        let bad = r#"
namespace org.acme.test
define function f(x : Widget) : Double { return y }
define function f() { return g(1) }
contract A over Template { clause c(r : Foo) { return abs(1, 2) } clause c(r : Foo) { } }
contract B over Template { }
"#;
        let err = compile(&[("bad.clause", bad)], Target::Ast).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cannot resolve type 'Widget'"), "{}", msg);
        assert!(msg.contains("'y' is not bound"), "{}", msg);
        assert!(msg.contains("function 'f' is defined more than once"), "{}", msg);
        assert!(msg.contains("unknown function 'g'"), "{}", msg);
        assert!(msg.contains("'abs' takes 1 argument(s) but 2 were given"), "{}", msg);
        assert!(msg.contains("clause 'c' is defined more than once"), "{}", msg);
        assert!(msg.contains("contract 'org.acme.test.B' declared"), "{}", msg);
    }

    #[test]
    fn test_syntax_error_names_file_and_position() {
        let err = compile(&[("broken.clause", "contract {")], Target::Ast).unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
        let msg = err.to_string();
        assert!(msg.contains("broken.clause"), "{}", msg);
        assert!(msg.contains("1:10"), "{}", msg);
    }

    #[test]
    fn test_let_bindings_do_not_escape_blocks() {
        let logic = r#"
define function f(x : Boolean) : Double {
  if x { let y = 1.0; } else { }
  return y
}"#;
        let err = compile(&[("scope.clause", logic)], Target::Ast).unwrap_err();
        assert!(err.to_string().contains("'y' is not bound"));
    }

    #[test]
    fn test_program_carries_class_hierarchy() {
        let out = compile(&[("logic.clause", LOGIC)], Target::Ast).unwrap();
        let program: Program = serde_json::from_str(&out.code).unwrap();
        assert_eq!(
            program.ancestry("org.acme.test.Bump"),
            vec!["org.acme.test.Bump".to_string(), "clause.runtime.Request".to_string()]
        );
    }

    #[test]
    fn test_no_contract_is_allowed() {
        let out = compile(&[("f.clause", "define constant X = 1")], Target::Ast).unwrap();
        assert_eq!(out.contract_name, None);
    }
}
