//! Logic unit — model and logic management, compilation, and validation
//!
//! A [`LogicUnit`] owns the model files, the logic fragments, the compiler and
//! the active target. It is the single validation boundary of the engine:
//! every value entering executed logic goes through one of the `validate_*`
//! input operations (parse → validate → serialize → box), and every value
//! leaving it goes through `validate_output` or `validate_output_array`
//! (unbox → parse → validate → serialize).
//!
//! # Lifecycle
//!
//! ```text
//! add/update model ─► validated = false ─► validate_model_files ─► compile
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::boxing::{box_value, unbox_value};
use crate::compiler::{ClauseCompiler, CompiledOutput, LogicCompiler, Target};
use crate::config::Options;
use crate::model::{parse_model_file, serializer, ModelManager, TypedValue};
use crate::script::{LogicFile, ScriptRepository};
use crate::{Error, Result};

/// How executed logic is entered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CallShape {
    /// Route one request to the clause matching its type
    Dispatch,
    /// Call a clause by name with a record of parameters
    NamedClause(String),
}

impl CallShape {
    pub fn describe(&self) -> &'static str {
        match self {
            CallShape::Dispatch => "dispatch",
            CallShape::NamedClause(_) => "named-clause",
        }
    }
}

pub struct LogicUnit {
    models: ModelManager,
    scripts: ScriptRepository,
    compiler: Box<dyn LogicCompiler>,
    validated: bool,
    target: Target,
}

impl Default for LogicUnit {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LogicUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogicUnit")
            .field("namespaces", &self.models.namespaces())
            .field("logic_files", &self.scripts.logic_files().len())
            .field("validated", &self.validated)
            .field("target", &self.target)
            .finish()
    }
}

impl LogicUnit {
    /// A unit with the built-in clause compiler and the `ast` target
    pub fn new() -> Self {
        Self::with_compiler(Box::new(ClauseCompiler), Target::Ast)
    }

    pub fn with_compiler(compiler: Box<dyn LogicCompiler>, target: Target) -> Self {
        LogicUnit {
            models: ModelManager::new(),
            scripts: ScriptRepository::new(),
            compiler,
            validated: false,
            target,
        }
    }

    // ── Accessors ──────────────────────────────────────────

    pub fn model_manager(&self) -> &ModelManager {
        &self.models
    }

    pub fn namespaces(&self) -> Vec<String> {
        self.models.namespaces()
    }

    pub fn logic_files(&self) -> &[LogicFile] {
        self.scripts.logic_files()
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    pub fn is_compiled(&self) -> bool {
        self.scripts.compiled().is_some()
    }

    pub fn compiled(&self) -> Option<&CompiledOutput> {
        self.scripts.compiled()
    }

    /// Contract identity of the current compiled output
    pub fn contract_name(&self) -> Option<&str> {
        self.scripts.compiled()?.contract_name.as_deref()
    }

    pub fn target(&self) -> Target {
        self.target
    }

    /// Switch the code-generation target; the compiled output becomes stale
    pub fn set_target(&mut self, target: Target) {
        if self.target != target {
            debug!(from = %self.target, to = %target, "target changed");
            self.target = target;
            self.scripts.mark_stale();
        }
    }

    // ── Models ─────────────────────────────────────────────

    /// Register a model file; returns `false` for built-in namespaces, which
    /// are left untouched
    ///
    /// # Errors
    /// `ModelError` when the file does not parse or its namespace is taken.
    pub fn add_model_file(&mut self, content: &str, name: &str) -> Result<bool> {
        let file = parse_model_file(content, name)?;
        if ModelManager::is_builtin(&file.namespace) {
            debug!(name, namespace = %file.namespace, "built-in namespace ignored");
            return Ok(false);
        }
        debug!(name, namespace = %file.namespace, "model added");
        self.models.add_model_file(file)?;
        self.model_changed();
        Ok(true)
    }

    /// Add or replace the model file called `name`; returns whether anything
    /// changed
    pub fn update_model(&mut self, content: &str, name: &str) -> Result<bool> {
        let Some(existing) = self.models.model_file_by_name(name) else {
            return self.add_model_file(content, name);
        };
        if existing.content == content {
            debug!(name, "model unchanged");
            return Ok(false);
        }

        let old_namespace = existing.namespace.clone();
        let file = parse_model_file(content, name)?;
        if file.namespace == old_namespace {
            debug!(name, namespace = %old_namespace, "model replaced in place");
            self.models.update_model_file(file)?;
        } else {
            if ModelManager::is_builtin(&file.namespace)
                || self.models.model_file(&file.namespace).is_some()
            {
                return Err(Error::Model(format!(
                    "namespace '{}' is already defined",
                    file.namespace
                )));
            }
            debug!(name, from = %old_namespace, to = %file.namespace, "model namespace changed");
            self.models.delete_model_file(&old_namespace)?;
            self.models.add_model_file(file)?;
        }
        self.model_changed();
        Ok(true)
    }

    fn model_changed(&mut self) {
        self.validated = false;
        self.scripts.mark_stale();
    }

    /// Structural validation of the loaded models; runs once until the next
    /// model change
    pub fn validate_model_files(&mut self) -> Result<()> {
        if self.validated {
            return Ok(());
        }
        self.models.validate_model_files()?;
        self.validated = true;
        debug!(namespaces = self.models.namespaces().len(), "models validated");
        Ok(())
    }

    // ── Logic ──────────────────────────────────────────────

    pub fn add_logic_file(&mut self, content: &str, name: &str) -> bool {
        self.scripts.update_logic_file(content, name)
    }

    /// Returns whether the content changed; identical content is a no-op
    pub fn update_logic(&mut self, content: &str, name: &str) -> bool {
        self.scripts.update_logic_file(content, name)
    }

    /// Validate models, then compile unless already compiled and not forced
    ///
    /// # Errors
    /// `ModelError` from model validation, `CompileError` from the compiler.
    pub fn compile_logic_sync(&mut self, force: bool) -> Result<&CompiledOutput> {
        self.validate_model_files()?;
        if force || self.scripts.compiled().is_none() {
            let output = self
                .scripts
                .compile(self.compiler.as_ref(), &self.models, self.target)?;
            debug!(
                contract = output.contract_name.as_deref().unwrap_or("<none>"),
                target = %output.target,
                "logic unit compiled"
            );
        }
        self.scripts
            .compiled()
            .ok_or_else(|| Error::Compile("compilation produced no output".to_string()))
    }

    /// [`compile_logic_sync`](Self::compile_logic_sync) as an async task
    pub async fn compile_logic(&mut self, force: bool) -> Result<&CompiledOutput> {
        self.compile_logic_sync(force)
    }

    // ── Validation ─────────────────────────────────────────

    /// Wire input → boxed, validated input
    ///
    /// `null` is returned as is, without validation.
    pub fn validate_input(&self, input: &Value, utc_offset: i32) -> Result<Value> {
        if input.is_null() {
            debug!("absent input passed through without validation");
            return Ok(Value::Null);
        }
        let options = Options::default().for_input();
        let typed = serializer::from_json(&self.models, input, None, &options)?;
        let json = serializer::to_json(&self.models, &typed, &options, utc_offset)?;
        Ok(box_value(&json))
    }

    /// Like [`validate_input`](Self::validate_input), honoring the caller's
    /// validation options and also returning the typed value
    pub fn validate_contract(
        &self,
        contract: &Value,
        utc_offset: i32,
        options: &Options,
    ) -> Result<(Value, TypedValue)> {
        let options = options.for_input();
        let typed = serializer::from_json(&self.models, contract, None, &options)?;
        let json = serializer::to_json(&self.models, &typed, &options, utc_offset)?;
        Ok((box_value(&json), typed))
    }

    /// `validate_input` on every object-valued field of a flat record
    pub fn validate_input_record(&self, record: &Value, utc_offset: i32) -> Result<Value> {
        serializer::fixed_offset(utc_offset)?;
        let fields = record
            .as_object()
            .ok_or_else(|| Error::validation("params", "expected a record of parameters"))?;
        let mut validated = serde_json::Map::new();
        for (name, value) in fields {
            let value = if value.is_object() {
                self.validate_input(value, utc_offset)
                    .map_err(|e| match e {
                        Error::Validation { path, message } => Error::Validation {
                            path: rooted_path(name, value, &path),
                            message,
                        },
                        other => other,
                    })?
            } else {
                value.clone()
            };
            validated.insert(name.clone(), value);
        }
        Ok(Value::Object(validated))
    }

    /// Boxed output → validated wire JSON; non-objects pass through
    pub fn validate_output(&self, output: &Value, utc_offset: i32) -> Result<Value> {
        serializer::fixed_offset(utc_offset)?;
        let unboxed = unbox_value(output);
        if !unboxed.is_object() {
            return Ok(unboxed);
        }
        let options = Options::for_output();
        let typed = serializer::from_json(&self.models, &unboxed, None, &options)?;
        serializer::to_json(&self.models, &typed, &options, utc_offset)
    }

    /// Boxed collection → validated elements, in order
    pub fn validate_output_array(&self, output: &Value, utc_offset: i32) -> Result<Vec<Value>> {
        serializer::fixed_offset(utc_offset)?;
        match unbox_value(output) {
            Value::Array(items) => items
                .iter()
                .map(|item| self.validate_output(item, utc_offset))
                .collect(),
            Value::Null => Ok(Vec::new()),
            other => Err(Error::validation(
                "emit",
                format!("expected a collection, found {}", other),
            )),
        }
    }

    // ── Call shapes ────────────────────────────────────────

    pub fn dispatch_call(&self) -> Result<CallShape> {
        self.render(CallShape::Dispatch)
    }

    pub fn invoke_call(&self, clause_name: &str) -> Result<CallShape> {
        self.render(CallShape::NamedClause(clause_name.to_string()))
    }

    fn render(&self, shape: CallShape) -> Result<CallShape> {
        if !self.target.supports_calls() {
            return Err(Error::UnsupportedTarget {
                target: self.target.label().to_string(),
                shape: shape.describe().to_string(),
            });
        }
        Ok(shape)
    }
}

/// Re-root a class-qualified field path at the parameter it came from:
/// `org.acme.Foo.amount` under `request` becomes `request.amount`
fn rooted_path(param: &str, value: &Value, path: &str) -> String {
    let rest = value
        .get("$class")
        .and_then(Value::as_str)
        .and_then(|class| path.strip_prefix(class))
        .filter(|rest| rest.is_empty() || rest.starts_with(['.', '[']));
    match rest {
        Some(rest) => format!("{}{}", param, rest),
        None => format!("{}.{}", param, path),
    }
}
