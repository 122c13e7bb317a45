//! Execution engine — the trigger / invoke / init / calculate protocol
//!
//! Every call runs the same pipeline:
//!
//! ```text
//! resolve clock ─► validate contract, input, state ─► render call shape
//!   ─► cached executable ─► sandbox run ─► validate response, state, emit
//! ```
//!
//! # Guarantees
//!
//! - **Fail fast**: the first failing step aborts the call; nothing is retried.
//! - **Compile once**: an executable is built at most once per contract
//!   identity and reused until the cache is cleared, the entry evicted, or
//!   the logic unit switches target.
//! - **Isolation**: the sandbox only ever sees boxed copies of the inputs.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Offset, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::boxing::box_value;
use crate::compiler::Target;
use crate::config::{CallConfig, EngineConfig, Options};
use crate::logic::{CallShape, LogicUnit};
use crate::model::{serializer, DEFAULT_STATE_CLASS};
use crate::sandbox::{self, Executable, InvocationContext, Sandbox};
use crate::{Error, Result};

/// Wire input echoed back in a result, keyed by call shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CallInput {
    #[serde(rename = "request")]
    Request(Value),
    #[serde(rename = "params")]
    Params(Value),
}

/// Outcome of one call, in wire form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvocationResult {
    /// Contract identity for trigger, clause name otherwise
    pub clause: String,
    #[serde(flatten)]
    pub input: CallInput,
    pub response: Value,
    pub state: Value,
    pub emit: Vec<Value>,
}

/// A resolved `(now, utcOffset)` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub now: DateTime<FixedOffset>,
    /// Minutes east of UTC
    pub utc_offset: i32,
}

impl Clock {
    /// Resolve the call's clock from its configuration
    ///
    /// An explicit offset wins and `now` is converted into it; otherwise the
    /// offset carried by `now` is used; with neither, the current UTC time.
    ///
    /// # Errors
    /// `ValidationError` at `now` for an unparseable timestamp, at
    /// `utcOffset` for an offset of a day or more.
    pub fn resolve(config: &CallConfig) -> Result<Self> {
        let base = match &config.now {
            Some(now) => DateTime::parse_from_rfc3339(now)
                .map_err(|e| Error::validation("now", format!("invalid timestamp '{}': {}", now, e)))?,
            None => Utc::now().with_timezone(&Utc.fix()),
        };
        let utc_offset = config
            .utc_offset
            .unwrap_or_else(|| base.offset().local_minus_utc() / 60);
        let offset = serializer::fixed_offset(utc_offset)?;
        Ok(Clock {
            now: base.with_timezone(&offset),
            utc_offset,
        })
    }

    pub fn render(&self) -> String {
        self.now.to_rfc3339_opts(SecondsFormat::Millis, false)
    }
}

/// Validated, boxed inputs of one call
struct Prepared {
    contract: Value,
    input: Value,
    state: Value,
}

pub struct Engine {
    sandbox: Box<dyn Sandbox>,
    config: EngineConfig,
    cache: HashMap<String, Arc<Executable>>,
    /// Target the cached executables were built for
    cache_target: Option<Target>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sandbox", &self.sandbox.label())
            .field("config", &self.config)
            .field("cached", &self.cache.len())
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// An engine with the sandbox `config` asks for
    pub fn new(config: EngineConfig) -> Self {
        let sandbox = sandbox::from_config(&config);
        Self::with_sandbox(sandbox, config)
    }

    pub fn with_sandbox(sandbox: Box<dyn Sandbox>, config: EngineConfig) -> Self {
        Engine {
            sandbox,
            config,
            cache: HashMap::new(),
            cache_target: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn sandbox_label(&self) -> &'static str {
        self.sandbox.label()
    }

    // ── Executable cache ───────────────────────────────────

    pub fn clear_cache(&mut self) {
        debug!(entries = self.cache.len(), "executable cache cleared");
        self.cache.clear();
        self.cache_target = None;
    }

    /// Drop one contract's executable; returns whether it was cached
    pub fn evict(&mut self, contract_id: &str) -> bool {
        self.cache.remove(contract_id).is_some()
    }

    pub fn is_cached(&self, contract_id: &str) -> bool {
        self.cache.contains_key(contract_id)
    }

    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    fn executable(&mut self, logic: &LogicUnit, contract_id: &str) -> Result<Arc<Executable>> {
        let target = logic.target();
        if self.cache_target.is_some_and(|cached| cached != target) {
            debug!(%target, entries = self.cache.len(), "target changed, executable cache cleared");
            self.cache.clear();
        }
        self.cache_target = Some(target);

        if let Some(executable) = self.cache.get(contract_id) {
            debug!(contract_id, "executable cache hit");
            return Ok(Arc::clone(executable));
        }

        let compiled = logic
            .compiled()
            .ok_or_else(|| Error::Compile("logic has not been compiled".to_string()))?;
        let executable = Arc::new(self.sandbox.compile(&compiled.code)?);
        debug!(contract_id, hash = %compiled.hash, "executable cache miss, built");
        self.cache
            .insert(contract_id.to_string(), Arc::clone(&executable));
        Ok(executable)
    }

    // ── Protocol ───────────────────────────────────────────

    /// Route `request` to the clause matching its type
    ///
    /// # Errors
    /// The first failure of the pipeline: `ValidationError` for inputs or
    /// outputs, `UnsupportedTargetError`, `CompileError` when the logic has
    /// no executable output, `SandboxRuntimeError` or `TimeoutError` from
    /// the sandbox.
    pub fn trigger(
        &mut self,
        logic: &LogicUnit,
        contract_id: &str,
        contract: &Value,
        request: &Value,
        state: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        let clock = Clock::resolve(config)?;
        let prepared = Prepared {
            contract: logic
                .validate_contract(contract, clock.utc_offset, &config.validate_options)?
                .0,
            input: logic.validate_input(request, clock.utc_offset)?,
            state: logic.validate_input(state, clock.utc_offset)?,
        };
        let call = logic.dispatch_call()?;
        self.run(
            logic,
            contract_id,
            call,
            prepared,
            &config.options,
            clock,
            contract_id.to_string(),
            CallInput::Request(request.clone()),
        )
    }

    /// Call `clause_name` with a record of parameters
    ///
    /// # Errors
    /// As [`trigger`](Self::trigger).
    #[allow(clippy::too_many_arguments)]
    pub fn invoke(
        &mut self,
        logic: &LogicUnit,
        contract_id: &str,
        clause_name: &str,
        contract: &Value,
        params: &Value,
        state: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        let clock = Clock::resolve(config)?;
        let prepared = Prepared {
            contract: logic
                .validate_contract(contract, clock.utc_offset, &config.validate_options)?
                .0,
            input: logic.validate_input_record(params, clock.utc_offset)?,
            state: logic.validate_input(state, clock.utc_offset)?,
        };
        let call = logic.invoke_call(clause_name)?;
        self.run(
            logic,
            contract_id,
            call,
            prepared,
            &config.options,
            clock,
            clause_name.to_string(),
            CallInput::Params(params.clone()),
        )
    }

    /// Run the `init` clause against the default state
    pub fn init(
        &mut self,
        logic: &LogicUnit,
        contract_id: &str,
        contract: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        let state = default_state(logic)?;
        self.invoke(logic, contract_id, "init", contract, &json!({}), &state, config)
    }

    /// Evaluate clause `name` for its response, with contract relationships
    /// validated as bare identifiers
    pub fn calculate(
        &mut self,
        logic: &LogicUnit,
        contract_id: &str,
        name: &str,
        contract: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        let mut config = config.clone();
        config.validate_options.convert_resources_to_id = true;
        let state = default_state(logic)?;
        self.invoke(logic, contract_id, name, contract, &json!({}), &state, &config)
    }

    #[allow(clippy::too_many_arguments)]
    fn run(
        &mut self,
        logic: &LogicUnit,
        contract_id: &str,
        call: CallShape,
        prepared: Prepared,
        options: &Options,
        clock: Clock,
        clause: String,
        input: CallInput,
    ) -> Result<InvocationResult> {
        let executable = self.executable(logic, contract_id)?;
        let context = InvocationContext {
            contract: prepared.contract,
            state: prepared.state,
            input: prepared.input,
            options: options.clone(),
            now: clock.render(),
            utc_offset: clock.utc_offset,
        };
        debug!(
            contract_id,
            call = call.describe(),
            sandbox = self.sandbox.label(),
            "running clause"
        );
        let output = self
            .sandbox
            .run(context, executable, &call, self.config.timeout())?;

        let response = logic.validate_output(&output.response, clock.utc_offset)?;
        let state = logic.validate_output(&output.state, clock.utc_offset)?;
        let emit = logic.validate_output_array(&output.emit, clock.utc_offset)?;
        Ok(InvocationResult {
            clause,
            input,
            response,
            state,
            emit,
        })
    }

    // ── Compile, then run ──────────────────────────────────

    pub async fn compile_and_trigger(
        &mut self,
        logic: &mut LogicUnit,
        contract_id: &str,
        contract: &Value,
        request: &Value,
        state: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        ensure_compiled(logic).await?;
        self.trigger(logic, contract_id, contract, request, state, config)
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn compile_and_invoke(
        &mut self,
        logic: &mut LogicUnit,
        contract_id: &str,
        clause_name: &str,
        contract: &Value,
        params: &Value,
        state: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        ensure_compiled(logic).await?;
        self.invoke(logic, contract_id, clause_name, contract, params, state, config)
    }

    pub async fn compile_and_init(
        &mut self,
        logic: &mut LogicUnit,
        contract_id: &str,
        contract: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        ensure_compiled(logic).await?;
        self.init(logic, contract_id, contract, config)
    }

    pub async fn compile_and_calculate(
        &mut self,
        logic: &mut LogicUnit,
        contract_id: &str,
        name: &str,
        contract: &Value,
        config: &CallConfig,
    ) -> Result<InvocationResult> {
        ensure_compiled(logic).await?;
        self.calculate(logic, contract_id, name, contract, config)
    }
}

async fn ensure_compiled(logic: &mut LogicUnit) -> Result<()> {
    if !logic.is_compiled() {
        logic.compile_logic(false).await?;
    }
    Ok(())
}

/// Boxed instance of the runtime's base state class
fn default_state(logic: &LogicUnit) -> Result<Value> {
    let models = logic.model_manager();
    let typed = models.new_instance(DEFAULT_STATE_CLASS)?;
    let json = serializer::to_json(models, &typed, &Options::default(), 0)?;
    Ok(box_value(&json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SandboxMode;

    const MODEL: &str = r#"
namespace org.acme.test
concept Template { o String name }
concept Foo { o Double amount }
"#;

    const LOGIC: &str = r#"
namespace org.acme.test
contract Echo over Template {
  clause bar(request : Foo) : Foo { return request }
}
"#;

    fn direct() -> Engine {
        Engine::new(EngineConfig {
            sandbox: SandboxMode::Direct,
            ..EngineConfig::default()
        })
    }

    fn compiled() -> LogicUnit {
        let mut logic = LogicUnit::new();
        logic.add_model_file(MODEL, "test.cto").unwrap();
        logic.add_logic_file(LOGIC, "logic.clause");
        logic.compile_logic_sync(false).unwrap();
        logic
    }

    fn contract() -> Value {
        json!({"$class": "org.acme.test.Template", "name": "demo"})
    }

    fn at(now: &str, offset: Option<i32>) -> CallConfig {
        CallConfig {
            now: Some(now.to_string()),
            utc_offset: offset,
            ..CallConfig::default()
        }
    }

    #[test]
    fn test_clock_takes_offset_from_now() {
        let clock = Clock::resolve(&at("2026-03-01T12:00:00+02:00", None)).unwrap();
        assert_eq!(clock.utc_offset, 120);
        assert_eq!(clock.render(), "2026-03-01T12:00:00.000+02:00");
    }

    #[test]
    fn test_clock_converts_now_into_explicit_offset() {
        let clock = Clock::resolve(&at("2026-03-01T12:00:00Z", Some(-300))).unwrap();
        assert_eq!(clock.utc_offset, -300);
        assert_eq!(clock.render(), "2026-03-01T07:00:00.000-05:00");
    }

    #[test]
    fn test_clock_defaults_to_utc() {
        let clock = Clock::resolve(&CallConfig::default()).unwrap();
        assert_eq!(clock.utc_offset, 0);
        assert!(clock.render().ends_with("+00:00"));
    }

    #[test]
    fn test_clock_rejects_bad_input() {
        let err = Clock::resolve(&at("yesterday", None)).unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "now"));

        let err = Clock::resolve(&CallConfig {
            utc_offset: Some(24 * 60),
            ..CallConfig::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "utcOffset"));
    }

    #[test]
    fn test_result_wire_shape() {
        let result = InvocationResult {
            clause: "bar".into(),
            input: CallInput::Params(json!({})),
            response: Value::Null,
            state: json!({"$class": DEFAULT_STATE_CLASS}),
            emit: vec![],
        };
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({
                "clause": "bar",
                "params": {},
                "response": null,
                "state": {"$class": "clause.runtime.State"},
                "emit": []
            })
        );
    }

    #[test]
    fn test_cache_is_keyed_by_contract_identity() {
        let logic = compiled();
        let mut engine = direct();
        let params = json!({"request": {"$class": "org.acme.test.Foo", "amount": 1.5}});
        let state = json!({"$class": DEFAULT_STATE_CLASS});

        for id in ["a", "b", "a"] {
            engine
                .invoke(&logic, id, "bar", &contract(), &params, &state, &CallConfig::default())
                .unwrap();
        }
        assert_eq!(engine.cache_len(), 2);
        assert!(engine.evict("a"));
        assert!(!engine.is_cached("a"));
        engine.clear_cache();
        assert_eq!(engine.cache_len(), 0);
    }

    #[test]
    fn test_unsupported_target_leaves_no_cache_entry() {
        let mut logic = compiled();
        logic.set_target(Target::Canonical);
        logic.compile_logic_sync(false).unwrap();
        let mut engine = direct();
        let err = engine
            .trigger(
                &logic,
                "echo",
                &contract(),
                &json!({"$class": "org.acme.test.Foo", "amount": 1.5}),
                &json!({"$class": DEFAULT_STATE_CLASS}),
                &CallConfig::default(),
            )
            .unwrap_err();
        assert_eq!(
            err,
            Error::UnsupportedTarget {
                target: "canonical".into(),
                shape: "dispatch".into()
            }
        );
        assert!(!engine.is_cached("echo"));
    }

    #[test]
    fn test_target_change_clears_cache_on_lookup() {
        let logic = compiled();
        let mut engine = direct();
        engine
            .init(&logic, "other", &contract(), &CallConfig::default())
            .unwrap();
        engine.cache_target = Some(Target::Canonical);

        engine
            .init(&logic, "echo", &contract(), &CallConfig::default())
            .unwrap();
        assert!(!engine.is_cached("other"));
        assert!(engine.is_cached("echo"));
        assert_eq!(engine.cache_target, Some(Target::Ast));
    }

    #[test]
    fn test_uncompiled_logic_is_a_compile_error() {
        let mut logic = LogicUnit::new();
        logic.add_model_file(MODEL, "test.cto").unwrap();
        let err = direct()
            .init(&logic, "echo", &contract(), &CallConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn test_invalid_contract_stops_before_running() {
        let logic = compiled();
        let mut engine = direct();
        let err = engine
            .init(&logic, "echo", &json!({"$class": "org.acme.test.Template"}), &CallConfig::default())
            .unwrap_err();
        assert!(matches!(err, Error::Validation { ref path, .. } if path == "org.acme.test.Template.name"));
        assert_eq!(engine.cache_len(), 0);
    }
}
