//! Sandboxes — build executables from target code and run call shapes
//!
//! A [`Sandbox`] turns the `ast` target code into an [`Executable`] and runs
//! a [`CallShape`] against an [`InvocationContext`]. Two variants exist:
//!
//! - [`IsolatedSandbox`] — dedicated worker thread, owned copies of the
//!   context, wall-clock budget enforced with an abort flag
//! - [`DirectSandbox`] — the caller's thread, no budget; for trusted logic
//!
//! Both share the same evaluator. Values cross the boundary only in boxed
//! form.

pub mod direct;
pub mod interpreter;
pub mod isolated;
pub mod value;

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{EngineConfig, Options, SandboxMode};
use crate::logic::CallShape;
use crate::parser::ast::Program;
use crate::{Error, Result};

pub use direct::DirectSandbox;
pub use interpreter::{Fault, Limits};
pub use isolated::IsolatedSandbox;
pub use value::Value;

/// Sandbox-ready program, built at most once per contract identity
#[derive(Debug, Clone, PartialEq)]
pub struct Executable {
    pub program: Program,
}

impl Executable {
    /// Decode `ast` target code
    ///
    /// # Errors
    /// `CompileError` when the code is not a serialized program.
    pub fn from_code(code: &str) -> Result<Self> {
        serde_json::from_str(code)
            .map(|program| Executable { program })
            .map_err(|e| Error::Compile(format!("target code is not executable: {}", e)))
    }
}

/// Everything one call may read; discarded after the call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvocationContext {
    /// Boxed contract data
    pub contract: serde_json::Value,
    /// Boxed contract state
    pub state: serde_json::Value,
    /// Boxed request (dispatch) or params record (named clause)
    pub input: serde_json::Value,
    pub options: Options,
    pub now: String,
    pub utc_offset: i32,
}

/// Boxed outputs of one call
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutput {
    pub response: serde_json::Value,
    pub state: serde_json::Value,
    /// Boxed collection of emitted events, in emission order
    pub emit: serde_json::Value,
}

/// Executes compiled logic
pub trait Sandbox: Send + Sync {
    /// Short name used in error messages
    fn label(&self) -> &'static str;

    /// Build an executable from target code
    fn compile(&self, code: &str) -> Result<Executable> {
        Executable::from_code(code)
    }

    /// Run `call` against `context`
    ///
    /// # Errors
    /// `SandboxRuntimeError` when the logic throws, fails an `enforce` or
    /// faults; `TimeoutError` when it overruns `budget` (isolated only).
    fn run(
        &self,
        context: InvocationContext,
        executable: Arc<Executable>,
        call: &CallShape,
        budget: Duration,
    ) -> Result<RunOutput>;
}

pub(crate) fn fault_to_error(fault: Fault, sandbox: &str, budget: Duration) -> Error {
    match fault {
        Fault::Runtime(message) => Error::SandboxRuntime {
            sandbox: sandbox.to_string(),
            message,
        },
        Fault::Aborted => Error::Timeout {
            sandbox: sandbox.to_string(),
            budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
        },
    }
}

/// The sandbox an engine configuration asks for
pub fn from_config(config: &EngineConfig) -> Box<dyn Sandbox> {
    match config.sandbox {
        SandboxMode::Isolated => Box::new(IsolatedSandbox::new(config.max_call_depth)),
        SandboxMode::Direct => Box::new(DirectSandbox::new(config.max_call_depth)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_code_rejects_listing() {
        let err = Executable::from_code("contract org.acme.Echo over T {\n}\n").unwrap_err();
        assert!(matches!(err, Error::Compile(_)));
    }

    #[test]
    fn test_from_config_picks_variant() {
        let direct = EngineConfig {
            sandbox: SandboxMode::Direct,
            ..EngineConfig::default()
        };
        assert_eq!(from_config(&direct).label(), "direct");
        assert_eq!(from_config(&EngineConfig::default()).label(), "isolated");
    }
}
