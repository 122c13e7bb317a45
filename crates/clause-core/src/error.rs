//! Error types for the clause runtime
//!
//! All fallible operations return `Result<T, Error>`.
//! Every pipeline step validates before it executes and stops at the
//! first failure; nothing is retried.

/// Clause runtime error types
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Schema or namespace inconsistency in the loaded model files
    #[error("Model error: {0}")]
    Model(String),

    /// The logic could not be compiled (syntax, names, types)
    #[error("Compile error: {0}")]
    Compile(String),

    /// A wire value does not conform to its declared type
    #[error("Validation error at {path}: {message}")]
    Validation { path: String, message: String },

    /// The active code-generation target cannot render the requested call
    #[error("Unsupported target: '{target}' has no renderer for {shape} calls")]
    UnsupportedTarget { target: String, shape: String },

    /// Executed logic failed (throw, failed enforce, evaluator fault)
    #[error("Runtime error in {sandbox} sandbox: {message}")]
    SandboxRuntime { sandbox: String, message: String },

    /// Executed logic overran its wall-clock budget
    #[error("Execution exceeded the {budget_ms}ms budget in {sandbox} sandbox")]
    Timeout { sandbox: String, budget_ms: u64 },
}

impl Error {
    pub(crate) fn validation(path: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Validation {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Result type alias for clause runtime operations
pub type Result<T> = std::result::Result<T, Error>;
