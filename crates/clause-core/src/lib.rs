//! Clause Core - validation, caching and sandboxed execution of contract logic
//!
//! A [`LogicUnit`] holds the data models and the logic of one contract
//! template; an [`Engine`] runs that logic against contract data, requests
//! and state.
//!
//! # Architecture
//!
//! ```text
//! Model text → ModelManager ──────────────┐
//!                                         ↓
//! Logic text → Parser → Compiler → CompiledOutput (ast | canonical)
//!                                         ↓
//! wire JSON → validate → box → Engine → Sandbox → unbox → validate → wire JSON
//! ```
//!
//! # Guarantees
//!
//! - **Validated**: every value entering or leaving logic conforms to its model
//! - **Isolated**: logic sees boxed copies only, within a wall-clock budget
//! - **Compile once**: one executable per contract identity, cached per engine
//! - **Canonical**: one normalized listing, and one hash, per logic unit

pub mod boxing;
pub mod compiler;
pub mod config;
pub mod engine;
pub mod error;
pub mod logic;
pub mod model;
pub mod normalizer;
pub mod parser;
pub mod sandbox;
pub mod script;

pub use compiler::{ClauseCompiler, CompiledOutput, LogicCompiler, Target};
pub use config::{CallConfig, EngineConfig, Options, SandboxMode};
pub use engine::{CallInput, Clock, Engine, InvocationResult};
pub use error::{Error, Result};
pub use logic::{CallShape, LogicUnit};
pub use model::{ModelManager, TypedValue};
pub use sandbox::{DirectSandbox, Executable, InvocationContext, IsolatedSandbox, RunOutput, Sandbox};
pub use script::{LogicFile, ScriptRepository};
