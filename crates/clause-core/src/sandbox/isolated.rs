//! Isolated sandbox — one worker thread per call, bounded by a wall-clock budget
//!
//! The worker owns its copies of the context and executable, so nothing the
//! caller holds can be mutated by executed logic. When the budget elapses the
//! caller raises the abort flag and returns `TimeoutError`; the worker stops
//! at its next statement or loop iteration and its result is discarded.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use super::interpreter::{self, Limits};
use super::{fault_to_error, Executable, InvocationContext, RunOutput, Sandbox};
use crate::logic::CallShape;
use crate::{Error, Result};

const LABEL: &str = "isolated";

#[derive(Debug, Clone)]
pub struct IsolatedSandbox {
    max_call_depth: usize,
}

impl IsolatedSandbox {
    pub fn new(max_call_depth: usize) -> Self {
        IsolatedSandbox { max_call_depth }
    }

    fn runtime_error(message: impl Into<String>) -> Error {
        Error::SandboxRuntime {
            sandbox: LABEL.to_string(),
            message: message.into(),
        }
    }
}

impl Sandbox for IsolatedSandbox {
    fn label(&self) -> &'static str {
        LABEL
    }

    fn run(
        &self,
        context: InvocationContext,
        executable: Arc<Executable>,
        call: &CallShape,
        budget: Duration,
    ) -> Result<RunOutput> {
        let abort_flag = Arc::new(AtomicBool::new(false));
        let abort_clone = Arc::clone(&abort_flag);
        let call = call.clone();
        let max_call_depth = self.max_call_depth;

        let (result_tx, result_rx) = mpsc::channel();
        let spawned = thread::Builder::new()
            .name("clause-sandbox".to_string())
            .spawn(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    interpreter::execute(
                        &executable.program,
                        &context,
                        &call,
                        Limits {
                            max_call_depth,
                            abort: Some(abort_clone.as_ref()),
                        },
                    )
                }));
                // The receiver is gone after a timeout; the result is discarded
                let _ = result_tx.send(outcome);
            });
        if let Err(e) = spawned {
            return Err(Self::runtime_error(format!("cannot start worker: {}", e)));
        }

        match result_rx.recv_timeout(budget) {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(fault))) => {
                debug!(?fault, "sandboxed logic failed");
                Err(fault_to_error(fault, LABEL, budget))
            }
            Ok(Err(payload)) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "evaluator panicked".to_string());
                Err(Self::runtime_error(message))
            }
            Err(RecvTimeoutError::Timeout) => {
                abort_flag.store(true, Ordering::Relaxed);
                warn!(budget_ms = budget.as_millis() as u64, "sandboxed logic timed out");
                Err(Error::Timeout {
                    sandbox: LABEL.to_string(),
                    budget_ms: u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                })
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(Self::runtime_error("worker exited without a result"))
            }
        }
    }
}
