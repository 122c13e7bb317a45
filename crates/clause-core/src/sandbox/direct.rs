//! Direct sandbox — evaluates on the caller's thread with no time budget
//!
//! Only suitable for logic that is already trusted to terminate.

use std::sync::Arc;
use std::time::Duration;

use super::interpreter::{self, Limits};
use super::{fault_to_error, Executable, InvocationContext, RunOutput, Sandbox};
use crate::logic::CallShape;
use crate::Result;

const LABEL: &str = "direct";

#[derive(Debug, Clone)]
pub struct DirectSandbox {
    max_call_depth: usize,
}

impl DirectSandbox {
    pub fn new(max_call_depth: usize) -> Self {
        DirectSandbox { max_call_depth }
    }
}

impl Sandbox for DirectSandbox {
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
        let limits = Limits {
            max_call_depth: self.max_call_depth,
            abort: None,
        };
        interpreter::execute(&executable.program, &context, call, limits)
            .map_err(|fault| fault_to_error(fault, LABEL, budget))
    }
}
