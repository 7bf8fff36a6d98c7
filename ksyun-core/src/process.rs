//! Process - Ordered execution of API calls
//!
//! An [`ApiProcess`] runs its steps one after another against the same
//! [`ResourceData`]. By default the first failing step aborts the process;
//! with `continue_on_error` every step runs and failures are reported
//! together. Completed steps are never rolled back.

use log::{debug, warn};

use crate::call::{ApiCall, CallOutcome, CallState};
use crate::provider::{BoxFuture, ProviderError, ProviderResult};
use crate::resource::ResourceData;

/// A step of a process: a single call or a nested group
#[derive(Debug)]
pub enum Step {
    Call(ApiCall),
    Process(ApiProcess),
}

#[derive(Debug, Default)]
pub struct ApiProcess {
    steps: Vec<Step>,
    continue_on_error: bool,
}

impl ApiProcess {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn call(mut self, call: ApiCall) -> Self {
        self.steps.push(Step::Call(call));
        self
    }

    pub fn push(&mut self, call: ApiCall) {
        self.steps.push(Step::Call(call));
    }

    /// Append a nested group, run with its own error policy
    pub fn then(mut self, process: ApiProcess) -> Self {
        if !process.is_empty() {
            self.steps.push(Step::Process(process));
        }
        self
    }

    pub fn continue_on_error(mut self) -> Self {
        self.continue_on_error = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Number of calls, nested groups included
    pub fn len(&self) -> usize {
        self.steps
            .iter()
            .map(|step| match step {
                Step::Call(_) => 1,
                Step::Process(p) => p.len(),
            })
            .sum()
    }

    /// Calls in execution order, as built (before any hook ran)
    pub fn describe(&self) -> Vec<&CallState> {
        let mut calls = Vec::new();
        for step in &self.steps {
            match step {
                Step::Call(call) => calls.push(&call.state),
                Step::Process(p) => calls.extend(p.describe()),
            }
        }
        calls
    }

    /// Run every step in order
    pub fn run<'a>(self, data: &'a mut ResourceData) -> BoxFuture<'a, ProviderResult<()>> {
        Box::pin(async move {
            let mut errors = Vec::new();

            for step in self.steps {
                let result = match step {
                    Step::Call(mut call) => match call.run(data).await {
                        Ok(CallOutcome::Skipped) => {
                            debug!("skipped {}", call.action());
                            Ok(())
                        }
                        Ok(_) => Ok(()),
                        Err(e) => Err(e),
                    },
                    Step::Process(process) => process.run(data).await,
                };

                if let Err(e) = result {
                    if !self.continue_on_error {
                        return Err(e);
                    }
                    warn!("{}, continuing", e);
                    errors.push(e);
                }
            }

            if errors.is_empty() {
                Ok(())
            } else {
                Err(ProviderError::aggregate(errors))
            }
        })
    }
}
