//! Scripted command runner for tests.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::error::ProcessError;

use super::runner::{CommandRunner, Invocation, ProcessOutput};

/// Records invocations and fails those matching a prefix.
#[derive(Default)]
pub struct RecordingRunner {
    invocations: Mutex<Vec<Invocation>>,
    failing: Vec<String>,
}

impl RecordingRunner {
    /// Invocations whose command line starts with `prefix` exit with status 1.
    pub fn failing(mut self, prefix: &str) -> Self {
        self.failing.push(prefix.to_string());
        self
    }

    /// Recorded invocations in order.
    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().expect("invocations lock").clone()
    }

    /// Recorded command lines in order.
    pub fn calls(&self) -> Vec<String> {
        self.invocations().iter().map(ToString::to_string).collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput, ProcessError> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(invocation.clone());

        let line = invocation.to_string();
        if self.failing.iter().any(|prefix| line.starts_with(prefix.as_str())) {
            return Ok(ProcessOutput {
                code: Some(1),
                stdout: String::new(),
                stderr: format!("{} failed\n", invocation.program),
            });
        }
        Ok(ProcessOutput {
            code: Some(0),
            ..ProcessOutput::default()
        })
    }
}
