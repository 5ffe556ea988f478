//! Recording command runner

use std::collections::HashMap;
use std::sync::Mutex;

use super::lock;
use crate::exec::{Cmd, CommandRunner, ExecError};

/// Records every invocation; succeeds unless the program was told to fail.
#[derive(Debug, Default)]
pub struct MockCommandRunner {
    calls: Mutex<Vec<Cmd>>,
    failures: Mutex<HashMap<String, String>>,
}

impl MockCommandRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every run of `program` exit non-zero with `output` on stderr.
    pub fn fail_program(&self, program: &str, output: &str) {
        lock(&self.failures).insert(program.to_string(), output.to_string());
    }

    /// Invocations so far, oldest first.
    pub fn calls(&self) -> Vec<Cmd> {
        lock(&self.calls).clone()
    }
}

impl CommandRunner for MockCommandRunner {
    fn run(&self, cmd: &Cmd) -> Result<String, ExecError> {
        lock(&self.calls).push(cmd.clone());
        match lock(&self.failures).get(&cmd.program) {
            Some(output) => Err(ExecError::Failed {
                program: cmd.program.clone(),
                code: Some(1),
                stdout: String::new(),
                stderr: output.clone(),
            }),
            None => Ok(String::new()),
        }
    }
}
