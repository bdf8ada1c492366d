//! In-memory fakes for the stage executor (testing only)
//!
//! [`ScriptedExecutor`] records every invocation and simulates each tool by
//! writing a one-line marker per stage into the stage's output artifact, so
//! a published package built through it reads e.g. `reassemble\nalign\nsign\n`.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StageError;
use crate::runner::{StageExecutor, StageResult};
use crate::stage::{Stage, StageInvocation};

/// Scripted executor with per-stage exit codes.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    exit_codes: HashMap<Stage, i32>,
    missing: HashSet<Stage>,
    silent: HashSet<Stage>,
    calls: Mutex<Vec<StageInvocation>>,
}

impl ScriptedExecutor {
    /// Every stage succeeds and writes its artifact.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `stage` exit with `code`.
    pub fn with_exit_code(mut self, stage: Stage, code: i32) -> Self {
        self.exit_codes.insert(stage, code);
        self
    }

    /// Make launching `stage` fail as if its program were not installed.
    pub fn with_missing_tool(mut self, stage: Stage) -> Self {
        self.missing.insert(stage);
        self
    }

    /// Let `stage` exit 0 without writing its output artifact.
    pub fn without_output(mut self, stage: Stage) -> Self {
        self.silent.insert(stage);
        self
    }

    /// Stages invoked so far, in order.
    pub fn calls(&self) -> Vec<Stage> {
        self.invocations().iter().map(|i| i.stage).collect()
    }

    pub fn invocations(&self) -> Vec<StageInvocation> {
        self.calls.lock().unwrap().clone()
    }

    pub fn was_invoked(&self, stage: Stage) -> bool {
        self.calls().contains(&stage)
    }

    async fn write_output(&self, invocation: &StageInvocation) -> std::io::Result<()> {
        let Some(output) = &invocation.output else {
            return Ok(());
        };

        let mut content = match &invocation.input {
            Some(input) if input != output && input.is_file() => tokio::fs::read(input).await?,
            Some(input) if input == output => tokio::fs::read(output).await?,
            _ => Vec::new(),
        };
        content.extend_from_slice(invocation.stage.name().as_bytes());
        content.push(b'\n');
        tokio::fs::write(output, content).await
    }
}

#[async_trait]
impl StageExecutor for ScriptedExecutor {
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageResult, StageError> {
        let stage = invocation.stage;
        self.calls.lock().unwrap().push(invocation.clone());

        if self.missing.contains(&stage) {
            return Err(StageError::Spawn {
                stage,
                program: invocation.program.display().to_string(),
                source: std::io::Error::from(std::io::ErrorKind::NotFound),
            });
        }

        let exit_code = self.exit_codes.get(&stage).copied().unwrap_or(0);
        if exit_code == 0 && !self.silent.contains(&stage) {
            self.write_output(invocation)
                .await
                .map_err(|source| StageError::Io { stage, source })?;
        }

        Ok(StageResult {
            stage,
            exit_code,
            stdout: format!("{stage} ok\n"),
            stderr: if exit_code == 0 {
                String::new()
            } else {
                format!("{stage} failed\n")
            },
            duration_ms: 0,
        })
    }
}
