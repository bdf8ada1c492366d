//! External tool execution.
//!
//! [`ProcessExecutor`] spawns a stage's program, logs its stdout/stderr line
//! by line while it runs, and resolves once the child exits. The pipeline
//! only ever sees the awaited [`StageResult`].

use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use crate::error::StageError;
use crate::stage::{Stage, StageInvocation};

/// Result of a stage execution.
#[derive(Debug, Clone, Serialize)]
pub struct StageResult {
    pub stage: Stage,

    /// Exit code (0 = success, -1 when killed by a signal).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl StageResult {
    /// Whether this stage passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.exit_code == 0
    }

    /// Captured stderr of a failed stage, if it printed anything.
    pub fn failure_output(&self) -> Option<&str> {
        let stderr = self.stderr.trim_end();
        (!self.passed() && !stderr.is_empty()).then_some(stderr)
    }

    /// Turn a non-zero exit into [`StageError::NonZeroExit`].
    pub fn ensure_success(&self) -> Result<(), StageError> {
        if self.passed() {
            Ok(())
        } else {
            Err(StageError::NonZeroExit {
                stage: self.stage,
                code: self.exit_code,
            })
        }
    }
}

/// Runs stage invocations.
#[async_trait]
pub trait StageExecutor: Send + Sync {
    /// Run the invocation to completion. A non-zero exit is still `Ok`; only
    /// launch, timeout and stream failures are errors.
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageResult, StageError>;

    /// Run the invocation and fail on any exit code other than 0.
    async fn run(&self, invocation: &StageInvocation) -> Result<StageResult, StageError> {
        let result = self.execute(invocation).await?;
        result.ensure_success()?;
        Ok(result)
    }
}

/// Executes stages as child processes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessExecutor;

impl ProcessExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StageExecutor for ProcessExecutor {
    async fn execute(&self, invocation: &StageInvocation) -> Result<StageResult, StageError> {
        let stage = invocation.stage;
        let start = Instant::now();

        debug!(stage = %stage, command = %invocation.command_line(), "Spawning stage");

        let mut child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| StageError::Spawn {
                stage,
                program: invocation.program.display().to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let collect = async {
            let (stdout, stderr, status) = tokio::join!(
                drain(stdout, stage, "stdout"),
                drain(stderr, stage, "stderr"),
                child.wait(),
            );
            Ok::<_, std::io::Error>((stdout?, stderr?, status?))
        };

        // Dropping `collect` on timeout releases the child, which kill_on_drop reaps.
        let collected = if invocation.timeout_secs > 0 {
            tokio::time::timeout(Duration::from_secs(invocation.timeout_secs), collect)
                .await
                .map_err(|_| StageError::TimedOut {
                    stage,
                    secs: invocation.timeout_secs,
                })?
        } else {
            collect.await
        };
        let (stdout, stderr, status) =
            collected.map_err(|source| StageError::Io { stage, source })?;

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = status.code().unwrap_or(-1);

        debug!(stage = %stage, exit_code, duration_ms, "Stage exited");

        let result = StageResult {
            stage,
            exit_code,
            stdout,
            stderr,
            duration_ms,
        };
        if let Some(output) = result.failure_output() {
            warn!(stage = %stage, exit_code, "Stage stderr:\n{}", output);
        }
        Ok(result)
    }
}

/// Read a child stream to the end, logging each line as it arrives.
async fn drain<R>(reader: Option<R>, stage: Stage, stream: &'static str) -> std::io::Result<String>
where
    R: AsyncRead + Unpin,
{
    let Some(reader) = reader else {
        return Ok(String::new());
    };

    let mut reader = BufReader::new(reader);
    let mut captured = String::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).await? == 0 {
            break;
        }
        let line = String::from_utf8_lossy(&buf);
        debug!(stage = %stage, stream, "{}", line.trim_end());
        captured.push_str(&line);
    }
    Ok(captured)
}
