//! Build pipeline orchestration.
//!
//! Stages run strictly in order: prepare, verify tools, reassemble, verify,
//! align (best-effort), sign, publish, verify. The first fatal failure ends
//! the run; nothing already done is rolled back.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio::io::AsyncReadExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{is_bare_name, BuildConfig};
use crate::error::{FactoryError, PipelineError};
use crate::runner::{ProcessExecutor, StageExecutor, StageResult};
use crate::stage::{Stage, StageInvocation};

/// Read size used when hashing the published package.
const DIGEST_CHUNK: usize = 64 * 1024;

/// Result of a completed build.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub run_id: Uuid,

    pub started_at: DateTime<Utc>,

    /// Published, signed package.
    pub artifact: PathBuf,

    /// SHA-256 (hex) of the published package.
    pub artifact_sha256: String,

    /// Whether the byte-alignment pass was applied.
    pub aligned: bool,

    /// Results of the external-tool stages, in execution order.
    pub stages: Vec<StageResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl PipelineRun {
    /// Result of `stage`, if it ran.
    pub fn stage(&self, stage: Stage) -> Option<&StageResult> {
        self.stages.iter().find(|r| r.stage == stage)
    }
}

/// Orchestrates one build per call to [`BuildPipeline::build`].
///
/// All paths are fixed by the configuration, so two builds sharing a config
/// must not run at the same time.
pub struct BuildPipeline {
    config: Arc<BuildConfig>,
    executor: Arc<dyn StageExecutor>,
}

impl BuildPipeline {
    pub fn new(config: Arc<BuildConfig>, executor: Arc<dyn StageExecutor>) -> Self {
        Self { config, executor }
    }

    /// Pipeline that runs the real tools as child processes.
    pub fn with_process_executor(config: Arc<BuildConfig>) -> Self {
        Self::new(config, Arc::new(ProcessExecutor::new()))
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// Build, sign and publish the package.
    pub async fn build(&self) -> crate::Result<PipelineRun> {
        self.execute().await.map_err(|e| {
            error!(error = %e, "Build pipeline failed");
            FactoryError::Build(e)
        })
    }

    async fn execute(&self) -> Result<PipelineRun, PipelineError> {
        let start = Instant::now();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let paths = &self.config.paths;
        let mut stages = Vec::new();

        info!(run_id = %run_id, "Starting build pipeline");

        // 1. Prepare
        fs::create_dir_all(&paths.output_dir)
            .await
            .map_err(|source| PipelineError::Prepare {
                path: paths.output_dir.clone(),
                source,
            })?;

        // 2. Verify tools. Keystore and aligner are not checked.
        for tool in [&self.config.toolchain.apktool_jar, &self.config.toolchain.jarsigner] {
            if !tool_present(tool) {
                return Err(PipelineError::ToolMissing(tool.clone()));
            }
        }

        // 3. Reassemble
        self.run_stage(&StageInvocation::reassemble(&self.config), &mut stages)
            .await?;

        // 4. Verify reassembly output
        ensure_exists(&paths.unsigned_build).await?;

        // 5. Align (best-effort)
        let aligned = self.align(&mut stages).await;

        // 6. Sign
        self.run_stage(&StageInvocation::sign(&self.config), &mut stages)
            .await?;

        // 7. Relocate: copy, leaving the unsigned intermediate for cleanup
        info!(to = ?paths.published_artifact, "Publishing signed package");
        fs::copy(&paths.unsigned_build, &paths.published_artifact)
            .await
            .map_err(|source| PipelineError::RelocateFailed {
                from: paths.unsigned_build.clone(),
                to: paths.published_artifact.clone(),
                source,
            })?;

        // 8. Verify final artifact
        ensure_exists(&paths.published_artifact).await?;
        let artifact_sha256 = digest_file(&paths.published_artifact).await?;

        let duration_ms = start.elapsed().as_millis() as u64;
        info!(
            run_id = %run_id,
            artifact = ?paths.published_artifact,
            sha256 = %artifact_sha256,
            aligned,
            duration_ms,
            "Build pipeline completed"
        );

        Ok(PipelineRun {
            run_id,
            started_at,
            artifact: paths.published_artifact.clone(),
            artifact_sha256,
            aligned,
            stages,
            duration_ms,
        })
    }

    /// Run one external stage under its failure policy.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` when a non-fatal stage
    /// failed, and the mapped error when a fatal stage failed.
    async fn run_stage(
        &self,
        invocation: &StageInvocation,
        stages: &mut Vec<StageResult>,
    ) -> Result<bool, PipelineError> {
        let stage = invocation.stage;
        info!(stage = %stage, "Executing stage");

        let outcome = match self.executor.execute(invocation).await {
            Ok(result) => {
                let checked = result.ensure_success();
                stages.push(result);
                checked
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(()) => {
                info!(stage = %stage, "Stage succeeded");
                Ok(true)
            }
            Err(e) => {
                let failure = PipelineError::from_stage(e);
                if invocation.fatal {
                    Err(failure)
                } else {
                    warn!(stage = %stage, error = %failure, "Stage failed, continuing");
                    Ok(false)
                }
            }
        }
    }

    /// Align the unsigned build and move the result over it.
    ///
    /// Any failure leaves the unaligned build in place for signing.
    async fn align(&self, stages: &mut Vec<StageResult>) -> bool {
        let invocation = StageInvocation::align(&self.config);
        if !matches!(self.run_stage(&invocation, stages).await, Ok(true)) {
            return false;
        }

        let aligned = self.config.aligned_build_path();
        match fs::rename(&aligned, &self.config.paths.unsigned_build).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    path = ?aligned,
                    error = %e,
                    "Could not replace unsigned build with aligned copy, continuing unaligned"
                );
                false
            }
        }
    }
}

/// A bare program name is searched on `PATH`; anything else must exist.
fn tool_present(tool: &Path) -> bool {
    if is_bare_name(tool) {
        which::which(tool).is_ok()
    } else {
        tool.exists()
    }
}

async fn ensure_exists(path: &Path) -> Result<(), PipelineError> {
    match fs::try_exists(path).await {
        Ok(true) => Ok(()),
        _ => Err(PipelineError::ArtifactMissing(path.to_path_buf())),
    }
}

async fn digest_file(path: &Path) -> Result<String, PipelineError> {
    let verify_error = |source: std::io::Error| PipelineError::Verify {
        path: path.to_path_buf(),
        source,
    };

    let mut file = fs::File::open(path).await.map_err(verify_error)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; DIGEST_CHUNK];
    loop {
        let n = file.read(&mut buf).await.map_err(verify_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}
