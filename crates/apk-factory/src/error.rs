//! Error types for apk-factory
//!
//! Each component owns a narrow error enum; [`FactoryError`] prefixes them
//! with the high-level operation that failed (patch vs. build) while keeping
//! the inner message intact.

use std::path::PathBuf;

use thiserror::Error;

use crate::stage::Stage;

/// Rejected patch input. Raised before any filesystem access.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    /// Address was empty or whitespace only
    #[error("address must be a non-empty string")]
    EmptyAddress,

    /// Port outside 1-25564
    #[error("port must be between 1-25564, got {0}")]
    PortOutOfRange(i64),
}

/// Errors from the runtime version probe
#[derive(Error, Debug)]
pub enum ProbeError {
    /// Runtime could not be launched or printed no recognizable banner
    #[error("Java runtime is not installed: {0}")]
    RuntimeMissing(String),

    /// Banner found but the version is not on the allow-list
    #[error(
        "unsupported Java version. Detected: {detected}. Supported versions: {}",
        .supported.join(", ")
    )]
    RuntimeUnsupported {
        detected: String,
        supported: Vec<String>,
    },
}

/// Errors from rewriting the endpoint literal
#[derive(Error, Debug)]
pub enum PatchError {
    #[error(transparent)]
    InvalidInput(#[from] InputError),

    /// The patch target file does not exist
    #[error("patch target not found: {}", .0.display())]
    TargetMissing(PathBuf),

    /// No URL-shaped substring in the patch target
    #[error("no URL pattern found in {}", .0.display())]
    PatternNotFound(PathBuf),

    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Errors from running a single external tool
#[derive(Error, Debug)]
pub enum StageError {
    /// Process ran and exited with something other than 0
    #[error("{stage} exited with code {code}")]
    NonZeroExit { stage: Stage, code: i32 },

    /// Process could not be started at all
    #[error("failed to launch {stage} ({program}): {source}")]
    Spawn {
        stage: Stage,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{stage} timed out after {secs} seconds")]
    TimedOut { stage: Stage, secs: u64 },

    /// Reading the child's streams or waiting on it failed
    #[error("I/O error while running {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },
}

impl StageError {
    /// Stage that produced this error.
    pub fn stage(&self) -> Stage {
        match self {
            StageError::NonZeroExit { stage, .. }
            | StageError::Spawn { stage, .. }
            | StageError::TimedOut { stage, .. }
            | StageError::Io { stage, .. } => *stage,
        }
    }
}

/// Errors from the build pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to prepare output directory {}: {source}", path.display())]
    Prepare {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required tool is absent; names the first one missing
    #[error("required tool not found: {}", .0.display())]
    ToolMissing(PathBuf),

    #[error("reassembly failed with exit code {0}")]
    BuildFailed(i32),

    /// Only ever logged; alignment never aborts a build
    #[error("alignment failed: {0}")]
    AlignFailed(String),

    #[error("signing failed with exit code {0}")]
    SignFailed(i32),

    /// A fatal stage could not be launched, timed out, or lost its streams
    #[error(transparent)]
    Stage(StageError),

    /// An artifact expected after a stage is absent
    #[error("expected artifact not found: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("failed to publish {} to {}: {source}", from.display(), to.display())]
    RelocateFailed {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read published artifact {}: {source}", path.display())]
    Verify {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl PipelineError {
    /// Map a stage failure onto the pipeline taxonomy.
    pub fn from_stage(err: StageError) -> Self {
        match err {
            StageError::NonZeroExit {
                stage: Stage::Reassemble,
                code,
            } => PipelineError::BuildFailed(code),
            StageError::NonZeroExit {
                stage: Stage::Sign,
                code,
            } => PipelineError::SignFailed(code),
            err if err.stage() == Stage::Align => PipelineError::AlignFailed(err.to_string()),
            err => PipelineError::Stage(err),
        }
    }
}

/// Errors from loading [`crate::BuildConfig`]
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to resolve project root {}: {source}", path.display())]
    Root {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value for {var}: {value:?}")]
    InvalidEnv { var: String, value: String },
}

/// Top-level error surfaced to callers of the factory operations
#[derive(Error, Debug)]
pub enum FactoryError {
    #[error("patch failed: {0}")]
    Patch(#[from] PatchError),

    #[error("build failed: {0}")]
    Build(#[from] PipelineError),

    #[error(transparent)]
    Environment(#[from] ProbeError),

    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
}
