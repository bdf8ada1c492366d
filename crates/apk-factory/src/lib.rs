//! apk-factory: endpoint-patched, signed Android package builds
//!
//! Takes a decompiled package, rewrites the server endpoint baked into one
//! smali file, then drives the external toolchain to produce a published,
//! signed APK:
//!
//! - [`probe`] checks that a supported Java runtime is installed
//! - [`patcher`] rewrites the endpoint literal
//! - [`pipeline`] reassembles, aligns, signs and publishes
//! - [`cleanup`] removes intermediates afterwards
//!
//! External tools run through the [`StageExecutor`] trait; [`ProcessExecutor`]
//! spawns real processes and [`fakes::ScriptedExecutor`] simulates them.

pub mod cleanup;
pub mod config;
pub mod error;
pub mod fakes;
pub mod patcher;
pub mod pipeline;
pub mod probe;
pub mod runner;
pub mod stage;
pub mod telemetry;

// Re-export key types
pub use cleanup::cleanup;
pub use config::BuildConfig;
pub use error::{
    ConfigError, FactoryError, InputError, PatchError, PipelineError, ProbeError, StageError,
};
pub use patcher::{patch_endpoint, EndpointPatcher, PatchRequest};
pub use pipeline::{BuildPipeline, PipelineRun};
pub use probe::{check_runtime_version, RuntimeProbe, ToolVersionInfo};
pub use runner::{ProcessExecutor, StageExecutor, StageResult};
pub use stage::{Stage, StageInvocation};
pub use telemetry::init_tracing;

/// Result type for factory operations
pub type Result<T> = std::result::Result<T, FactoryError>;
