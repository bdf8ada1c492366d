//! apk-factory - patched, signed APK builds from a decompiled package
//!
//! ## Commands
//!
//! - `probe`: Check that a supported Java runtime is installed
//! - `patch`: Point the decompiled package at a server endpoint
//! - `build`: Probe, patch, reassemble, align, sign and publish
//! - `cleanup`: Remove intermediate build artifacts
//! - `config`: Show the resolved configuration

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use apk_factory::{
    check_runtime_version, cleanup, init_tracing, patch_endpoint, BuildConfig, BuildPipeline,
};
use clap::{Parser, Subcommand};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "apk-factory")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Build endpoint-patched, signed APKs from a decompiled package", long_about = None)]
struct Cli {
    /// Project root holding `app/factory` and `assets/webpublic`
    #[arg(short, long, global = true, default_value = ".", env = "APK_FACTORY_ROOT")]
    root: PathBuf,

    /// JSON config file (default: apk-factory.json in the project root, if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check that a supported Java runtime is installed
    Probe,

    /// Rewrite the endpoint baked into the decompiled package
    Patch {
        /// Server address (default: configured endpoint)
        #[arg(short, long)]
        address: Option<String>,

        /// Server port, 1-25564 (default: configured endpoint)
        #[arg(short, long, allow_hyphen_values = true)]
        port: Option<i64>,
    },

    /// Build, sign and publish the package
    Build {
        /// Server address to patch in (default: configured endpoint)
        #[arg(short, long)]
        address: Option<String>,

        /// Server port to patch in (default: configured endpoint)
        #[arg(short, long, allow_hyphen_values = true)]
        port: Option<i64>,

        /// Build the decompiled tree as-is, without patching
        #[arg(long)]
        no_patch: bool,

        /// Skip the Java runtime check
        #[arg(long)]
        skip_probe: bool,

        /// Leave intermediate artifacts in place
        #[arg(long)]
        keep_intermediates: bool,
    },

    /// Remove intermediate build artifacts
    Cleanup,

    /// Print the resolved configuration as JSON
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let config = BuildConfig::load(&cli.root, cli.config.as_deref())
        .context("Failed to load configuration")?;

    match cli.command {
        Commands::Probe => cmd_probe(&config).await,
        Commands::Patch { address, port } => cmd_patch(&config, address, port).await,
        Commands::Build {
            address,
            port,
            no_patch,
            skip_probe,
            keep_intermediates,
        } => {
            cmd_build(
                Arc::new(config),
                address,
                port,
                no_patch,
                skip_probe,
                keep_intermediates,
            )
            .await
        }
        Commands::Cleanup => cmd_cleanup(&config).await,
        Commands::Config => cmd_config(&config),
    }
}

/// Report the detected Java runtime
async fn cmd_probe(config: &BuildConfig) -> Result<()> {
    let info = check_runtime_version(config)
        .await
        .context("Java runtime check failed")?;

    println!("Java runtime: {}", info.version.trim());
    Ok(())
}

/// Patch the endpoint literal
async fn cmd_patch(config: &BuildConfig, address: Option<String>, port: Option<i64>) -> Result<()> {
    let address = address.unwrap_or_else(|| config.endpoint.address.clone());
    let port = port.unwrap_or(i64::from(config.endpoint.port));

    let request = patch_endpoint(config, &address, port).await?;

    println!("Patched endpoint: {}", request.url());
    println!("Target: {}", config.paths.patch_target.display());
    Ok(())
}

/// Full build: probe, patch, pipeline, cleanup
async fn cmd_build(
    config: Arc<BuildConfig>,
    address: Option<String>,
    port: Option<i64>,
    no_patch: bool,
    skip_probe: bool,
    keep_intermediates: bool,
) -> Result<()> {
    if !skip_probe {
        check_runtime_version(&config)
            .await
            .context("Java runtime check failed")?;
    }

    if !no_patch {
        let address = address.unwrap_or_else(|| config.endpoint.address.clone());
        let port = port.unwrap_or(i64::from(config.endpoint.port));
        patch_endpoint(&config, &address, port).await?;
    }

    let pipeline = BuildPipeline::with_process_executor(config.clone());
    let outcome = pipeline.build().await;

    if keep_intermediates {
        info!("Keeping intermediate artifacts");
    } else {
        cleanup(&config).await;
    }

    let run = outcome?;

    println!("Build complete");
    println!("  Run ID:   {}", run.run_id);
    println!("  Artifact: {}", run.artifact.display());
    println!("  SHA-256:  {}", run.artifact_sha256);
    println!("  Aligned:  {}", if run.aligned { "yes" } else { "no" });
    println!("  Duration: {} ms", run.duration_ms);
    Ok(())
}

/// Remove intermediates
async fn cmd_cleanup(config: &BuildConfig) -> Result<()> {
    let removed = cleanup(config).await;

    if removed.is_empty() {
        println!("Nothing to clean");
    } else {
        for path in &removed {
            println!("Removed {}", path.display());
        }
    }
    Ok(())
}

/// Show the resolved configuration
fn cmd_config(config: &BuildConfig) -> Result<()> {
    let json = serde_json::to_string_pretty(config).context("Failed to serialize configuration")?;
    println!("{}", json);
    Ok(())
}
