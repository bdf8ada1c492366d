//! Java runtime detection.
//!
//! The JVM prints its version banner on stderr, so the probe reads that
//! stream and scans it for a known banner instead of parsing a version.

use std::path::PathBuf;

use serde::Serialize;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::BuildConfig;
use crate::error::ProbeError;

/// Banner prefixes, in order of preference.
pub const VERSION_MARKERS: [&str; 2] = ["java version", "openjdk version"];

/// Characters taken from the start of the banner, enough for the marker plus
/// a quoted version token.
pub const VERSION_WINDOW: usize = 27;

/// Detected runtime version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ToolVersionInfo {
    /// Raw banner fragment, e.g. `java version "1.8.0_301"`
    pub version: String,
    pub supported: bool,
}

impl ToolVersionInfo {
    /// Scan `banner` for a version fragment and judge it against `supported`.
    ///
    /// Returns `None` when no known banner marker is present.
    pub fn detect(banner: &str, supported: &[String]) -> Option<Self> {
        let version = version_fragment(banner)?;
        let supported = supported.iter().any(|v| version.contains(v.as_str()));
        Some(Self { version, supported })
    }
}

fn version_fragment(banner: &str) -> Option<String> {
    VERSION_MARKERS.iter().find_map(|marker| {
        banner
            .find(marker)
            .map(|idx| banner[idx..].chars().take(VERSION_WINDOW).collect())
    })
}

/// Checks that a supported Java runtime is installed.
#[derive(Debug, Clone)]
pub struct RuntimeProbe {
    program: PathBuf,
    supported: Vec<String>,
}

impl RuntimeProbe {
    pub fn new(program: impl Into<PathBuf>, supported: Vec<String>) -> Self {
        Self {
            program: program.into(),
            supported,
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(
            config.toolchain.java.clone(),
            config.supported_runtime_versions.clone(),
        )
    }

    /// Run `<java> -version` and check the banner it prints on stderr.
    ///
    /// The exit status of the version command is ignored; only a failed
    /// launch or an unrecognizable banner is an error.
    pub async fn check_runtime_version(&self) -> Result<ToolVersionInfo, ProbeError> {
        let output = Command::new(&self.program)
            .arg("-version")
            .output()
            .await
            .map_err(|e| {
                ProbeError::RuntimeMissing(format!("{}: {}", self.program.display(), e))
            })?;

        let banner = String::from_utf8_lossy(&output.stderr);
        debug!(status = ?output.status.code(), "Runtime version banner: {}", banner.trim());

        let info = self.evaluate(&banner)?;
        info!(version = %info.version, "Java runtime detected");
        Ok(info)
    }

    /// Judge an already captured banner.
    pub fn evaluate(&self, banner: &str) -> Result<ToolVersionInfo, ProbeError> {
        match ToolVersionInfo::detect(banner, &self.supported) {
            None => Err(ProbeError::RuntimeMissing(
                "Java not detected on this system".to_string(),
            )),
            Some(info) if !info.supported => Err(ProbeError::RuntimeUnsupported {
                detected: info.version,
                supported: self.supported.clone(),
            }),
            Some(info) => Ok(info),
        }
    }
}

/// Probe the runtime configured in `config`.
pub async fn check_runtime_version(config: &BuildConfig) -> Result<ToolVersionInfo, ProbeError> {
    RuntimeProbe::from_config(config).check_runtime_version().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_SUPPORTED_VERSIONS;

    fn probe() -> RuntimeProbe {
        RuntimeProbe::new(
            "java",
            DEFAULT_SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
        )
    }

    #[test]
    fn test_oracle_banner_supported() {
        let banner = "java version \"1.8.0_301\"\nJava(TM) SE Runtime Environment (build 1.8.0_301-b09)\n";
        let info = probe().evaluate(banner).unwrap();
        assert!(info.version.contains("1.8.0"));
        assert!(info.supported);
    }

    #[test]
    fn test_openjdk_banner_supported() {
        let banner = "openjdk version \"17.0.2\" 2022-01-18\nOpenJDK Runtime Environment\n";
        let info = probe().evaluate(banner).unwrap();
        assert!(info.version.starts_with("openjdk version"));
        assert!(info.version.contains("17.0"));
    }

    #[test]
    fn test_unsupported_version() {
        let err = probe().evaluate("java version \"9.0.1\"\n").unwrap_err();
        match err {
            ProbeError::RuntimeUnsupported {
                detected,
                supported,
            } => {
                assert!(detected.contains("9.0.1"));
                assert_eq!(supported.len(), 4);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_no_banner_is_missing() {
        let err = probe().evaluate("command not found\n").unwrap_err();
        assert!(matches!(err, ProbeError::RuntimeMissing(_)));
    }

    #[test]
    fn test_fragment_is_fixed_width() {
        let banner = "java version \"11.0.12\" 2021-07-20 LTS";
        let fragment = version_fragment(banner).unwrap();
        assert_eq!(fragment.chars().count(), VERSION_WINDOW);
        assert_eq!(fragment, "java version \"11.0.12\" 2021");
    }

    #[test]
    fn test_java_marker_preferred() {
        let banner = "openjdk version \"9.0.1\"\njava version \"1.8.0_301\"";
        let fragment = version_fragment(banner).unwrap();
        assert!(fragment.starts_with("java version"));
    }

    #[test]
    fn test_short_banner_not_padded() {
        let fragment = version_fragment("java version \"1.8\"").unwrap();
        assert_eq!(fragment, "java version \"1.8\"");
    }

    #[tokio::test]
    async fn test_spawn_failure_is_missing() {
        let probe = RuntimeProbe::new("/nonexistent/bin/java", vec!["17.0".to_string()]);
        let err = probe.check_runtime_version().await.unwrap_err();
        assert!(matches!(err, ProbeError::RuntimeMissing(_)));
    }
}
