//! Endpoint literal rewriting.
//!
//! The disassembled socket class carries one hard-coded server URL. The
//! patcher swaps the first URL-shaped substring for `http://{address}:{port}`
//! and leaves every other byte of the file untouched.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;
use tokio::fs;
use tracing::info;

use crate::config::BuildConfig;
use crate::error::{InputError, PatchError};

/// Highest accepted port.
pub const MAX_PORT: i64 = 25564;

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://[^\s?]+").expect("Invalid URL regex"));

/// Validated endpoint to write into the patch target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchRequest {
    pub address: String,
    pub port: u16,
}

impl PatchRequest {
    /// Validate `address` and `port`. Touches nothing on disk.
    pub fn new(address: impl Into<String>, port: i64) -> Result<Self, InputError> {
        let address = address.into();
        if address.is_empty() {
            return Err(InputError::EmptyAddress);
        }
        if port <= 0 || port > MAX_PORT {
            return Err(InputError::PortOutOfRange(port));
        }
        Ok(Self {
            address,
            port: port as u16,
        })
    }

    /// Replacement URL, `http://{address}:{port}`.
    pub fn url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

/// Replace the first URL in `text` with `replacement`.
///
/// Returns `None` when `text` holds no URL.
pub fn rewrite_first_url(text: &str, replacement: &str) -> Option<String> {
    let found = URL_PATTERN.find(text)?;
    let mut patched = String::with_capacity(text.len() - found.len() + replacement.len());
    patched.push_str(&text[..found.start()]);
    patched.push_str(replacement);
    patched.push_str(&text[found.end()..]);
    Some(patched)
}

/// Rewrites the endpoint literal in one source file.
#[derive(Debug, Clone)]
pub struct EndpointPatcher {
    target: PathBuf,
}

impl EndpointPatcher {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self::new(config.paths.patch_target.clone())
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Point the patch target at `http://{address}:{port}`.
    pub async fn patch(&self, address: &str, port: i64) -> crate::Result<PatchRequest> {
        Ok(self.apply(address, port).await?)
    }

    async fn apply(&self, address: &str, port: i64) -> Result<PatchRequest, PatchError> {
        let request = PatchRequest::new(address, port)?;

        if let Some(parent) = self.target.parent() {
            fs::create_dir_all(parent).await.map_err(|source| PatchError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        // The directory may be fresh, but the file itself must already exist.
        let exists = fs::try_exists(&self.target)
            .await
            .map_err(|source| self.io_error(source))?;
        if !exists {
            return Err(PatchError::TargetMissing(self.target.clone()));
        }

        let text = fs::read_to_string(&self.target)
            .await
            .map_err(|source| self.io_error(source))?;

        let url = request.url();
        let patched = rewrite_first_url(&text, &url)
            .ok_or_else(|| PatchError::PatternNotFound(self.target.clone()))?;

        fs::write(&self.target, patched)
            .await
            .map_err(|source| self.io_error(source))?;

        info!(url = %url, target = ?self.target, "Endpoint patched");
        Ok(request)
    }

    fn io_error(&self, source: std::io::Error) -> PatchError {
        PatchError::Io {
            path: self.target.clone(),
            source,
        }
    }
}

/// Patch the configured target with `address` and `port`.
pub async fn patch_endpoint(
    config: &BuildConfig,
    address: &str,
    port: i64,
) -> crate::Result<PatchRequest> {
    EndpointPatcher::from_config(config).patch(address, port).await
}
