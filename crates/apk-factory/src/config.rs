//! Build configuration.
//!
//! [`BuildConfig`] is built once at startup from a project root, optionally
//! layered with a JSON config file and `APK_FACTORY_*` environment
//! variables, then shared read-only (usually behind an `Arc`) by every
//! component.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;

/// Config file picked up from the project root when no explicit file is given.
pub const DEFAULT_CONFIG_FILE: &str = "apk-factory.json";

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "APK_FACTORY_";

/// Runtime versions the reassembly tool is known to work with.
pub const DEFAULT_SUPPORTED_VERSIONS: [&str; 4] = ["1.8.0", "11.0", "16.0.2", "17.0"];

/// Leftover of a release build that cleanup also removes.
pub const UNSIGNED_RELEASE_NAME: &str = "app-release-unsigned.apk";

/// External programs invoked by the pipeline.
///
/// A bare program name (`java`, `jarsigner`) is looked up on `PATH`; anything
/// with a directory component is a filesystem path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toolchain {
    /// Java launcher, used for the version probe and to run the reassembler
    pub java: PathBuf,
    /// Reassembly tool jar
    pub apktool_jar: PathBuf,
    /// Byte-alignment utility
    pub zipalign: PathBuf,
    /// Signing utility
    pub jarsigner: PathBuf,
}

/// Filesystem layout of the factory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FactoryPaths {
    pub output_dir: PathBuf,
    /// Root of the disassembled source tree
    pub smali_dir: PathBuf,
    /// The one source file carrying the endpoint literal
    pub patch_target: PathBuf,
    pub unsigned_build: PathBuf,
    /// Where the signed package is published for download
    pub published_artifact: PathBuf,
}

/// Keystore and the fixed credentials used to sign.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SigningIdentity {
    pub keystore: PathBuf,
    pub key_alias: String,
    #[serde(skip_serializing)]
    pub store_password: String,
    #[serde(skip_serializing)]
    pub key_password: String,
    pub signature_algorithm: String,
    pub digest_algorithm: String,
}

/// Endpoint patched into the package when the caller does not supply one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EndpointConfig {
    pub address: String,
    pub port: u16,
}

/// Immutable, process-wide build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildConfig {
    pub project_root: PathBuf,
    pub toolchain: Toolchain,
    pub paths: FactoryPaths,
    pub signing: SigningIdentity,
    pub endpoint: EndpointConfig,
    pub supported_runtime_versions: Vec<String>,
    /// Per-stage timeout in seconds; 0 waits forever
    pub stage_timeout_secs: u64,
}

/// Partial overrides read from the JSON config file.
///
/// Relative paths resolve against the project root.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub factory_dir: Option<PathBuf>,
    pub assets_dir: Option<PathBuf>,
    pub java: Option<PathBuf>,
    pub apktool_jar: Option<PathBuf>,
    pub zipalign: Option<PathBuf>,
    pub jarsigner: Option<PathBuf>,
    pub keystore: Option<PathBuf>,
    pub key_alias: Option<String>,
    pub store_password: Option<String>,
    pub key_password: Option<String>,
    pub smali_dir: Option<PathBuf>,
    pub patch_target: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub unsigned_build: Option<PathBuf>,
    pub published_artifact: Option<PathBuf>,
    pub endpoint_address: Option<String>,
    pub endpoint_port: Option<u16>,
    pub supported_runtime_versions: Option<Vec<String>>,
    pub stage_timeout_secs: Option<u64>,
}

impl BuildConfig {
    /// Default layout rooted at `root`:
    /// `app/factory` for tools and intermediates, `assets/webpublic` for the
    /// published package.
    pub fn from_project_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let factory = root.join("app").join("factory");
        let assets = root.join("assets");
        Self::with_layout(root, &factory, &assets)
    }

    fn with_layout(root: PathBuf, factory: &Path, assets: &Path) -> Self {
        let smali_dir = factory.join("decompiled");
        let patch_target = smali_dir
            .join("smali")
            .join("com")
            .join("etechd")
            .join("l3mon")
            .join("IOSocket.smali");

        BuildConfig {
            toolchain: Toolchain {
                java: PathBuf::from("java"),
                apktool_jar: factory.join("apktool.jar"),
                zipalign: factory.join("zipalign"),
                jarsigner: PathBuf::from("jarsigner"),
            },
            paths: FactoryPaths {
                output_dir: factory.to_path_buf(),
                smali_dir,
                patch_target,
                unsigned_build: factory.join("build-unsigned.apk"),
                published_artifact: assets.join("webpublic").join("app-release.apk"),
            },
            signing: SigningIdentity {
                keystore: factory.join("release.keystore"),
                key_alias: "androidkey".to_string(),
                store_password: "android".to_string(),
                key_password: "android".to_string(),
                signature_algorithm: "SHA1withRSA".to_string(),
                digest_algorithm: "SHA1".to_string(),
            },
            endpoint: EndpointConfig {
                address: "127.0.0.1".to_string(),
                port: 22222,
            },
            supported_runtime_versions: DEFAULT_SUPPORTED_VERSIONS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            stage_timeout_secs: 0,
            project_root: root,
        }
    }

    /// Load configuration for `root`.
    ///
    /// Layers, lowest precedence first: default layout, the config file
    /// (`config_file`, or `apk-factory.json` in the root if present), then
    /// `APK_FACTORY_*` environment variables.
    pub fn load(root: &Path, config_file: Option<&Path>) -> Result<Self, ConfigError> {
        let root = std::path::absolute(root).map_err(|source| ConfigError::Root {
            path: root.to_path_buf(),
            source,
        })?;

        let file = match config_file {
            Some(path) => Some(resolve_path(&root, path)),
            None => Some(root.join(DEFAULT_CONFIG_FILE)).filter(|p| p.is_file()),
        };

        let overrides = match file {
            Some(path) => {
                debug!(path = ?path, "Loading config file");
                ConfigOverrides::from_file(&path)?
            }
            None => ConfigOverrides::default(),
        };

        let mut config = Self::from_overrides(root, overrides);
        config.apply_env(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    /// Default layout for `root` with `overrides` applied on top.
    pub fn from_overrides(root: PathBuf, overrides: ConfigOverrides) -> Self {
        let factory = resolve_path(
            &root,
            overrides
                .factory_dir
                .as_deref()
                .unwrap_or_else(|| Path::new("app/factory")),
        );
        let assets = resolve_path(
            &root,
            overrides
                .assets_dir
                .as_deref()
                .unwrap_or_else(|| Path::new("assets")),
        );
        let mut config = Self::with_layout(root, &factory, &assets);
        let root = config.project_root.clone();

        if let Some(p) = overrides.java {
            config.toolchain.java = resolve_program(&root, &p);
        }
        if let Some(p) = overrides.apktool_jar {
            config.toolchain.apktool_jar = resolve_path(&root, &p);
        }
        if let Some(p) = overrides.zipalign {
            config.toolchain.zipalign = resolve_program(&root, &p);
        }
        if let Some(p) = overrides.jarsigner {
            config.toolchain.jarsigner = resolve_program(&root, &p);
        }
        if let Some(p) = overrides.keystore {
            config.signing.keystore = resolve_path(&root, &p);
        }
        if let Some(alias) = overrides.key_alias {
            config.signing.key_alias = alias;
        }
        if let Some(pass) = overrides.store_password {
            config.signing.store_password = pass;
        }
        if let Some(pass) = overrides.key_password {
            config.signing.key_password = pass;
        }
        if let Some(p) = overrides.smali_dir {
            config.paths.smali_dir = resolve_path(&root, &p);
        }
        if let Some(p) = overrides.patch_target {
            config.paths.patch_target = resolve_path(&root, &p);
        }
        if let Some(p) = overrides.output_dir {
            config.paths.output_dir = resolve_path(&root, &p);
        }
        if let Some(p) = overrides.unsigned_build {
            config.paths.unsigned_build = resolve_path(&root, &p);
        }
        if let Some(p) = overrides.published_artifact {
            config.paths.published_artifact = resolve_path(&root, &p);
        }
        if let Some(address) = overrides.endpoint_address {
            config.endpoint.address = address;
        }
        if let Some(port) = overrides.endpoint_port {
            config.endpoint.port = port;
        }
        if let Some(versions) = overrides.supported_runtime_versions {
            config.supported_runtime_versions = versions;
        }
        if let Some(secs) = overrides.stage_timeout_secs {
            config.stage_timeout_secs = secs;
        }

        config
    }

    /// Apply `APK_FACTORY_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| {
            let key = format!("{ENV_PREFIX}{name}");
            lookup(&key).map(|value| (key, value))
        };

        if let Some((_, value)) = var("ENDPOINT_HOST") {
            self.endpoint.address = value;
        }
        if let Some((key, value)) = var("ENDPOINT_PORT") {
            self.endpoint.port = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: key, value })?;
        }
        if let Some((_, value)) = var("JAVA") {
            self.toolchain.java = resolve_program(&self.project_root, Path::new(&value));
        }
        if let Some((_, value)) = var("JARSIGNER") {
            self.toolchain.jarsigner = resolve_program(&self.project_root, Path::new(&value));
        }
        if let Some((_, value)) = var("ZIPALIGN") {
            self.toolchain.zipalign = resolve_program(&self.project_root, Path::new(&value));
        }
        if let Some((key, value)) = var("STAGE_TIMEOUT_SECS") {
            self.stage_timeout_secs = value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { var: key, value })?;
        }

        Ok(())
    }

    /// Sibling of the unsigned build that the aligner writes into.
    pub fn aligned_build_path(&self) -> PathBuf {
        let unsigned = &self.paths.unsigned_build;
        let stem = unsigned
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match unsigned.extension() {
            Some(ext) => format!("{stem}-aligned.{}", ext.to_string_lossy()),
            None => format!("{stem}-aligned"),
        };
        unsigned.with_file_name(name)
    }

    /// Intermediate files removed by cleanup, in deletion order.
    pub fn intermediate_artifacts(&self) -> Vec<PathBuf> {
        vec![
            self.paths.unsigned_build.clone(),
            self.paths.output_dir.join(UNSIGNED_RELEASE_NAME),
            self.aligned_build_path(),
        ]
    }
}

impl ConfigOverrides {
    /// Read overrides from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

fn resolve_path(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Like `resolve_path`, but bare program names stay bare for `PATH` lookup.
fn resolve_program(root: &Path, program: &Path) -> PathBuf {
    if is_bare_name(program) {
        program.to_path_buf()
    } else {
        resolve_path(root, program)
    }
}

/// True for a single relative component such as `jarsigner`.
pub(crate) fn is_bare_name(program: &Path) -> bool {
    !program.is_absolute() && program.components().count() == 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_layout() {
        let config = BuildConfig::from_project_root("/srv/factory");
        assert_eq!(
            config.paths.output_dir,
            PathBuf::from("/srv/factory/app/factory")
        );
        assert_eq!(
            config.paths.unsigned_build,
            PathBuf::from("/srv/factory/app/factory/build-unsigned.apk")
        );
        assert_eq!(
            config.paths.published_artifact,
            PathBuf::from("/srv/factory/assets/webpublic/app-release.apk")
        );
        assert!(config
            .paths
            .patch_target
            .ends_with("decompiled/smali/com/etechd/l3mon/IOSocket.smali"));
        assert_eq!(config.toolchain.jarsigner, PathBuf::from("jarsigner"));
        assert_eq!(config.signing.key_alias, "androidkey");
        assert_eq!(config.stage_timeout_secs, 0);
    }

    #[test]
    fn test_aligned_build_path() {
        let config = BuildConfig::from_project_root("/srv/factory");
        assert_eq!(
            config.aligned_build_path(),
            PathBuf::from("/srv/factory/app/factory/build-unsigned-aligned.apk")
        );
    }

    #[test]
    fn test_intermediate_artifacts() {
        let config = BuildConfig::from_project_root("/srv/factory");
        let artifacts = config.intermediate_artifacts();
        assert_eq!(artifacts[0], config.paths.unsigned_build);
        assert_eq!(
            artifacts[1],
            PathBuf::from("/srv/factory/app/factory/app-release-unsigned.apk")
        );
        assert!(!artifacts.contains(&config.paths.published_artifact));
    }

    #[test]
    fn test_overrides_resolve_against_root() {
        let overrides = ConfigOverrides {
            factory_dir: Some(PathBuf::from("build")),
            jarsigner: Some(PathBuf::from("tools/jarsigner")),
            java: Some(PathBuf::from("java11")),
            endpoint_port: Some(8080),
            ..Default::default()
        };
        let config = BuildConfig::from_overrides(PathBuf::from("/srv/factory"), overrides);

        assert_eq!(
            config.toolchain.apktool_jar,
            PathBuf::from("/srv/factory/build/apktool.jar")
        );
        assert_eq!(
            config.toolchain.jarsigner,
            PathBuf::from("/srv/factory/tools/jarsigner")
        );
        assert_eq!(config.toolchain.java, PathBuf::from("java11"));
        assert_eq!(config.endpoint.port, 8080);
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("APK_FACTORY_ENDPOINT_HOST", "10.0.0.5"),
            ("APK_FACTORY_ENDPOINT_PORT", "4444"),
            ("APK_FACTORY_STAGE_TIMEOUT_SECS", "30"),
        ]
        .into_iter()
        .collect();

        let mut config = BuildConfig::from_project_root("/srv/factory");
        config
            .apply_env(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.endpoint.address, "10.0.0.5");
        assert_eq!(config.endpoint.port, 4444);
        assert_eq!(config.stage_timeout_secs, 30);
    }

    #[test]
    fn test_invalid_env_port_rejected() {
        let mut config = BuildConfig::from_project_root("/srv/factory");
        let err = config
            .apply_env(|k| (k == "APK_FACTORY_ENDPOINT_PORT").then(|| "http".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn test_load_reads_default_config_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(DEFAULT_CONFIG_FILE),
            r#"{ "endpoint_address": "192.168.1.20", "key_alias": "release" }"#,
        )
        .unwrap();

        let config = BuildConfig::load(dir.path(), None).unwrap();
        assert_eq!(config.endpoint.address, "192.168.1.20");
        assert_eq!(config.signing.key_alias, "release");
        assert_eq!(config.project_root, dir.path());
    }

    #[test]
    fn test_load_rejects_unknown_keys() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("custom.json");
        std::fs::write(&file, r#"{ "web_port": 80 }"#).unwrap();

        let err = BuildConfig::load(dir.path(), Some(&file)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_missing_explicit_file() {
        let dir = tempdir().unwrap();
        let err = BuildConfig::load(dir.path(), Some(Path::new("absent.json"))).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_passwords_not_serialized() {
        let config = BuildConfig::from_project_root("/srv/factory");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("store_password"));
        assert!(json.contains("androidkey"));
    }

    #[test]
    fn test_is_bare_name() {
        assert!(is_bare_name(Path::new("jarsigner")));
        assert!(!is_bare_name(Path::new("./jarsigner")));
        assert!(!is_bare_name(Path::new("tools/jarsigner")));
        assert!(!is_bare_name(Path::new("/usr/bin/jarsigner")));
    }
}
