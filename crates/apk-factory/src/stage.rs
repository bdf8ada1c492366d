//! Pipeline stage definitions and the invocations they run.

use std::ffi::OsString;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::config::BuildConfig;

/// External-tool stages of the build pipeline, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// apktool b
    Reassemble,

    /// zipalign -v 4
    Align,

    /// jarsigner
    Sign,
}

impl Stage {
    /// Get the stage name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Reassemble => "reassemble",
            Stage::Align => "align",
            Stage::Sign => "sign",
        }
    }

    /// Whether a failure of this stage aborts the build.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Stage::Align)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fully resolved external command for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageInvocation {
    pub stage: Stage,

    /// Executable to spawn.
    pub program: PathBuf,

    pub args: Vec<OsString>,

    /// Artifact the stage reads, if any.
    pub input: Option<PathBuf>,

    /// Artifact the stage is expected to write. Signing rewrites its input
    /// in place, so both point at the same file.
    pub output: Option<PathBuf>,

    /// Timeout in seconds (0 = none).
    pub timeout_secs: u64,

    /// Failure policy: fatal stages abort the pipeline, the rest only warn.
    pub fatal: bool,
}

impl StageInvocation {
    fn new(stage: Stage, program: PathBuf, config: &BuildConfig) -> Self {
        Self {
            stage,
            program,
            args: Vec::new(),
            input: None,
            output: None,
            timeout_secs: config.stage_timeout_secs,
            fatal: stage.is_fatal(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// `java -jar apktool.jar b <smali> -o <unsigned> -f -v`
    pub fn reassemble(config: &BuildConfig) -> Self {
        let unsigned = config.paths.unsigned_build.clone();
        let mut invocation = Self::new(Stage::Reassemble, config.toolchain.java.clone(), config)
            .arg("-jar")
            .arg(&config.toolchain.apktool_jar)
            .arg("b")
            .arg(&config.paths.smali_dir)
            .arg("-o")
            .arg(&unsigned)
            .arg("-f")
            .arg("-v");
        invocation.input = Some(config.paths.smali_dir.clone());
        invocation.output = Some(unsigned);
        invocation
    }

    /// `zipalign -v 4 <unsigned> <unsigned-aligned>`
    pub fn align(config: &BuildConfig) -> Self {
        let aligned = config.aligned_build_path();
        let mut invocation = Self::new(Stage::Align, config.toolchain.zipalign.clone(), config)
            .arg("-v")
            .arg("4")
            .arg(&config.paths.unsigned_build)
            .arg(&aligned);
        invocation.input = Some(config.paths.unsigned_build.clone());
        invocation.output = Some(aligned);
        invocation
    }

    /// `jarsigner -verbose -sigalg .. -digestalg .. -keystore <ks> -storepass .. -keypass .. <unsigned> <alias>`
    pub fn sign(config: &BuildConfig) -> Self {
        let signing = &config.signing;
        let target = config.paths.unsigned_build.clone();
        let mut invocation = Self::new(Stage::Sign, config.toolchain.jarsigner.clone(), config)
            .arg("-verbose")
            .arg("-sigalg")
            .arg(&signing.signature_algorithm)
            .arg("-digestalg")
            .arg(&signing.digest_algorithm)
            .arg("-keystore")
            .arg(&signing.keystore)
            .arg("-storepass")
            .arg(&signing.store_password)
            .arg("-keypass")
            .arg(&signing.key_password)
            .arg(&target)
            .arg(&signing.key_alias);
        invocation.input = Some(target.clone());
        invocation.output = Some(target);
        invocation
    }

    /// Printable command line with credentials masked.
    pub fn command_line(&self) -> String {
        let mut parts = vec![self.program.display().to_string()];
        let mut mask_next = false;
        for arg in &self.args {
            let arg = arg.to_string_lossy();
            if mask_next {
                parts.push("****".to_string());
            } else {
                parts.push(arg.to_string());
            }
            mask_next = arg == "-storepass" || arg == "-keypass";
        }
        parts.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> BuildConfig {
        BuildConfig::from_project_root("/srv/factory")
    }

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Reassemble.name(), "reassemble");
        assert_eq!(Stage::Align.name(), "align");
        assert_eq!(Stage::Sign.to_string(), "sign");
    }

    #[test]
    fn test_only_alignment_is_best_effort() {
        assert!(Stage::Reassemble.is_fatal());
        assert!(!Stage::Align.is_fatal());
        assert!(Stage::Sign.is_fatal());
    }

    #[test]
    fn test_reassemble_invocation() {
        let config = config();
        let inv = StageInvocation::reassemble(&config);
        assert_eq!(inv.program, PathBuf::from("java"));
        assert_eq!(inv.args[0], "-jar");
        assert_eq!(inv.args[1].as_os_str(), config.toolchain.apktool_jar.as_os_str());
        assert_eq!(inv.args[2], "b");
        assert!(inv.args.iter().any(|a| a == "-f"));
        assert_eq!(inv.output.as_ref(), Some(&config.paths.unsigned_build));
        assert!(inv.fatal);
    }

    #[test]
    fn test_align_writes_sibling() {
        let config = config();
        let inv = StageInvocation::align(&config);
        assert_eq!(inv.program, config.toolchain.zipalign);
        assert_eq!(inv.args.len(), 4);
        assert_eq!(inv.args[3].as_os_str(), config.aligned_build_path().as_os_str());
        assert!(!inv.fatal);
    }

    #[test]
    fn test_sign_invocation_order() {
        let config = config();
        let inv = StageInvocation::sign(&config);
        let n = inv.args.len();
        assert_eq!(inv.args[n - 1], "androidkey");
        assert_eq!(
            inv.args[n - 2].as_os_str(),
            config.paths.unsigned_build.as_os_str()
        );
        assert!(inv.args.iter().any(|a| a == "SHA1withRSA"));
        assert_eq!(inv.input, inv.output);
    }

    #[test]
    fn test_command_line_masks_passwords() {
        let inv = StageInvocation::sign(&config());
        let line = inv.command_line();
        assert!(line.contains("-storepass ****"));
        assert!(line.contains("-keypass ****"));
        assert!(!line.contains("android "));
        assert!(line.ends_with("androidkey"));
    }

    #[test]
    fn test_timeout_comes_from_config() {
        let mut config = config();
        config.stage_timeout_secs = 90;
        assert_eq!(StageInvocation::sign(&config).timeout_secs, 90);
    }
}
