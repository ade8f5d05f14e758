//! Build step: compile the freestanding image for a profile.
//!
//! The toolchain is invoked as
//! `<program> build --target <triple> --target-dir <output-root> [--release] [-p <package>] [extra…]`
//! and must leave its executable at the path [`ArchitectureProfile::artifact_path`]
//! derives. Incremental rebuilds are left to the toolchain.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use netboot_profiles::{ArchitectureProfile, BuildProfile};
use tracing::{debug, info};

use crate::error::{LaunchError, Result};

/// Default toolchain driver.
pub const DEFAULT_PROGRAM: &str = "cargo";
/// Default artifact file name.
pub const DEFAULT_ARTIFACT: &str = "bootloader.efi";
/// Default build output root, relative to the project.
pub const DEFAULT_OUTPUT_ROOT: &str = "target";

/// How to invoke the external toolchain for a project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toolchain {
    /// Directory the toolchain runs in.
    pub project_dir: PathBuf,
    /// Toolchain driver binary.
    pub program: PathBuf,
    /// Package to build, when the project is a workspace.
    pub package: Option<String>,
    /// File name of the produced executable.
    pub artifact: String,
    /// Build output root; relative paths are under `project_dir`.
    pub output_root: PathBuf,
    /// Extra arguments appended to the build command.
    pub extra_args: Vec<String>,
}

impl Toolchain {
    /// Toolchain with default settings for `project_dir`.
    pub fn new(project_dir: impl Into<PathBuf>) -> Self {
        Self {
            project_dir: project_dir.into(),
            program: PathBuf::from(DEFAULT_PROGRAM),
            package: None,
            artifact: DEFAULT_ARTIFACT.into(),
            output_root: PathBuf::from(DEFAULT_OUTPUT_ROOT),
            extra_args: Vec::new(),
        }
    }

    /// Absolute (project-relative) build output root.
    pub fn output_root(&self) -> PathBuf {
        if self.output_root.is_absolute() {
            self.output_root.clone()
        } else {
            self.project_dir.join(&self.output_root)
        }
    }

    /// Where the build for `profile` leaves its executable.
    pub fn artifact_path(&self, profile: &ArchitectureProfile) -> PathBuf {
        profile.artifact_path(&self.output_root(), &self.artifact)
    }

    /// Arguments passed to the toolchain driver for `profile`.
    pub fn args(&self, profile: &ArchitectureProfile) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "build".into(),
            "--target".into(),
            profile.build_target.clone().into(),
            "--target-dir".into(),
            self.output_root().into_os_string(),
        ];
        if profile.build_profile == BuildProfile::Release {
            args.push("--release".into());
        }
        if let Some(package) = &self.package {
            args.push("-p".into());
            args.push(package.into());
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }

    /// Run the build for `profile` and return the artifact path.
    ///
    /// Blocks until the toolchain exits. Its stdout is passed through; its
    /// stderr is captured, echoed, and attached to `BuildFailed`.
    pub fn build(&self, profile: &ArchitectureProfile) -> Result<PathBuf> {
        let args = self.args(profile);
        info!(
            architecture = %profile.architecture,
            target = %profile.build_target,
            profile = profile.build_profile.dir_name(),
            "building image"
        );
        debug!(program = %self.program.display(), ?args, "toolchain invocation");

        let output = Command::new(&self.program)
            .args(&args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::inherit())
            .stderr(Stdio::piped())
            .output()
            .map_err(|err| LaunchError::BuildFailed {
                architecture: profile.architecture,
                code: None,
                stderr: format!("failed to run {}: {err}", self.program.display()),
            })?;

        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if !stderr.is_empty() {
            let _ = std::io::stderr().write_all(stderr.as_bytes());
        }

        if !output.status.success() {
            return Err(LaunchError::BuildFailed {
                architecture: profile.architecture,
                code: output.status.code(),
                stderr,
            });
        }

        let artifact = self.artifact_path(profile);
        info!(artifact = %artifact.display(), "build finished");
        Ok(artifact)
    }
}

/// True when `path` names an existing regular file.
pub(crate) fn is_file(path: &Path) -> bool {
    path.metadata().map(|m| m.is_file()).unwrap_or(false)
}
