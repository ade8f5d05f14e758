//! Launch error types.

use netboot_profiles::{Architecture, ProfileError};

/// Errors that can occur while building or booting an image.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// The toolchain could not be run or exited nonzero.
    #[error("build failed for {architecture} ({}){}", exit_description(.code), stderr_suffix(.stderr))]
    BuildFailed {
        architecture: Architecture,
        /// Toolchain exit code, if it ran and exited normally.
        code: Option<i32>,
        /// Captured standard error, or the spawn error.
        stderr: String,
    },

    /// The emulator could not be started.
    #[error("launch failed for {architecture}: {detail}")]
    LaunchFailed {
        architecture: Architecture,
        detail: String,
    },

    /// Inconsistent wiring, e.g. the artifact is missing when the boot
    /// flags are computed.
    #[error("configuration error for {architecture}: {detail}")]
    Configuration {
        architecture: Architecture,
        detail: String,
    },

    /// I/O failure on the emulator's output stream.
    #[error("stream error: {0}")]
    Stream(#[from] std::io::Error),

    /// Profile lookup or profile consistency error.
    #[error(transparent)]
    Profile(#[from] ProfileError),
}

impl LaunchError {
    /// Process exit code to report for this failure.
    ///
    /// A failed build passes the toolchain's own code through.
    pub fn exit_code(&self) -> i32 {
        match self {
            LaunchError::BuildFailed {
                code: Some(code), ..
            } if *code != 0 => *code,
            _ => 1,
        }
    }
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "toolchain did not run to completion".into(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    let trimmed = stderr.trim_end();
    if trimmed.is_empty() {
        String::new()
    } else {
        format!(":\n{trimmed}")
    }
}

/// Result type alias for launch operations.
pub type Result<T> = std::result::Result<T, LaunchError>;
