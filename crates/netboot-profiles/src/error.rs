//! Error types for profile registry operations.

use std::path::PathBuf;

use crate::arch::Architecture;

/// Errors that can occur while defining, loading, or resolving profiles.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// No usable profile exists for the architecture.
    #[error("no usable profile for {architecture}: {reason}")]
    ProfileNotFound {
        /// The architecture that was requested.
        architecture: Architecture,
        /// Why the lookup failed (unregistered, or registered but unsupported).
        reason: String,
    },

    /// A second profile was registered for the same architecture.
    #[error("duplicate profile for {architecture}")]
    DuplicateProfile {
        /// The architecture registered twice.
        architecture: Architecture,
    },

    /// The profile is internally inconsistent or does not fit the host.
    #[error("configuration error for {architecture}: {detail}")]
    Configuration {
        /// The architecture of the offending profile.
        architecture: Architecture,
        /// Description of the inconsistency.
        detail: String,
    },

    /// An architecture name that is not one of the known tags.
    #[error("unknown architecture '{name}' (expected x86_64, aarch64, or riscv64)")]
    UnknownArchitecture {
        /// The name as given.
        name: String,
    },

    /// TOML deserialization error.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("TOML serialization error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    /// I/O error reading profile files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Profile file not found.
    #[error("profile file not found: {}", path.display())]
    NotFound {
        /// The path that was not found.
        path: PathBuf,
    },
}

/// Result type for profile operations.
pub type Result<T> = std::result::Result<T, ProfileError>;
