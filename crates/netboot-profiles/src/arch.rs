//! Target architecture tags and host-accelerated execution modes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProfileError;

/// A guest instruction-set architecture the harness knows how to boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Architecture {
    #[serde(rename = "x86_64")]
    X86_64,
    #[serde(rename = "aarch64")]
    Aarch64,
    #[serde(rename = "riscv64")]
    Riscv64,
}

impl Architecture {
    /// Every known architecture, in registry order.
    pub const ALL: [Architecture; 3] = [
        Architecture::X86_64,
        Architecture::Aarch64,
        Architecture::Riscv64,
    ];

    /// Canonical tag, as used in TOML and on the command line.
    pub fn as_str(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64",
            Architecture::Aarch64 => "aarch64",
            Architecture::Riscv64 => "riscv64",
        }
    }

    /// Freestanding UEFI target triple for this architecture.
    pub fn uefi_target(self) -> &'static str {
        match self {
            Architecture::X86_64 => "x86_64-unknown-uefi",
            Architecture::Aarch64 => "aarch64-unknown-uefi",
            // No upstream UEFI target yet; the profile is registered as unsupported.
            Architecture::Riscv64 => "riscv64gc-unknown-uefi",
        }
    }

    /// Default QEMU system emulator binary for this guest.
    pub fn emulator_program(self) -> &'static str {
        match self {
            Architecture::X86_64 => "qemu-system-x86_64",
            Architecture::Aarch64 => "qemu-system-aarch64",
            Architecture::Riscv64 => "qemu-system-riscv64",
        }
    }

    /// Architecture of the machine this process runs on, if it is a known one.
    pub fn host() -> Option<Architecture> {
        match std::env::consts::ARCH {
            "x86_64" => Some(Architecture::X86_64),
            "aarch64" => Some(Architecture::Aarch64),
            "riscv64" => Some(Architecture::Riscv64),
            _ => None,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Architecture {
    type Err = ProfileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "x86_64" | "x86-64" | "amd64" => Ok(Architecture::X86_64),
            "aarch64" | "arm64" => Ok(Architecture::Aarch64),
            "riscv64" | "riscv" => Ok(Architecture::Riscv64),
            _ => Err(ProfileError::UnknownArchitecture { name: s.into() }),
        }
    }
}

/// Hypervisor-assisted execution mode.
///
/// Only meaningful when the host and guest architectures match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Acceleration {
    /// Linux KVM.
    Kvm,
    /// macOS Hypervisor.framework.
    Hvf,
}

impl Acceleration {
    /// Name accepted by QEMU's `-accel` flag.
    pub fn qemu_name(self) -> &'static str {
        match self {
            Acceleration::Kvm => "kvm",
            Acceleration::Hvf => "hvf",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_canonical_and_aliases() {
        assert_eq!("x86_64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert_eq!("amd64".parse::<Architecture>().unwrap(), Architecture::X86_64);
        assert_eq!("ARM64".parse::<Architecture>().unwrap(), Architecture::Aarch64);
        assert_eq!("riscv64".parse::<Architecture>().unwrap(), Architecture::Riscv64);
    }

    #[test]
    fn parse_unknown() {
        let err = "mips".parse::<Architecture>().unwrap_err();
        assert!(matches!(err, ProfileError::UnknownArchitecture { .. }));
    }

    #[test]
    fn display_matches_tag() {
        for arch in Architecture::ALL {
            assert_eq!(arch.to_string(), arch.as_str());
            assert_eq!(arch.as_str().parse::<Architecture>().unwrap(), arch);
        }
    }

    #[test]
    fn uefi_targets_are_per_architecture() {
        assert_eq!(Architecture::X86_64.uefi_target(), "x86_64-unknown-uefi");
        assert_eq!(Architecture::Aarch64.uefi_target(), "aarch64-unknown-uefi");
        assert!(Architecture::Riscv64.uefi_target().starts_with("riscv64"));
    }
}
