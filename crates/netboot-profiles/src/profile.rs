//! The launch profile for one architecture.
//!
//! A profile bundles everything needed to build and boot the image for a
//! single guest architecture: the toolchain target, firmware, NIC model,
//! guest sizing, and the firmware noise rules for its console output.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::arch::{Acceleration, Architecture};
use crate::device::{Firmware, FirmwareKind, NetworkDevice};
use crate::error::{ProfileError, Result};

/// Optimization profile the image is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildProfile {
    #[default]
    Debug,
    Release,
}

impl BuildProfile {
    /// Directory name the toolchain writes artifacts of this profile to.
    pub fn dir_name(self) -> &'static str {
        match self {
            BuildProfile::Debug => "debug",
            BuildProfile::Release => "release",
        }
    }
}

/// Whether a registered profile is expected to work end to end.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum SupportStatus {
    #[default]
    Supported,
    /// Known broken upstream; resolving the profile fails with this reason.
    Unsupported { reason: String },
}

/// One rule of the console noise filter.
///
/// `pattern` is a regular expression anchored at the start of the line. A
/// matching line is replaced by `replacement` in its entirety; `$1`-style
/// references to capture groups are expanded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoisePattern {
    pub pattern: String,
    pub replacement: String,
}

impl NoisePattern {
    pub fn new(pattern: impl Into<String>, replacement: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
        }
    }

    /// The expression actually matched: `pattern` anchored at line start.
    pub fn anchored(&self) -> String {
        format!("^(?:{})", self.pattern)
    }
}

/// Launch parameters for one guest architecture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ArchitectureProfile {
    /// Guest architecture this profile boots.
    pub architecture: Architecture,
    /// Toolchain target triple (a freestanding UEFI target).
    pub build_target: String,
    /// Optimization profile; selects the artifact directory.
    #[serde(default)]
    pub build_profile: BuildProfile,
    /// NIC model the firmware performs PXE on.
    pub network_device: NetworkDevice,
    /// Guest RAM in MiB.
    pub memory_mb: u32,
    /// Number of virtual CPUs.
    pub smp: u32,
    /// Guest CPU model, for emulators that need disambiguation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu_model: Option<String>,
    /// Emulated machine type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine: Option<String>,
    /// Host-accelerated execution. Only valid on a matching host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub acceleration: Option<Acceleration>,
    /// Boot firmware.
    pub firmware: Firmware,
    #[serde(default)]
    pub support: SupportStatus,
    /// Console noise rules, first match wins.
    #[serde(default)]
    pub noise_patterns: Vec<NoisePattern>,
}

impl ArchitectureProfile {
    /// Path of the built executable: `<output_root>/<build_target>/<debug|release>/<artifact>`.
    ///
    /// Both the build step and the boot wiring go through this, so they can't
    /// disagree about where the image lives.
    pub fn artifact_path(&self, output_root: &Path, artifact: &str) -> PathBuf {
        output_root
            .join(&self.build_target)
            .join(self.build_profile.dir_name())
            .join(artifact)
    }

    /// Firmware image path, resolved against `project_dir` when relative.
    pub fn firmware_path(&self, project_dir: &Path) -> Option<PathBuf> {
        self.firmware.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                project_dir.join(p)
            }
        })
    }

    pub fn is_supported(&self) -> bool {
        matches!(self.support, SupportStatus::Supported)
    }

    /// Copy of this profile built with `build_profile` instead.
    pub fn with_build_profile(mut self, build_profile: BuildProfile) -> Self {
        self.build_profile = build_profile;
        self
    }

    /// Copy of this profile that runs without host acceleration.
    pub fn without_acceleration(mut self) -> Self {
        self.acceleration = None;
        self
    }

    /// Reject a NIC the firmware has no driver for.
    pub fn check_firmware_device(&self) -> Result<()> {
        if self.firmware.kind.supports(self.network_device) {
            Ok(())
        } else {
            Err(ProfileError::Configuration {
                architecture: self.architecture,
                detail: format!(
                    "firmware {:?} has no driver for network device {}",
                    self.firmware.kind,
                    self.network_device.qemu_model()
                ),
            })
        }
    }

    /// Reject host acceleration unless the host runs the guest's architecture.
    pub fn check_host(&self, host: Option<Architecture>) -> Result<()> {
        match self.acceleration {
            Some(accel) if host != Some(self.architecture) => Err(ProfileError::Configuration {
                architecture: self.architecture,
                detail: format!(
                    "acceleration '{}' requires a {} host (host is {}); disable it with --no-accel",
                    accel.qemu_name(),
                    self.architecture,
                    host.map_or("unknown", Architecture::as_str),
                ),
            }),
            _ => Ok(()),
        }
    }

    /// x86-64 under KVM with OVMF and the legacy e1000 NIC.
    pub fn x86_64() -> Self {
        Self {
            architecture: Architecture::X86_64,
            build_target: Architecture::X86_64.uefi_target().into(),
            build_profile: BuildProfile::Debug,
            network_device: NetworkDevice::E1000,
            memory_mb: 4096,
            smp: 2,
            cpu_model: None,
            machine: None,
            acceleration: Some(Acceleration::Kvm),
            firmware: Firmware {
                kind: FirmwareKind::Ovmf,
                path: Some(PathBuf::from("firmware/OVMF.fd")),
            },
            support: SupportStatus::Supported,
            noise_patterns: vec![
                NoisePattern::new(
                    r#"BdsDxe: failed to load Boot[0-9A-F]{4} "UEFI QEMU DVD-ROM"#,
                    "[BdsDxe: DVD-ROM skipped]",
                ),
                NoisePattern::new(r"BdsDxe: ", "[BdsDxe]"),
                NoisePattern::new(
                    r"qemu-system-x86_64: warning: host doesn't support requested feature: (\S+)",
                    "[cpu feature unavailable: $1]",
                ),
            ],
        }
    }

    /// AArch64 `virt` machine under TCG with AAVMF and virtio-net.
    pub fn aarch64() -> Self {
        Self {
            architecture: Architecture::Aarch64,
            build_target: Architecture::Aarch64.uefi_target().into(),
            build_profile: BuildProfile::Debug,
            network_device: NetworkDevice::VirtioNetPci,
            memory_mb: 1024,
            smp: 1,
            cpu_model: Some("cortex-a72".into()),
            machine: Some("virt".into()),
            acceleration: None,
            firmware: Firmware {
                kind: FirmwareKind::Aavmf,
                path: Some(PathBuf::from("firmware/QEMU_EFI.fd")),
            },
            support: SupportStatus::Supported,
            noise_patterns: vec![
                NoisePattern::new(r"BdsDxe: ", "[BdsDxe]"),
                NoisePattern::new(
                    r"SetUefiImageMemoryAttributes - ",
                    "[SetUefiImageMemoryAttributes]",
                ),
                NoisePattern::new(r"ConvertPages: ", "[ConvertPages]"),
            ],
        }
    }

    /// RISC-V 64 `virt` machine. Registered so it can be described, but the
    /// toolchain can't produce a UEFI image for it yet.
    pub fn riscv64() -> Self {
        Self {
            architecture: Architecture::Riscv64,
            build_target: Architecture::Riscv64.uefi_target().into(),
            build_profile: BuildProfile::Debug,
            network_device: NetworkDevice::VirtioNetPci,
            memory_mb: 128,
            smp: 1,
            cpu_model: Some("rv64".into()),
            machine: Some("virt".into()),
            acceleration: None,
            firmware: Firmware {
                kind: FirmwareKind::Edk2Riscv,
                path: None,
            },
            support: SupportStatus::Unsupported {
                reason: "no riscv64 UEFI target in the toolchain".into(),
            },
            noise_patterns: vec![NoisePattern::new(r"BdsDxe: ", "[BdsDxe]")],
        }
    }

    /// Builtin profile for `architecture`.
    pub fn builtin(architecture: Architecture) -> Self {
        match architecture {
            Architecture::X86_64 => Self::x86_64(),
            Architecture::Aarch64 => Self::aarch64(),
            Architecture::Riscv64 => Self::riscv64(),
        }
    }
}
