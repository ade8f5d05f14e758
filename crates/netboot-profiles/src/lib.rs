//! Per-architecture launch profiles for network-booted UEFI images.
//!
//! A profile is pure data: which toolchain target to build, which firmware
//! and NIC to boot with, how big the guest is, and which firmware console
//! lines are known noise. The [`ProfileRegistry`] holds one profile per
//! architecture and is the only way the launcher picks one.

pub mod arch;
pub mod device;
pub mod error;
pub mod parse;
pub mod profile;
pub mod registry;

pub use arch::{Acceleration, Architecture};
pub use device::{Firmware, FirmwareKind, NetworkDevice};
pub use error::{ProfileError, Result};
pub use profile::{ArchitectureProfile, BuildProfile, NoisePattern, SupportStatus};
pub use registry::ProfileRegistry;
