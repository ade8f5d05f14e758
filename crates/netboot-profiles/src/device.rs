//! Boot firmware and virtual NIC models.
//!
//! The firmware image has to carry a driver for the NIC the guest is given,
//! otherwise PXE never starts. That pairing can't be observed at runtime (the
//! firmware just silently skips the device), so it is checked up front.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Virtual network interface model exposed to the guest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NetworkDevice {
    /// Intel 82540EM, the legacy NIC.
    E1000,
    /// Paravirtualized virtio NIC on PCI.
    VirtioNetPci,
}

impl NetworkDevice {
    /// Device name accepted by QEMU's `-device` flag.
    pub fn qemu_model(self) -> &'static str {
        match self {
            NetworkDevice::E1000 => "e1000",
            NetworkDevice::VirtioNetPci => "virtio-net-pci",
        }
    }
}

/// Family of UEFI firmware build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirmwareKind {
    /// EDK2 OVMF for x86-64.
    Ovmf,
    /// EDK2 ArmVirtQemu ("AAVMF") for AArch64.
    Aavmf,
    /// EDK2 RiscVVirt.
    Edk2Riscv,
}

impl FirmwareKind {
    /// Whether this firmware ships a UEFI network driver for `device`.
    pub fn supports(self, device: NetworkDevice) -> bool {
        match (self, device) {
            (FirmwareKind::Ovmf, NetworkDevice::E1000) => true,
            (_, NetworkDevice::VirtioNetPci) => true,
            (FirmwareKind::Aavmf | FirmwareKind::Edk2Riscv, NetworkDevice::E1000) => false,
        }
    }
}

/// The firmware image a profile boots with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Firmware {
    /// Firmware family, used to check NIC compatibility.
    pub kind: FirmwareKind,
    /// Image path. Relative paths are resolved against the project directory.
    /// `None` leaves the emulator's built-in default in place.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}
