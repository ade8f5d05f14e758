//! PXE boot wiring: expose the built image through the emulator's user-mode
//! network stack.
//!
//! QEMU's `-netdev user` backend runs a DHCP server and, given `tftp=` and
//! `bootfile=`, a read-only TFTP server. The firmware DHCPs, receives the
//! boot file name, and fetches it over TFTP. `restrict=on` cuts the guest
//! off from the host network so those two services are all it can reach.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use netboot_profiles::{ArchitectureProfile, NetworkDevice};

use crate::error::{LaunchError, Result};
use crate::toolchain::is_file;

/// Backend id tying the NIC to the user-mode network.
pub const NETDEV_ID: &str = "net0";

/// Emulator network configuration for one boot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetbootWiring {
    /// NIC model the guest sees.
    pub device: NetworkDevice,
    /// TFTP root: the artifact's directory.
    pub tftp_root: PathBuf,
    /// File name DHCP hands out as the boot file.
    pub boot_file: String,
}

impl NetbootWiring {
    /// Wire `artifact` up for `profile`.
    ///
    /// Fails if the artifact does not exist yet; the build has to run first.
    pub fn new(profile: &ArchitectureProfile, artifact: &Path) -> Result<Self> {
        let config_error = |detail: String| LaunchError::Configuration {
            architecture: profile.architecture,
            detail,
        };

        if !is_file(artifact) {
            return Err(config_error(format!(
                "boot artifact {} does not exist (build it first)",
                artifact.display()
            )));
        }

        let boot_file = artifact
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                config_error(format!(
                    "boot artifact {} has no UTF-8 file name",
                    artifact.display()
                ))
            })?
            .to_string();
        if boot_file.contains(',') {
            return Err(config_error(format!(
                "boot file name '{boot_file}' contains ',' which the emulator option parser rejects"
            )));
        }

        let tftp_root = match artifact.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };

        Ok(Self {
            device: profile.network_device,
            tftp_root,
            boot_file,
        })
    }

    /// The `-netdev` option value.
    pub fn netdev_spec(&self) -> OsString {
        let mut spec = OsString::from(format!("user,id={NETDEV_ID},restrict=on,tftp="));
        spec.push(escape_commas(&self.tftp_root));
        spec.push(format!(",bootfile={}", self.boot_file));
        spec
    }

    /// The `-device` option value.
    pub fn device_spec(&self) -> String {
        format!("{},netdev={NETDEV_ID}", self.device.qemu_model())
    }

    /// Emulator arguments: one NIC and one user-mode backend.
    pub fn to_args(&self) -> Vec<OsString> {
        vec![
            "-netdev".into(),
            self.netdev_spec(),
            "-device".into(),
            self.device_spec().into(),
        ]
    }
}

/// QEMU option values escape a literal ',' by doubling it.
fn escape_commas(path: &Path) -> OsString {
    match path.to_str() {
        Some(s) => s.replace(',', ",,").into(),
        None => path.as_os_str().to_os_string(),
    }
}
