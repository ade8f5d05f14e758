//! Full emulator command line for a profile.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use netboot_profiles::{ArchitectureProfile, Architecture};

use crate::error::Result;
use crate::wiring::NetbootWiring;

/// A computed emulator invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmulatorInvocation {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl EmulatorInvocation {
    /// Compose the emulator argv for `profile`.
    ///
    /// `host` is the architecture this process runs on; host acceleration is
    /// refused unless it matches the guest.
    pub fn new(
        profile: &ArchitectureProfile,
        program: &Path,
        firmware: Option<&Path>,
        wiring: &NetbootWiring,
        host: Option<Architecture>,
    ) -> Result<Self> {
        profile.check_host(host)?;

        let mut args: Vec<OsString> = Vec::new();
        if let Some(machine) = &profile.machine {
            args.push("-machine".into());
            args.push(machine.into());
        }
        if let Some(cpu) = &profile.cpu_model {
            args.push("-cpu".into());
            args.push(cpu.into());
        }
        if let Some(accel) = profile.acceleration {
            args.push("-accel".into());
            args.push(accel.qemu_name().into());
        }
        args.push("-smp".into());
        args.push(profile.smp.to_string().into());
        args.push("-m".into());
        args.push(profile.memory_mb.to_string().into());
        args.push("-nographic".into());
        if let Some(firmware) = firmware {
            args.push("-bios".into());
            args.push(firmware.into());
        }
        args.extend(wiring.to_args());

        Ok(Self {
            program: program.to_path_buf(),
            args,
        })
    }

    /// Printable command line, for dry runs and diagnostics.
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_os_str())
            .chain(self.args.iter().map(OsString::as_os_str))
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
