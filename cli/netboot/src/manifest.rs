//! `netboot.toml` manifest parsing and project configuration.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use netboot_launch::{LaunchSettings, Toolchain};
use netboot_profiles::parse::{error_summary, load_registry, validate_profile};
use netboot_profiles::{
    Acceleration, Architecture, ArchitectureProfile, BuildProfile, ProfileError, ProfileRegistry,
};
use serde::{Deserialize, Serialize};

pub const MANIFEST_FILE: &str = "netboot.toml";

/// The top-level manifest of a netboot project.
///
/// Unknown keys are rejected in every section, so a misspelled override
/// fails loudly instead of being ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NetbootManifest {
    pub project: ProjectConfig,
    /// `[toolchain]`: how the image is built.
    #[serde(default)]
    pub toolchain: ToolchainConfig,
    /// `[emulator]`: where the emulator binaries live.
    #[serde(default)]
    pub emulator: EmulatorConfig,
    /// Per-architecture profile overrides, keyed by architecture name.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileOverride>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProjectConfig {
    /// Project name, shown in diagnostics.
    pub name: String,
}

/// How the image is built.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ToolchainConfig {
    /// Build driver; `cargo` when unset.
    #[serde(default)]
    pub program: Option<PathBuf>,
    /// Passed as `-p <package>` when set.
    #[serde(default)]
    pub package: Option<String>,
    /// File name of the built executable.
    #[serde(default)]
    pub artifact: Option<String>,
    /// Target directory, relative to the project; `target` when unset.
    #[serde(default)]
    pub output_root: Option<PathBuf>,
    /// Appended to the build command line.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmulatorConfig {
    /// Emulator binary per architecture name.
    #[serde(default)]
    pub programs: BTreeMap<String, PathBuf>,
}

/// Field overrides layered on top of a registered profile.
///
/// Keys are kebab-case, as in `.profile.toml` files. The overridden profile
/// is validated again, so an override cannot produce a profile that a
/// `.profile.toml` file would not be allowed to describe.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ProfileOverride {
    /// Firmware image, relative to the project directory.
    #[serde(default)]
    pub firmware: Option<PathBuf>,
    /// Guest memory in MiB; at least 1.
    #[serde(default)]
    pub memory_mb: Option<u32>,
    /// Guest CPU count; at least 1.
    #[serde(default)]
    pub smp: Option<u32>,
    /// Emulated CPU model, such as `cortex-a72`.
    #[serde(default)]
    pub cpu_model: Option<String>,
    /// `"kvm"`, `"hvf"`, or `"none"` to run without acceleration.
    #[serde(default)]
    pub acceleration: Option<String>,
    /// `"debug"` or `"release"`.
    #[serde(default)]
    pub build_profile: Option<BuildProfile>,
}

impl ProfileOverride {
    fn apply(&self, profile: &mut ArchitectureProfile) -> Result<()> {
        if let Some(firmware) = &self.firmware {
            profile.firmware.path = Some(firmware.clone());
        }
        if let Some(memory_mb) = self.memory_mb {
            profile.memory_mb = memory_mb;
        }
        if let Some(smp) = self.smp {
            profile.smp = smp;
        }
        if let Some(cpu) = &self.cpu_model {
            profile.cpu_model = Some(cpu.clone());
        }
        if let Some(accel) = &self.acceleration {
            profile.acceleration = match accel.as_str() {
                "none" => None,
                "kvm" => Some(Acceleration::Kvm),
                "hvf" => Some(Acceleration::Hvf),
                other => bail!(
                    "[profiles.{}] acceleration must be kvm, hvf, or none (got '{other}')",
                    profile.architecture
                ),
            };
        }
        if let Some(build_profile) = self.build_profile {
            profile.build_profile = build_profile;
        }
        Ok(())
    }
}

impl NetbootManifest {
    /// Search upward from `start_dir` for a `netboot.toml` file, parse and return it
    /// along with the directory it was found in.
    pub fn find_and_load(start_dir: &Path) -> Result<Option<(Self, PathBuf)>> {
        let mut dir = start_dir.to_path_buf();
        loop {
            let candidate = dir.join(MANIFEST_FILE);
            if candidate.is_file() {
                let content = std::fs::read_to_string(&candidate)
                    .with_context(|| format!("reading {}", candidate.display()))?;
                let manifest: NetbootManifest = toml::from_str(&content)
                    .with_context(|| format!("parsing {}", candidate.display()))?;
                return Ok(Some((manifest, dir)));
            }
            if !dir.pop() {
                break;
            }
        }
        Ok(None)
    }

    #[cfg(test)]
    pub fn from_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("parsing netboot.toml")
    }

    /// Generate the default manifest for `netboot init`.
    pub fn template(name: &str) -> String {
        format!(
            r#"[project]
name = "{name}"

[toolchain]
program = "cargo"
artifact = "bootloader.efi"
output-root = "target"

# [emulator.programs]
# x86_64 = "/opt/qemu/bin/qemu-system-x86_64"

# [profiles.x86_64]
# firmware = "firmware/OVMF.fd"
# acceleration = "none"
"#
        )
    }
}

/// A project directory and its manifest, if it has one.
#[derive(Debug, Clone)]
pub struct Project {
    pub dir: PathBuf,
    pub manifest: Option<NetbootManifest>,
}

impl Project {
    /// The project containing `cwd`, or `cwd` itself with defaults.
    pub fn discover(cwd: &Path) -> Result<Self> {
        Ok(match NetbootManifest::find_and_load(cwd)? {
            Some((manifest, dir)) => Self {
                dir,
                manifest: Some(manifest),
            },
            None => Self {
                dir: cwd.to_path_buf(),
                manifest: None,
            },
        })
    }

    /// Project profiles, then builtins, with manifest overrides applied.
    pub fn registry(&self) -> Result<ProfileRegistry> {
        let mut registry = load_registry(&self.dir)
            .with_context(|| format!("loading profiles from {}", self.dir.display()))?;
        if let Some(manifest) = &self.manifest {
            for (name, overrides) in &manifest.profiles {
                let architecture: Architecture = name
                    .parse()
                    .with_context(|| format!("{MANIFEST_FILE}: [profiles.{name}]"))?;
                if let Some(profile) = registry.get_mut(architecture) {
                    overrides.apply(profile)?;
                    if let Err(issues) = validate_profile(profile) {
                        return Err(ProfileError::Configuration {
                            architecture,
                            detail: format!(
                                "{MANIFEST_FILE} [profiles.{name}]: {}",
                                error_summary(&issues)
                            ),
                        }
                        .into());
                    }
                }
            }
        }
        Ok(registry)
    }

    /// The active profile for `architecture`, adjusted by command-line flags.
    pub fn profile(
        &self,
        architecture: Architecture,
        release: bool,
        no_accel: bool,
    ) -> Result<ArchitectureProfile> {
        let mut profile = self.registry()?.resolve(architecture)?.clone();
        if release {
            profile = profile.with_build_profile(BuildProfile::Release);
        }
        if no_accel {
            profile = profile.without_acceleration();
        }
        Ok(profile)
    }

    pub fn toolchain(&self) -> Toolchain {
        let mut toolchain = Toolchain::new(&self.dir);
        if let Some(config) = self.manifest.as_ref().map(|m| &m.toolchain) {
            if let Some(program) = &config.program {
                toolchain.program = program.clone();
            }
            if let Some(artifact) = &config.artifact {
                toolchain.artifact = artifact.clone();
            }
            if let Some(output_root) = &config.output_root {
                toolchain.output_root = output_root.clone();
            }
            toolchain.package = config.package.clone();
            toolchain.extra_args = config.extra_args.clone();
        }
        toolchain
    }

    /// Emulator binary configured for `architecture`, if any.
    pub fn emulator_program(&self, architecture: Architecture) -> Option<PathBuf> {
        self.manifest
            .as_ref()?
            .emulator
            .programs
            .get(architecture.as_str())
            .cloned()
    }

    pub fn launch_settings(&self, architecture: Architecture) -> LaunchSettings {
        let mut settings = LaunchSettings::new(self.toolchain());
        settings.emulator_program = self.emulator_program(architecture);
        settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_manifest() {
        let manifest = NetbootManifest::from_str(
            r#"
[project]
name = "pxe-demo"

[toolchain]
program = "/usr/local/bin/cargo"
package = "bootloader"
artifact = "loader.efi"
output-root = "/tmp/out"
extra-args = ["--locked"]

[emulator.programs]
aarch64 = "/opt/qemu/bin/qemu-system-aarch64"

[profiles.x86_64]
firmware = "fw/OVMF_CODE.fd"
memory-mb = 512
acceleration = "none"
build-profile = "release"
"#,
        )
        .unwrap();
        assert_eq!(manifest.project.name, "pxe-demo");
        assert_eq!(manifest.toolchain.package.as_deref(), Some("bootloader"));
        assert_eq!(manifest.toolchain.extra_args, vec!["--locked"]);
        let x86 = &manifest.profiles["x86_64"];
        assert_eq!(x86.memory_mb, Some(512));
        assert_eq!(x86.build_profile, Some(BuildProfile::Release));
    }

    #[test]
    fn template_parses() {
        let manifest = NetbootManifest::from_str(&NetbootManifest::template("demo")).unwrap();
        assert_eq!(manifest.project.name, "demo");
        assert_eq!(manifest.toolchain.artifact.as_deref(), Some("bootloader.efi"));
        assert!(manifest.profiles.is_empty());
    }

    #[test]
    fn find_and_load_walks_up() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), NetbootManifest::template("up")).unwrap();
        let nested = dir.path().join("src/deep");
        std::fs::create_dir_all(&nested).unwrap();

        let (manifest, found) = NetbootManifest::find_and_load(&nested).unwrap().unwrap();
        assert_eq!(manifest.project.name, "up");
        assert_eq!(found, dir.path());
    }

    #[test]
    fn no_manifest_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::discover(dir.path()).unwrap();
        assert!(project.manifest.is_none());
        let toolchain = project.toolchain();
        assert_eq!(toolchain.program, Path::new("cargo"));
        assert_eq!(toolchain.artifact, "bootloader.efi");
        assert_eq!(project.emulator_program(Architecture::X86_64), None);
    }

    #[test]
    fn overrides_apply_to_the_registry() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            r#"
[project]
name = "o"

[emulator.programs]
x86_64 = "/opt/qemu-x86"

[profiles.x86_64]
memory-mb = 256
acceleration = "none"
"#,
        )
        .unwrap();
        let project = Project::discover(dir.path()).unwrap();
        let profile = project.profile(Architecture::X86_64, true, false).unwrap();
        assert_eq!(profile.memory_mb, 256);
        assert_eq!(profile.acceleration, None);
        assert_eq!(profile.build_profile, BuildProfile::Release);
        assert_eq!(
            project.launch_settings(Architecture::X86_64).emulator_program,
            Some(PathBuf::from("/opt/qemu-x86"))
        );
    }

    #[test]
    fn bad_acceleration_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "[project]\nname = \"b\"\n\n[profiles.aarch64]\nacceleration = \"tcg\"\n",
        )
        .unwrap();
        let err = Project::discover(dir.path()).unwrap().registry().unwrap_err();
        assert!(err.to_string().contains("acceleration"));
    }

    #[test]
    fn unknown_architecture_override_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "[project]\nname = \"b\"\n\n[profiles.mips]\nsmp = 2\n",
        )
        .unwrap();
        assert!(Project::discover(dir.path()).unwrap().registry().is_err());
    }

    #[test]
    fn riscv64_is_not_runnable() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::discover(dir.path()).unwrap();
        let err = project.profile(Architecture::Riscv64, false, false).unwrap_err();
        assert!(err.to_string().contains("riscv64"));
    }

    #[test]
    fn override_that_breaks_the_profile_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(MANIFEST_FILE),
            "[project]\nname = \"z\"\n\n[profiles.x86_64]\nsmp = 0\nmemory-mb = 0\n",
        )
        .unwrap();
        let err = Project::discover(dir.path()).unwrap().registry().unwrap_err();
        let message = format!("{err:#}");
        assert!(message.contains("[profiles.x86_64]"), "{message}");
        assert!(message.contains("smp must be at least 1"), "{message}");
        assert!(message.contains("memory-mb must be at least 1"), "{message}");
        assert!(matches!(
            err.downcast_ref::<ProfileError>(),
            Some(ProfileError::Configuration {
                architecture: Architecture::X86_64,
                ..
            })
        ));
    }

    #[test]
    fn override_keys_are_checked() {
        let err = NetbootManifest::from_str(
            "[project]\nname = \"k\"\n\n[profiles.x86_64]\nmemory_mb = 512\n",
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("memory_mb"));

        assert!(NetbootManifest::from_str(
            "[project]\nname = \"k\"\n\n[toolchain]\nextra_args = [\"--locked\"]\n",
        )
        .is_err());
    }
}
