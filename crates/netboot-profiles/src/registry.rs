//! The profile table consulted once per invocation.

use std::collections::BTreeMap;

use crate::arch::Architecture;
use crate::error::{ProfileError, Result};
use crate::profile::{ArchitectureProfile, SupportStatus};

/// Registered launch profiles, keyed by architecture.
///
/// Populated at startup and only read afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    profiles: BTreeMap<Architecture, ArchitectureProfile>,
}

impl ProfileRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the builtin x86_64, aarch64, and riscv64 profiles.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.fill_builtins();
        registry
    }

    /// Add a profile.
    ///
    /// Fails if the architecture already has one, or if the profile's NIC
    /// can't be driven by its firmware.
    pub fn register(&mut self, profile: ArchitectureProfile) -> Result<()> {
        if self.profiles.contains_key(&profile.architecture) {
            return Err(ProfileError::DuplicateProfile {
                architecture: profile.architecture,
            });
        }
        profile.check_firmware_device()?;
        self.profiles.insert(profile.architecture, profile);
        Ok(())
    }

    /// Add the builtin profile of every architecture not yet registered.
    pub fn fill_builtins(&mut self) {
        for arch in Architecture::ALL {
            self.profiles
                .entry(arch)
                .or_insert_with(|| ArchitectureProfile::builtin(arch));
        }
    }

    pub fn contains(&self, architecture: Architecture) -> bool {
        self.profiles.contains_key(&architecture)
    }

    /// The profile to launch `architecture` with.
    ///
    /// Profiles marked unsupported resolve to `ProfileNotFound` carrying the
    /// reason, so a build that is known to fail is never attempted.
    pub fn resolve(&self, architecture: Architecture) -> Result<&ArchitectureProfile> {
        let profile = self
            .profiles
            .get(&architecture)
            .ok_or_else(|| ProfileError::ProfileNotFound {
                architecture,
                reason: "no profile registered".into(),
            })?;
        match &profile.support {
            SupportStatus::Supported => Ok(profile),
            SupportStatus::Unsupported { reason } => Err(ProfileError::ProfileNotFound {
                architecture,
                reason: format!("profile is marked unsupported: {reason}"),
            }),
        }
    }

    /// The registered profile for `architecture`, supported or not.
    pub fn get(&self, architecture: Architecture) -> Option<&ArchitectureProfile> {
        self.profiles.get(&architecture)
    }

    /// Mutable access for applying project overrides before the registry is frozen.
    pub fn get_mut(&mut self, architecture: Architecture) -> Option<&mut ArchitectureProfile> {
        self.profiles.get_mut(&architecture)
    }

    /// All profiles in architecture order.
    pub fn iter(&self) -> impl Iterator<Item = &ArchitectureProfile> {
        self.profiles.values()
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
