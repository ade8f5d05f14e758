//! TOML parsing, serialization, validation, and discovery for profile definitions.
//!
//! Project-specific profiles live as `.profile.toml` files in the `profiles/`
//! directory of a project. They take the place of the builtin profile for
//! their architecture.

use std::path::{Path, PathBuf};

use regex::Regex;

use crate::arch::Architecture;
use crate::error::{ProfileError, Result};
use crate::profile::ArchitectureProfile;
use crate::registry::ProfileRegistry;

const PROFILE_SUFFIX: &str = ".profile.toml";

/// A validation issue found in a profile definition.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    /// Severity: "error" or "warning".
    pub severity: &'static str,
    /// Human-readable description.
    pub message: String,
}

impl ValidationIssue {
    fn error(message: impl Into<String>) -> Self {
        Self {
            severity: "error",
            message: message.into(),
        }
    }

    fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: "warning",
            message: message.into(),
        }
    }
}

/// Load a profile from a `.profile.toml` file.
pub fn load_profile_toml(path: &Path) -> Result<ArchitectureProfile> {
    if !path.exists() {
        return Err(ProfileError::NotFound {
            path: path.to_path_buf(),
        });
    }
    let content = std::fs::read_to_string(path)?;
    parse_profile_toml(&content)
}

/// Parse a profile from a TOML string.
pub fn parse_profile_toml(toml_str: &str) -> Result<ArchitectureProfile> {
    let profile: ArchitectureProfile = toml::from_str(toml_str)?;
    Ok(profile)
}

/// Serialize a profile to pretty TOML.
pub fn profile_to_toml(profile: &ArchitectureProfile) -> Result<String> {
    let toml_str = toml::to_string_pretty(profile)?;
    Ok(toml_str)
}

/// Validate a profile for structural correctness.
///
/// Returns `Ok(())` if valid (warnings included), or `Err(issues)` when at
/// least one issue is an error.
pub fn validate_profile(profile: &ArchitectureProfile) -> std::result::Result<(), Vec<ValidationIssue>> {
    let mut issues = Vec::new();

    if profile.build_target.trim().is_empty() {
        issues.push(ValidationIssue::error("build-target is empty"));
    } else if !profile.build_target.ends_with("-uefi") {
        issues.push(ValidationIssue::warning(format!(
            "build-target '{}' is not a UEFI target; firmware will not be able to run it",
            profile.build_target
        )));
    }

    if profile.memory_mb == 0 {
        issues.push(ValidationIssue::error("memory-mb must be at least 1"));
    }

    if profile.smp == 0 {
        issues.push(ValidationIssue::error("smp must be at least 1"));
    }

    if profile.architecture == Architecture::Aarch64 && profile.cpu_model.is_none() {
        issues.push(ValidationIssue::error(
            "aarch64 requires cpu-model (the virt machine has no default CPU)",
        ));
    }

    if let Err(e) = profile.check_firmware_device() {
        issues.push(ValidationIssue::error(e.to_string()));
    }

    // Compile every rule, then make sure no replacement re-triggers a rule.
    let mut compiled = Vec::new();
    for rule in &profile.noise_patterns {
        match Regex::new(&rule.anchored()) {
            Ok(re) => compiled.push(re),
            Err(e) => issues.push(ValidationIssue::error(format!(
                "noise pattern '{}' is not a valid regular expression: {e}",
                rule.pattern
            ))),
        }
    }
    for rule in &profile.noise_patterns {
        if let Some(re) = compiled.iter().find(|re| re.is_match(&rule.replacement)) {
            issues.push(ValidationIssue::error(format!(
                "replacement '{}' is itself matched by noise pattern '{}'",
                rule.replacement,
                re.as_str()
            )));
        }
    }

    if issues.iter().any(|i| i.severity == "error") {
        Err(issues)
    } else {
        Ok(())
    }
}

/// Generate a template `.profile.toml`, seeded from the builtin profile.
pub fn generate_template(architecture: Architecture) -> Result<String> {
    let mut profile = ArchitectureProfile::builtin(architecture);
    profile.support = Default::default();
    profile_to_toml(&profile)
}

/// Discover all `.profile.toml` files in a project's `profiles/` directory.
///
/// Returns a list of (profile_name, file_path) pairs sorted by name.
pub fn discover_profiles(project_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let profiles_dir = project_dir.join("profiles");
    if !profiles_dir.is_dir() {
        return Ok(Vec::new());
    }

    let mut profiles = Vec::new();
    for entry in std::fs::read_dir(&profiles_dir)? {
        let path = entry?.path();
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .and_then(|n| n.strip_suffix(PROFILE_SUFFIX))
            .map(str::to_string);
        if let Some(name) = name {
            profiles.push((name, path));
        }
    }
    profiles.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(profiles)
}

/// The error messages among `issues`, joined with "; ".
pub fn error_summary(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .filter(|i| i.severity == "error")
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Build the registry for a project: its own profiles first, builtins for the rest.
pub fn load_registry(project_dir: &Path) -> Result<ProfileRegistry> {
    let mut registry = ProfileRegistry::new();
    for (name, path) in discover_profiles(project_dir)? {
        let profile = load_profile_toml(&path)?;
        if let Err(issues) = validate_profile(&profile) {
            return Err(ProfileError::Configuration {
                architecture: profile.architecture,
                detail: format!("profiles/{name}{PROFILE_SUFFIX}: {}", error_summary(&issues)),
            });
        }
        registry.register(profile)?;
    }
    registry.fill_builtins();
    Ok(registry)
}
