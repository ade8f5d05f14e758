//! `netboot profiles`: listing, description, validation, and templates.

use std::path::Path;

use anyhow::{bail, Result};
use netboot_profiles::parse::{generate_template, load_profile_toml, profile_to_toml, validate_profile};
use netboot_profiles::{Architecture, ArchitectureProfile, SupportStatus};

use crate::manifest::Project;

/// List every registered profile.
pub fn list(project: &Project) -> Result<()> {
    let registry = project.registry()?;
    println!("Registered profiles:");
    println!();
    for profile in registry.iter() {
        println!(
            "  {:<9} {:<26} {:<15} {}",
            profile.architecture.as_str(),
            profile.build_target,
            profile.network_device.qemu_model(),
            support_label(&profile.support)
        );
    }
    println!();
    println!("Use 'netboot profiles describe <arch>' for details.");
    Ok(())
}

fn support_label(support: &SupportStatus) -> String {
    match support {
        SupportStatus::Supported => "supported".into(),
        SupportStatus::Unsupported { reason } => format!("unsupported: {reason}"),
    }
}

/// Describe one profile, as text or as a `.profile.toml` document.
pub fn describe(project: &Project, architecture: Architecture, format: Option<&str>) -> Result<()> {
    let registry = project.registry()?;
    let Some(profile) = registry.get(architecture) else {
        bail!("no profile registered for {architecture}. Use 'netboot profiles list' to see them.");
    };

    match format.unwrap_or("text") {
        "text" => print_profile(profile, &project.dir),
        "toml" => print!("{}", profile_to_toml(profile)?),
        other => bail!("unknown format '{other}' (expected text or toml)"),
    }
    Ok(())
}

fn print_profile(profile: &ArchitectureProfile, project_dir: &Path) {
    println!("=== Profile: {} ===", profile.architecture);
    println!("Status: {}", support_label(&profile.support));
    println!();

    println!("--- Build ---");
    println!("  Target:  {}", profile.build_target);
    println!("  Profile: {}", profile.build_profile.dir_name());
    println!();

    println!("--- Machine ---");
    println!("  Emulator: {}", profile.architecture.emulator_program());
    if let Some(machine) = &profile.machine {
        println!("  Machine:  {machine}");
    }
    if let Some(cpu) = &profile.cpu_model {
        println!("  CPU:      {cpu}");
    }
    println!("  vCPUs:    {}", profile.smp);
    println!("  Memory:   {} MiB", profile.memory_mb);
    match profile.acceleration {
        Some(accel) => println!("  Accel:    {}", accel.qemu_name()),
        None => println!("  Accel:    none"),
    }
    println!();

    println!("--- Boot ---");
    println!("  Firmware: {:?}", profile.firmware.kind);
    if let Some(path) = profile.firmware_path(project_dir) {
        println!("  Image:    {}", path.display());
    }
    println!("  NIC:      {}", profile.network_device.qemu_model());
    println!();

    println!("--- Noise rules ---");
    if profile.noise_patterns.is_empty() {
        println!("  (none)");
    }
    for rule in &profile.noise_patterns {
        println!("  {} => {}", rule.pattern, rule.replacement);
    }
}

/// Validate a `.profile.toml` file, printing every issue found.
pub fn validate(path: &Path) -> Result<()> {
    let profile = load_profile_toml(path)?;
    match validate_profile(&profile) {
        Ok(()) => {
            println!("{}: ok ({})", path.display(), profile.architecture);
            Ok(())
        }
        Err(issues) => {
            for issue in &issues {
                println!("  {}: {}", issue.severity, issue.message);
            }
            bail!("{} has {} issue(s)", path.display(), issues.len())
        }
    }
}

/// Print a starter `.profile.toml` for `architecture`.
pub fn template(architecture: Architecture) -> Result<()> {
    print!("{}", generate_template(architecture)?);
    Ok(())
}
