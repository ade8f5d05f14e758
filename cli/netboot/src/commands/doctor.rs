//! `netboot doctor`: toolchain, emulator, and firmware diagnostics.

use std::path::Path;
use std::process::Command;

use anyhow::Result;
use netboot_profiles::Architecture;

use crate::manifest::{Project, MANIFEST_FILE};

/// Print what a run of each architecture would need and whether it is there.
pub fn run(project: &Project, architecture: Option<Architecture>) -> Result<()> {
    println!("=== netboot doctor ===");
    println!();
    println!("netboot version: {}", env!("CARGO_PKG_VERSION"));
    match Architecture::host() {
        Some(host) => println!("Host architecture: {host}"),
        None => println!("Host architecture: {} (no profile)", std::env::consts::ARCH),
    }
    println!();

    println!("--- Project ---");
    match &project.manifest {
        Some(manifest) => {
            println!("  {MANIFEST_FILE}: found at {}", project.dir.display());
            println!("  Project: {}", manifest.project.name);
        }
        None => println!("  {MANIFEST_FILE}: not found (using defaults)"),
    }
    println!();

    let toolchain = project.toolchain();
    println!("--- Toolchain ---");
    print_tool_status(&toolchain.program, &["--version"]);
    println!("  Output root: {}", toolchain.output_root().display());
    println!();

    let registry = project.registry()?;
    let selected: Vec<Architecture> = match architecture {
        Some(arch) => vec![arch],
        None => Architecture::ALL.to_vec(),
    };
    for arch in selected {
        println!("--- {arch} ---");
        let Some(profile) = registry.get(arch) else {
            println!("  profile: not registered");
            continue;
        };
        if let Err(e) = registry.resolve(arch) {
            println!("  profile: {e}");
            println!();
            continue;
        }
        let emulator = project
            .emulator_program(arch)
            .unwrap_or_else(|| arch.emulator_program().into());
        print_tool_status(&emulator, &["--version"]);
        match profile.firmware_path(&project.dir) {
            Some(path) if path.is_file() => println!("  firmware: {}", path.display()),
            Some(path) => println!("  firmware: missing ({})", path.display()),
            None => println!("  firmware: emulator default"),
        }
        if let Err(e) = profile.check_host(Architecture::host()) {
            println!("  acceleration: {e}");
        }
        println!("  artifact: {}", toolchain.artifact_path(profile).display());
        println!();
    }

    Ok(())
}

fn print_tool_status(program: &Path, args: &[&str]) {
    let name = program.display();
    match Command::new(program).args(args).output() {
        Ok(output) => {
            let version = String::from_utf8_lossy(&output.stdout);
            let first_line = version.lines().next().unwrap_or("(unknown version)");
            println!("  {name}: {first_line}");
        }
        Err(_) => {
            println!("  {name}: not found");
        }
    }
}
