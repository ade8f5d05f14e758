//! `netboot init`: project scaffolding.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

use crate::manifest::{NetbootManifest, MANIFEST_FILE};

/// Create a new netboot project in the directory `name`, relative to cwd.
pub fn run(name: &str) -> Result<()> {
    create_project(Path::new(name), name)
}

pub(crate) fn create_project(project_dir: &Path, name: &str) -> Result<()> {
    if project_dir.exists() {
        bail!("directory '{}' already exists", project_dir.display());
    }

    fs::create_dir_all(project_dir.join("profiles")).context("creating profiles/ directory")?;
    fs::create_dir_all(project_dir.join("firmware")).context("creating firmware/ directory")?;

    fs::write(project_dir.join(MANIFEST_FILE), NetbootManifest::template(name))
        .with_context(|| format!("writing {MANIFEST_FILE}"))?;
    fs::write(project_dir.join(".gitignore"), "target/\n").context("writing .gitignore")?;

    println!("Created project '{name}'");
    println!("  {name}/{MANIFEST_FILE}");
    println!("  {name}/profiles/");
    println!("  {name}/firmware/");
    println!("  {name}/.gitignore");
    println!();
    println!("Put OVMF.fd (x86_64) and QEMU_EFI.fd (aarch64) in firmware/.");

    Ok(())
}
