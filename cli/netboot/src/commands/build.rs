//! `netboot build`: compile the image for one architecture.

use anyhow::Result;
use netboot_profiles::Architecture;

use crate::manifest::Project;

/// Run the build step and print the artifact path.
pub fn run(project: &Project, architecture: Architecture, release: bool) -> Result<()> {
    let profile = project.profile(architecture, release, false)?;
    let artifact = project.toolchain().build(&profile)?;
    println!("{}", artifact.display());
    Ok(())
}
