//! `netboot filter`: apply a profile's noise rules to a saved console log.

use anyhow::Result;
use netboot_launch::DiagnosticFilter;
use netboot_profiles::Architecture;
use tokio::io::BufReader;

use crate::manifest::Project;

/// Filter stdin to stdout with the rules of `architecture`'s profile.
pub fn run(project: &Project, architecture: Architecture) -> Result<()> {
    let registry = project.registry()?;
    let profile = registry
        .get(architecture)
        .ok_or_else(|| anyhow::anyhow!("no profile registered for {architecture}"))?;
    let filter = DiagnosticFilter::for_profile(profile)?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    runtime.block_on(async {
        let mut stdout = tokio::io::stdout();
        filter
            .pump(BufReader::new(tokio::io::stdin()), &mut stdout)
            .await
    })?;
    Ok(())
}
