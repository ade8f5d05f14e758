//! `netboot run`: build, wire, boot, and supervise.

use anyhow::{Context, Result};
use netboot_launch::Orchestrator;
use netboot_profiles::Architecture;

use crate::manifest::Project;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    pub release: bool,
    pub no_accel: bool,
    /// Build, then print the emulator command instead of starting it.
    pub dry_run: bool,
}

/// Boot `architecture` and return the exit code to report.
pub fn run(project: &Project, architecture: Architecture, options: RunOptions) -> Result<i32> {
    let profile = project.profile(architecture, options.release, options.no_accel)?;
    let settings = project.launch_settings(architecture);

    if options.dry_run {
        let artifact = settings.toolchain.build(&profile)?;
        let invocation = Orchestrator::new(profile, settings).plan(&artifact)?;
        println!("{}", invocation.command_line());
        return Ok(0);
    }

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("starting async runtime")?;
    let mut orchestrator = Orchestrator::new(profile, settings);
    let outcome = runtime.block_on(orchestrator.run())?;
    if !outcome.success() {
        tracing::warn!(%architecture, ?outcome, "guest did not shut down cleanly");
    }
    Ok(outcome.exit_code())
}
