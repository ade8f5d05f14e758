//! netboot: build a UEFI image and boot it over PXE under QEMU.

mod commands;
mod manifest;

use std::process;

use clap::{Parser, Subcommand};
use netboot_launch::LaunchError;
use netboot_profiles::{Architecture, ProfileError};
use tracing_subscriber::EnvFilter;

use commands::run::RunOptions;
use manifest::Project;

#[derive(Parser)]
#[command(name = "netboot", version, about = "Build and network-boot UEFI images under QEMU")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the image, then PXE-boot it under the emulator
    Run {
        /// Guest architecture (x86_64, aarch64, riscv64)
        #[arg(value_parser = parse_architecture)]
        arch: Architecture,
        /// Build with optimizations
        #[arg(long)]
        release: bool,
        /// Run without host acceleration
        #[arg(long)]
        no_accel: bool,
        /// Build, then print the emulator command instead of running it
        #[arg(long)]
        dry_run: bool,
    },
    /// Build the image and print its path
    Build {
        /// Guest architecture
        #[arg(value_parser = parse_architecture)]
        arch: Architecture,
        /// Build with optimizations
        #[arg(long)]
        release: bool,
    },
    /// Inspect and author architecture profiles
    Profiles {
        #[command(subcommand)]
        action: ProfilesAction,
    },
    /// Filter a console log from stdin with an architecture's noise rules
    Filter {
        /// Guest architecture
        #[arg(value_parser = parse_architecture)]
        arch: Architecture,
    },
    /// Check for the toolchain, emulators, and firmware images
    Doctor {
        /// Only check this architecture
        #[arg(long, value_parser = parse_architecture)]
        arch: Option<Architecture>,
    },
    /// Create a new netboot project
    Init {
        /// Project name
        name: String,
    },
}

#[derive(Subcommand)]
enum ProfilesAction {
    /// List registered profiles
    List,
    /// Show one profile in detail
    Describe {
        #[arg(value_parser = parse_architecture)]
        arch: Architecture,
        /// Output format (text, toml)
        #[arg(long)]
        format: Option<String>,
    },
    /// Validate a .profile.toml file
    Validate {
        /// Path to the profile file
        file: std::path::PathBuf,
    },
    /// Print a starter .profile.toml for an architecture
    Template {
        #[arg(value_parser = parse_architecture)]
        arch: Architecture,
    },
}

fn parse_architecture(s: &str) -> Result<Architecture, ProfileError> {
    s.parse()
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(0) => {}
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("error: {e:#}");
            process::exit(exit_code(&e));
        }
    }
}

/// Build failures pass the toolchain's code through; everything else is 1.
fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<LaunchError>()
        .map_or(1, LaunchError::exit_code)
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let cwd = std::env::current_dir()?;

    match cli.command {
        Commands::Init { name } => commands::init::run(&name).map(|()| 0),

        Commands::Run {
            arch,
            release,
            no_accel,
            dry_run,
        } => {
            let project = Project::discover(&cwd)?;
            commands::run::run(
                &project,
                arch,
                RunOptions {
                    release,
                    no_accel,
                    dry_run,
                },
            )
        }

        Commands::Build { arch, release } => {
            let project = Project::discover(&cwd)?;
            commands::build::run(&project, arch, release).map(|()| 0)
        }

        Commands::Profiles { action } => {
            let project = Project::discover(&cwd)?;
            match action {
                ProfilesAction::List => commands::profiles::list(&project),
                ProfilesAction::Describe { arch, format } => {
                    commands::profiles::describe(&project, arch, format.as_deref())
                }
                ProfilesAction::Validate { file } => commands::profiles::validate(&file),
                ProfilesAction::Template { arch } => commands::profiles::template(arch),
            }
            .map(|()| 0)
        }

        Commands::Filter { arch } => {
            let project = Project::discover(&cwd)?;
            commands::filter::run(&project, arch).map(|()| 0)
        }

        Commands::Doctor { arch } => {
            let project = Project::discover(&cwd)?;
            commands::doctor::run(&project, arch).map(|()| 0)
        }
    }
}
