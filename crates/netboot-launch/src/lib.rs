//! Build a netboot image and boot it under an emulator.
//!
//! [`Toolchain`] compiles the image for a profile, [`NetbootWiring`] serves
//! it to the guest firmware over DHCP and TFTP, [`EmulatorInvocation`] is the
//! full command line, and [`DiagnosticFilter`] cleans up the console stream.
//! [`Orchestrator`] runs those steps in order and supervises the emulator.

pub mod emulator;
pub mod error;
pub mod filter;
pub mod orchestrator;
pub mod toolchain;
pub mod wiring;

#[cfg(all(test, unix))]
mod testutil;

pub use emulator::EmulatorInvocation;
pub use error::{LaunchError, Result};
pub use filter::{Chunk, DiagnosticFilter, LineReader, LineState};
pub use orchestrator::{shutdown_signal, LaunchSettings, LaunchState, Orchestrator, RunOutcome};
pub use toolchain::Toolchain;
pub use wiring::NetbootWiring;
