//! CLI command implementations.

pub mod build;
pub mod doctor;
pub mod filter;
pub mod init;
pub mod profiles;
pub mod run;
