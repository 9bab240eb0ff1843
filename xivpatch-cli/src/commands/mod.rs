//! CLI subcommands.

pub mod common;
pub mod config;
pub mod install;
pub mod preflight;
pub mod verify;
