//! Command line interface module
//!
//! Argument parsing, configuration (flags plus environment overrides), and the
//! runner that maps a transfer outcome or a signal to a process exit code.

pub mod args;
pub mod config;
pub mod runner;

pub use args::{Args, Command};
pub use config::{AppConfig, AuthConfig, Operation};
pub use runner::{ExitSignal, Runner};
