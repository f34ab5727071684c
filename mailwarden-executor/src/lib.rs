//! # Mailwarden Executor
//!
//! The only component that talks to the MTA. Decisions are translated into
//! `pmta` control commands and sent over a long-lived shell channel; full
//! config reloads are debounced behind a minimum gap with a pending-drain
//! ticker. With no MTA host configured the executor runs dry: every command
//! is logged and reported successful.

pub mod channel;
pub mod commands;
pub mod executor;

use thiserror::Error;

pub use channel::{DryRunChannel, ShellChannel, SshShellChannel};
pub use commands::MtaCommand;
pub use executor::{Executor, RELOAD_MIN_GAP};

/// Result type for executor operations.
pub type Result<T> = std::result::Result<T, ExecutorError>;

/// Errors raised by the executor.
#[derive(Error, Debug)]
pub enum ExecutorError {
    /// Shell channel failure (spawn, connect, transport).
    #[error("Channel error: {0}")]
    Channel(String),

    /// The remote command ran and failed.
    #[error("Command failed ({command}): {detail}")]
    CommandFailed { command: String, detail: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
