//! Command implementations for queue-lock.
//!
//! This module provides the dispatcher that routes CLI commands to their
//! implementations.

mod config_cmd;
mod simulate;

use crate::cli::Command;
use queue_lock::Result;

/// Dispatch a command to its implementation.
pub fn dispatch(command: Command) -> Result<()> {
    match command {
        Command::Simulate(args) => simulate::cmd_simulate(args),
        Command::Config(args) => config_cmd::cmd_config(args),
    }
}
