//! CLI argument parsing for queue-lock.
//!
//! Uses clap derive macros for declarative argument definitions.
//! This module defines the command structure; actual implementations
//! are in the `commands` module.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// queue-lock: distributed mutual exclusion over a coordination service.
///
/// Competing sessions queue up as ephemeral sequential nodes under a shared
/// base path; the lowest sequence number holds the lock.
#[derive(Parser, Debug)]
#[command(name = "queue-lock")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable debug-level logging (overrides RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands for queue-lock.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run competing workers against an in-process coordination service.
    ///
    /// Each worker owns a session and acquires the lock `--rounds` times.
    /// Mutual exclusion is checked on every grant and the grant order is
    /// reported at the end.
    Simulate(SimulateArgs),

    /// Validate a configuration file and print the effective settings.
    Config(ConfigArgs),
}

/// Arguments for the `simulate` command.
#[derive(Parser, Debug)]
pub struct SimulateArgs {
    /// Number of competing sessions.
    #[arg(short, long, default_value_t = 3)]
    pub workers: usize,

    /// Acquisitions per worker.
    #[arg(short, long, default_value_t = 2)]
    pub rounds: usize,

    /// How long each holder keeps the lock, in milliseconds.
    #[arg(long, default_value_t = 10)]
    pub hold_ms: u64,

    /// Give up on an acquisition after this many milliseconds.
    ///
    /// Falls back to `acquire_timeout_ms` from the configuration; without
    /// either, workers wait indefinitely.
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Expire the first holder's session while it holds the lock.
    #[arg(long)]
    pub crash_first_holder: bool,

    /// Lock configuration file (YAML).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print the report as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for the `config` command.
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    /// Configuration file to check. Defaults are printed when omitted.
    pub file: Option<PathBuf>,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_simulate_defaults() {
        let cli = Cli::try_parse_from(["queue-lock", "simulate"]).unwrap();
        assert!(!cli.verbose);
        if let Command::Simulate(args) = cli.command {
            assert_eq!(args.workers, 3);
            assert_eq!(args.rounds, 2);
            assert_eq!(args.hold_ms, 10);
            assert_eq!(args.timeout_ms, None);
            assert!(!args.crash_first_holder);
            assert!(args.config.is_none());
            assert!(!args.json);
        } else {
            panic!("Expected Simulate command");
        }
    }

    #[test]
    fn parse_simulate_full() {
        let cli = Cli::try_parse_from([
            "queue-lock",
            "simulate",
            "--workers",
            "5",
            "--rounds",
            "4",
            "--hold-ms",
            "0",
            "--timeout-ms",
            "250",
            "--crash-first-holder",
            "--config",
            "lock.yaml",
            "--json",
        ])
        .unwrap();
        if let Command::Simulate(args) = cli.command {
            assert_eq!(args.workers, 5);
            assert_eq!(args.rounds, 4);
            assert_eq!(args.hold_ms, 0);
            assert_eq!(args.timeout_ms, Some(250));
            assert!(args.crash_first_holder);
            assert_eq!(args.config, Some(PathBuf::from("lock.yaml")));
            assert!(args.json);
        } else {
            panic!("Expected Simulate command");
        }
    }

    #[test]
    fn parse_config_with_file() {
        let cli = Cli::try_parse_from(["queue-lock", "config", "lock.yaml"]).unwrap();
        if let Command::Config(args) = cli.command {
            assert_eq!(args.file, Some(PathBuf::from("lock.yaml")));
        } else {
            panic!("Expected Config command");
        }
    }

    #[test]
    fn parse_verbose_after_subcommand() {
        let cli = Cli::try_parse_from(["queue-lock", "config", "--verbose"]).unwrap();
        assert!(cli.verbose);
    }

    #[test]
    fn parse_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["queue-lock", "steal"]).is_err());
    }
}
