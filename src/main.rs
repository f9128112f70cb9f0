//! queue-lock: distributed queue lock over a coordination service.
//!
//! This is the main entry point for the `queue-lock` CLI. It parses arguments,
//! installs the log subscriber, dispatches to the appropriate command handler,
//! and handles errors with proper exit codes.

mod cli;
mod commands;

use cli::Cli;
use queue_lock::exit_codes;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

/// Log to stderr so command output on stdout stays machine-readable.
///
/// `--verbose` forces debug level; otherwise `RUST_LOG` applies, defaulting to warn.
fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    match commands::dispatch(cli.command) {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            eprintln!("Error: {}", err);
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
