//! cli
//!
//! Command-line interface layer for Stackpilot.
//!
//! # Responsibilities
//!
//! - Parse command-line arguments and global flags
//! - Install the tracing subscriber
//! - Delegate to command handlers and map results to exit codes
//!
//! # Architecture
//!
//! The CLI layer is thin. It parses arguments via clap, resolves
//! configuration, and dispatches to the [`crate::engine`] for execution.
//!
//! # Exit codes
//!
//! - `0` success
//! - `1` `diff --fail` found differences
//! - `2` any error, including a declined confirmation

pub mod args;
pub mod commands;

pub use args::Cli;

use std::path::PathBuf;

use tracing_subscriber::EnvFilter;

use crate::engine::DeployError;

/// Exit status for failed runs.
pub const EXIT_ERROR: i32 = 2;

/// Per-invocation settings derived from global flags.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Working directory override.
    pub cwd: Option<PathBuf>,
    /// Debug logging enabled.
    pub debug: bool,
    /// Quiet mode (minimal output).
    pub quiet: bool,
    /// Interactive mode enabled.
    pub interactive: bool,
    /// Assembly directory override.
    pub assembly: Option<PathBuf>,
    /// Provisioning endpoint override.
    pub endpoint: Option<String>,
}

/// Run the CLI application and return the process exit status.
///
/// This is the main entry point called from `main.rs`.
pub fn run() -> i32 {
    let cli = Cli::parse_args();
    init_tracing(cli.debug);

    let ctx = Context {
        cwd: cli.cwd.clone(),
        debug: cli.debug,
        quiet: cli.quiet,
        interactive: cli.interactive(),
        assembly: cli.assembly.clone(),
        endpoint: cli.endpoint.clone(),
    };

    match commands::dispatch(cli.command, &ctx) {
        Ok(code) => code,
        Err(e) => {
            report_error(&e);
            EXIT_ERROR
        }
    }
}

/// Print a top-level error. Declines print only the abort notice.
fn report_error(error: &anyhow::Error) {
    match error.downcast_ref::<DeployError>() {
        Some(e) if e.is_user_cancelled() => eprintln!("{}", e),
        _ => eprintln!("error: {:#}", error),
    }
}

fn init_tracing(debug: bool) {
    let default = if debug { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

