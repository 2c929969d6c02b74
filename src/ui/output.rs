//! ui::output
//!
//! Output formatting and the injected output sink.
//!
//! # Design
//!
//! Nothing in the engine prints directly. Every message and every
//! confirmation goes through an [`OutputSink`] handed to the engine at
//! construction time, so commands, tests and watch mode can each decide
//! where output lands.
//!
//! Informational messages go to stderr; `result` goes to stdout so that
//! command results can be piped.

use std::time::Duration;

use super::prompts::{self, PromptError};

/// Output verbosity level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verbosity {
    /// Quiet mode - minimal output
    Quiet,
    /// Normal mode - standard output
    Normal,
    /// Debug mode - verbose output
    Debug,
}

impl Verbosity {
    /// Create verbosity from flags.
    pub fn from_flags(quiet: bool, debug: bool) -> Self {
        if quiet {
            Verbosity::Quiet
        } else if debug {
            Verbosity::Debug
        } else {
            Verbosity::Normal
        }
    }
}

/// Destination for user-facing messages and confirmations.
pub trait OutputSink: Send + Sync {
    /// Progress and status messages.
    fn info(&self, message: &str);

    /// Something the user should notice but that does not stop the run.
    fn warn(&self, message: &str);

    /// A failure.
    fn error(&self, message: &str);

    /// Command results (diffs, outputs, listings).
    fn result(&self, message: &str);

    /// Diagnostics shown only in debug mode.
    fn debug(&self, message: &str);

    /// Ask the user a yes/no question.
    ///
    /// Returns `Ok(())` on acceptance and `PromptError::Declined` on
    /// refusal, so callers can propagate a refusal with `?`.
    fn request_response(&self, question: &str) -> Result<(), PromptError>;
}

/// Sink writing to the terminal.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleSink {
    verbosity: Verbosity,
    interactive: bool,
}

impl ConsoleSink {
    /// Create a console sink.
    pub fn new(verbosity: Verbosity, interactive: bool) -> Self {
        Self {
            verbosity,
            interactive,
        }
    }

    /// The sink's verbosity.
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }
}

impl OutputSink for ConsoleSink {
    fn info(&self, message: &str) {
        if self.verbosity != Verbosity::Quiet {
            eprintln!("{}", message);
        }
    }

    fn warn(&self, message: &str) {
        if self.verbosity != Verbosity::Quiet {
            eprintln!("warning: {}", message);
        }
    }

    fn error(&self, message: &str) {
        eprintln!("error: {}", message);
    }

    fn result(&self, message: &str) {
        println!("{}", message);
    }

    fn debug(&self, message: &str) {
        if self.verbosity == Verbosity::Debug {
            eprintln!("[debug] {}", message);
        }
    }

    fn request_response(&self, question: &str) -> Result<(), PromptError> {
        if prompts::confirm(question, false, self.interactive)? {
            Ok(())
        } else {
            Err(PromptError::Declined)
        }
    }
}

/// Format an elapsed time the way deploy summaries show it (`12.34s`).
pub fn format_duration(duration: Duration) -> String {
    format!("{:.2}s", duration.as_secs_f64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_from_flags() {
        assert_eq!(Verbosity::from_flags(true, true), Verbosity::Quiet);
        assert_eq!(Verbosity::from_flags(false, true), Verbosity::Debug);
        assert_eq!(Verbosity::from_flags(false, false), Verbosity::Normal);
    }

    #[test]
    fn format_duration_two_decimals() {
        assert_eq!(format_duration(Duration::from_millis(1500)), "1.50s");
        assert_eq!(format_duration(Duration::ZERO), "0.00s");
    }

    #[test]
    fn console_sink_refuses_prompt_when_not_interactive() {
        let sink = ConsoleSink::new(Verbosity::Quiet, false);
        assert!(matches!(
            sink.request_response("Proceed?"),
            Err(PromptError::NotInteractive)
        ));
    }
}
