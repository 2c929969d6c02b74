//! ui::prompts
//!
//! Interactive prompts and confirmations.
//!
//! # Design
//!
//! Prompts are only shown in interactive mode. In non-interactive mode,
//! operations requiring user input must either have defaults or fail
//! with a clear error message.

use std::io::IsTerminal;

use thiserror::Error;

/// Errors from prompts.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PromptError {
    /// The user answered "no".
    #[error("Aborted by user")]
    Declined,

    #[error("not in interactive mode")]
    NotInteractive,

    #[error("IO error: {0}")]
    IoError(String),
}

/// Whether stdin and stderr are attached to a terminal.
pub fn stdio_is_terminal() -> bool {
    std::io::stdin().is_terminal() && std::io::stderr().is_terminal()
}

/// Prompt for confirmation (yes/no).
///
/// Returns `Ok(true)` if the user confirms, `Ok(false)` if they decline.
/// Returns `Err(PromptError::NotInteractive)` if not in interactive mode.
pub fn confirm(message: &str, default: bool, interactive: bool) -> Result<bool, PromptError> {
    if !interactive {
        return Err(PromptError::NotInteractive);
    }

    dialoguer::Confirm::new()
        .with_prompt(message)
        .default(default)
        .interact()
        .map_err(|e| PromptError::IoError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confirm_requires_interactive() {
        assert_eq!(
            confirm("Continue?", true, false),
            Err(PromptError::NotInteractive)
        );
    }

    #[test]
    fn declined_message() {
        assert_eq!(PromptError::Declined.to_string(), "Aborted by user");
    }
}
