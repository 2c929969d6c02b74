//! ui
//!
//! User interaction utilities.
//!
//! # Modules
//!
//! - [`output`] - Verbosity, the [`OutputSink`](output::OutputSink) trait and the console sink
//! - [`prompts`] - Interactive confirmations
//! - [`recording`] - A sink that records output and answers prompts from a script
//!
//! # Design
//!
//! All output and prompts go through this module to ensure consistent
//! formatting and proper handling of interactive vs non-interactive modes.

pub mod output;
pub mod prompts;
pub mod recording;
