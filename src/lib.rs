//! Stackpilot - deploy, diff, destroy and roll back infrastructure stacks
//!
//! Stackpilot takes an already-synthesized assembly of stacks (templates,
//! environments, dependency edges and build assets) and applies it to a
//! remote provisioning service safely, in dependency order and with bounded
//! concurrency. A watch mode redeploys whenever project files change.
//!
//! # Architecture
//!
//! The codebase follows a layered architecture:
//!
//! - [`cli`] - Command-line interface layer (parses args, delegates to engine)
//! - [`engine`] - Deploy orchestration, approval gate, recovery loop, diff and watch
//! - [`core`] - Domain types, templates, assembly loading, selection and config
//! - [`provision`] - Provisioning service abstraction (HTTP client and mock)
//! - [`ui`] - Output sink and confirmation prompts
//!
//! # Correctness Invariants
//!
//! 1. A stack with no resources is never deployed
//! 2. A stack deploys only after every stack it depends on has deployed
//! 3. The rollback recovery loop runs at most twice per stack
//! 4. Declining an approval aborts only the stack that asked

pub mod cli;
pub mod core;
pub mod engine;
pub mod provision;
pub mod ui;
