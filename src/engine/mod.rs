//! engine
//!
//! Deployment orchestration: gating, scheduling, recovery and watch mode.
//!
//! # Architecture
//!
//! ```text
//! WatchLoop -> Deployer -> recovery loop -> (gate, params, AssetTaskRunner via WorkGraph)
//! ```
//!
//! - [`deploy::Deployer`] prepares every selected stack (zero-resource
//!   handling, approval gate, notification targets), builds a
//!   [`work_graph::WorkGraph`] and runs it with bounded concurrency.
//! - [`assets::AssetTaskRunner`] supplies the build, publish and deploy
//!   callbacks the graph invokes.
//! - [`recovery`] drives one stack's deploy through the bounded
//!   rollback-then-retry loop.
//! - [`diff`] compares deployed and desired templates, and extracts the
//!   security-relevant changes used by [`gate`].
//! - [`destroy`] and [`rollback`] implement the remaining operations.
//! - [`watch`] redeploys on file changes through a coalescing latch.
//!
//! # Invariants
//!
//! - A stack with no resources is never deployed
//! - The recovery loop runs at most twice per stack
//! - Declining an approval aborts only the requesting stack
//! - Errors from a stack are wrapped with its display name and are fatal
//!   to the run (watch mode logs them and keeps going)

pub mod assets;
pub mod deploy;
pub mod destroy;
pub mod diff;
pub mod gate;
pub mod recovery;
pub mod rollback;
pub mod watch;
pub mod work_graph;

use std::fmt;

use thiserror::Error;

use crate::core::assembly::AssemblyError;
use crate::core::outputs::OutputsError;
use crate::core::selection::SelectionError;
use crate::provision::ProvisionError;
use crate::ui::prompts::PromptError;

pub use deploy::{DeployOptions, DeployReport, Deployer};
pub use gate::{ApprovalPolicy, PermissionChangeType, SecurityDiff};
pub use work_graph::WorkGraphError;

/// What went wrong with one stack, as recorded for the current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorDescriptor {
    /// Display name of the failing stack
    pub stack: String,
    /// Kind of the underlying error
    pub name: String,
    /// Underlying error message
    pub message: String,
}

impl ErrorDescriptor {
    /// Describe `error` as a failure of `stack`.
    pub fn new(stack: impl Into<String>, error: &DeployError) -> Self {
        Self {
            stack: stack.into(),
            name: error.kind().to_string(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for ErrorDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}: {}", self.stack, self.name, self.message)
    }
}

/// Errors from engine operations.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The user declined a confirmation.
    #[error("Aborted by user")]
    Declined { stack: String },

    /// Input that can never succeed; raised before remote calls where possible.
    #[error("{0}")]
    Validation(String),

    /// The rollback recovery loop needed a third iteration.
    #[error("{stack}: deployment did not stabilise after {iterations} rollback recovery attempts")]
    RecoveryLoopExceeded { stack: String, iterations: u32 },

    /// A stack failed; wrapped with its display name.
    #[error("{0}")]
    StackFailed(ErrorDescriptor),

    #[error("No stacks were in a rollbackable state")]
    NoRollbackableStacks,

    #[error("asset {asset}: {source}")]
    Asset {
        asset: String,
        source: ProvisionError,
    },

    #[error(transparent)]
    Outputs(#[from] OutputsError),

    #[error(transparent)]
    WorkGraph(#[from] WorkGraphError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error(transparent)]
    Selection(#[from] SelectionError),

    #[error(transparent)]
    Assembly(#[from] AssemblyError),
}

impl DeployError {
    /// Whether this is a declined confirmation.
    pub fn is_user_cancelled(&self) -> bool {
        matches!(self, DeployError::Declined { .. })
    }

    /// Error class name.
    pub fn kind(&self) -> &'static str {
        match self {
            DeployError::Declined { .. } => "UserCancelled",
            DeployError::Validation(_)
            | DeployError::RecoveryLoopExceeded { .. }
            | DeployError::Selection(_)
            | DeployError::Assembly(_) => "ValidationError",
            DeployError::StackFailed(descriptor) => match descriptor.name.as_str() {
                "UserCancelled" => "UserCancelled",
                "ValidationError" => "ValidationError",
                _ => "ProvisioningFailure",
            },
            DeployError::NoRollbackableStacks => "NoRollbackableStacks",
            DeployError::Asset { .. } => "AssetFailure",
            DeployError::Outputs(_) => "OutputsError",
            DeployError::WorkGraph(_) => "WorkGraphError",
            DeployError::Provision(e) => e.kind(),
        }
    }

    /// Wrap this error with the display name of the stack it came from.
    ///
    /// Declines and already-wrapped errors pass through unchanged.
    pub fn for_stack(self, stack: &str) -> DeployError {
        match self {
            DeployError::Declined { .. } | DeployError::StackFailed(_) => self,
            other => DeployError::StackFailed(ErrorDescriptor::new(stack, &other)),
        }
    }

    /// Turn a prompt failure during work on `stack` into a deploy error.
    pub fn from_prompt(stack: &str, error: PromptError) -> DeployError {
        match error {
            PromptError::Declined => DeployError::Declined {
                stack: stack.to_string(),
            },
            PromptError::NotInteractive => DeployError::Validation(format!(
                "{}: confirmation required but the terminal (TTY) is not attached \
                 so we are unable to get a confirmation from the user",
                stack
            )),
            PromptError::IoError(message) => {
                DeployError::Validation(format!("{}: prompt failed: {}", stack, message))
            }
        }
    }
}
