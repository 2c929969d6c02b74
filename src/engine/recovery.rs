//! engine::recovery
//!
//! The bounded rollback-then-retry loop around a single stack deploy.
//!
//! # Architecture
//!
//! ```text
//!            ┌──────────── Deployed ────────────> Done
//! Deploying ─┼── PausedNeedsRollback ──> rollback, rollback=true ──┐
//!            └── ReplacementRequiresRollback ──> rollback=true ─────┤
//!      ^                                                            │
//!      └────────────────────────────────────────────────────────────┘
//! ```
//!
//! The service refuses destructive replacements when deploying without
//! rollback, and a stack stuck in a failed paused state must be rolled back
//! before it accepts a deploy. Either condition needs exactly one fallback
//! cycle, so the loop body runs at most [`MAX_ITERATIONS`] times.
//!
//! # Invariants
//!
//! - A third iteration is a fatal [`DeployError::RecoveryLoopExceeded`],
//!   never another retry
//! - Without `force`, every recovery step is confirmed by the user first
//! - A rollback is only ever issued for the stack being deployed

use tracing::debug;

use super::DeployError;
use crate::provision::{
    DeployStackRequest, Deployed, DeploymentOutcome, Provisioner, RollbackRequest,
};
use crate::ui::output::OutputSink;

/// Maximum number of deploy attempts for one stack.
pub const MAX_ITERATIONS: u32 = 2;

/// States of the recovery loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    Deploying,
    PausedNeedsRollback,
    ReplacementNeedsRollback,
    Done,
}

impl RecoveryState {
    /// State entered after a deploy attempt returns `outcome`.
    pub fn after(outcome: &DeploymentOutcome) -> Self {
        match outcome {
            DeploymentOutcome::Deployed(_) => RecoveryState::Done,
            DeploymentOutcome::PausedNeedsRollback { .. } => RecoveryState::PausedNeedsRollback,
            DeploymentOutcome::ReplacementRequiresRollback => {
                RecoveryState::ReplacementNeedsRollback
            }
        }
    }
}

/// A stack that reached `Done`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryOutcome {
    /// The final deploy result
    pub deployed: Deployed,
    /// Number of deploy attempts made
    pub iterations: u32,
}

/// Deploy one stack, recovering from rollback-required states.
///
/// `request.rollback` is the initial rollback mode; it is switched on
/// before the second attempt. `stack` is the display name used in
/// messages and errors.
///
/// # Errors
///
/// - `DeployError::Declined` if the user refuses a recovery step
/// - `DeployError::RecoveryLoopExceeded` if a third attempt would be needed
/// - Provisioning errors from the deploy or rollback calls
pub async fn deploy_with_recovery(
    provisioner: &dyn Provisioner,
    sink: &dyn OutputSink,
    stack: &str,
    mut request: DeployStackRequest,
    force: bool,
) -> Result<RecoveryOutcome, DeployError> {
    let mut iterations = 0;

    loop {
        if iterations >= MAX_ITERATIONS {
            return Err(DeployError::RecoveryLoopExceeded {
                stack: stack.to_string(),
                iterations,
            });
        }
        iterations += 1;

        debug!(stack, iteration = iterations, rollback = request.rollback, "deploy attempt");
        let outcome = provisioner.deploy_stack(&request).await?;
        let state = RecoveryState::after(&outcome);
        debug!(stack, ?state, "deploy attempt finished");

        match outcome {
            DeploymentOutcome::Deployed(deployed) => {
                return Ok(RecoveryOutcome {
                    deployed,
                    iterations,
                });
            }

            DeploymentOutcome::PausedNeedsRollback { reason, status } => {
                if !force {
                    sink.request_response(&format!(
                        "{}: stack is in a paused fail state ({}) and needs rollback before a successful deployment can happen ({}). Roll back first and then proceed with deployment (y/n)?",
                        stack, status, reason
                    ))
                    .map_err(|e| DeployError::from_prompt(stack, e))?;
                }

                sink.info(&format!("{}: rolling back first", stack));
                let result = provisioner
                    .rollback_stack(&RollbackRequest {
                        stack: request.stack.clone(),
                        force,
                        orphan_logical_ids: Vec::new(),
                    })
                    .await?;
                if result.not_in_rollbackable_state {
                    sink.info(&format!(
                        "{}: stack was not in a rollbackable state, deploying anyway",
                        stack
                    ));
                }
                request.rollback = true;
            }

            DeploymentOutcome::ReplacementRequiresRollback => {
                if !force {
                    sink.request_response(&format!(
                        "{}: this deployment contains replacements, which require rollback to be enabled. Perform a regular deployment (y/n)?",
                        stack
                    ))
                    .map_err(|e| DeployError::from_prompt(stack, e))?;
                }

                sink.info(&format!(
                    "{}: replacement requires rollback, deploying with rollback enabled",
                    stack
                ));
                request.rollback = true;
            }
        }
    }
}
