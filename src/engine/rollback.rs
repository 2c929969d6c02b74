//! engine::rollback
//!
//! Roll stacks back to their last stable state.
//!
//! Stacks are rolled back one at a time in the given order. A stack that
//! is not in a rollbackable state is reported and skipped; the operation
//! only fails on that account when no stack at all could be rolled back.

use std::time::Instant;

use tracing::debug;

use super::DeployError;
use crate::core::stack::Stack;
use crate::provision::{Provisioner, RollbackRequest, StackRef};
use crate::ui::output::{format_duration, OutputSink};

/// Options for a rollback.
#[derive(Debug, Clone, Default)]
pub struct RollbackOptions {
    /// Orphan resources that fail to roll back
    pub force: bool,
    /// Logical ids to orphan explicitly
    pub orphan: Vec<String>,
}

/// Roll back `stacks`. Returns the display names of stacks rolled back.
///
/// # Errors
///
/// - `DeployError::StackFailed` for the first failing stack
/// - `DeployError::NoRollbackableStacks` if every stack was skipped
pub async fn rollback_stacks(
    provisioner: &dyn Provisioner,
    sink: &dyn OutputSink,
    stacks: &[&Stack],
    options: &RollbackOptions,
) -> Result<Vec<String>, DeployError> {
    let mut rolled_back = Vec::new();

    for stack in stacks {
        let name = &stack.display_name;
        sink.info(&format!("{}: rolling back...", name));
        let started = Instant::now();

        let result = provisioner
            .rollback_stack(&RollbackRequest {
                stack: StackRef::for_stack(stack),
                force: options.force,
                orphan_logical_ids: options.orphan.clone(),
            })
            .await
            .map_err(|e| {
                sink.error(&format!("{}: rollback failed {}", name, e));
                DeployError::from(e).for_stack(name)
            })?;

        if result.not_in_rollbackable_state {
            debug!(stack = %stack.id, "not rollbackable");
            sink.info(&format!("{}: stack is not in a rollbackable state", name));
            continue;
        }

        sink.info(&format!(
            "{}: rollback time: {}",
            name,
            format_duration(started.elapsed())
        ));
        rolled_back.push(name.clone());
    }

    if !stacks.is_empty() && rolled_back.is_empty() {
        return Err(DeployError::NoRollbackableStacks);
    }
    Ok(rolled_back)
}
