//! cli::commands::rollback
//!
//! Roll selected stacks back to their last stable state.

use anyhow::Result;

use super::{console, runtime, Workspace};
use crate::cli::Context;
use crate::core::selection::{DefaultSelection, StackSelector};
use crate::engine::rollback::{rollback_stacks, RollbackOptions};

/// Run the rollback command.
pub fn rollback(ctx: &Context, patterns: &[String], all: bool, force: bool, orphan: Vec<String>) -> Result<i32> {
    let ws = Workspace::load(ctx)?;
    let assembly = ws.assembly()?;

    let selector = if all {
        StackSelector::all()
    } else {
        StackSelector::patterns(patterns.iter().cloned()).default_to(DefaultSelection::OnlySingle)
    };
    let selected = selector.select(&assembly.stacks)?;

    let provisioner = ws.provisioner(ctx)?;
    let sink = console(ctx);
    let options = RollbackOptions { force, orphan };
    runtime()?.block_on(rollback_stacks(&provisioner, &sink, &selected, &options))?;
    Ok(0)
}
