//! cli::commands::destroy
//!
//! Destroy selected stacks, dependents first.

use anyhow::Result;

use super::{console, runtime, Workspace};
use crate::cli::Context;
use crate::core::selection::{DefaultSelection, Extension, StackSelector};
use crate::engine::destroy::destroy_stacks;

/// Run the destroy command.
pub fn destroy(ctx: &Context, patterns: &[String], all: bool, exclusively: bool, force: bool) -> Result<i32> {
    let ws = Workspace::load(ctx)?;
    let assembly = ws.assembly()?;

    let extension = if exclusively {
        Extension::None
    } else {
        Extension::Downstream
    };
    let selector = if all {
        StackSelector::all()
    } else {
        StackSelector::patterns(patterns.iter().cloned()).default_to(DefaultSelection::OnlySingle)
    };
    let selected = selector.extend(extension).select(&assembly.stacks)?;

    let provisioner = ws.provisioner(ctx)?;
    let sink = console(ctx);
    runtime()?.block_on(destroy_stacks(&provisioner, &sink, &selected, force))?;
    Ok(0)
}
