//! cli::commands::list
//!
//! List stacks in the assembly.

use anyhow::Result;

use super::{console, Workspace};
use crate::cli::Context;
use crate::core::selection::StackSelector;
use crate::ui::output::OutputSink;

/// Run the list command.
pub fn list(ctx: &Context, patterns: &[String], long: bool) -> Result<i32> {
    let ws = Workspace::load(ctx)?;
    let assembly = ws.assembly()?;
    let selected = StackSelector::patterns(patterns.iter().cloned()).select(&assembly.stacks)?;
    let sink = console(ctx);

    for stack in selected {
        if !long {
            sink.result(&stack.display_name);
            continue;
        }
        let deps: Vec<&str> = stack.dependencies.iter().map(|d| d.as_str()).collect();
        let deps = if deps.is_empty() {
            "-".to_string()
        } else {
            deps.join(", ")
        };
        sink.result(&format!(
            "{} ({})  depends on: {}",
            stack.display_name, stack.environment, deps
        ));
    }
    Ok(0)
}
