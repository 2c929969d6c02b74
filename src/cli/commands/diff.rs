//! cli::commands::diff
//!
//! Compare deployed stacks with the assembly.
//!
//! Exits with status 1 when `--fail` is given and any stack differs.

use std::path::PathBuf;

use anyhow::{anyhow, Result};

use super::{console, runtime, Workspace};
use crate::cli::Context;
use crate::core::params::parse_assignments;
use crate::core::selection::{Extension, StackSelector};
use crate::engine::diff::{DiffEngine, DiffOptions};

/// Arguments of the diff command.
#[derive(Debug, Clone, Default)]
pub struct DiffArgs {
    pub patterns: Vec<String>,
    pub exclusively: bool,
    pub fail: bool,
    pub security_only: bool,
    pub context_lines: usize,
    pub template: Option<PathBuf>,
    pub mappings: Vec<String>,
    pub change_set: bool,
}

/// Run the diff command.
pub fn diff(ctx: &Context, args: DiffArgs) -> Result<i32> {
    let ws = Workspace::load(ctx)?;
    let mappings = parse_assignments(&args.mappings)
        .map_err(|arg| anyhow!("invalid mapping '{}': expected OLD=NEW", arg))?;
    let options = DiffOptions {
        fail: args.fail,
        security_only: args.security_only,
        context_lines: args.context_lines,
        quiet: ctx.quiet,
        template_path: args.template.as_deref().map(|p| ws.path(p)),
        mappings,
        change_set: args.change_set,
    };

    let extension = if args.exclusively {
        Extension::None
    } else {
        Extension::Upstream
    };
    let assembly = ws.assembly()?;
    let selected = StackSelector::patterns(args.patterns)
        .extend(extension)
        .select(&assembly.stacks)?;
    let provisioner = ws.provisioner(ctx)?;
    let sink = console(ctx);

    let engine = DiffEngine::new(&provisioner, &sink);
    let outcome = runtime()?.block_on(engine.diff(&selected, &options))?;
    Ok(outcome.exit_code)
}
