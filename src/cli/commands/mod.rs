//! cli::commands
//!
//! Command dispatch and handlers.
//!
//! # Architecture
//!
//! Each command handler:
//! 1. Resolves configuration and loads the assembly
//! 2. Selects stacks and calls the engine
//! 3. Returns the process exit status
//!
//! # Async Commands
//!
//! Engine operations are async because they talk to the provisioning
//! service. Handlers stay synchronous and drive them with a tokio runtime.

mod deploy;
mod destroy;
mod diff;
mod list;
mod rollback;
mod watch;

pub use deploy::deploy;
pub use destroy::destroy;
pub use diff::diff;
pub use list::list;
pub use rollback::rollback;
pub use watch::watch;

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context as _, Result};
use tracing::debug;

use super::args::Command;
use super::Context;
use crate::core::assembly::Assembly;
use crate::core::config::Config;
use crate::provision::http::HttpProvisioner;
use crate::ui::output::{ConsoleSink, Verbosity};

/// Dispatch a command to its handler.
pub fn dispatch(command: Command, ctx: &Context) -> Result<i32> {
    match command {
        Command::Deploy {
            args,
            require_approval,
        } => deploy::deploy(ctx, &args, require_approval),
        Command::Diff {
            patterns,
            exclusively,
            fail,
            security_only,
            context_lines,
            template,
            mappings,
            no_change_set,
        } => diff::diff(
            ctx,
            diff::DiffArgs {
                patterns,
                exclusively,
                fail,
                security_only,
                context_lines,
                template,
                mappings,
                change_set: !no_change_set,
            },
        ),
        Command::Destroy {
            patterns,
            all,
            exclusively,
            force,
        } => destroy::destroy(ctx, &patterns, all, exclusively, force),
        Command::Rollback {
            patterns,
            all,
            force,
            orphan,
        } => rollback::rollback(ctx, &patterns, all, force, orphan),
        Command::Watch {
            args,
            include,
            exclude,
        } => watch::watch(ctx, &args, &include, &exclude),
        Command::List { patterns, long } => list::list(ctx, &patterns, long),
    }
}

/// Project directory, configuration and assembly location for a command.
pub(crate) struct Workspace {
    /// Project root (working directory)
    pub root: PathBuf,
    /// Merged configuration
    pub config: Config,
    /// Resolved assembly directory
    pub assembly_dir: PathBuf,
}

impl Workspace {
    /// Resolve the workspace for `ctx`.
    pub fn load(ctx: &Context) -> Result<Self> {
        let root = match &ctx.cwd {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().context("cannot determine working directory")?,
        };
        let loaded = Config::load(Some(&root))?;
        debug!(sources = ?loaded.sources, "config loaded");

        let config = loaded.config;
        let assembly_dir = resolve(&root, &ctx.assembly.clone().unwrap_or_else(|| config.assembly()));
        Ok(Self {
            root,
            config,
            assembly_dir,
        })
    }

    /// Load the assembly from disk.
    pub fn assembly(&self) -> Result<Assembly> {
        Assembly::load(&self.assembly_dir).map_err(anyhow::Error::from)
    }

    /// HTTP provisioner for the configured endpoint.
    pub fn provisioner(&self, ctx: &Context) -> Result<HttpProvisioner> {
        let endpoint = ctx
            .endpoint
            .as_deref()
            .or_else(|| self.config.endpoint())
            .ok_or_else(|| {
                anyhow!("no provisioning endpoint configured (use --endpoint or set `endpoint` in stackpilot.toml)")
            })?;
        Ok(HttpProvisioner::from_env(endpoint, self.assembly_dir.clone()))
    }

    /// A path from config or flags, relative to the project root.
    pub fn path(&self, path: &Path) -> PathBuf {
        resolve(&self.root, path)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}

/// Console sink for `ctx`.
pub(crate) fn console(ctx: &Context) -> ConsoleSink {
    ConsoleSink::new(Verbosity::from_flags(ctx.quiet, ctx.debug), ctx.interactive)
}

/// Runtime for driving async engine operations.
pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().context("failed to start async runtime")
}
