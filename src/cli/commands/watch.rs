//! cli::commands::watch
//!
//! Deploy once, then redeploy whenever project files change.
//!
//! Approval prompts are disabled in watch mode. Deploy errors are printed
//! and the command keeps watching until Ctrl-C.

use anyhow::Result;

use super::deploy::{options, selector};
use super::{console, runtime, Workspace};
use crate::cli::args::DeployArgs;
use crate::cli::Context;
use crate::engine::watch::{spawn_watcher, AssemblyRedeployer, WatchFilter, WatchLoop};
use crate::ui::output::OutputSink;

/// Run the watch command.
pub fn watch(ctx: &Context, args: &DeployArgs, include: &[String], exclude: &[String]) -> Result<i32> {
    let ws = Workspace::load(ctx)?;
    let options = options(&ws, args, None)?;
    let provisioner = ws.provisioner(ctx)?;
    let sink = console(ctx);

    let include = if include.is_empty() {
        ws.config.watch_include()
    } else {
        include.to_vec()
    };
    let mut excluded = ws.config.watch_exclude();
    excluded.extend(exclude.iter().cloned());
    let filter = WatchFilter::new(&ws.root, &include, &excluded)?;

    let redeployer = AssemblyRedeployer::new(
        ws.assembly_dir.clone(),
        selector(args),
        &provisioner,
        &provisioner,
        &sink,
        options,
    );

    let rt = runtime()?;
    let summary = rt.block_on(async {
        let (_watcher, events) = spawn_watcher(&ws.root)?;
        sink.info(&format!("Watching '{}' for changes", ws.root.display()));
        let summary = WatchLoop::new(&redeployer, &sink, filter)
            .run(events, async {
                let _ = tokio::signal::ctrl_c().await;
            })
            .await;
        Ok::<_, anyhow::Error>(summary)
    })?;

    sink.info(&format!(
        "Watch ended after {} deploy(s), {} failed",
        summary.deploys, summary.failures
    ));
    Ok(0)
}
