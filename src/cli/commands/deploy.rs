//! cli::commands::deploy
//!
//! Deploy selected stacks.
//!
//! # Example
//!
//! ```bash
//! # Deploy everything, asking before broadening permissions
//! sp deploy
//!
//! # Deploy one stack only, no approval, outputs to a file
//! sp deploy App --exclusively --require-approval never -O outputs.json
//! ```

use anyhow::{anyhow, Result};

use super::{console, runtime, Workspace};
use crate::cli::args::DeployArgs;
use crate::cli::Context;
use crate::core::params::parse_assignments;
use crate::core::selection::{Extension, StackSelector};
use crate::core::types::AssetId;
use crate::engine::deploy::SkipReason;
use crate::engine::{ApprovalPolicy, DeployOptions, Deployer};
use crate::ui::output::OutputSink;

/// Run the deploy command.
pub fn deploy(ctx: &Context, args: &DeployArgs, require_approval: Option<ApprovalPolicy>) -> Result<i32> {
    let ws = Workspace::load(ctx)?;
    let options = options(&ws, args, require_approval)?;
    let assembly = ws.assembly()?;
    let selected = selector(args).select(&assembly.stacks)?;
    let provisioner = ws.provisioner(ctx)?;
    let sink = console(ctx);

    let deployer = Deployer::new(&provisioner, &provisioner, &sink);
    let report = runtime()?.block_on(deployer.deploy(&selected, &options))?;

    for (name, reason) in &report.skipped {
        if *reason == SkipReason::Declined {
            sink.warn(&format!("{}: skipped (declined)", name));
        }
    }
    sink.info(&format!(
        "Deployed {} stack(s), skipped {}",
        report.deployed.len(),
        report.skipped.len()
    ));
    Ok(0)
}

/// Stack selection for deploy and watch.
pub(super) fn selector(args: &DeployArgs) -> StackSelector {
    let extension = if args.exclusively {
        Extension::None
    } else {
        Extension::Upstream
    };
    StackSelector::patterns(args.patterns.iter().cloned()).extend(extension)
}

/// Deploy options from flags, falling back to config.
pub(super) fn options(
    ws: &Workspace,
    args: &DeployArgs,
    require_approval: Option<ApprovalPolicy>,
) -> Result<DeployOptions> {
    let config = &ws.config;

    let parameters = parse_assignments(&args.parameters)
        .map_err(|arg| anyhow!("invalid parameter '{}': expected KEY=VALUE", arg))?;
    let tags = if args.tags.is_empty() {
        config.tags()
    } else {
        parse_assignments(&args.tags).map_err(|arg| anyhow!("invalid tag '{}': expected KEY=VALUE", arg))?
    };
    let notification_arns = if args.notification_arns.is_empty() {
        config.notification_arns().map(<[String]>::to_vec)
    } else {
        Some(args.notification_arns.clone())
    };
    let build_exclude = args
        .build_exclude
        .iter()
        .map(|id| AssetId::new(id.as_str()))
        .collect::<Result<_, _>>()?;
    let outputs_file = args
        .outputs_file
        .as_deref()
        .or_else(|| config.outputs_file())
        .map(|path| ws.path(path));

    Ok(DeployOptions {
        approval: require_approval.unwrap_or_else(|| config.require_approval()),
        rollback: config.rollback() && !args.no_rollback,
        force: args.force,
        concurrency: args.concurrency.unwrap_or_else(|| config.concurrency()),
        asset_parallelism: config.asset_parallelism() && !args.no_asset_parallelism,
        asset_prebuild: config.asset_prebuild() && !args.no_asset_prebuild,
        build_exclude,
        build_assets: true,
        publish_assets: true,
        parameters,
        use_previous_parameters: !args.no_previous_parameters,
        tags,
        notification_arns,
        outputs_file,
        change_set_name: args.change_set_name.clone(),
        deploy_method: args.method.map(Into::into).unwrap_or_default(),
    })
}
