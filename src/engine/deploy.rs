//! engine::deploy
//!
//! The deployment orchestrator.
//!
//! # Architecture
//!
//! A deploy runs in three phases:
//!
//! 1. **Validate**: environments and notification targets of every
//!    selected stack are checked before any remote call.
//! 2. **Prepare** (sequential, per stack in dependency order):
//!    - a stack with no resources is destroyed if it exists, otherwise
//!      skipped with a warning
//!    - the approval gate runs against the last-deployed template; a
//!      declined stack is skipped and its dependents still deploy
//!    - parameters, tags and notification targets are resolved into a
//!      deploy request
//! 3. **Execute**: a [`WorkGraph`] of asset builds, publishes and stack
//!    deploys runs under the configured concurrency limits. Each finished
//!    stack is reported back over a channel; the outputs map is owned here
//!    and the outputs file is rewritten after every stack.
//!
//! # Invariants
//!
//! - No remote call happens before validation passed
//! - A stack with no resources is never deployed
//! - The first stack error aborts the run; not-yet-started stacks never run
//! - The last stack error is kept as the run's [`ErrorDescriptor`]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use super::assets::{AssetTaskRunner, StackDeployRecord};
use super::destroy::destroy_stacks;
use super::gate::{self, ApprovalPolicy};
use super::work_graph::{ConcurrencyLimits, GraphOptions, WorkGraph};
use super::{DeployError, ErrorDescriptor};
use crate::core::outputs::{OutputMap, OutputsFile};
use crate::core::params::resolve_parameters;
use crate::core::stack::Stack;
use crate::core::types::{AssetId, TopicArn};
use crate::provision::{AssetPublisher, DeployMethod, DeployStackRequest, Provisioner, StackRef};
use crate::ui::output::OutputSink;

/// Options for a deploy.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// When to ask for approval of security changes
    pub approval: ApprovalPolicy,
    /// Initial rollback mode
    pub rollback: bool,
    /// Skip confirmations and deploy unchanged templates
    pub force: bool,
    /// Maximum concurrent stack deploys
    pub concurrency: usize,
    /// Publish assets in parallel
    pub asset_parallelism: bool,
    /// Build all assets before any stack deploys
    pub asset_prebuild: bool,
    /// Assets that are never built
    pub build_exclude: HashSet<AssetId>,
    /// Build assets
    pub build_assets: bool,
    /// Publish assets
    pub publish_assets: bool,
    /// Parameter overrides keyed by `Stack:Param` or `*:Param`
    pub parameters: BTreeMap<String, String>,
    /// Reuse previous values for parameters not overridden
    pub use_previous_parameters: bool,
    /// Tags replacing stack tags when non-empty
    pub tags: BTreeMap<String, String>,
    /// Notification targets: `None` leaves them unmanaged
    pub notification_arns: Option<Vec<String>>,
    /// File to mirror stack outputs to
    pub outputs_file: Option<PathBuf>,
    /// Changeset name for the changeset deploy method
    pub change_set_name: Option<String>,
    /// How deploys are applied
    pub deploy_method: DeployMethod,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            approval: ApprovalPolicy::Broadening,
            rollback: true,
            force: false,
            concurrency: 1,
            asset_parallelism: true,
            asset_prebuild: true,
            build_exclude: HashSet::new(),
            build_assets: true,
            publish_assets: true,
            parameters: BTreeMap::new(),
            use_previous_parameters: true,
            tags: BTreeMap::new(),
            notification_arns: None,
            outputs_file: None,
            change_set_name: None,
            deploy_method: DeployMethod::Direct,
        }
    }
}

/// Why a selected stack was not deployed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No resources and not deployed
    NoResources,
    /// No resources; the existing stack was destroyed
    Destroyed,
    /// The user declined
    Declined,
}

/// Per-stack deploy summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackReport {
    pub stack_name: String,
    pub display_name: String,
    pub stack_arn: String,
    pub outputs: BTreeMap<String, String>,
    pub no_op: bool,
    pub iterations: u32,
    pub duration: Duration,
}

impl From<StackDeployRecord> for StackReport {
    fn from(record: StackDeployRecord) -> Self {
        Self {
            stack_name: record.stack_name,
            display_name: record.display_name,
            stack_arn: record.stack_arn,
            outputs: record.outputs,
            no_op: record.no_op,
            iterations: record.iterations,
            duration: record.duration,
        }
    }
}

/// Result of a deploy.
#[derive(Debug, Clone, Default)]
pub struct DeployReport {
    /// Deployed stacks, in completion order
    pub deployed: Vec<StackReport>,
    /// Skipped stacks by display name
    pub skipped: Vec<(String, SkipReason)>,
    /// All outputs, by stack name
    pub outputs: OutputMap,
}

impl DeployReport {
    /// Report for a deployed stack, by display name.
    pub fn stack(&self, display_name: &str) -> Option<&StackReport> {
        self.deployed.iter().find(|s| s.display_name == display_name)
    }

    /// Whether a stack was skipped for `reason`.
    pub fn was_skipped(&self, display_name: &str, reason: SkipReason) -> bool {
        self.skipped
            .iter()
            .any(|(name, r)| name == display_name && *r == reason)
    }
}

/// Merge notification targets from options and stack.
///
/// `None` from both means "not managed". Otherwise the option targets come
/// first, followed by the stack's own.
pub fn merge_notification_arns(
    options: Option<&[String]>,
    stack: Option<&[String]>,
) -> Option<Vec<String>> {
    if options.is_none() && stack.is_none() {
        return None;
    }
    let mut merged: Vec<String> = options.unwrap_or_default().to_vec();
    for arn in stack.unwrap_or_default() {
        if !merged.contains(arn) {
            merged.push(arn.clone());
        }
    }
    Some(merged)
}

/// The deployment orchestrator.
///
/// Collaborators are injected; the orchestrator holds no global state.
pub struct Deployer<'a> {
    provisioner: &'a dyn Provisioner,
    publisher: &'a dyn AssetPublisher,
    sink: &'a dyn OutputSink,
    last_error: Mutex<Option<ErrorDescriptor>>,
}

impl<'a> Deployer<'a> {
    pub fn new(
        provisioner: &'a dyn Provisioner,
        publisher: &'a dyn AssetPublisher,
        sink: &'a dyn OutputSink,
    ) -> Self {
        Self {
            provisioner,
            publisher,
            sink,
            last_error: Mutex::new(None),
        }
    }

    /// The error descriptor of the last failed stack, if any.
    pub fn last_error(&self) -> Option<ErrorDescriptor> {
        self.last_error
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Deploy `stacks` (in dependency order).
    ///
    /// # Errors
    ///
    /// - `DeployError::Validation` for bad environments or notification
    ///   targets, before any remote call
    /// - `DeployError::StackFailed` when a stack fails; the run stops
    pub async fn deploy(
        &self,
        stacks: &[&Stack],
        options: &DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        let result = self.run(stacks, options).await;
        if let Err(DeployError::StackFailed(descriptor)) = &result {
            let mut guard = self.last_error.lock().unwrap_or_else(|e| e.into_inner());
            *guard = Some(descriptor.clone());
        }
        result
    }

    async fn run(
        &self,
        stacks: &[&Stack],
        options: &DeployOptions,
    ) -> Result<DeployReport, DeployError> {
        let notification_arns = validate(stacks, options)?;

        let mut report = DeployReport::default();
        let mut requests = HashMap::new();
        let mut removed = Vec::new();

        for stack in stacks {
            match self.prepare(stack, options, &notification_arns).await? {
                Prepared::Deploy(request) => {
                    requests.insert(stack.id.clone(), *request);
                }
                Prepared::Skip(reason) => {
                    report.skipped.push((stack.display_name.clone(), reason));
                    removed.push(stack.id.clone());
                }
            }
        }

        let graph_options = GraphOptions {
            prebuild_assets: options.asset_prebuild,
            build_exclude: options.build_exclude.clone(),
            build_assets: options.build_assets,
            publish_assets: options.publish_assets,
        };
        let mut graph = WorkGraph::build(stacks, &graph_options);
        for id in &removed {
            graph.remove_stack(id);
        }

        let publisher = self.publisher;
        graph
            .remove_unnecessary_assets(|node| async move {
                publisher
                    .is_published(&node.asset, &node.environment)
                    .await
                    .map_err(|source| DeployError::Asset {
                        asset: node.asset.id.to_string(),
                        source,
                    })
            })
            .await?;
        debug!(nodes = graph.len(), "work graph ready");

        let (tx, mut rx) = mpsc::unbounded_channel::<StackDeployRecord>();
        let runner = AssetTaskRunner::new(
            self.provisioner,
            self.publisher,
            self.sink,
            requests,
            options.force,
            tx,
        );
        let limits = ConcurrencyLimits::new(options.concurrency, options.asset_parallelism);

        let mut outputs = OutputsFile::new(options.outputs_file.clone());
        let deployed = &mut report.deployed;
        let graph = &mut graph;

        let execute = async move {
            let result = graph.do_parallel(limits, &runner).await;
            drop(runner);
            result
        };
        let collect = async {
            let mut flushed = Ok(());
            while let Some(record) = rx.recv().await {
                outputs.record(&record.stack_name, record.outputs.clone());
                if flushed.is_ok() {
                    flushed = outputs.flush();
                }
                deployed.push(StackReport::from(record));
            }
            flushed
        };

        let (executed, collected) = tokio::join!(execute, collect);
        executed?;
        collected?;

        if let Some(path) = outputs.path() {
            info!(path = %path.display(), "outputs written");
        }
        report.outputs = outputs.into_outputs();
        Ok(report)
    }

    /// Decide what happens to one stack before scheduling.
    async fn prepare(
        &self,
        stack: &Stack,
        options: &DeployOptions,
        notification_arns: &HashMap<String, Option<Vec<String>>>,
    ) -> Result<Prepared, DeployError> {
        let name = &stack.display_name;
        let stack_ref = StackRef::for_stack(stack);

        if stack.has_no_resources() {
            let exists = self
                .provisioner
                .stack_exists(&stack_ref)
                .await
                .map_err(|e| DeployError::from(e).for_stack(name))?;
            if !exists {
                self.sink.warn(&format!(
                    "{}: stack has no resources, skipping deployment.",
                    name
                ));
                return Ok(Prepared::Skip(SkipReason::NoResources));
            }

            self.sink.info(&format!(
                "{}: stack has no resources, deleting existing stack.",
                name
            ));
            return match destroy_stacks(self.provisioner, self.sink, &[stack], options.force).await {
                Ok(_) => Ok(Prepared::Skip(SkipReason::Destroyed)),
                Err(e) if e.is_user_cancelled() => Ok(Prepared::Skip(SkipReason::Declined)),
                Err(e) => Err(e),
            };
        }

        if options.approval != ApprovalPolicy::Never {
            let current = self
                .provisioner
                .read_current_template(&stack_ref)
                .await
                .map_err(|e| DeployError::from(e).for_stack(name))?;
            let security = gate::compute_gate(&current, &stack.template, None);
            match gate::approve(self.sink, name, options.approval, &security) {
                Ok(()) => {}
                Err(e) if e.is_user_cancelled() => {
                    self.sink
                        .warn(&format!("{}: deployment aborted by user", name));
                    return Ok(Prepared::Skip(SkipReason::Declined));
                }
                Err(e) => return Err(e),
            }
        }

        let tags = if options.tags.is_empty() {
            stack.tags.clone()
        } else {
            options.tags.clone()
        };

        Ok(Prepared::Deploy(Box::new(DeployStackRequest {
            stack: stack_ref,
            template: stack.template.clone(),
            parameters: resolve_parameters(&options.parameters, &stack.stack_name),
            use_previous_parameters: options.use_previous_parameters,
            tags,
            notification_arns: notification_arns.get(&stack.stack_name).cloned().flatten(),
            rollback: options.rollback,
            method: options.deploy_method,
            change_set_name: options.change_set_name.clone(),
            force: options.force,
        })))
    }
}

enum Prepared {
    Deploy(Box<DeployStackRequest>),
    Skip(SkipReason),
}

/// Check every stack before any remote call; returns merged notification
/// targets by stack name.
fn validate(
    stacks: &[&Stack],
    options: &DeployOptions,
) -> Result<HashMap<String, Option<Vec<String>>>, DeployError> {
    let mut merged = HashMap::new();
    for stack in stacks {
        stack.environment.validate().map_err(|e| {
            DeployError::Validation(format!("{}: {}", stack.display_name, e))
        })?;

        let arns = merge_notification_arns(
            options.notification_arns.as_deref(),
            stack.notification_arns.as_deref(),
        );
        for arn in arns.iter().flatten() {
            TopicArn::new(arn.as_str()).map_err(|e| DeployError::Validation(e.to_string()))?;
        }
        merged.insert(stack.stack_name.clone(), arns);
    }
    Ok(merged)
}
