//! engine::work_graph
//!
//! Dependency graph of stack deploys and asset builds/publishes, and a
//! scheduler that runs it under per-class concurrency limits.
//!
//! # Architecture
//!
//! Three node classes, each with its own limit:
//!
//! | Class | Default limit |
//! |-------|---------------|
//! | stack deploy | user configured (1) |
//! | asset build | 1 |
//! | asset publish | 8 when parallel, else 1 |
//!
//! Edges: an asset builds before it publishes; a stack deploys after all
//! its assets are published and all its dependency stacks are deployed.
//!
//! Scheduling is cooperative: one task polls a set of in-flight futures and
//! starts every ready node whose class has a free slot. Side effects live
//! entirely in the [`WorkActions`] callbacks.
//!
//! # Invariants
//!
//! - A node starts only after all of its dependencies completed
//! - After the first failure no new node starts; running nodes finish and
//!   the first error is returned
//! - Nodes left unstarted without a failure mean the graph was unsatisfiable

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use thiserror::Error;
use tracing::debug;

use super::DeployError;
use crate::core::stack::{Asset, Stack};
use crate::core::types::{AssetId, Environment, StackId};

/// Errors from the work graph itself.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WorkGraphError {
    #[error("unable to make progress, remaining nodes: {}", .0.join(", "))]
    Unsatisfiable(Vec<String>),

    #[error("concurrency limit for {0} must be at least 1")]
    ZeroLimit(&'static str),
}

/// Node class, each with its own concurrency limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeClass {
    StackDeploy,
    AssetBuild,
    AssetPublish,
}

impl NodeClass {
    fn name(self) -> &'static str {
        match self {
            NodeClass::StackDeploy => "stack-deploy",
            NodeClass::AssetBuild => "asset-build",
            NodeClass::AssetPublish => "asset-publish",
        }
    }
}

/// Concurrency limits by class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencyLimits {
    pub stack_deploy: usize,
    pub asset_build: usize,
    pub asset_publish: usize,
}

impl ConcurrencyLimits {
    /// Limits for a deploy: builds are serial, publishes 8-wide when parallel.
    pub fn new(stack_concurrency: usize, asset_parallelism: bool) -> Self {
        Self {
            stack_deploy: stack_concurrency,
            asset_build: 1,
            asset_publish: if asset_parallelism { 8 } else { 1 },
        }
    }

    fn limit(&self, class: NodeClass) -> usize {
        match class {
            NodeClass::StackDeploy => self.stack_deploy,
            NodeClass::AssetBuild => self.asset_build,
            NodeClass::AssetPublish => self.asset_publish,
        }
    }

    fn validate(&self) -> Result<(), WorkGraphError> {
        for class in [NodeClass::StackDeploy, NodeClass::AssetBuild, NodeClass::AssetPublish] {
            if self.limit(class) == 0 {
                return Err(WorkGraphError::ZeroLimit(class.name()));
            }
        }
        Ok(())
    }
}

impl Default for ConcurrencyLimits {
    fn default() -> Self {
        Self::new(1, true)
    }
}

/// An asset build or publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetNode {
    /// The asset
    pub asset: Asset,
    /// Stack that first referenced the asset (lookup only)
    pub parent_stack: StackId,
    /// Environment the asset is published to
    pub environment: Environment,
}

/// A unit of work.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkNode {
    Stack(Stack),
    AssetBuild(AssetNode),
    AssetPublish(AssetNode),
}

impl WorkNode {
    /// The node's concurrency class.
    pub fn class(&self) -> NodeClass {
        match self {
            WorkNode::Stack(_) => NodeClass::StackDeploy,
            WorkNode::AssetBuild(_) => NodeClass::AssetBuild,
            WorkNode::AssetPublish(_) => NodeClass::AssetPublish,
        }
    }
}

/// Callbacks invoked by [`WorkGraph::do_parallel`].
#[async_trait]
pub trait WorkActions: Send + Sync {
    async fn deploy_stack(&self, stack: &Stack) -> Result<(), DeployError>;
    async fn build_asset(&self, node: &AssetNode) -> Result<(), DeployError>;
    async fn publish_asset(&self, node: &AssetNode) -> Result<(), DeployError>;
}

/// Options for building the graph.
#[derive(Debug, Clone, Default)]
pub struct GraphOptions {
    /// Build all assets up front (builds do not wait for upstream stacks)
    pub prebuild_assets: bool,
    /// Assets that are never built (still published)
    pub build_exclude: HashSet<AssetId>,
    /// Create build nodes
    pub build_assets: bool,
    /// Create publish nodes
    pub publish_assets: bool,
}

impl GraphOptions {
    /// Build and publish everything, prebuilding assets.
    pub fn all() -> Self {
        Self {
            prebuild_assets: true,
            build_exclude: HashSet::new(),
            build_assets: true,
            publish_assets: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum NodeState {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
struct Entry {
    node: WorkNode,
    dependencies: BTreeSet<String>,
    state: NodeState,
}

/// The work graph.
#[derive(Debug, Clone, Default)]
pub struct WorkGraph {
    nodes: BTreeMap<String, Entry>,
    /// Insertion order, used to start ready nodes deterministically
    order: Vec<String>,
}

fn stack_key(id: &StackId) -> String {
    format!("stack:{}", id)
}

fn build_key(asset: &AssetId) -> String {
    format!("build:{}", asset)
}

fn publish_key(asset: &AssetId, environment: &Environment) -> String {
    format!("publish:{}@{}", asset, environment)
}

impl WorkGraph {
    /// Build the graph for `stacks` (in deployment order).
    ///
    /// Dependencies on stacks outside `stacks` are dropped. An asset shared
    /// by several stacks is built once and published once per environment.
    pub fn build(stacks: &[&Stack], options: &GraphOptions) -> Self {
        let mut graph = WorkGraph::default();
        let selected: HashSet<&StackId> = stacks.iter().map(|s| &s.id).collect();

        for stack in stacks {
            let upstream: BTreeSet<String> = stack
                .dependencies
                .iter()
                .filter(|d| selected.contains(d))
                .map(stack_key)
                .collect();

            let mut deps = upstream.clone();
            for asset in &stack.assets {
                let build = build_key(&asset.id);
                let builds =
                    options.build_assets && !options.build_exclude.contains(&asset.id);

                if builds {
                    let build_deps = if options.prebuild_assets {
                        BTreeSet::new()
                    } else {
                        upstream.clone()
                    };
                    match graph.nodes.get_mut(&build) {
                        Some(entry) => entry.dependencies.extend(build_deps),
                        None => graph.insert(
                            build.clone(),
                            WorkNode::AssetBuild(AssetNode {
                                asset: asset.clone(),
                                parent_stack: stack.id.clone(),
                                environment: stack.environment.clone(),
                            }),
                            build_deps,
                        ),
                    }
                }

                if options.publish_assets {
                    let publish = publish_key(&asset.id, &stack.environment);
                    if !graph.nodes.contains_key(&publish) {
                        let publish_deps = if builds {
                            BTreeSet::from([build.clone()])
                        } else {
                            BTreeSet::new()
                        };
                        graph.insert(
                            publish.clone(),
                            WorkNode::AssetPublish(AssetNode {
                                asset: asset.clone(),
                                parent_stack: stack.id.clone(),
                                environment: stack.environment.clone(),
                            }),
                            publish_deps,
                        );
                    }
                    deps.insert(publish);
                } else if builds {
                    deps.insert(build);
                }
            }

            graph.insert(stack_key(&stack.id), WorkNode::Stack((*stack).clone()), deps);
        }

        graph
    }

    fn insert(&mut self, key: String, node: WorkNode, dependencies: BTreeSet<String>) {
        self.order.push(key.clone());
        self.nodes.insert(
            key,
            Entry {
                node,
                dependencies,
                state: NodeState::Pending,
            },
        );
    }

    fn remove(&mut self, key: &str) {
        self.nodes.remove(key);
        self.order.retain(|k| k != key);
        for entry in self.nodes.values_mut() {
            entry.dependencies.remove(key);
        }
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Node keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    /// Dependencies of a node, by key.
    pub fn dependencies_of(&self, key: &str) -> Option<&BTreeSet<String>> {
        self.nodes.get(key).map(|e| &e.dependencies)
    }

    /// Remove a stack's deploy node.
    ///
    /// Stacks depending on it no longer wait for it, and assets only it
    /// needed are dropped.
    pub fn remove_stack(&mut self, id: &StackId) {
        self.remove(&stack_key(id));
        self.prune_orphan_assets();
    }

    /// Drop asset nodes nothing depends on anymore.
    fn prune_orphan_assets(&mut self) {
        loop {
            let needed: HashSet<&String> = self
                .nodes
                .values()
                .flat_map(|e| e.dependencies.iter())
                .collect();
            let orphans: Vec<String> = self
                .nodes
                .iter()
                .filter(|(key, e)| !matches!(e.node, WorkNode::Stack(_)) && !needed.contains(key))
                .map(|(key, _)| key.clone())
                .collect();
            if orphans.is_empty() {
                break;
            }
            for key in orphans {
                self.remove(&key);
            }
        }
    }

    /// Remove publish nodes for assets that `is_published` reports as
    /// already present, then builds nothing needs anymore.
    pub async fn remove_unnecessary_assets<F, Fut>(&mut self, is_published: F) -> Result<(), DeployError>
    where
        F: Fn(AssetNode) -> Fut,
        Fut: Future<Output = Result<bool, DeployError>>,
    {
        let publishes: Vec<(String, AssetNode)> = self
            .order
            .iter()
            .filter_map(|key| match &self.nodes[key].node {
                WorkNode::AssetPublish(node) => Some((key.clone(), node.clone())),
                _ => None,
            })
            .collect();

        for (key, node) in publishes {
            if is_published(node).await? {
                debug!(node = %key, "asset already published");
                self.remove(&key);
            }
        }
        self.prune_orphan_assets();
        Ok(())
    }

    /// Keys of pending nodes whose dependencies all completed.
    fn ready(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|key| {
                let entry = &self.nodes[*key];
                entry.state == NodeState::Pending
                    && entry
                        .dependencies
                        .iter()
                        .all(|d| self.nodes.get(d).map(|e| e.state) == Some(NodeState::Completed))
            })
            .cloned()
            .collect()
    }

    /// Execute the graph.
    ///
    /// # Errors
    ///
    /// Returns the first callback error (after running nodes finished), or
    /// `WorkGraphError::Unsatisfiable` if nodes could never start.
    pub async fn do_parallel<A: WorkActions>(
        &mut self,
        limits: ConcurrencyLimits,
        actions: &A,
    ) -> Result<(), DeployError> {
        limits.validate()?;

        let mut running: FuturesUnordered<BoxFuture<'_, (String, Result<(), DeployError>)>> =
            FuturesUnordered::new();
        let mut in_flight: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut first_error: Option<DeployError> = None;

        loop {
            if first_error.is_none() {
                for key in self.ready() {
                    let class = self.nodes[&key].node.class();
                    let slots = in_flight.entry(class.name()).or_insert(0);
                    if *slots >= limits.limit(class) {
                        continue;
                    }
                    *slots += 1;

                    let entry = self.nodes.get_mut(&key).map(|e| {
                        e.state = NodeState::Running;
                        e.node.clone()
                    });
                    let Some(node) = entry else { continue };
                    debug!(node = %key, class = class.name(), "starting");

                    running.push(Box::pin(async move {
                        let result = match &node {
                            WorkNode::Stack(stack) => actions.deploy_stack(stack).await,
                            WorkNode::AssetBuild(asset) => actions.build_asset(asset).await,
                            WorkNode::AssetPublish(asset) => actions.publish_asset(asset).await,
                        };
                        (key, result)
                    }));
                }
            }

            let Some((key, result)) = running.next().await else {
                break;
            };

            if let Some(entry) = self.nodes.get_mut(&key) {
                if let Some(slots) = in_flight.get_mut(entry.node.class().name()) {
                    *slots -= 1;
                }
                match result {
                    Ok(()) => {
                        debug!(node = %key, "completed");
                        entry.state = NodeState::Completed;
                    }
                    Err(e) => {
                        debug!(node = %key, error = %e, "failed");
                        entry.state = NodeState::Failed;
                        first_error.get_or_insert(e);
                    }
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }

        let remaining: Vec<String> = self
            .order
            .iter()
            .filter(|k| self.nodes[*k].state == NodeState::Pending)
            .cloned()
            .collect();
        if !remaining.is_empty() {
            return Err(WorkGraphError::Unsatisfiable(remaining).into());
        }
        Ok(())
    }
}
