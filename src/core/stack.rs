//! core::stack
//!
//! Stacks, assets and the immutable stack collection.
//!
//! # Invariants
//!
//! - Stack ids are unique within a collection
//! - Every dependency refers to a stack in the same collection
//! - The dependency graph is acyclic
//! - The collection is stored in dependency order: a stack never precedes
//!   one of its dependencies
//!
//! A collection is built once per invocation (from a loaded assembly) and
//! is never mutated afterwards.

use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::graph::StackGraph;
use super::template::Template;
use super::types::{AssetId, Environment, StackId};

/// Errors from building a stack collection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CollectionError {
    #[error("duplicate stack id: {0}")]
    DuplicateStack(StackId),

    #[error("stack {stack} depends on unknown stack {dependency}")]
    UnknownDependency { stack: StackId, dependency: StackId },

    #[error("dependency cycle detected involving stack {0}")]
    Cycle(StackId),
}

/// Kind of build artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetKind {
    /// A file or directory archive
    File,
    /// A container image
    Container,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssetKind::File => write!(f, "file"),
            AssetKind::Container => write!(f, "container"),
        }
    }
}

/// A deployable build artifact referenced by a stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    /// Asset identifier (content hash)
    pub id: AssetId,
    /// Artifact kind
    pub kind: AssetKind,
    /// Source path, relative to the assembly directory
    pub source: PathBuf,
    /// Optional build command (argv), run in the assembly directory
    pub build_command: Option<Vec<String>>,
}

/// A named collection of resource declarations deployed as a unit.
#[derive(Debug, Clone, PartialEq)]
pub struct Stack {
    /// Identifier, unique within the collection
    pub id: StackId,
    /// Physical stack name in the target environment
    pub stack_name: String,
    /// Human-readable name used in messages
    pub display_name: String,
    /// Desired template
    pub template: Template,
    /// Target environment
    pub environment: Environment,
    /// Stacks that must be deployed before this one
    pub dependencies: Vec<StackId>,
    /// Notification targets: `None` means "not managed"
    pub notification_arns: Option<Vec<String>>,
    /// Stack-level tags
    pub tags: BTreeMap<String, String>,
    /// Build artifacts this stack references
    pub assets: Vec<Asset>,
}

impl Stack {
    /// Create a stack with defaults derived from its id.
    pub fn new(id: StackId, environment: Environment, template: Template) -> Self {
        Self {
            stack_name: id.as_str().replace('/', "-"),
            display_name: id.as_str().to_string(),
            id,
            template,
            environment,
            dependencies: Vec::new(),
            notification_arns: None,
            tags: BTreeMap::new(),
            assets: Vec::new(),
        }
    }

    /// Add a dependency (builder style).
    pub fn depends_on(mut self, dependency: StackId) -> Self {
        self.dependencies.push(dependency);
        self
    }

    /// Add an asset (builder style).
    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.assets.push(asset);
        self
    }

    /// Set notification targets (builder style).
    pub fn with_notification_arns(mut self, arns: Vec<String>) -> Self {
        self.notification_arns = Some(arns);
        self
    }

    /// Whether the desired template declares no resources.
    pub fn has_no_resources(&self) -> bool {
        self.template.has_no_resources()
    }
}

/// Ordered, immutable sequence of stacks.
#[derive(Debug, Clone, Default)]
pub struct StackCollection {
    stacks: Vec<Stack>,
    graph: StackGraph,
}

impl StackCollection {
    /// Build a validated collection.
    ///
    /// Stacks are reordered so dependencies come first; otherwise the
    /// given order is kept.
    pub fn new(stacks: Vec<Stack>) -> Result<Self, CollectionError> {
        let mut seen = HashSet::new();
        for stack in &stacks {
            if !seen.insert(stack.id.clone()) {
                return Err(CollectionError::DuplicateStack(stack.id.clone()));
            }
        }

        let mut graph = StackGraph::new();
        for stack in &stacks {
            graph.add_node(stack.id.clone());
        }
        for stack in &stacks {
            for dep in &stack.dependencies {
                if !seen.contains(dep) {
                    return Err(CollectionError::UnknownDependency {
                        stack: stack.id.clone(),
                        dependency: dep.clone(),
                    });
                }
                graph.add_edge(stack.id.clone(), dep.clone());
            }
        }

        if let Some(on_cycle) = graph.find_cycle() {
            return Err(CollectionError::Cycle(on_cycle));
        }

        let order = graph.topological_order();
        let mut by_id: BTreeMap<StackId, Stack> =
            stacks.into_iter().map(|s| (s.id.clone(), s)).collect();
        let stacks = order.iter().filter_map(|id| by_id.remove(id)).collect();

        Ok(Self { stacks, graph })
    }

    /// Number of stacks.
    pub fn len(&self) -> usize {
        self.stacks.len()
    }

    /// Whether the collection is empty.
    pub fn is_empty(&self) -> bool {
        self.stacks.is_empty()
    }

    /// Iterate stacks in dependency order.
    pub fn iter(&self) -> impl Iterator<Item = &Stack> {
        self.stacks.iter()
    }

    /// Look up a stack by id.
    pub fn get(&self, id: &StackId) -> Option<&Stack> {
        self.stacks.iter().find(|s| &s.id == id)
    }

    /// The dependency graph.
    pub fn graph(&self) -> &StackGraph {
        &self.graph
    }

    /// Direct dependencies of a stack, in collection order.
    pub fn dependencies_of(&self, stack: &Stack) -> Vec<&Stack> {
        let deps: HashSet<&StackId> = stack.dependencies.iter().collect();
        self.stacks.iter().filter(|s| deps.contains(&s.id)).collect()
    }

    /// Keep only the given ids, preserving collection order.
    pub fn subset(&self, ids: &HashSet<StackId>) -> Vec<&Stack> {
        self.stacks.iter().filter(|s| ids.contains(&s.id)).collect()
    }
}

impl<'a> IntoIterator for &'a StackCollection {
    type Item = &'a Stack;
    type IntoIter = std::slice::Iter<'a, Stack>;

    fn into_iter(self) -> Self::IntoIter {
        self.stacks.iter()
    }
}
