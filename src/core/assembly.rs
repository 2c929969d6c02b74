//! core::assembly
//!
//! Loading an already-synthesized assembly directory.
//!
//! # Layout
//!
//! ```text
//! stack.out/
//!   manifest.json
//!   Network.template.json
//!   App.template.json
//!   asset.1a2b3c/            (asset sources, paths relative to the directory)
//! ```
//!
//! The manifest lists stacks in any order; loading validates ids,
//! environments, dependency edges and templates and produces a
//! [`StackCollection`] in dependency order.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::stack::{Asset, AssetKind, CollectionError, Stack, StackCollection};
use super::template::Template;
use super::types::{AssetId, Environment, StackId, TypeError};

/// Name of the manifest file inside an assembly directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Supported manifest schema version.
pub const MANIFEST_VERSION: u32 = 1;

/// Errors from loading an assembly.
#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("failed to read '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse '{path}': {message}")]
    Parse { path: PathBuf, message: String },

    #[error("unsupported manifest version {found} (expected {expected})")]
    UnsupportedVersion { found: u32, expected: u32 },

    #[error("stack {stack}: {source}")]
    InvalidStack { stack: String, source: TypeError },

    #[error(transparent)]
    Collection(#[from] CollectionError),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ManifestFile {
    version: u32,
    #[serde(default)]
    stacks: Vec<ManifestStack>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ManifestStack {
    id: String,
    stack_name: Option<String>,
    display_name: Option<String>,
    template_file: PathBuf,
    environment: Option<ManifestEnvironment>,
    #[serde(default)]
    dependencies: Vec<String>,
    notification_arns: Option<Vec<String>>,
    #[serde(default)]
    tags: BTreeMap<String, String>,
    #[serde(default)]
    assets: Vec<ManifestAsset>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ManifestEnvironment {
    #[serde(default)]
    account: String,
    #[serde(default)]
    region: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct ManifestAsset {
    id: String,
    kind: AssetKind,
    source: PathBuf,
    build_command: Option<Vec<String>>,
}

/// A loaded assembly.
#[derive(Debug, Clone)]
pub struct Assembly {
    /// Assembly directory
    pub directory: PathBuf,
    /// Stacks in dependency order
    pub stacks: StackCollection,
}

impl Assembly {
    /// Load an assembly from a directory.
    ///
    /// # Errors
    ///
    /// Fails if the manifest or any template cannot be read or parsed, or
    /// if the stacks do not form a valid collection.
    pub fn load(directory: &Path) -> Result<Self, AssemblyError> {
        let manifest_path = directory.join(MANIFEST_FILE);
        let manifest: ManifestFile = read_json(&manifest_path)?;

        if manifest.version != MANIFEST_VERSION {
            return Err(AssemblyError::UnsupportedVersion {
                found: manifest.version,
                expected: MANIFEST_VERSION,
            });
        }

        let mut stacks = Vec::with_capacity(manifest.stacks.len());
        for entry in manifest.stacks {
            stacks.push(load_stack(directory, entry)?);
        }

        Ok(Self {
            directory: directory.to_path_buf(),
            stacks: StackCollection::new(stacks)?,
        })
    }
}

fn load_stack(directory: &Path, entry: ManifestStack) -> Result<Stack, AssemblyError> {
    let invalid = |source: TypeError| AssemblyError::InvalidStack {
        stack: entry.id.clone(),
        source,
    };

    let id = StackId::new(entry.id.clone()).map_err(invalid)?;
    let environment = match &entry.environment {
        Some(env) => Environment::new(env.account.clone(), env.region.clone()).map_err(invalid)?,
        None => {
            return Err(invalid(TypeError::InvalidEnvironment(
                "stack has no environment".into(),
            )))
        }
    };

    let template_path = directory.join(&entry.template_file);
    let template: Template = read_json(&template_path)?;

    let mut dependencies = Vec::with_capacity(entry.dependencies.len());
    for dep in &entry.dependencies {
        dependencies.push(StackId::new(dep.clone()).map_err(invalid)?);
    }

    let mut assets = Vec::with_capacity(entry.assets.len());
    for asset in &entry.assets {
        assets.push(Asset {
            id: AssetId::new(asset.id.clone()).map_err(invalid)?,
            kind: asset.kind,
            source: asset.source.clone(),
            build_command: asset.build_command.clone(),
        });
    }

    let mut stack = Stack::new(id, environment, template);
    if let Some(name) = entry.stack_name {
        stack.stack_name = name;
    }
    if let Some(name) = entry.display_name {
        stack.display_name = name;
    }
    stack.dependencies = dependencies;
    stack.notification_arns = entry.notification_arns;
    stack.tags = entry.tags;
    stack.assets = assets;
    Ok(stack)
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, AssemblyError> {
    let contents = fs::read_to_string(path).map_err(|e| AssemblyError::Read {
        path: path.to_path_buf(),
        source: e,
    })?;
    serde_json::from_str(&contents).map_err(|e| AssemblyError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}
