//! core::config::schema
//!
//! Configuration schema types.
//!
//! The same schema is used for the global file and the project file; the
//! project file overrides the global one key by key.
//!
//! # Validation
//!
//! Config values are validated after parsing to ensure they conform to
//! expected formats (e.g., concurrency must be positive, notification
//! targets must be topic ARNs).

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::ConfigError;
use crate::core::types::TopicArn;
use crate::engine::gate::ApprovalPolicy;

/// Configuration file contents.
///
/// # Example
///
/// ```toml
/// assembly = "stack.out"
/// endpoint = "https://provisioner.internal"
/// require_approval = "broadening"
/// concurrency = 4
/// asset_parallelism = true
/// outputs_file = "outputs.json"
///
/// [tags]
/// team = "platform"
///
/// [watch]
/// include = ["src/**"]
/// exclude = ["**/*.md"]
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Assembly directory
    pub assembly: Option<PathBuf>,

    /// Provisioning service endpoint
    pub endpoint: Option<String>,

    /// Approval policy for security-sensitive changes
    pub require_approval: Option<ApprovalPolicy>,

    /// Maximum concurrent stack deployments
    pub concurrency: Option<usize>,

    /// Publish assets in parallel
    pub asset_parallelism: Option<bool>,

    /// Build all assets before deploying any stack
    pub asset_prebuild: Option<bool>,

    /// Deploy with rollback enabled
    pub rollback: Option<bool>,

    /// Outputs file path
    pub outputs_file: Option<PathBuf>,

    /// Notification targets applied to every stack
    pub notification_arns: Option<Vec<String>>,

    /// Tags applied to every stack
    pub tags: Option<BTreeMap<String, String>>,

    /// Watch settings
    pub watch: Option<WatchConfig>,
}

impl FileConfig {
    /// Validate the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == Some(0) {
            return Err(ConfigError::InvalidValue(
                "concurrency must be at least 1".into(),
            ));
        }

        if let Some(arns) = &self.notification_arns {
            for arn in arns {
                TopicArn::new(arn.as_str())
                    .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
            }
        }

        if let Some(endpoint) = &self.endpoint {
            if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
                return Err(ConfigError::InvalidValue(format!(
                    "endpoint '{}' must be an http(s) URL",
                    endpoint
                )));
            }
        }

        Ok(())
    }

    /// Overlay `other` on top of `self`: every key set in `other` wins.
    pub fn merged_with(self, other: FileConfig) -> FileConfig {
        FileConfig {
            assembly: other.assembly.or(self.assembly),
            endpoint: other.endpoint.or(self.endpoint),
            require_approval: other.require_approval.or(self.require_approval),
            concurrency: other.concurrency.or(self.concurrency),
            asset_parallelism: other.asset_parallelism.or(self.asset_parallelism),
            asset_prebuild: other.asset_prebuild.or(self.asset_prebuild),
            rollback: other.rollback.or(self.rollback),
            outputs_file: other.outputs_file.or(self.outputs_file),
            notification_arns: other.notification_arns.or(self.notification_arns),
            tags: other.tags.or(self.tags),
            watch: other.watch.or(self.watch),
        }
    }
}

/// Watch-mode settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct WatchConfig {
    /// Globs of files that trigger a deploy
    pub include: Option<Vec<String>>,

    /// Globs of files that never trigger a deploy
    pub exclude: Option<Vec<String>>,
}
