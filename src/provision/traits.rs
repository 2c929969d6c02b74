//! provision::traits
//!
//! Trait definitions for the remote provisioning service and asset storage.
//!
//! # Design
//!
//! Both traits are async because every operation involves network I/O.
//! All methods return `Result` so API failures surface to the engine, which
//! decides whether they are fatal.
//!
//! Deploy responses are a tagged [`DeploymentOutcome`]: the service either
//! deployed the stack, or reports one of two "needs rollback first" states
//! that the engine recovers from.

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::stack::{Asset, Stack};
use crate::core::template::Template;
use crate::core::types::Environment;

/// Errors from provisioning operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProvisionError {
    /// Authentication is required but not available.
    #[error("authentication required")]
    AuthRequired,

    /// Authentication failed (invalid token, insufficient permissions).
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Rate limit exceeded.
    #[error("rate limited")]
    RateLimited,

    /// API returned an error.
    #[error("API error: {status} - {message}")]
    ApiError {
        /// HTTP status code
        status: u16,
        /// Error message from the API
        message: String,
    },

    /// Network or connection error.
    #[error("network error: {0}")]
    NetworkError(String),

    /// Building an asset failed.
    #[error("asset build failed: {0}")]
    BuildFailed(String),

    /// Local I/O error (reading asset sources).
    #[error("I/O error: {0}")]
    Io(String),
}

impl ProvisionError {
    /// Short name of the error variant, used in wrapped error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            ProvisionError::AuthRequired => "AuthRequired",
            ProvisionError::AuthFailed(_) => "AuthFailed",
            ProvisionError::NotFound(_) => "NotFound",
            ProvisionError::RateLimited => "RateLimited",
            ProvisionError::ApiError { .. } => "ApiError",
            ProvisionError::NetworkError(_) => "NetworkError",
            ProvisionError::BuildFailed(_) => "BuildFailed",
            ProvisionError::Io(_) => "IoError",
        }
    }
}

/// Identifies a deployed stack.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StackRef {
    /// Physical stack name
    pub stack_name: String,
    /// Target environment
    pub environment: Environment,
}

impl StackRef {
    /// Reference to a stack's deployed counterpart.
    pub fn for_stack(stack: &Stack) -> Self {
        Self {
            stack_name: stack.stack_name.clone(),
            environment: stack.environment.clone(),
        }
    }
}

/// How a deploy is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DeployMethod {
    /// Apply directly
    #[default]
    Direct,
    /// Create a changeset and execute it
    ChangeSet,
}

/// Request to deploy one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployStackRequest {
    /// Target stack
    pub stack: StackRef,
    /// Desired template
    pub template: Template,
    /// Parameter overrides
    pub parameters: BTreeMap<String, String>,
    /// Reuse previous values for parameters not overridden
    pub use_previous_parameters: bool,
    /// Tags to apply
    pub tags: BTreeMap<String, String>,
    /// Notification targets: `None` leaves them unmanaged, empty clears them
    pub notification_arns: Option<Vec<String>>,
    /// Roll back on failure
    pub rollback: bool,
    /// Apply method
    pub method: DeployMethod,
    /// Changeset name when `method` is `ChangeSet`
    pub change_set_name: Option<String>,
    /// Deploy even if the template is unchanged
    pub force: bool,
}

/// A successful deploy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployed {
    /// Stack outputs
    pub outputs: BTreeMap<String, String>,
    /// Identifier of the deployed stack
    pub stack_arn: String,
    /// The deploy changed nothing
    pub no_op: bool,
}

/// Result of one deploy attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeploymentOutcome {
    /// The stack is deployed.
    Deployed(Deployed),
    /// The stack is stuck in a failed, paused state and must be rolled back.
    PausedNeedsRollback {
        /// Why the stack is paused
        reason: String,
        /// Current stack status
        status: String,
    },
    /// The update contains replacements, which require rollback mode.
    ReplacementRequiresRollback,
}

/// Request to roll back a stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackRequest {
    /// Target stack
    pub stack: StackRef,
    /// Orphan resources that fail to roll back
    pub force: bool,
    /// Logical ids to orphan explicitly
    pub orphan_logical_ids: Vec<String>,
}

/// Result of a rollback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    /// The stack was not in a state that can be rolled back
    pub not_in_rollbackable_state: bool,
}

/// Change a changeset would apply to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeAction {
    Add,
    Modify,
    Remove,
}

/// One resource entry of a changeset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceChange {
    /// Logical id in the template
    pub logical_id: String,
    /// Action
    pub action: ChangeAction,
    /// The change replaces the physical resource
    #[serde(default)]
    pub replacement: bool,
}

/// A preview of what a deploy would do.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeSet {
    /// Changeset name
    pub name: String,
    /// Resource changes
    pub changes: Vec<ResourceChange>,
}

impl ChangeSet {
    /// Whether the changeset replaces the given resource.
    pub fn replaces(&self, logical_id: &str) -> bool {
        self.changes
            .iter()
            .any(|c| c.logical_id == logical_id && c.replacement)
    }
}

/// The remote provisioning service.
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so the scheduler can drive several
/// calls concurrently.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Backend name (e.g., "http", "mock").
    fn name(&self) -> &'static str;

    /// Whether the stack exists in its environment.
    async fn stack_exists(&self, stack: &StackRef) -> Result<bool, ProvisionError>;

    /// Deploy a stack.
    ///
    /// Returns a tagged outcome; the two rollback-related outcomes are not
    /// errors.
    async fn deploy_stack(
        &self,
        request: &DeployStackRequest,
    ) -> Result<DeploymentOutcome, ProvisionError>;

    /// Roll back a stack.
    async fn rollback_stack(
        &self,
        request: &RollbackRequest,
    ) -> Result<RollbackResult, ProvisionError>;

    /// Destroy a stack.
    async fn destroy_stack(&self, stack: &StackRef) -> Result<(), ProvisionError>;

    /// Read the currently deployed template.
    ///
    /// A stack that does not exist yields an empty template.
    async fn read_current_template(&self, stack: &StackRef) -> Result<Template, ProvisionError>;

    /// Create (without executing) a changeset for a deploy request.
    async fn create_change_set(
        &self,
        request: &DeployStackRequest,
    ) -> Result<ChangeSet, ProvisionError>;
}

/// Asset build and storage.
#[async_trait]
pub trait AssetPublisher: Send + Sync {
    /// Whether the asset is already present in the environment's storage.
    async fn is_published(
        &self,
        asset: &Asset,
        environment: &Environment,
    ) -> Result<bool, ProvisionError>;

    /// Build the asset locally.
    async fn build_asset(&self, asset: &Asset) -> Result<(), ProvisionError>;

    /// Upload the built asset to the environment's storage.
    async fn publish_asset(
        &self,
        asset: &Asset,
        environment: &Environment,
    ) -> Result<(), ProvisionError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provision_error_display() {
        assert_eq!(format!("{}", ProvisionError::RateLimited), "rate limited");
        assert_eq!(
            format!(
                "{}",
                ProvisionError::ApiError {
                    status: 400,
                    message: "Template format error".into()
                }
            ),
            "API error: 400 - Template format error"
        );
        assert_eq!(
            format!("{}", ProvisionError::NotFound("stack App".into())),
            "not found: stack App"
        );
    }

    #[test]
    fn provision_error_kind() {
        assert_eq!(ProvisionError::RateLimited.kind(), "RateLimited");
        assert_eq!(
            ProvisionError::NetworkError("reset".into()).kind(),
            "NetworkError"
        );
    }

    #[test]
    fn outcome_wire_format_is_tagged() {
        let paused: DeploymentOutcome = serde_json::from_str(
            r#"{"outcome":"paused_needs_rollback","reason":"resource failed","status":"UPDATE_FAILED"}"#,
        )
        .unwrap();
        assert_eq!(
            paused,
            DeploymentOutcome::PausedNeedsRollback {
                reason: "resource failed".into(),
                status: "UPDATE_FAILED".into(),
            }
        );

        let deployed: DeploymentOutcome = serde_json::from_str(
            r#"{"outcome":"deployed","outputs":{"Url":"x"},"stackArn":"arn:1","noOp":false}"#,
        )
        .unwrap();
        match deployed {
            DeploymentOutcome::Deployed(d) => {
                assert_eq!(d.outputs["Url"], "x");
                assert_eq!(d.stack_arn, "arn:1");
            }
            other => panic!("unexpected outcome {:?}", other),
        }

        let replacement: DeploymentOutcome =
            serde_json::from_str(r#"{"outcome":"replacement_requires_rollback"}"#).unwrap();
        assert_eq!(replacement, DeploymentOutcome::ReplacementRequiresRollback);
    }

    #[test]
    fn change_set_replaces() {
        let cs = ChangeSet {
            name: "cs".into(),
            changes: vec![
                ResourceChange {
                    logical_id: "A".into(),
                    action: ChangeAction::Modify,
                    replacement: true,
                },
                ResourceChange {
                    logical_id: "B".into(),
                    action: ChangeAction::Modify,
                    replacement: false,
                },
            ],
        };
        assert!(cs.replaces("A"));
        assert!(!cs.replaces("B"));
        assert!(!cs.replaces("C"));
    }
}
