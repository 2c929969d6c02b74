//! provision
//!
//! Abstraction over the remote provisioning service.
//!
//! # Architecture
//!
//! The [`Provisioner`] trait covers stack operations; [`AssetPublisher`]
//! covers asset build and storage. The engine only talks to these traits.
//!
//! # Implementations
//!
//! - [`http::HttpProvisioner`] - JSON REST client
//! - [`mock::MockProvisioner`] - In-memory service for tests

pub mod http;
pub mod mock;
mod traits;

pub use traits::{
    AssetPublisher, ChangeAction, ChangeSet, DeployMethod, DeployStackRequest, Deployed,
    DeploymentOutcome, ProvisionError, Provisioner, ResourceChange, RollbackRequest,
    RollbackResult, StackRef,
};
