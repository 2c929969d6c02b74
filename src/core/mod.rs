//! core
//!
//! Core domain types, schemas, and loading for stackpilot.
//!
//! # Modules
//!
//! - [`types`] - Strong types: StackId, AssetId, Environment, TopicArn
//! - [`template`] - Stack template model
//! - [`stack`] - Stacks, assets and the immutable stack collection
//! - [`graph`] - Stack dependency graph
//! - [`selection`] - Selecting stacks by pattern
//! - [`params`] - Parameter override resolution
//! - [`assembly`] - Loading a synthesized assembly directory
//! - [`outputs`] - Stack outputs file
//! - [`config`] - Configuration schema and loading
//!
//! # Design Principles
//!
//! - Strong typing prevents invalid states at construction time
//! - Collections are immutable once built
//! - Nothing here talks to the provisioning service

pub mod assembly;
pub mod config;
pub mod graph;
pub mod outputs;
pub mod params;
pub mod selection;
pub mod stack;
pub mod template;
pub mod types;
