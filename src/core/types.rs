//! core::types
//!
//! Strong types for core domain concepts.
//!
//! # Types
//!
//! - [`StackId`] - Validated stack identifier
//! - [`AssetId`] - Validated asset identifier
//! - [`Environment`] - Target account/region pair
//! - [`TopicArn`] - Validated notification topic ARN
//!
//! # Validation
//!
//! These types enforce validity at construction time. Invalid values
//! cannot be represented, preventing entire classes of bugs.
//!
//! # Examples
//!
//! ```
//! use stackpilot::core::types::{StackId, TopicArn};
//!
//! let id = StackId::new("Network").unwrap();
//! assert_eq!(id.as_str(), "Network");
//!
//! assert!(StackId::new("").is_err());
//! assert!(TopicArn::new("arn:aws:sns:us-east-1:123456789012:alerts").is_ok());
//! assert!(TopicArn::new("arn:aws:sqs:us-east-1:123456789012:queue").is_err());
//! ```

use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from type validation.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid stack id: {0}")]
    InvalidStackId(String),

    #[error("invalid asset id: {0}")]
    InvalidAssetId(String),

    #[error("invalid environment: {0}")]
    InvalidEnvironment(String),

    #[error("Notification arn {0} is not a valid arn for an SNS topic")]
    InvalidTopicArn(String),
}

/// Characters allowed in identifiers besides ASCII alphanumerics.
const ID_PUNCTUATION: &[char] = &['-', '_', '/', '.'];

fn validate_identifier(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("identifier cannot be empty".into());
    }
    if value.starts_with('/') || value.ends_with('/') {
        return Err(format!("'{}' cannot start or end with '/'", value));
    }
    if let Some(c) = value
        .chars()
        .find(|c| !c.is_ascii_alphanumeric() && !ID_PUNCTUATION.contains(c))
    {
        return Err(format!("'{}' contains invalid character {:?}", value, c));
    }
    Ok(())
}

/// A validated stack identifier.
///
/// Identifiers are unique within an assembly and are what selection
/// patterns, dependency edges and the outputs file refer to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StackId(String);

impl StackId {
    /// Create a new validated stack id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        validate_identifier(&id).map_err(TypeError::InvalidStackId)?;
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for StackId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<StackId> for String {
    fn from(id: StackId) -> Self {
        id.0
    }
}

impl fmt::Display for StackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for StackId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// A validated asset identifier (usually a content hash).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AssetId(String);

impl AssetId {
    /// Create a new validated asset id.
    pub fn new(id: impl Into<String>) -> Result<Self, TypeError> {
        let id = id.into();
        validate_identifier(&id).map_err(TypeError::InvalidAssetId)?;
        Ok(Self(id))
    }

    /// Get the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AssetId {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<AssetId> for String {
    fn from(id: AssetId) -> Self {
        id.0
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The account/region pair a stack deploys into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Environment {
    /// Account identifier
    pub account: String,
    /// Region name
    pub region: String,
}

impl Environment {
    /// Create a validated environment.
    ///
    /// # Errors
    ///
    /// Returns `TypeError::InvalidEnvironment` if either part is empty.
    pub fn new(account: impl Into<String>, region: impl Into<String>) -> Result<Self, TypeError> {
        let env = Self {
            account: account.into(),
            region: region.into(),
        };
        env.validate()?;
        Ok(env)
    }

    /// Check that both account and region are present.
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.account.trim().is_empty() {
            return Err(TypeError::InvalidEnvironment(
                "account must be specified".into(),
            ));
        }
        if self.region.trim().is_empty() {
            return Err(TypeError::InvalidEnvironment(
                "region must be specified".into(),
            ));
        }
        Ok(())
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.account, self.region)
    }
}

fn topic_arn_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)^arn:aws:sns:[a-z0-9\-]+:[0-9]+:[a-z0-9\-_]+$")
            .unwrap_or_else(|e| panic!("topic ARN pattern must compile: {e}"))
    })
}

/// A validated notification topic ARN.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicArn(String);

impl TopicArn {
    /// Create a new validated topic ARN.
    pub fn new(arn: impl Into<String>) -> Result<Self, TypeError> {
        let arn = arn.into();
        if !topic_arn_pattern().is_match(&arn) {
            return Err(TypeError::InvalidTopicArn(arn));
        }
        Ok(Self(arn))
    }

    /// Check whether a string has the shape of a topic ARN.
    pub fn is_valid(arn: &str) -> bool {
        topic_arn_pattern().is_match(arn)
    }

    /// Get the ARN as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TopicArn {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<TopicArn> for String {
    fn from(arn: TopicArn) -> Self {
        arn.0
    }
}

impl fmt::Display for TopicArn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
