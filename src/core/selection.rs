//! core::selection
//!
//! Selecting stacks from a collection by glob patterns.
//!
//! Patterns match a stack's id or its display name. An empty pattern list
//! means "everything" unless the caller requires an explicit choice (as
//! destroy and rollback do when the collection holds several stacks).

use std::collections::HashSet;

use globset::{Glob, GlobMatcher};
use thiserror::Error;

use super::stack::{Stack, StackCollection};
use super::types::StackId;

/// Errors from stack selection.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("invalid stack pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("No stack found matching '{0}'")]
    NoMatch(String),

    #[error("the assembly contains no stacks")]
    Empty,

    #[error(
        "Stack selection is ambiguous, please choose a specific stack (or use --all): {0}"
    )]
    Ambiguous(String),
}

/// How a selection is widened along dependency edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Extension {
    /// Only the matched stacks
    #[default]
    None,
    /// Also every stack the matched stacks depend on
    Upstream,
    /// Also every stack that depends on the matched stacks
    Downstream,
}

/// What to do when no patterns are given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DefaultSelection {
    /// Select every stack
    #[default]
    All,
    /// Select the single stack if there is exactly one, otherwise fail
    OnlySingle,
}

/// A stack selection request.
#[derive(Debug, Clone, Default)]
pub struct StackSelector {
    /// Glob patterns
    pub patterns: Vec<String>,
    /// Dependency extension
    pub extension: Extension,
    /// Behavior for an empty pattern list
    pub default: DefaultSelection,
}

impl StackSelector {
    /// Select everything.
    pub fn all() -> Self {
        Self::default()
    }

    /// Select by patterns.
    pub fn patterns<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the extension (builder style).
    pub fn extend(mut self, extension: Extension) -> Self {
        self.extension = extension;
        self
    }

    /// Set the default behavior (builder style).
    pub fn default_to(mut self, default: DefaultSelection) -> Self {
        self.default = default;
        self
    }

    /// Resolve the selection against a collection.
    ///
    /// The result is in collection (dependency) order.
    pub fn select<'a>(
        &self,
        collection: &'a StackCollection,
    ) -> Result<Vec<&'a Stack>, SelectionError> {
        if collection.is_empty() {
            return Err(SelectionError::Empty);
        }

        let mut chosen: HashSet<StackId> = HashSet::new();
        if self.patterns.is_empty() {
            match self.default {
                DefaultSelection::All => {
                    chosen.extend(collection.iter().map(|s| s.id.clone()));
                }
                DefaultSelection::OnlySingle => {
                    if collection.len() > 1 {
                        let names: Vec<&str> =
                            collection.iter().map(|s| s.display_name.as_str()).collect();
                        return Err(SelectionError::Ambiguous(names.join(", ")));
                    }
                    chosen.extend(collection.iter().map(|s| s.id.clone()));
                }
            }
        } else {
            for pattern in &self.patterns {
                let matcher = compile(pattern)?;
                let matched: Vec<StackId> = collection
                    .iter()
                    .filter(|s| {
                        matcher.is_match(s.id.as_str()) || matcher.is_match(&s.display_name)
                    })
                    .map(|s| s.id.clone())
                    .collect();
                if matched.is_empty() {
                    return Err(SelectionError::NoMatch(pattern.clone()));
                }
                chosen.extend(matched);
            }
        }

        let graph = collection.graph();
        let extra: Vec<StackId> = match self.extension {
            Extension::None => Vec::new(),
            Extension::Upstream => chosen.iter().flat_map(|id| graph.upstream(id)).collect(),
            Extension::Downstream => chosen.iter().flat_map(|id| graph.downstream(id)).collect(),
        };
        chosen.extend(extra);

        Ok(collection.subset(&chosen))
    }
}

fn compile(pattern: &str) -> Result<GlobMatcher, SelectionError> {
    Glob::new(pattern)
        .map(|g| g.compile_matcher())
        .map_err(|e| SelectionError::InvalidPattern {
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}
