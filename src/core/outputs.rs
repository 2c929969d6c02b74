//! core::outputs
//!
//! The accumulated stack-outputs map and its optional JSON file.
//!
//! The file maps `stackName -> outputName -> value` and is rewritten in
//! full (never appended) every time a stack completes, so an interrupted
//! run leaves a consistent, partial file behind.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::config::{write_atomic, ConfigError};

/// Errors from writing the outputs file.
#[derive(Debug, Error)]
pub enum OutputsError {
    #[error("failed to serialize outputs: {0}")]
    Serialize(String),

    #[error(transparent)]
    Write(#[from] ConfigError),
}

/// Outputs keyed by stack name, then output name.
pub type OutputMap = BTreeMap<String, BTreeMap<String, String>>;

/// Accumulates outputs and mirrors them to a file.
#[derive(Debug, Default)]
pub struct OutputsFile {
    path: Option<PathBuf>,
    outputs: OutputMap,
}

impl OutputsFile {
    /// Create a store; `None` keeps outputs in memory only.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            outputs: OutputMap::new(),
        }
    }

    /// Path of the mirrored file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Record the outputs of one stack (replacing earlier values).
    pub fn record(&mut self, stack_name: &str, outputs: BTreeMap<String, String>) {
        self.outputs.insert(stack_name.to_string(), outputs);
    }

    /// Rewrite the file with everything recorded so far.
    pub fn flush(&self) -> Result<(), OutputsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.outputs)
            .map_err(|e| OutputsError::Serialize(e.to_string()))?;
        write_atomic(path, json.as_bytes())?;
        Ok(())
    }

    /// Everything recorded so far.
    pub fn outputs(&self) -> &OutputMap {
        &self.outputs
    }

    /// Consume the store, returning the recorded outputs.
    pub fn into_outputs(self) -> OutputMap {
        self.outputs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn outputs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn flush_without_path_is_noop() {
        let mut store = OutputsFile::new(None);
        store.record("A", outputs(&[("X", "1")]));
        store.flush().unwrap();
        assert_eq!(store.outputs()["A"]["X"], "1");
    }

    #[test]
    fn flush_rewrites_whole_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("outputs.json");
        let mut store = OutputsFile::new(Some(path.clone()));

        store.record("Network", outputs(&[("VpcId", "vpc-1")]));
        store.flush().unwrap();
        let first: OutputMap =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(first.len(), 1);

        store.record("App", outputs(&[("Url", "https://app")]));
        store.flush().unwrap();
        let second: OutputMap =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(second["Network"]["VpcId"], "vpc-1");
        assert_eq!(second["App"]["Url"], "https://app");
    }
}
