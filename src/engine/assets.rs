//! engine::assets
//!
//! The build, publish and deploy callbacks run by the work graph.
//!
//! # Design
//!
//! [`AssetTaskRunner`] holds a prepared deploy request per stack. Its
//! callbacks never touch shared state: a finished stack is reported as a
//! [`StackDeployRecord`] over a channel, and the orchestrator that owns the
//! outputs map records it.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use super::recovery::deploy_with_recovery;
use super::work_graph::{AssetNode, WorkActions};
use super::DeployError;
use crate::core::stack::Stack;
use crate::core::types::StackId;
use crate::provision::{AssetPublisher, DeployStackRequest, Provisioner};
use crate::ui::output::{format_duration, OutputSink};

/// A stack that finished deploying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackDeployRecord {
    pub stack_id: StackId,
    pub stack_name: String,
    pub display_name: String,
    pub stack_arn: String,
    pub outputs: BTreeMap<String, String>,
    pub no_op: bool,
    /// Deploy attempts used by the recovery loop
    pub iterations: u32,
    pub duration: Duration,
}

/// Callback bodies for the work graph.
pub struct AssetTaskRunner<'a> {
    provisioner: &'a dyn Provisioner,
    publisher: &'a dyn AssetPublisher,
    sink: &'a dyn OutputSink,
    requests: HashMap<StackId, DeployStackRequest>,
    force: bool,
    records: UnboundedSender<StackDeployRecord>,
}

impl<'a> AssetTaskRunner<'a> {
    pub fn new(
        provisioner: &'a dyn Provisioner,
        publisher: &'a dyn AssetPublisher,
        sink: &'a dyn OutputSink,
        requests: HashMap<StackId, DeployStackRequest>,
        force: bool,
        records: UnboundedSender<StackDeployRecord>,
    ) -> Self {
        Self {
            provisioner,
            publisher,
            sink,
            requests,
            force,
            records,
        }
    }

    fn print_result(&self, record: &StackDeployRecord) {
        let name = &record.display_name;
        if record.no_op {
            self.sink.info(&format!("{} (no changes)", name));
        } else {
            self.sink.info(&format!("{}: deployed", name));
        }
        self.sink.info(&format!(
            "{}: deployment time: {}",
            name,
            format_duration(record.duration)
        ));

        if !record.outputs.is_empty() {
            self.sink.result("Outputs:");
            for (key, value) in &record.outputs {
                self.sink
                    .result(&format!("{}.{} = {}", record.stack_name, key, value));
            }
        }
        self.sink.result(&format!("Stack ARN:\n{}", record.stack_arn));
    }
}

#[async_trait]
impl WorkActions for AssetTaskRunner<'_> {
    async fn deploy_stack(&self, stack: &Stack) -> Result<(), DeployError> {
        let name = &stack.display_name;
        let request = self.requests.get(&stack.id).cloned().ok_or_else(|| {
            DeployError::Validation(format!("{}: no deploy request prepared", name))
        })?;

        self.sink.info(&format!("{}: deploying...", name));
        let started = Instant::now();
        let outcome = deploy_with_recovery(self.provisioner, self.sink, name, request, self.force)
            .await
            .map_err(|e| e.for_stack(name))?;

        let record = StackDeployRecord {
            stack_id: stack.id.clone(),
            stack_name: stack.stack_name.clone(),
            display_name: name.clone(),
            stack_arn: outcome.deployed.stack_arn,
            outputs: outcome.deployed.outputs,
            no_op: outcome.deployed.no_op,
            iterations: outcome.iterations,
            duration: started.elapsed(),
        };
        self.print_result(&record);

        if self.records.send(record).is_err() {
            debug!(stack = %stack.id, "output collector gone");
        }
        Ok(())
    }

    async fn build_asset(&self, node: &AssetNode) -> Result<(), DeployError> {
        self.sink.info(&format!(
            "{}: building asset {}",
            node.parent_stack, node.asset.id
        ));
        self.publisher
            .build_asset(&node.asset)
            .await
            .map_err(|source| DeployError::Asset {
                asset: node.asset.id.to_string(),
                source,
            })
            .map_err(|e| e.for_stack(node.parent_stack.as_str()))
    }

    async fn publish_asset(&self, node: &AssetNode) -> Result<(), DeployError> {
        self.sink.info(&format!(
            "{}: publishing asset {} ({})",
            node.parent_stack, node.asset.id, node.environment
        ));
        self.publisher
            .publish_asset(&node.asset, &node.environment)
            .await
            .map_err(|source| DeployError::Asset {
                asset: node.asset.id.to_string(),
                source,
            })
            .map_err(|e| e.for_stack(node.parent_stack.as_str()))
    }
}
