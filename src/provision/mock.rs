//! provision::mock
//!
//! Mock provisioning service for deterministic testing.
//!
//! # Design
//!
//! `MockProvisioner` implements both [`Provisioner`] and [`AssetPublisher`]
//! so a single, ordered operation log covers stacks and assets. Deployed
//! stacks live in memory; deploy outcomes can be scripted per stack and
//! failures injected per operation and target.
//!
//! The mock also tracks how many deploys, builds and publishes are in
//! flight at once, which lets tests check concurrency limits.
//!
//! # Example
//!
//! ```
//! use stackpilot::provision::mock::MockProvisioner;
//! use stackpilot::provision::{DeploymentOutcome, Provisioner, StackRef};
//! use stackpilot::core::types::Environment;
//!
//! # tokio_test::block_on(async {
//! let mock = MockProvisioner::new()
//!     .script_deploy("App", DeploymentOutcome::ReplacementRequiresRollback);
//!
//! let stack = StackRef {
//!     stack_name: "App".to_string(),
//!     environment: Environment::new("111111111111", "us-east-1").unwrap(),
//! };
//! assert!(!mock.stack_exists(&stack).await.unwrap());
//! # });
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::traits::{
    AssetPublisher, ChangeSet, Deployed, DeployStackRequest, DeploymentOutcome, ProvisionError,
    Provisioner, RollbackRequest, RollbackResult, StackRef,
};
use crate::core::stack::Asset;
use crate::core::template::Template;
use crate::core::types::Environment;

/// Mock provisioning service for testing.
///
/// Thread-safe via internal `Arc<Mutex<...>>` wrapping; clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockProvisioner {
    inner: Arc<Mutex<MockInner>>,
}

/// A stack held by the mock.
#[derive(Debug, Clone, PartialEq)]
pub struct MockStack {
    /// Last deployed template
    pub template: Template,
    /// Outputs reported on deploy
    pub outputs: BTreeMap<String, String>,
}

#[derive(Debug, Default)]
struct MockInner {
    stacks: HashMap<String, MockStack>,
    scripted: HashMap<String, VecDeque<DeploymentOutcome>>,
    rollback_results: HashMap<String, RollbackResult>,
    change_sets: HashMap<String, ChangeSet>,
    published: HashSet<String>,
    fail_on: Vec<FailOn>,
    operations: Vec<MockOperation>,
    deploy_requests: Vec<DeployStackRequest>,
    delay: Option<Duration>,
    in_flight: InFlight,
}

#[derive(Debug, Default)]
struct InFlight {
    deploys: usize,
    max_deploys: usize,
    builds: usize,
    max_builds: usize,
    publishes: usize,
    max_publishes: usize,
}

/// Configuration for which operation should fail, and for which target.
#[derive(Debug, Clone)]
pub enum FailOn {
    /// Fail stack_exists for the named stack.
    StackExists(String, ProvisionError),
    /// Fail deploy_stack for the named stack.
    Deploy(String, ProvisionError),
    /// Fail rollback_stack for the named stack.
    Rollback(String, ProvisionError),
    /// Fail destroy_stack for the named stack.
    Destroy(String, ProvisionError),
    /// Fail read_current_template for the named stack.
    ReadTemplate(String, ProvisionError),
    /// Fail build_asset for the asset id.
    Build(String, ProvisionError),
    /// Fail publish_asset for the asset id.
    Publish(String, ProvisionError),
}

/// Recorded operation for test verification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockOperation {
    StackExists { stack_name: String },
    DeployStarted { stack_name: String, rollback: bool },
    DeployFinished { stack_name: String },
    Rollback { stack_name: String, force: bool },
    Destroy { stack_name: String },
    ReadTemplate { stack_name: String },
    CreateChangeSet { stack_name: String },
    IsPublished { asset_id: String },
    BuildStarted { asset_id: String },
    BuildFinished { asset_id: String },
    PublishStarted { asset_id: String },
    PublishFinished { asset_id: String },
}

/// Which counter an in-flight guard tracks.
#[derive(Debug, Clone, Copy)]
enum Activity {
    Deploy,
    Build,
    Publish,
}

impl MockProvisioner {
    /// Create an empty mock service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a deployed stack.
    pub fn with_stack(self, stack_name: impl Into<String>, template: Template) -> Self {
        self.inner.lock().unwrap().stacks.insert(
            stack_name.into(),
            MockStack {
                template,
                outputs: BTreeMap::new(),
            },
        );
        self
    }

    /// Queue a deploy outcome for a stack. Queued outcomes are consumed in
    /// order; once exhausted, deploys succeed.
    pub fn script_deploy(self, stack_name: impl Into<String>, outcome: DeploymentOutcome) -> Self {
        self.inner
            .lock()
            .unwrap()
            .scripted
            .entry(stack_name.into())
            .or_default()
            .push_back(outcome);
        self
    }

    /// Set the rollback result reported for a stack.
    pub fn with_rollback_result(self, stack_name: impl Into<String>, result: RollbackResult) -> Self {
        self.inner
            .lock()
            .unwrap()
            .rollback_results
            .insert(stack_name.into(), result);
        self
    }

    /// Set the changeset returned for a stack.
    pub fn with_change_set(self, stack_name: impl Into<String>, change_set: ChangeSet) -> Self {
        self.inner
            .lock()
            .unwrap()
            .change_sets
            .insert(stack_name.into(), change_set);
        self
    }

    /// Mark an asset as already published in an environment.
    pub fn with_published(self, asset_id: &str, environment: &Environment) -> Self {
        self.inner
            .lock()
            .unwrap()
            .published
            .insert(published_key(asset_id, environment));
        self
    }

    /// Sleep this long inside every deploy, build and publish.
    pub fn with_delay(self, delay: Duration) -> Self {
        self.inner.lock().unwrap().delay = Some(delay);
        self
    }

    /// Configure the mock to fail an operation.
    ///
    /// # Example
    ///
    /// ```
    /// use stackpilot::provision::mock::{MockProvisioner, FailOn};
    /// use stackpilot::provision::ProvisionError;
    ///
    /// let mock = MockProvisioner::new()
    ///     .fail_on(FailOn::Deploy("App".into(), ProvisionError::RateLimited));
    /// ```
    pub fn fail_on(self, fail_on: FailOn) -> Self {
        self.inner.lock().unwrap().fail_on.push(fail_on);
        self
    }

    /// Clear all failure configuration.
    pub fn clear_fail_on(&self) {
        self.inner.lock().unwrap().fail_on.clear();
    }

    /// Get all recorded operations, in call order.
    pub fn operations(&self) -> Vec<MockOperation> {
        self.inner.lock().unwrap().operations.clone()
    }

    /// Clear recorded operations.
    pub fn clear_operations(&self) {
        self.inner.lock().unwrap().operations.clear();
    }

    /// Every deploy request received, in call order.
    pub fn deploy_requests(&self) -> Vec<DeployStackRequest> {
        self.inner.lock().unwrap().deploy_requests.clone()
    }

    /// A deployed stack (for test verification).
    pub fn stack(&self, stack_name: &str) -> Option<MockStack> {
        self.inner.lock().unwrap().stacks.get(stack_name).cloned()
    }

    /// Whether an asset is published (for test verification).
    pub fn is_published_sync(&self, asset_id: &str, environment: &Environment) -> bool {
        self.inner
            .lock()
            .unwrap()
            .published
            .contains(&published_key(asset_id, environment))
    }

    /// Highest number of concurrent deploys observed.
    pub fn max_concurrent_deploys(&self) -> usize {
        self.inner.lock().unwrap().in_flight.max_deploys
    }

    /// Highest number of concurrent asset builds observed.
    pub fn max_concurrent_builds(&self) -> usize {
        self.inner.lock().unwrap().in_flight.max_builds
    }

    /// Highest number of concurrent asset publishes observed.
    pub fn max_concurrent_publishes(&self) -> usize {
        self.inner.lock().unwrap().in_flight.max_publishes
    }

    /// Index of the first recorded operation equal to `op`.
    pub fn position(&self, op: &MockOperation) -> Option<usize> {
        self.inner
            .lock()
            .unwrap()
            .operations
            .iter()
            .position(|o| o == op)
    }

    fn record(&self, op: MockOperation) {
        self.inner.lock().unwrap().operations.push(op);
    }

    /// Check if we should fail and return the error if so.
    fn check_fail(&self, matches: impl Fn(&FailOn) -> Option<ProvisionError>) -> Result<(), ProvisionError> {
        let inner = self.inner.lock().unwrap();
        match inner.fail_on.iter().find_map(matches) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn begin(&self, activity: Activity) {
        let mut inner = self.inner.lock().unwrap();
        let f = &mut inner.in_flight;
        match activity {
            Activity::Deploy => {
                f.deploys += 1;
                f.max_deploys = f.max_deploys.max(f.deploys);
            }
            Activity::Build => {
                f.builds += 1;
                f.max_builds = f.max_builds.max(f.builds);
            }
            Activity::Publish => {
                f.publishes += 1;
                f.max_publishes = f.max_publishes.max(f.publishes);
            }
        }
    }

    fn end(&self, activity: Activity) {
        let mut inner = self.inner.lock().unwrap();
        let f = &mut inner.in_flight;
        match activity {
            Activity::Deploy => f.deploys -= 1,
            Activity::Build => f.builds -= 1,
            Activity::Publish => f.publishes -= 1,
        }
    }

    async fn pause(&self) {
        let delay = self.inner.lock().unwrap().delay;
        match delay {
            Some(delay) => tokio::time::sleep(delay).await,
            None => tokio::task::yield_now().await,
        }
    }
}

fn published_key(asset_id: &str, environment: &Environment) -> String {
    format!("{}@{}", asset_id, environment)
}

/// Render template outputs the way the service reports them.
fn template_outputs(template: &Template) -> BTreeMap<String, String> {
    template
        .outputs
        .iter()
        .map(|(name, value)| {
            let rendered = match value {
                Value::String(s) => s.clone(),
                Value::Object(map) => match map.get("Value") {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => value.to_string(),
                },
                other => other.to_string(),
            };
            (name.clone(), rendered)
        })
        .collect()
}

fn mock_arn(stack: &StackRef) -> String {
    format!(
        "arn:aws:cloudformation:{}:{}:stack/{}/mock",
        stack.environment.region, stack.environment.account, stack.stack_name
    )
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn stack_exists(&self, stack: &StackRef) -> Result<bool, ProvisionError> {
        self.record(MockOperation::StackExists {
            stack_name: stack.stack_name.clone(),
        });
        self.check_fail(|f| match f {
            FailOn::StackExists(name, e) if *name == stack.stack_name => Some(e.clone()),
            _ => None,
        })?;

        Ok(self
            .inner
            .lock()
            .unwrap()
            .stacks
            .contains_key(&stack.stack_name))
    }

    async fn deploy_stack(
        &self,
        request: &DeployStackRequest,
    ) -> Result<DeploymentOutcome, ProvisionError> {
        let name = request.stack.stack_name.clone();
        self.record(MockOperation::DeployStarted {
            stack_name: name.clone(),
            rollback: request.rollback,
        });
        self.inner
            .lock()
            .unwrap()
            .deploy_requests
            .push(request.clone());

        self.begin(Activity::Deploy);
        self.pause().await;
        self.end(Activity::Deploy);

        let result = self
            .check_fail(|f| match f {
                FailOn::Deploy(target, e) if *target == name => Some(e.clone()),
                _ => None,
            })
            .map(|()| {
                let mut inner = self.inner.lock().unwrap();
                if let Some(outcome) = inner.scripted.get_mut(&name).and_then(VecDeque::pop_front) {
                    return outcome;
                }

                let outputs = template_outputs(&request.template);
                let no_op = !request.force
                    && inner
                        .stacks
                        .get(&name)
                        .is_some_and(|s| s.template == request.template);
                inner.stacks.insert(
                    name.clone(),
                    MockStack {
                        template: request.template.clone(),
                        outputs: outputs.clone(),
                    },
                );
                DeploymentOutcome::Deployed(Deployed {
                    outputs,
                    stack_arn: mock_arn(&request.stack),
                    no_op,
                })
            });

        self.record(MockOperation::DeployFinished { stack_name: name });
        result
    }

    async fn rollback_stack(
        &self,
        request: &RollbackRequest,
    ) -> Result<RollbackResult, ProvisionError> {
        let name = request.stack.stack_name.clone();
        self.record(MockOperation::Rollback {
            stack_name: name.clone(),
            force: request.force,
        });
        self.check_fail(|f| match f {
            FailOn::Rollback(target, e) if *target == name => Some(e.clone()),
            _ => None,
        })?;

        let inner = self.inner.lock().unwrap();
        if let Some(result) = inner.rollback_results.get(&name) {
            return Ok(*result);
        }
        if !inner.stacks.contains_key(&name) {
            return Err(ProvisionError::NotFound(format!("stack {}", name)));
        }
        Ok(RollbackResult::default())
    }

    async fn destroy_stack(&self, stack: &StackRef) -> Result<(), ProvisionError> {
        self.record(MockOperation::Destroy {
            stack_name: stack.stack_name.clone(),
        });
        self.check_fail(|f| match f {
            FailOn::Destroy(target, e) if *target == stack.stack_name => Some(e.clone()),
            _ => None,
        })?;

        self.inner.lock().unwrap().stacks.remove(&stack.stack_name);
        Ok(())
    }

    async fn read_current_template(&self, stack: &StackRef) -> Result<Template, ProvisionError> {
        self.record(MockOperation::ReadTemplate {
            stack_name: stack.stack_name.clone(),
        });
        self.check_fail(|f| match f {
            FailOn::ReadTemplate(target, e) if *target == stack.stack_name => Some(e.clone()),
            _ => None,
        })?;

        Ok(self
            .inner
            .lock()
            .unwrap()
            .stacks
            .get(&stack.stack_name)
            .map(|s| s.template.clone())
            .unwrap_or_default())
    }

    async fn create_change_set(
        &self,
        request: &DeployStackRequest,
    ) -> Result<ChangeSet, ProvisionError> {
        let name = request.stack.stack_name.clone();
        self.record(MockOperation::CreateChangeSet {
            stack_name: name.clone(),
        });

        let inner = self.inner.lock().unwrap();
        Ok(inner.change_sets.get(&name).cloned().unwrap_or_else(|| ChangeSet {
            name: request
                .change_set_name
                .clone()
                .unwrap_or_else(|| "stackpilot-diff".to_string()),
            changes: Vec::new(),
        }))
    }
}

#[async_trait]
impl AssetPublisher for MockProvisioner {
    async fn is_published(
        &self,
        asset: &Asset,
        environment: &Environment,
    ) -> Result<bool, ProvisionError> {
        self.record(MockOperation::IsPublished {
            asset_id: asset.id.to_string(),
        });
        Ok(self.is_published_sync(asset.id.as_str(), environment))
    }

    async fn build_asset(&self, asset: &Asset) -> Result<(), ProvisionError> {
        let id = asset.id.to_string();
        self.record(MockOperation::BuildStarted {
            asset_id: id.clone(),
        });

        self.begin(Activity::Build);
        self.pause().await;
        self.end(Activity::Build);

        let result = self.check_fail(|f| match f {
            FailOn::Build(target, e) if *target == id => Some(e.clone()),
            _ => None,
        });
        self.record(MockOperation::BuildFinished { asset_id: id });
        result
    }

    async fn publish_asset(
        &self,
        asset: &Asset,
        environment: &Environment,
    ) -> Result<(), ProvisionError> {
        let id = asset.id.to_string();
        self.record(MockOperation::PublishStarted {
            asset_id: id.clone(),
        });

        self.begin(Activity::Publish);
        self.pause().await;
        self.end(Activity::Publish);

        let result = self.check_fail(|f| match f {
            FailOn::Publish(target, e) if *target == id => Some(e.clone()),
            _ => None,
        });
        if result.is_ok() {
            self.inner
                .lock()
                .unwrap()
                .published
                .insert(published_key(&id, environment));
        }
        self.record(MockOperation::PublishFinished { asset_id: id });
        result
    }
}
