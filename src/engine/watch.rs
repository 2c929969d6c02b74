//! engine::watch
//!
//! Redeploy on file changes.
//!
//! # Architecture
//!
//! ```text
//! notify watcher ──> mpsc ──> WatchLoop ──(latch)──> Redeploy
//!                               ^  ctrl-c
//! ```
//!
//! The loop is the only owner of the [`WatchLatch`]. Changes that arrive
//! while a deploy runs never interrupt it; they mark the latch as queued and
//! exactly one more deploy runs once the current one finishes.
//!
//! # Invariants
//!
//! - At most one deploy is in flight per loop
//! - Every accepted change is followed by a deploy that starts after it
//! - Changes before the watcher reports ready are ignored
//! - A deploy that has started is never abandoned, not even on shutdown

use std::future::Future;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use futures::future::BoxFuture;
use globset::{Glob, GlobSet, GlobSetBuilder};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::deploy::{DeployOptions, DeployReport, Deployer};
use super::gate::ApprovalPolicy;
use super::DeployError;
use crate::core::assembly::Assembly;
use crate::core::selection::StackSelector;
use crate::provision::{AssetPublisher, Provisioner};
use crate::ui::output::OutputSink;

// =============================================================================
// Latch
// =============================================================================

/// States of the watch latch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LatchState {
    /// The watcher has not reported ready
    #[default]
    PreReady,
    /// Idle, waiting for changes
    Open,
    /// A deploy is running
    Deploying,
    /// A deploy is running and another change arrived
    Queued,
}

/// What the loop should do after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LatchAction {
    StartDeploy,
    Wait,
}

/// The coalescing state machine behind watch mode.
#[derive(Debug, Clone, Default)]
pub struct WatchLatch {
    state: LatchState,
}

impl WatchLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LatchState {
        self.state
    }

    /// The watcher is ready; the initial deploy starts.
    pub fn on_ready(&mut self) -> LatchAction {
        match self.state {
            LatchState::PreReady => {
                self.state = LatchState::Deploying;
                LatchAction::StartDeploy
            }
            _ => LatchAction::Wait,
        }
    }

    /// A relevant file changed.
    pub fn on_change(&mut self) -> LatchAction {
        match self.state {
            LatchState::PreReady => LatchAction::Wait,
            LatchState::Open => {
                self.state = LatchState::Deploying;
                LatchAction::StartDeploy
            }
            LatchState::Deploying | LatchState::Queued => {
                self.state = LatchState::Queued;
                LatchAction::Wait
            }
        }
    }

    /// The in-flight deploy finished (successfully or not).
    pub fn on_deploy_finished(&mut self) -> LatchAction {
        match self.state {
            LatchState::Queued => {
                self.state = LatchState::Deploying;
                LatchAction::StartDeploy
            }
            LatchState::Deploying => {
                self.state = LatchState::Open;
                LatchAction::Wait
            }
            LatchState::PreReady | LatchState::Open => LatchAction::Wait,
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Directories and files never worth a redeploy.
pub const DEFAULT_EXCLUDE: &[&str] = &["**/.*", "**/.*/**", "**/target/**"];

/// Include/exclude globs evaluated relative to the watched root.
#[derive(Debug, Clone)]
pub struct WatchFilter {
    root: PathBuf,
    include: GlobSet,
    exclude: GlobSet,
}

impl WatchFilter {
    /// Build a filter. An empty include list means everything.
    ///
    /// # Errors
    ///
    /// Returns `DeployError::Validation` for an invalid glob.
    pub fn new(root: &Path, include: &[String], exclude: &[String]) -> Result<Self, DeployError> {
        let include = if include.is_empty() {
            build_set(&["**".to_string()])?
        } else {
            build_set(include)?
        };
        Ok(Self {
            root: root.to_path_buf(),
            include,
            exclude: build_set(exclude)?,
        })
    }

    /// Whether a change to `path` should trigger a deploy.
    pub fn matches(&self, path: &Path) -> bool {
        let relative = path.strip_prefix(&self.root).unwrap_or(path);
        self.include.is_match(relative) && !self.exclude.is_match(relative)
    }
}

fn build_set(patterns: &[String]) -> Result<GlobSet, DeployError> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| DeployError::Validation(format!("invalid glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| DeployError::Validation(format!("invalid glob set: {}", e)))
}

// =============================================================================
// Events
// =============================================================================

/// Input to the watch loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The watcher finished its initial scan
    Ready,
    /// A path was created, modified or removed
    Changed(PathBuf),
}

/// Start a recursive file watcher on `root`.
///
/// The returned watcher must be kept alive; dropping it closes the event
/// stream. `Ready` is sent once the watch is registered.
///
/// # Errors
///
/// Returns `DeployError::Validation` if the watcher cannot be created.
pub fn spawn_watcher(
    root: &Path,
) -> Result<(RecommendedWatcher, mpsc::UnboundedReceiver<WatchEvent>), DeployError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let events = tx.clone();

    let mut watcher = notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
        Ok(event) => {
            for path in event.paths {
                if events.send(WatchEvent::Changed(path)).is_err() {
                    return;
                }
            }
        }
        Err(e) => warn!(error = %e, "watch error"),
    })
    .map_err(|e| DeployError::Validation(format!("cannot start file watcher: {}", e)))?;

    watcher
        .watch(root, RecursiveMode::Recursive)
        .map_err(|e| {
            DeployError::Validation(format!("cannot watch '{}': {}", root.display(), e))
        })?;

    // Receiver is still held by the caller, so this cannot fail.
    let _ = tx.send(WatchEvent::Ready);
    Ok((watcher, rx))
}

// =============================================================================
// Loop
// =============================================================================

/// One full deploy run triggered by the watch loop.
#[async_trait]
pub trait Redeploy: Send + Sync {
    async fn redeploy(&self) -> Result<DeployReport, DeployError>;
}

/// Counters for a finished watch session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WatchSummary {
    pub deploys: usize,
    pub failures: usize,
}

/// The watch loop.
pub struct WatchLoop<'a> {
    redeployer: &'a dyn Redeploy,
    sink: &'a dyn OutputSink,
    filter: WatchFilter,
    latch: WatchLatch,
    summary: WatchSummary,
}

impl<'a> WatchLoop<'a> {
    pub fn new(redeployer: &'a dyn Redeploy, sink: &'a dyn OutputSink, filter: WatchFilter) -> Self {
        Self {
            redeployer,
            sink,
            filter,
            latch: WatchLatch::new(),
            summary: WatchSummary::default(),
        }
    }

    /// Process `events` until the stream closes or `shutdown` resolves.
    ///
    /// When the stream closes, the in-flight deploy and a queued follow-up
    /// are allowed to finish. On shutdown only the in-flight deploy finishes;
    /// a queued follow-up is dropped.
    pub async fn run<S>(
        mut self,
        mut events: mpsc::UnboundedReceiver<WatchEvent>,
        shutdown: S,
    ) -> WatchSummary
    where
        S: Future<Output = ()>,
    {
        let redeployer = self.redeployer;
        let mut current: Option<BoxFuture<'a, Result<DeployReport, DeployError>>> = None;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                result = in_flight(&mut current) => {
                    current = None;
                    self.finished(result);
                    if self.latch.on_deploy_finished() == LatchAction::StartDeploy {
                        self.sink.info("Detected file changes during deployment. Invoking deploy again");
                        current = Some(redeployer.redeploy());
                    }
                }
                event = events.recv() => {
                    let Some(event) = event else { break };
                    if self.accept(event) == LatchAction::StartDeploy {
                        current = Some(redeployer.redeploy());
                    }
                }
                _ = &mut shutdown => {
                    debug!("watch interrupted");
                    if let Some(pending) = current.take() {
                        self.sink.info("Waiting for the current deployment to finish");
                        let result = pending.await;
                        self.finished(result);
                    }
                    return self.summary;
                }
            }
        }

        while let Some(pending) = current.take() {
            let result = pending.await;
            self.finished(result);
            if self.latch.on_deploy_finished() == LatchAction::StartDeploy {
                current = Some(redeployer.redeploy());
            }
        }
        self.summary
    }

    fn accept(&mut self, event: WatchEvent) -> LatchAction {
        match event {
            WatchEvent::Ready => {
                let action = self.latch.on_ready();
                if action == LatchAction::StartDeploy {
                    self.sink.info("Triggering initial deploy");
                }
                action
            }
            WatchEvent::Changed(path) => {
                if !self.filter.matches(&path) {
                    return LatchAction::Wait;
                }
                debug!(path = %path.display(), state = ?self.latch.state(), "change");
                let action = self.latch.on_change();
                if action == LatchAction::StartDeploy {
                    self.sink.info(&format!(
                        "Detected change to '{}' (type: change). Triggering deploy",
                        path.display()
                    ));
                }
                action
            }
        }
    }

    fn finished(&mut self, result: Result<DeployReport, DeployError>) {
        self.summary.deploys += 1;
        if let Err(e) = result {
            self.summary.failures += 1;
            self.sink.error(&e.to_string());
        }
    }
}

async fn in_flight<T>(current: &mut Option<BoxFuture<'_, T>>) -> T {
    match current {
        Some(future) => future.await,
        None => std::future::pending().await,
    }
}

// =============================================================================
// Assembly redeploy
// =============================================================================

/// Reloads the assembly and deploys the selection with approval disabled.
pub struct AssemblyRedeployer<'a> {
    assembly_dir: PathBuf,
    selector: StackSelector,
    provisioner: &'a dyn Provisioner,
    publisher: &'a dyn AssetPublisher,
    sink: &'a dyn OutputSink,
    options: DeployOptions,
}

impl<'a> AssemblyRedeployer<'a> {
    pub fn new(
        assembly_dir: PathBuf,
        selector: StackSelector,
        provisioner: &'a dyn Provisioner,
        publisher: &'a dyn AssetPublisher,
        sink: &'a dyn OutputSink,
        mut options: DeployOptions,
    ) -> Self {
        // Nobody is there to answer an approval prompt.
        options.approval = ApprovalPolicy::Never;
        Self {
            assembly_dir,
            selector,
            provisioner,
            publisher,
            sink,
            options,
        }
    }
}

#[async_trait]
impl Redeploy for AssemblyRedeployer<'_> {
    async fn redeploy(&self) -> Result<DeployReport, DeployError> {
        let assembly = Assembly::load(&self.assembly_dir)?;
        let selected = self.selector.select(&assembly.stacks)?;
        Deployer::new(self.provisioner, self.publisher, self.sink)
            .deploy(&selected, &self.options)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::recording::RecordingSink;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    mod latch {
        use super::*;

        #[test]
        fn changes_before_ready_are_ignored() {
            let mut latch = WatchLatch::new();
            assert_eq!(latch.on_change(), LatchAction::Wait);
            assert_eq!(latch.state(), LatchState::PreReady);
        }

        #[test]
        fn ready_starts_initial_deploy() {
            let mut latch = WatchLatch::new();
            assert_eq!(latch.on_ready(), LatchAction::StartDeploy);
            assert_eq!(latch.state(), LatchState::Deploying);
            assert_eq!(latch.on_ready(), LatchAction::Wait);
        }

        #[test]
        fn changes_during_deploy_coalesce_into_one() {
            let mut latch = WatchLatch::new();
            latch.on_ready();
            assert_eq!(latch.on_change(), LatchAction::Wait);
            assert_eq!(latch.on_change(), LatchAction::Wait);
            assert_eq!(latch.state(), LatchState::Queued);

            assert_eq!(latch.on_deploy_finished(), LatchAction::StartDeploy);
            assert_eq!(latch.state(), LatchState::Deploying);
            assert_eq!(latch.on_deploy_finished(), LatchAction::Wait);
            assert_eq!(latch.state(), LatchState::Open);
        }

        #[test]
        fn change_while_open_deploys() {
            let mut latch = WatchLatch::new();
            latch.on_ready();
            latch.on_deploy_finished();
            assert_eq!(latch.on_change(), LatchAction::StartDeploy);
        }
    }

    mod filter {
        use super::*;

        fn filter() -> WatchFilter {
            let exclude: Vec<String> = DEFAULT_EXCLUDE
                .iter()
                .map(|s| s.to_string())
                .chain(["stack.out/**".to_string()])
                .collect();
            WatchFilter::new(Path::new("/proj"), &[], &exclude).unwrap()
        }

        #[test]
        fn includes_sources() {
            assert!(filter().matches(Path::new("/proj/src/app.ts")));
        }

        #[test]
        fn excludes_hidden_and_build_output() {
            let f = filter();
            assert!(!f.matches(Path::new("/proj/.git/HEAD")));
            assert!(!f.matches(Path::new("/proj/target/debug/x")));
            assert!(!f.matches(Path::new("/proj/stack.out/manifest.json")));
        }

        #[test]
        fn include_list_narrows() {
            let f = WatchFilter::new(Path::new("/proj"), &["src/**".to_string()], &[]).unwrap();
            assert!(f.matches(Path::new("/proj/src/a.rs")));
            assert!(!f.matches(Path::new("/proj/docs/a.md")));
        }

        #[test]
        fn invalid_glob_is_validation_error() {
            let err = WatchFilter::new(Path::new("/proj"), &["a[".to_string()], &[]).unwrap_err();
            assert!(matches!(err, DeployError::Validation(_)));
        }
    }

    mod run {
        use super::*;

        struct CountingRedeploy {
            calls: AtomicUsize,
            fail_first: bool,
            delay: Duration,
        }

        impl CountingRedeploy {
            fn new(delay: Duration) -> Self {
                Self {
                    calls: AtomicUsize::new(0),
                    fail_first: false,
                    delay,
                }
            }
        }

        #[async_trait]
        impl Redeploy for CountingRedeploy {
            async fn redeploy(&self) -> Result<DeployReport, DeployError> {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(self.delay).await;
                if self.fail_first && call == 0 {
                    return Err(DeployError::Validation("boom".into()));
                }
                Ok(DeployReport::default())
            }
        }

        fn filter() -> WatchFilter {
            WatchFilter::new(Path::new("/proj"), &[], &["**/target/**".to_string()]).unwrap()
        }

        #[tokio::test]
        async fn burst_during_initial_deploy_redeploys_once() {
            let redeploy = CountingRedeploy::new(Duration::from_millis(50));
            let sink = RecordingSink::new();
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(WatchEvent::Ready).unwrap();
            for i in 0..5 {
                tx.send(WatchEvent::Changed(PathBuf::from(format!("/proj/src/{}.ts", i))))
                    .unwrap();
            }
            drop(tx);

            let summary = WatchLoop::new(&redeploy, &sink, filter())
                .run(rx, std::future::pending())
                .await;

            assert_eq!(summary.deploys, 2);
            assert_eq!(redeploy.calls.load(Ordering::SeqCst), 2);
            assert!(sink.contains("Triggering initial deploy"));
        }

        #[tokio::test]
        async fn filtered_changes_do_not_deploy() {
            let redeploy = CountingRedeploy::new(Duration::from_millis(1));
            let sink = RecordingSink::new();
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(WatchEvent::Ready).unwrap();
            tx.send(WatchEvent::Changed(PathBuf::from("/proj/target/out.o")))
                .unwrap();
            drop(tx);

            let summary = WatchLoop::new(&redeploy, &sink, filter())
                .run(rx, std::future::pending())
                .await;
            assert_eq!(summary.deploys, 1);
        }

        #[tokio::test]
        async fn errors_are_reported_and_loop_continues() {
            let redeploy = CountingRedeploy {
                fail_first: true,
                ..CountingRedeploy::new(Duration::from_millis(20))
            };
            let sink = RecordingSink::new();
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(WatchEvent::Ready).unwrap();
            tx.send(WatchEvent::Changed(PathBuf::from("/proj/a.ts"))).unwrap();
            drop(tx);

            let summary = WatchLoop::new(&redeploy, &sink, filter())
                .run(rx, std::future::pending())
                .await;
            assert_eq!(summary, WatchSummary { deploys: 2, failures: 1 });
            assert!(sink.contains("boom"));
        }

        #[tokio::test]
        async fn shutdown_waits_for_in_flight_deploy() {
            let redeploy = CountingRedeploy::new(Duration::from_millis(50));
            let sink = RecordingSink::new();
            let (tx, rx) = mpsc::unbounded_channel();
            tx.send(WatchEvent::Ready).unwrap();
            tx.send(WatchEvent::Changed(PathBuf::from("/proj/a.ts"))).unwrap();

            let summary = WatchLoop::new(&redeploy, &sink, filter())
                .run(rx, tokio::time::sleep(Duration::from_millis(10)))
                .await;

            assert_eq!(summary, WatchSummary { deploys: 1, failures: 0 });
            assert_eq!(redeploy.calls.load(Ordering::SeqCst), 1);
            assert!(sink.contains("Waiting for the current deployment to finish"));
            drop(tx);
        }

        #[tokio::test]
        async fn shutdown_stops_the_loop() {
            let redeploy = CountingRedeploy::new(Duration::from_millis(1));
            let sink = RecordingSink::new();
            let (_tx, rx) = mpsc::unbounded_channel();

            let summary = WatchLoop::new(&redeploy, &sink, filter())
                .run(rx, async {})
                .await;
            assert_eq!(summary.deploys, 0);
        }
    }

    mod props {
        use super::*;
        use proptest::prelude::*;

        #[derive(Debug, Clone)]
        enum Step {
            Change,
            Finish,
        }

        fn step() -> impl Strategy<Value = Step> {
            prop_oneof![Just(Step::Change), Just(Step::Finish)]
        }

        proptest! {
            #[test]
            fn every_change_is_followed_by_a_deploy(steps in proptest::collection::vec(step(), 0..40)) {
                let mut latch = WatchLatch::new();
                let mut running = false;
                let mut starts: Vec<usize> = Vec::new();
                let mut changes: Vec<usize> = Vec::new();
                let mut clock = 0usize;

                if latch.on_ready() == LatchAction::StartDeploy {
                    running = true;
                    starts.push(clock);
                }

                let mut apply = |step: &Step, latch: &mut WatchLatch, running: &mut bool, clock: &mut usize| {
                    *clock += 1;
                    match step {
                        Step::Change => {
                            changes.push(*clock);
                            if latch.on_change() == LatchAction::StartDeploy {
                                prop_assert!(!*running);
                                *running = true;
                                starts.push(*clock);
                            }
                        }
                        Step::Finish if *running => {
                            *running = false;
                            if latch.on_deploy_finished() == LatchAction::StartDeploy {
                                *running = true;
                                starts.push(*clock);
                            }
                        }
                        Step::Finish => {}
                    }
                    Ok(())
                };

                for s in &steps {
                    apply(s, &mut latch, &mut running, &mut clock)?;
                }
                while running {
                    apply(&Step::Finish, &mut latch, &mut running, &mut clock)?;
                }

                prop_assert_eq!(latch.state(), LatchState::Open);
                for change in changes {
                    prop_assert!(starts.iter().any(|&start| start >= change));
                }
            }
        }
    }
}
