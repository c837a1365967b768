//! Versioned make-before-break rollout.
//!
//! One worker drains the trigger queue. Each step builds a fresh
//! [`RouterRun`] from the registry, distributes `Add` for the new version,
//! swaps the live pointer and then retires the previous version with
//! `Remove`. A step that fails before the swap leaves the previous run
//! serving, and destinations that already took the new version are sent
//! its `Remove`.

use std::{
    collections::BTreeSet,
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use arc_swap::{ArcSwap, ArcSwapOption};
use async_trait::async_trait;
use pingora::{server::ShutdownWatch, services::background::BackgroundService};
use serde::Serialize;
use tokio::sync::{
    mpsc::{self, Receiver, Sender},
    Mutex,
};

use crate::{
    api::ServiceConfigAction,
    graph::{new_version, DistributionPlan, RouterRun, ServiceIdx, TokenKeyer},
    metrics::ROLLOUTS,
    registry::ServiceRegistry,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 6;

/// Bounded registry-change trigger queue.
pub fn queue(capacity: usize) -> (Sender<()>, Receiver<()>) {
    mpsc::channel(capacity.max(1))
}

#[derive(Clone, Debug, PartialEq)]
pub enum RolloutOutcome {
    /// The new run had configuration errors.
    Rejected { errors: Vec<String> },
    /// A destination refused the new version.
    AddFailed { destination: String, error: String },
    Applied { version: String },
}

impl RolloutOutcome {
    fn label(&self) -> &'static str {
        match self {
            RolloutOutcome::Rejected { .. } => "rejected",
            RolloutOutcome::AddFailed { .. } => "add_failed",
            RolloutOutcome::Applied { .. } => "applied",
        }
    }
}

/// Result of the most recent rollout attempt, for operators.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RolloutReport {
    pub attempted_version: Option<String>,
    pub outcome: Option<String>,
    pub errors: Vec<String>,
    pub finished_at: u64,
}

/// The live run pointer plus the last rollout report.
///
/// Readers copy the current `Arc` and work on the immutable run without
/// holding anything; the rollout worker is the only writer.
#[derive(Clone, Default)]
pub struct LiveRouter {
    run: Arc<ArcSwapOption<RouterRun>>,
    report: Arc<ArcSwap<RolloutReport>>,
}

impl LiveRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self) -> Option<Arc<RouterRun>> {
        self.run.load_full()
    }

    pub fn version(&self) -> Option<String> {
        self.load().map(|run| run.version.clone())
    }

    pub fn report(&self) -> Arc<RolloutReport> {
        self.report.load_full()
    }

    pub(crate) fn swap(&self, run: Arc<RouterRun>) -> Option<Arc<RouterRun>> {
        self.run.swap(Some(run))
    }

    fn record(&self, version: &str, outcome: &RolloutOutcome) {
        let errors = match outcome {
            RolloutOutcome::Rejected { errors } => errors.clone(),
            RolloutOutcome::AddFailed { destination, error } => {
                vec![format!("add to {destination:?} failed: {error}")]
            }
            RolloutOutcome::Applied { .. } => Vec::new(),
        };
        let finished_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        self.report.store(Arc::new(RolloutReport {
            attempted_version: Some(version.to_string()),
            outcome: Some(outcome.label().to_string()),
            errors,
            finished_at,
        }));
    }
}

pub struct RolloutEngine {
    registry: Arc<ServiceRegistry>,
    live: LiveRouter,
    keyer: TokenKeyer,
    triggers: Mutex<Receiver<()>>,
    step: Mutex<()>,
}

impl RolloutEngine {
    pub fn new(
        registry: Arc<ServiceRegistry>,
        triggers: Receiver<()>,
        live: LiveRouter,
        keyer: TokenKeyer,
    ) -> Self {
        Self {
            registry,
            live,
            keyer,
            triggers: Mutex::new(triggers),
            step: Mutex::new(()),
        }
    }

    pub fn live(&self) -> &LiveRouter {
        &self.live
    }

    /// Runs one complete rollout against the current registry contents.
    pub async fn rollout_once(&self) -> RolloutOutcome {
        let _step = self.step.lock().await;

        let mut run = RouterRun::build(self.registry.snapshot(), new_version(), &self.keyer);
        run.resolve();
        let version = run.version.clone();

        let outcome = self.apply(run).await;
        ROLLOUTS.with_label_values(&[outcome.label()]).inc();
        self.live.record(&version, &outcome);
        outcome
    }

    async fn apply(&self, run: RouterRun) -> RolloutOutcome {
        if !run.is_valid() {
            log::error!(
                "router: configuration errors in version {}:\n\t{}",
                run.version,
                run.errors.join("\n\t")
            );
            return RolloutOutcome::Rejected { errors: run.errors };
        }

        let plan = run.distribution_plan();
        let mut added = BTreeSet::new();
        for (dest, config) in plan.messages(&run, ServiceConfigAction::Add) {
            let service = run.service(dest);
            log::debug!("router: add version {} to {}", run.version, service.name);
            if let Err(e) = service.client.update_service_config(config).await {
                log::error!(
                    "router: failed to add version {} to {}: {e}",
                    run.version,
                    service.name
                );
                send_remove(&run, &plan, |idx| added.contains(&idx)).await;
                return RolloutOutcome::AddFailed {
                    destination: service.name.clone(),
                    error: e.to_string(),
                };
            }
            added.insert(dest);
        }

        let run = Arc::new(run);
        let version = run.version.clone();
        if let Some(old) = self.live.swap(run) {
            retire(&old).await;
        }

        log::info!("router: version {version} live");
        RolloutOutcome::Applied { version }
    }
}

/// Best effort `Remove` of a run that is no longer live.
async fn retire(old: &RouterRun) {
    send_remove(old, &old.distribution_plan(), |_| true).await;
}

/// Sends `Remove` for `run` to the planned destinations matching `to`.
/// Failures are logged and otherwise ignored.
async fn send_remove<F>(run: &RouterRun, plan: &DistributionPlan, to: F)
where
    F: Fn(ServiceIdx) -> bool,
{
    for (dest, config) in plan.messages(run, ServiceConfigAction::Remove) {
        if !to(dest) {
            continue;
        }
        let service = run.service(dest);
        if let Err(e) = service.client.update_service_config(config).await {
            log::warn!(
                "router: failed to remove version {} from {}: {e}",
                run.version,
                service.name
            );
        }
    }
}

#[async_trait]
impl BackgroundService for RolloutEngine {
    async fn start(&self, mut shutdown: ShutdownWatch) {
        let mut triggers = self.triggers.lock().await;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        log::info!("Shutdown signal received, stopping rollout worker");
                        break;
                    }
                },

                trigger = triggers.recv() => {
                    match trigger {
                        Some(()) => {
                            self.rollout_once().await;
                        }
                        None => {
                            log::info!("Rollout queue closed, stopping rollout worker");
                            break;
                        }
                    }
                }
            }
        }
    }
}
