//! Workflow Controller - run state and notifications around the engine
//!
//! The controller owns at most one run at a time. It tracks run-level state
//! (running flag, current node, per-node results, progress, error) from the
//! engine's events and publishes an immutable [`RunState`] snapshot to
//! subscribers after every change.
//!
//! Every snapshot carries a `version` that grows with each change. The watch
//! channel is updated under the state lock, and subscribers never see a
//! version older than one they already received.
//!
//! `stop()`, the run timeout and dropping the `execute` future all cancel the
//! run's token, so in-flight executors are dropped at their next suspension
//! point.

use chrono::{DateTime, Utc};
use omniflow_core::{Connection, Node, NodeId, PortMap};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::{
    error_output, EngineEvent, EngineObserver, ExecutionOptions, WorkflowEngine,
    WorkflowExecutionResult,
};
use crate::error::{WorkflowError, WorkflowResult};

/// Snapshot of one run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunState {
    /// Unset before the first run
    pub run_id: Option<Uuid>,
    pub started_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub current_node_id: Option<NodeId>,
    /// Nodes that finished, successfully or not
    pub completed_node_ids: BTreeSet<NodeId>,
    pub node_results: BTreeMap<NodeId, PortMap>,
    pub node_inputs: BTreeMap<NodeId, PortMap>,
    /// Fraction of nodes processed, in `[0, 1]`
    pub progress: f64,
    pub error: Option<WorkflowError>,
    /// Increases by one with every published snapshot, across runs
    pub version: u64,
}

impl RunState {
    fn started(run_id: Uuid) -> Self {
        Self {
            run_id: Some(run_id),
            started_at: Some(Utc::now()),
            is_running: true,
            ..Self::default()
        }
    }

    /// Completed fraction of `total` nodes
    pub fn progress_for(&self, total: usize) -> f64 {
        if total == 0 {
            return 0.0;
        }
        (self.completed_node_ids.len() as f64 / total as f64).min(1.0)
    }
}

/// Handle returned by [`WorkflowController::on_state_change`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type StateCallback = Arc<dyn Fn(Arc<RunState>) + Send + Sync>;

#[derive(Clone)]
struct Subscriber {
    id: SubscriptionId,
    callback: StateCallback,
    /// Highest version handed to the callback
    delivered: Arc<AtomicU64>,
}

impl Subscriber {
    fn new(id: SubscriptionId, callback: StateCallback) -> Self {
        Self {
            id,
            callback,
            delivered: Arc::new(AtomicU64::new(0)),
        }
    }

    fn notify(&self, snapshot: &Arc<RunState>) {
        if self.delivered.fetch_max(snapshot.version, Ordering::SeqCst) < snapshot.version {
            (self.callback)(snapshot.clone());
        }
    }

    /// Like `notify`, but also delivers a version already seen
    fn replay(&self, snapshot: &Arc<RunState>) {
        if self.delivered.fetch_max(snapshot.version, Ordering::SeqCst) <= snapshot.version {
            (self.callback)(snapshot.clone());
        }
    }
}

struct Inner {
    state: Arc<RunState>,
    token: Option<CancellationToken>,
    total: usize,
    processed: usize,
    subscribers: Vec<Subscriber>,
}

/// Newest undelivered snapshot; one thread at a time drains it
#[derive(Default)]
struct Delivery {
    pending: Option<Arc<RunState>>,
    active: bool,
}

struct Shared {
    inner: Mutex<Inner>,
    delivery: Mutex<Delivery>,
    watch: watch::Sender<Arc<RunState>>,
    next_subscription: AtomicU64,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_delivery(&self) -> MutexGuard<'_, Delivery> {
        self.delivery.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Install `next` as the current snapshot. Must be called with the state
    /// lock held so versions reach the watch channel in order.
    fn commit(&self, inner: &mut Inner, mut next: RunState) -> Arc<RunState> {
        next.version = inner.state.version + 1;
        let snapshot = Arc::new(next);
        inner.state = snapshot.clone();
        self.watch.send_replace(snapshot.clone());
        snapshot
    }

    /// Hand `snapshot` to subscribers, outside the state lock.
    ///
    /// If another thread is already delivering, the snapshot is queued for it
    /// (replacing any older pending one) and this call returns at once.
    fn notify(&self, snapshot: Arc<RunState>) {
        {
            let mut delivery = self.lock_delivery();
            let newer = delivery
                .pending
                .as_ref()
                .map_or(true, |pending| pending.version < snapshot.version);
            if newer {
                delivery.pending = Some(snapshot);
            }
            if delivery.active {
                return;
            }
            delivery.active = true;
        }

        let _reset = DeliveryReset(self);
        loop {
            let next = {
                let mut delivery = self.lock_delivery();
                match delivery.pending.take() {
                    Some(next) => next,
                    None => {
                        delivery.active = false;
                        return;
                    }
                }
            };
            let subscribers = self.lock().subscribers.clone();
            for subscriber in &subscribers {
                subscriber.notify(&next);
            }
        }
    }

    /// Apply `change` if `run_id` is the current, still-running run
    fn update_running<F>(&self, run_id: Uuid, change: F) -> Option<Arc<RunState>>
    where
        F: FnOnce(&mut Inner, &mut RunState),
    {
        let mut inner = self.lock();
        if inner.state.run_id != Some(run_id) || !inner.state.is_running {
            return None;
        }
        let mut next = (*inner.state).clone();
        change(&mut *inner, &mut next);
        Some(self.commit(&mut inner, next))
    }

    fn apply_event(&self, run_id: Uuid, event: &EngineEvent) {
        let snapshot = self.update_running(run_id, |inner, state| {
            record_event(inner, state, event);
            if inner.total > 0 {
                state.progress = (inner.processed as f64 / inner.total as f64).min(1.0);
            }
        });

        if let Some(snapshot) = snapshot {
            self.notify(snapshot);
        }
    }

    /// End a running run with `error` and cancel its token.
    ///
    /// With `run_id` set, only that run is ended. Returns `false` when there
    /// was nothing to end.
    fn halt(&self, run_id: Option<Uuid>, error: WorkflowError) -> bool {
        let (snapshot, token) = {
            let mut inner = self.lock();
            if !inner.state.is_running || run_id.is_some_and(|id| inner.state.run_id != Some(id)) {
                return false;
            }
            let mut next = (*inner.state).clone();
            next.is_running = false;
            next.current_node_id = None;
            next.error = Some(error);
            let token = inner.token.take();
            (self.commit(&mut inner, next), token)
        };

        if let Some(token) = token {
            token.cancel();
        }
        self.notify(snapshot);
        true
    }
}

/// Frees the delivery slot if a subscriber callback panics
struct DeliveryReset<'a>(&'a Shared);

impl Drop for DeliveryReset<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.lock_delivery().active = false;
        }
    }
}

/// Ends the run as `Cancelled` if the `execute` future is dropped early
struct RunGuard {
    shared: Arc<Shared>,
    run_id: Uuid,
    token: CancellationToken,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.token.cancel();
        if self.shared.halt(Some(self.run_id), WorkflowError::Cancelled) {
            warn!(run_id = %self.run_id, "Workflow run dropped before completion");
        }
    }
}

fn record_event(inner: &mut Inner, state: &mut RunState, event: &EngineEvent) {
    match event {
        EngineEvent::NodeStarted { node_id, .. } => {
            state.current_node_id = Some(node_id.clone());
        }
        EngineEvent::NodeCompleted {
            node_id,
            inputs,
            outputs,
        } => {
            state.node_inputs.insert(node_id.clone(), inputs.clone());
            state.node_results.insert(node_id.clone(), outputs.clone());
            state.completed_node_ids.insert(node_id.clone());
            inner.processed += 1;
        }
        EngineEvent::NodeFailed {
            node_id,
            inputs,
            error,
        } => {
            state.node_inputs.insert(node_id.clone(), inputs.clone());
            state
                .node_results
                .insert(node_id.clone(), error_output(&error.failure_message()));
            state.completed_node_ids.insert(node_id.clone());
            inner.processed += 1;
        }
        EngineEvent::NodeSkipped { .. } => {
            inner.processed += 1;
        }
    }
}

/// Workflow Controller - one run at a time, observable state
pub struct WorkflowController {
    engine: WorkflowEngine,
    shared: Arc<Shared>,
}

impl WorkflowController {
    pub fn new(engine: WorkflowEngine) -> Self {
        let initial = Arc::new(RunState::default());
        let (watch, _) = watch::channel(initial.clone());
        Self {
            engine,
            shared: Arc::new(Shared {
                inner: Mutex::new(Inner {
                    state: initial,
                    token: None,
                    total: 0,
                    processed: 0,
                    subscribers: Vec::new(),
                }),
                delivery: Mutex::new(Delivery::default()),
                watch,
                next_subscription: AtomicU64::new(1),
            }),
        }
    }

    pub fn engine(&self) -> &WorkflowEngine {
        &self.engine
    }

    /// Run a workflow.
    ///
    /// Fails immediately with `RunAlreadyInProgress`, leaving the current run
    /// untouched, if a run is active. Per-node failures do not fail the run;
    /// they show up as `{error}` results. Dropping the returned future ends
    /// the run with `Cancelled`.
    pub async fn execute(
        &self,
        nodes: &[Node],
        connections: &[Connection],
        options: ExecutionOptions,
    ) -> WorkflowResult<WorkflowExecutionResult> {
        let run_id = Uuid::new_v4();
        let token = CancellationToken::new();

        let snapshot = {
            let mut inner = self.shared.lock();
            if inner.state.is_running {
                warn!("Rejecting workflow run: another run is in progress");
                return Err(WorkflowError::RunAlreadyInProgress);
            }
            inner.token = Some(token.clone());
            inner.total = nodes.iter().map(|n| n.id.as_str()).collect::<HashSet<_>>().len();
            inner.processed = 0;
            self.shared.commit(&mut inner, RunState::started(run_id))
        };
        let _guard = RunGuard {
            shared: self.shared.clone(),
            run_id,
            token: token.clone(),
        };
        self.shared.notify(snapshot);

        info!(run_id = %run_id, nodes = nodes.len(), "Workflow run started");

        let shared = self.shared.clone();
        let observer: EngineObserver = Arc::new(move |event: &EngineEvent| {
            shared.apply_event(run_id, event);
        });

        let run = self
            .engine
            .execute_with(nodes, connections, &options, &token, Some(observer));

        let outcome = match options.timeout_ms {
            Some(timeout_ms) => {
                match tokio::time::timeout(Duration::from_millis(timeout_ms), run).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        token.cancel();
                        Err(WorkflowError::Timeout { timeout_ms })
                    }
                }
            }
            None => run.await,
        };

        self.finish(run_id, outcome)
    }

    fn finish(
        &self,
        run_id: Uuid,
        outcome: WorkflowResult<WorkflowExecutionResult>,
    ) -> WorkflowResult<WorkflowExecutionResult> {
        let snapshot = {
            let mut inner = self.shared.lock();
            if inner.state.run_id != Some(run_id) {
                return outcome;
            }
            inner.token = None;

            // Stopped while the engine was still working
            if !inner.state.is_running {
                let error = inner
                    .state
                    .error
                    .clone()
                    .unwrap_or(WorkflowError::ManualStop);
                return Err(error);
            }

            let mut next = (*inner.state).clone();
            next.is_running = false;
            next.current_node_id = None;
            match &outcome {
                Ok(result) => {
                    for (node_id, outputs) in &result.node_outputs {
                        next.node_results.insert(node_id.clone(), outputs.clone());
                        next.completed_node_ids.insert(node_id.clone());
                    }
                    for (node_id, inputs) in &result.node_inputs {
                        next.node_inputs.insert(node_id.clone(), inputs.clone());
                    }
                    next.progress = 1.0;
                }
                Err(e) => {
                    next.error = Some(e.clone());
                }
            }
            self.shared.commit(&mut inner, next)
        };
        self.shared.notify(snapshot);

        match &outcome {
            Ok(result) => info!(
                run_id = %run_id,
                duration_ms = result.duration_ms,
                "Workflow run finished"
            ),
            Err(e) => warn!(run_id = %run_id, error = %e, "Workflow run failed"),
        }
        outcome
    }

    /// Stop the current run.
    ///
    /// Records `ManualStop`, notifies subscribers and cancels the run's token.
    /// Returns `false` when nothing is running.
    pub fn stop(&self) -> bool {
        let stopped = self.shared.halt(None, WorkflowError::ManualStop);
        if stopped {
            info!("Workflow run stopped");
        }
        stopped
    }

    /// Subscribe to state changes; the current state is delivered immediately
    pub fn on_state_change<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(Arc<RunState>) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.shared.next_subscription.fetch_add(1, Ordering::Relaxed));
        let subscriber = Subscriber::new(id, Arc::new(callback));
        let current = {
            let mut inner = self.shared.lock();
            inner.subscribers.push(subscriber.clone());
            inner.state.clone()
        };
        subscriber.replay(&current);
        id
    }

    /// Remove a subscription; `false` if it was not registered
    pub fn off_state_change(&self, id: SubscriptionId) -> bool {
        let mut inner = self.shared.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|sub| sub.id != id);
        inner.subscribers.len() != before
    }

    /// Snapshots as a watch channel
    pub fn watch(&self) -> watch::Receiver<Arc<RunState>> {
        self.shared.watch.subscribe()
    }

    /// Current snapshot
    pub fn state(&self) -> Arc<RunState> {
        self.shared.lock().state.clone()
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running
    }

    /// Recorded outputs of a node in the current (or last) run
    pub fn node_result(&self, node_id: &str) -> Option<PortMap> {
        self.state().node_results.get(node_id).cloned()
    }

    pub fn is_node_completed(&self, node_id: &str) -> bool {
        self.state().completed_node_ids.contains(node_id)
    }

    /// Completed fraction of `total` nodes
    pub fn progress_for(&self, total: usize) -> f64 {
        self.state().progress_for(total)
    }
}
