//! The dispatch orchestrator: wires collection, transformation, consent,
//! queueing, barriers, rules, mappings and delivery into the end-to-end
//! pipeline.
//!
//! Submission is non-blocking; everything after `track` returns runs on
//! spawned tasks. Each active processor gets its own delivery loop, gated by
//! its combined barrier state and an in-flight ceiling, and the whole
//! pipeline is torn down through a single cancellation handle.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dispatch_core::{Dispatch, QueueStore};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::barriers::{BarrierCoordinator, BarrierRegistry};
use crate::collect::Collector;
use crate::consent::ConsentGate;
use crate::mapping::MappingsEngine;
use crate::processor::{Processor, MAX_IN_FLIGHT};
use crate::queue_manager::QueueManager;
use crate::rules::LoadRuleEngine;
use crate::settings::DispatchSettings;
use crate::transform::{DispatchScope, TransformerCoordinator};

/// The outcome of one submission, reported on the `track` channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackResult {
    /// Enqueued for every active processor.
    Queued,
    /// Dropped before the queue: by a transformation, the consent gate, the
    /// absence of any active processor, or a persistence failure.
    Dropped,
}

/// Cancels the running pipeline when stopped (or dropped). Stopping cancels
/// every loop but never rolls back storage mutations that already committed.
pub struct DispatchHandle {
    cancel: CancellationToken,
}

impl DispatchHandle {
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for DispatchHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub struct DispatchManager {
    queue: QueueManager,
    barriers: Arc<BarrierRegistry>,
    barrier_coordinator: BarrierCoordinator,
    transformers: TransformerCoordinator,
    rules: LoadRuleEngine,
    mappings: MappingsEngine,
    consent: Option<Arc<dyn ConsentGate>>,
    collectors: Vec<Arc<dyn Collector>>,
    processors_tx: watch::Sender<Vec<Arc<dyn Processor>>>,
}

impl DispatchManager {
    pub fn new(store: QueueStore) -> Self {
        let barriers = Arc::new(BarrierRegistry::new());
        let (processors_tx, _) = watch::channel(Vec::new());
        Self {
            queue: QueueManager::new(store),
            barrier_coordinator: BarrierCoordinator::new(Arc::clone(&barriers)),
            barriers,
            transformers: TransformerCoordinator::new(),
            rules: LoadRuleEngine::new(),
            mappings: MappingsEngine::new(),
            consent: None,
            collectors: Vec::new(),
            processors_tx,
        }
    }

    pub fn with_consent(mut self, gate: Arc<dyn ConsentGate>) -> Self {
        self.consent = Some(gate);
        self
    }

    pub fn with_collector(mut self, collector: Arc<dyn Collector>) -> Self {
        self.collectors.push(collector);
        self
    }

    pub fn barriers(&self) -> &Arc<BarrierRegistry> {
        &self.barriers
    }

    pub fn transformers(&self) -> &TransformerCoordinator {
        &self.transformers
    }

    pub fn queue(&self) -> &QueueManager {
        &self.queue
    }

    /// Adds (or replaces, by id) an active processor. The supervisor observes
    /// the change and respawns the delivery loops against the new snapshot.
    pub fn register_processor(&self, processor: Arc<dyn Processor>) {
        self.processors_tx.send_modify(|processors| {
            processors.retain(|p| p.id() != processor.id());
            processors.push(processor);
        });
    }

    pub fn remove_processor(&self, id: &str) {
        self.processors_tx.send_modify(|processors| {
            processors.retain(|p| p.id() != id);
        });
    }

    fn processor_ids(&self) -> HashSet<String> {
        self.processors_tx
            .borrow()
            .iter()
            .map(|p| p.id().to_string())
            .collect()
    }

    /// Submits a dispatch. Never blocks and never fails: the returned channel
    /// eventually reports whether the event was queued or dropped.
    pub fn track(self: &Arc<Self>, dispatch: Dispatch) -> oneshot::Receiver<TrackResult> {
        let (tx, rx) = oneshot::channel();
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let result = this.admit(dispatch).await;
            // The caller may not care about the outcome.
            tx.send(result).ok();
        });
        rx
    }

    async fn admit(&self, mut dispatch: Dispatch) -> TrackResult {
        for collector in &self.collectors {
            if self.rules.allows(collector.id(), &dispatch) {
                dispatch.merge(collector.collect().await);
            }
        }

        let Some(mut dispatch) = self
            .transformers
            .transform(dispatch, &DispatchScope::AfterCollect)
            .await
        else {
            return TrackResult::Dropped;
        };

        if let Some(gate) = &self.consent {
            if gate.decision().blocks() {
                debug!(dispatch = %dispatch.log_description(), "dropped by consent");
                return TrackResult::Dropped;
            }
            gate.apply(&mut dispatch);
        }

        let active = self.processor_ids();
        if active.is_empty() {
            warn!(
                dispatch = %dispatch.log_description(),
                "no active processors, dropping"
            );
            return TrackResult::Dropped;
        }

        match self.queue.store(&[dispatch], &active).await {
            Ok(()) => TrackResult::Queued,
            Err(e) => {
                error!(error = %e, "failed to enqueue dispatch");
                TrackResult::Dropped
            }
        }
    }

    /// Starts the pipeline: a settings applier plus one delivery loop per
    /// active processor, supervised across processor-set changes.
    pub fn start(
        self: &Arc<Self>,
        settings: watch::Receiver<DispatchSettings>,
    ) -> DispatchHandle {
        let cancel = CancellationToken::new();
        info!("starting dispatch pipeline");

        let this = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move { this.settings_loop(settings, token).await });

        let this = Arc::clone(self);
        let token = cancel.clone();
        tokio::spawn(async move { this.supervise(token).await });

        DispatchHandle { cancel }
    }

    async fn settings_loop(
        &self,
        mut settings_rx: watch::Receiver<DispatchSettings>,
        cancel: CancellationToken,
    ) {
        loop {
            let settings = settings_rx.borrow_and_update().clone();
            self.apply_settings(&settings).await;
            tokio::select! {
                () = cancel.cancelled() => return,
                changed = settings_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn apply_settings(&self, settings: &DispatchSettings) {
        if let Some(max) = settings.max_queue_size {
            if let Err(e) = self.queue.resize(max).await {
                error!(error = %e, "failed to resize queue");
            }
        }
        if let Some(seconds) = settings.expiry_seconds {
            if let Err(e) = self.queue.set_expiry(Duration::from_secs(seconds)).await {
                error!(error = %e, "failed to update queue expiry");
            }
        }
        self.rules
            .rebuild(settings.rules.clone(), settings.load_rules.clone());
        self.mappings.rebuild(settings.mappings.clone());
        self.barriers.apply_scope_overrides(&settings.barrier_scopes);
        debug!("applied dispatch settings");
    }

    // Respawns the per-processor delivery loops whenever the processor set
    // changes; each generation gets a child token so stale loops wind down
    // at their next await point.
    async fn supervise(self: Arc<Self>, cancel: CancellationToken) {
        let mut processors_rx = self.processors_tx.subscribe();
        loop {
            let snapshot = processors_rx.borrow_and_update().clone();
            let active: HashSet<String> =
                snapshot.iter().map(|p| p.id().to_string()).collect();
            if !active.is_empty() {
                if let Err(e) = self.queue.retain_processors(&active).await {
                    error!(error = %e, "failed to drop stale processor queues");
                }
            }

            let generation = cancel.child_token();
            for processor in snapshot {
                let this = Arc::clone(&self);
                let token = generation.clone();
                tokio::spawn(async move { this.delivery_loop(processor, token).await });
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    generation.cancel();
                    return;
                }
                changed = processors_rx.changed() => {
                    generation.cancel();
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn delivery_loop(&self, processor: Arc<dyn Processor>, cancel: CancellationToken) {
        let id = processor.id().to_string();
        let mut barrier_rx = self.barrier_coordinator.state_for(&id);
        let mut enqueued_rx = self.queue.enqueued();
        let mut in_flight_rx = self.queue.in_flight_changed();
        debug!(processor = %id, "delivery loop started");

        loop {
            // Closed barrier pauses the loop; it resumes from the top on
            // re-open.
            tokio::select! {
                () = cancel.cancelled() => return,
                open = barrier_rx.wait_for(|state| state.is_open()) => {
                    if open.is_err() {
                        return;
                    }
                }
            }

            // Backpressure: no pulls while the in-flight ceiling is reached;
            // re-check whenever the in-flight count changes.
            while self.queue.in_flight_count(&id) >= MAX_IN_FLIGHT {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = in_flight_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
            }

            let batch = match self.queue.dequeue(&id, processor.dispatch_limit()).await {
                Ok(batch) => batch,
                Err(e) => {
                    error!(processor = %id, error = %e, "dequeue failed");
                    Vec::new()
                }
            };

            if batch.is_empty() {
                tokio::select! {
                    () = cancel.cancelled() => return,
                    changed = enqueued_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                    }
                }
                continue;
            }

            let full_batch = batch.len() as i64 == processor.dispatch_limit();
            self.deliver_batch(processor.as_ref(), batch).await;

            if full_batch {
                // A full pull suggests a backlog: drain it before waiting.
                continue;
            }
            tokio::select! {
                () = cancel.cancelled() => return,
                changed = enqueued_rx.changed() => {
                    if changed.is_err() {
                        return;
                    }
                }
            }
        }
    }

    async fn deliver_batch(&self, processor: &dyn Processor, batch: Vec<Dispatch>) {
        let id = processor.id();
        let scope = DispatchScope::Processor(id.to_string());

        // Processor-scope transformations. A transformer's decision to drop
        // is final, so dropped dispatches are acknowledged without delivery.
        let transformed = self
            .transformers
            .transform_batch(batch.clone(), &scope)
            .await;
        let surviving: HashSet<Uuid> = transformed.iter().map(Dispatch::id).collect();
        let dropped: Vec<Dispatch> = batch
            .into_iter()
            .filter(|d| !surviving.contains(&d.id()))
            .collect();
        if !dropped.is_empty() {
            debug!(processor = %id, count = dropped.len(), "transformations dropped dispatches");
            self.acknowledge(&dropped, id).await;
        }

        // Rule rejection is policy, not an error: rejected dispatches are
        // processed without being delivered.
        let (accepted, rejected) = self.rules.evaluate(id, transformed);
        if !rejected.is_empty() {
            debug!(processor = %id, count = rejected.len(), "load rules rejected dispatches");
            self.acknowledge(&rejected, id).await;
        }
        if accepted.is_empty() {
            return;
        }

        let mapped: Vec<Dispatch> = accepted
            .iter()
            .map(|d| self.mappings.map(id, d.clone()))
            .collect();

        let completed: HashSet<Uuid> = processor
            .deliver(mapped)
            .await
            .iter()
            .map(Dispatch::id)
            .collect();

        // Ack only what the processor reported; the rest stays queued and is
        // offered again on a later cycle.
        let (acked, unacked): (Vec<Dispatch>, Vec<Dispatch>) = accepted
            .into_iter()
            .partition(|d| completed.contains(&d.id()));
        if !unacked.is_empty() {
            debug!(processor = %id, count = unacked.len(), "unacknowledged dispatches remain queued");
            self.queue.release(&unacked, id);
        }
        self.acknowledge(&acked, id).await;
    }

    async fn acknowledge(&self, dispatches: &[Dispatch], processor_id: &str) {
        if dispatches.is_empty() {
            return;
        }
        if let Err(e) = self.queue.mark_processed(dispatches, processor_id).await {
            error!(processor = %processor_id, error = %e, "failed to delete processed dispatches");
        }
    }
}
