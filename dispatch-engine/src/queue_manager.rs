//! The in-flight layer over the durable queue store.
//!
//! Dequeued-but-unacknowledged dispatch ids are tracked per processor in
//! process memory only, purely as a read-side filter so concurrent cycles
//! never pull the same row twice. Two watch streams drive the delivery
//! loops: an enqueue epoch (bumped on every successful store) and an
//! in-flight epoch (bumped whenever any in-flight set shrinks, re-opening
//! the backpressure gate).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use dispatch_core::{Dispatch, QueueError, QueueStore};
use tokio::sync::watch;
use uuid::Uuid;

pub struct QueueManager {
    store: QueueStore,
    in_flight: Mutex<HashMap<String, HashSet<Uuid>>>,
    enqueue_tx: watch::Sender<u64>,
    in_flight_tx: watch::Sender<u64>,
}

impl QueueManager {
    pub fn new(store: QueueStore) -> Self {
        let (enqueue_tx, _) = watch::channel(0);
        let (in_flight_tx, _) = watch::channel(0);
        Self {
            store,
            in_flight: Mutex::new(HashMap::new()),
            enqueue_tx,
            in_flight_tx,
        }
    }

    /// Bumped after every successful store; delivery loops park on this when
    /// their queue runs dry.
    pub fn enqueued(&self) -> watch::Receiver<u64> {
        self.enqueue_tx.subscribe()
    }

    /// Bumped whenever an in-flight set shrinks; the backpressure gate
    /// re-checks on it.
    pub fn in_flight_changed(&self) -> watch::Receiver<u64> {
        self.in_flight_tx.subscribe()
    }

    pub fn in_flight_count(&self, processor_id: &str) -> usize {
        self.in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .get(processor_id)
            .map_or(0, HashSet::len)
    }

    /// Persists a batch for the given processors and wakes the delivery
    /// loops.
    pub async fn store(
        &self,
        dispatches: &[Dispatch],
        processors: &HashSet<String>,
    ) -> Result<(), QueueError> {
        self.store.store(dispatches, processors).await?;
        self.enqueue_tx.send_modify(|epoch| *epoch += 1);
        Ok(())
    }

    /// Pulls up to `limit` entries for a processor, skipping whatever is
    /// already in flight, and marks the returned batch in flight.
    pub async fn dequeue(
        &self,
        processor_id: &str,
        limit: i64,
    ) -> Result<Vec<Dispatch>, QueueError> {
        let excluding = self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .get(processor_id)
            .cloned()
            .unwrap_or_default();

        let batch = self.store.dequeue(processor_id, limit, &excluding).await?;

        if !batch.is_empty() {
            let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
            let entry = in_flight.entry(processor_id.to_string()).or_default();
            entry.extend(batch.iter().map(Dispatch::id));
        }
        Ok(batch)
    }

    /// Acknowledges a batch: deletes it from the processor's queue and takes
    /// it out of flight. The in-flight entries are cleared even when the
    /// delete fails - the rows are still queued and will simply be picked up
    /// again.
    pub async fn mark_processed(
        &self,
        dispatches: &[Dispatch],
        processor_id: &str,
    ) -> Result<(), QueueError> {
        let result = self.store.delete(dispatches, processor_id).await;
        self.remove_in_flight(dispatches, processor_id);
        result
    }

    /// Returns unacknowledged dispatches to the queue's visibility: they were
    /// never deleted, so dropping them from the in-flight set is all it takes
    /// for the next cycle to pick them up.
    pub fn release(&self, dispatches: &[Dispatch], processor_id: &str) {
        self.remove_in_flight(dispatches, processor_id);
    }

    /// Resets a processor's in-flight set entirely (flush/disable).
    pub fn clear_in_flight(&self, processor_id: &str) {
        let removed = self
            .in_flight
            .lock()
            .expect("in-flight lock poisoned")
            .remove(processor_id);
        if removed.is_some_and(|set| !set.is_empty()) {
            self.in_flight_tx.send_modify(|epoch| *epoch += 1);
        }
    }

    /// Drops queues (and in-flight state) for processors no longer active.
    pub async fn retain_processors(&self, active: &HashSet<String>) -> Result<(), QueueError> {
        self.store.delete_queues_not_in(active).await?;
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        let before: usize = in_flight.values().map(HashSet::len).sum();
        in_flight.retain(|processor, _| active.contains(processor));
        let after: usize = in_flight.values().map(HashSet::len).sum();
        drop(in_flight);
        if after < before {
            self.in_flight_tx.send_modify(|epoch| *epoch += 1);
        }
        Ok(())
    }

    pub async fn delete_all(&self, processor_id: &str) -> Result<(), QueueError> {
        self.store.delete_all(processor_id).await?;
        self.clear_in_flight(processor_id);
        Ok(())
    }

    pub async fn resize(&self, max_queue_size: i64) -> Result<(), QueueError> {
        self.store.resize(max_queue_size).await
    }

    pub async fn set_expiry(&self, expiry: Duration) -> Result<(), QueueError> {
        self.store.set_expiry(expiry).await
    }

    pub async fn size(&self) -> Result<i64, QueueError> {
        self.store.size().await
    }

    pub async fn size_for_processor(&self, processor_id: &str) -> Result<i64, QueueError> {
        self.store.size_for_processor(processor_id).await
    }

    fn remove_in_flight(&self, dispatches: &[Dispatch], processor_id: &str) {
        if dispatches.is_empty() {
            return;
        }
        let mut in_flight = self.in_flight.lock().expect("in-flight lock poisoned");
        if let Some(entry) = in_flight.get_mut(processor_id) {
            for dispatch in dispatches {
                entry.remove(&dispatch.id());
            }
            if entry.is_empty() {
                in_flight.remove(processor_id);
            }
        }
        drop(in_flight);
        self.in_flight_tx.send_modify(|epoch| *epoch += 1);
    }
}
