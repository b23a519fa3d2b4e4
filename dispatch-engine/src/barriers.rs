//! Barriers gate per-processor delivery. Each barrier is a named boolean
//! switch with an observable state; the coordinator combines every barrier
//! whose scope covers a processor into a single open/closed stream for that
//! processor's delivery loop.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarrierState {
    Open,
    Closed,
}

impl BarrierState {
    pub fn is_open(self) -> bool {
        matches!(self, BarrierState::Open)
    }
}

/// Which processors a barrier applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarrierScope {
    All,
    Processor(String),
}

impl BarrierScope {
    pub fn includes(&self, processor_id: &str) -> bool {
        match self {
            BarrierScope::All => true,
            BarrierScope::Processor(id) => id == processor_id,
        }
    }
}

pub trait Barrier: Send + Sync {
    fn id(&self) -> &str;
    fn subscribe(&self) -> watch::Receiver<BarrierState>;
}

/// A barrier flipped by explicit `open`/`close` calls. More involved barriers
/// (connectivity, batching) implement [`Barrier`] themselves.
pub struct ManualBarrier {
    id: String,
    tx: watch::Sender<BarrierState>,
}

impl ManualBarrier {
    pub fn new(id: impl Into<String>, initial: BarrierState) -> Self {
        let (tx, _) = watch::channel(initial);
        Self { id: id.into(), tx }
    }

    pub fn open(&self) {
        self.set(BarrierState::Open);
    }

    pub fn close(&self) {
        self.set(BarrierState::Closed);
    }

    fn set(&self, state: BarrierState) {
        self.tx.send_if_modified(|current| {
            if *current == state {
                false
            } else {
                *current = state;
                true
            }
        });
    }
}

impl Barrier for ManualBarrier {
    fn id(&self) -> &str {
        &self.id
    }

    fn subscribe(&self) -> watch::Receiver<BarrierState> {
        self.tx.subscribe()
    }
}

#[derive(Clone)]
struct Registration {
    barrier: Arc<dyn Barrier>,
    default_scopes: Vec<BarrierScope>,
    scopes: Vec<BarrierScope>,
}

/// The live set of registered barriers, published as a watch so coordinator
/// tasks re-combine whenever it changes.
pub struct BarrierRegistry {
    tx: watch::Sender<Vec<Registration>>,
}

impl Default for BarrierRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BarrierRegistry {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(Vec::new());
        Self { tx }
    }

    /// Registers a barrier with its default scopes. Registering an id that is
    /// already present replaces the earlier registration.
    pub fn register(&self, barrier: Arc<dyn Barrier>, scopes: Vec<BarrierScope>) {
        self.tx.send_modify(|entries| {
            entries.retain(|r| r.barrier.id() != barrier.id());
            entries.push(Registration {
                barrier,
                default_scopes: scopes.clone(),
                scopes,
            });
        });
    }

    pub fn unregister(&self, id: &str) {
        self.tx.send_modify(|entries| {
            entries.retain(|r| r.barrier.id() != id);
        });
    }

    /// Applies settings-driven scope overrides: a barrier named in the map
    /// takes the configured scopes, every other barrier reverts to its
    /// registration-time default.
    pub fn apply_scope_overrides(&self, overrides: &HashMap<String, Vec<BarrierScope>>) {
        self.tx.send_modify(|entries| {
            for entry in entries.iter_mut() {
                entry.scopes = overrides
                    .get(entry.barrier.id())
                    .cloned()
                    .unwrap_or_else(|| entry.default_scopes.clone());
            }
        });
    }

    fn subscribe(&self) -> watch::Receiver<Vec<Registration>> {
        self.tx.subscribe()
    }
}

/// Combines registered barriers into one state stream per processor.
#[derive(Clone)]
pub struct BarrierCoordinator {
    registry: Arc<BarrierRegistry>,
}

impl BarrierCoordinator {
    pub fn new(registry: Arc<BarrierRegistry>) -> Self {
        Self { registry }
    }

    /// The combined barrier state for one processor: the AND of every barrier
    /// whose scope includes it, recomputed whenever a contributing barrier or
    /// the registry changes. With no barriers in scope the state is Open. The
    /// stream only emits on change; the combiner task exits once the returned
    /// receiver is dropped.
    pub fn state_for(&self, processor_id: &str) -> watch::Receiver<BarrierState> {
        let processor_id = processor_id.to_string();
        let mut registry_rx = self.registry.subscribe();

        let mut feeds = in_scope_feeds(&registry_rx.borrow_and_update(), &processor_id);
        let (tx, rx) = watch::channel(combined_state(&mut feeds));

        tokio::spawn(async move {
            loop {
                let state = combined_state(&mut feeds);
                let emitted = tx.send_if_modified(|current| {
                    if *current == state {
                        false
                    } else {
                        *current = state;
                        true
                    }
                });
                if emitted {
                    debug!(processor = %processor_id, ?state, "barrier state changed");
                }

                tokio::select! {
                    () = tx.closed() => return,
                    changed = registry_rx.changed() => {
                        if changed.is_err() {
                            return;
                        }
                        feeds = in_scope_feeds(&registry_rx.borrow_and_update(), &processor_id);
                    }
                    () = any_feed_changed(&mut feeds) => {}
                }
            }
        });

        rx
    }
}

fn in_scope_feeds(
    entries: &[Registration],
    processor_id: &str,
) -> Vec<watch::Receiver<BarrierState>> {
    entries
        .iter()
        .filter(|r| r.scopes.iter().any(|s| s.includes(processor_id)))
        .map(|r| r.barrier.subscribe())
        .collect()
}

fn combined_state(feeds: &mut [watch::Receiver<BarrierState>]) -> BarrierState {
    let all_open = feeds
        .iter_mut()
        .all(|feed| feed.borrow_and_update().is_open());
    if all_open {
        BarrierState::Open
    } else {
        BarrierState::Closed
    }
}

/// Resolves when any contributing barrier changes state. With no barriers in
/// scope there is nothing to wait on, so this pends forever (the registry
/// stream is what wakes the combiner in that case).
async fn any_feed_changed(feeds: &mut [watch::Receiver<BarrierState>]) {
    if feeds.is_empty() {
        std::future::pending::<()>().await;
    }
    let waits = feeds.iter_mut().map(|feed| Box::pin(feed.changed()));
    drop(futures::future::select_all(waits).await);
}
