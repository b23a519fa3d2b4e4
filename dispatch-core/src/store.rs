use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use sqlx::SqlitePool;
use tracing::debug;
use uuid::Uuid;

use crate::config::{PoolConfig, DEFAULT_EXPIRY, DEFAULT_MAX_QUEUE_SIZE};
use crate::error::QueueError;
use crate::ops;
use crate::types::Dispatch;

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_queue_size: i64,
    expiry: Duration,
}

/// A durable, multi-consumer event queue backed by sqlite.
///
/// Events are stored once and fan out to per-processor queues; an event row
/// lives exactly as long as at least one queue still references it. All
/// mutating operations that touch more than one row run in a transaction, so
/// a crash can never leave an event half-queued.
///
/// The store is cheap to clone-share behind an `Arc` and safe to use from
/// concurrent tasks; the capacity and expiry settings are read at the top of
/// each operation and never held across an await.
pub struct QueueStore {
    pool: SqlitePool,
    limits: Mutex<Limits>,
}

impl QueueStore {
    /// Connects to the database, runs any pending migrations and returns a
    /// store with the default capacity and expiry.
    pub async fn new(config: &PoolConfig) -> Result<Self, QueueError> {
        let pool = config.connect().await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| QueueError::Storage(e.into()))?;
        Ok(Self::from_pool(pool))
    }

    /// Wraps an already-connected pool. The caller is responsible for having
    /// run migrations.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self {
            pool,
            limits: Mutex::new(Limits {
                max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
                expiry: DEFAULT_EXPIRY,
            }),
        }
    }

    pub fn max_queue_size(&self) -> i64 {
        self.limits().max_queue_size
    }

    pub fn expiry(&self) -> Duration {
        self.limits().expiry
    }

    fn limits(&self) -> Limits {
        *self.limits.lock().expect("limits lock poisoned")
    }

    fn expiry_cutoff_ms(&self) -> i64 {
        let expiry = self.limits().expiry;
        Utc::now().timestamp_millis() - i64::try_from(expiry.as_millis()).unwrap_or(i64::MAX)
    }

    /// Persists a batch of dispatches, each queued for exactly the given set
    /// of processors.
    ///
    /// Re-storing an already-queued dispatch updates its payload in place and
    /// replaces its queue membership with `processors` - it never duplicates
    /// the event, and processors outside the set no longer see it. When the
    /// batch would push the store past its capacity, the oldest events are
    /// evicted first (including, if the batch itself exceeds capacity, the
    /// oldest events of the batch).
    pub async fn store(
        &self,
        dispatches: &[Dispatch],
        processors: &HashSet<String>,
    ) -> Result<(), QueueError> {
        if dispatches.is_empty() || processors.is_empty() {
            return Ok(());
        }
        let max = self.limits().max_queue_size;

        let mut txn = self.pool.begin().await?;

        // Only the newest `max` entries of an oversized batch can ever
        // survive, so skip the rest up front.
        let accepted = if max >= 0 && dispatches.len() as i64 > max {
            &dispatches[dispatches.len() - max as usize..]
        } else {
            dispatches
        };

        if max >= 0 {
            let size = ops::meta::count_dispatches(&mut *txn).await?;
            let overflow = size + accepted.len() as i64 - max;
            if overflow > 0 {
                let evicted = ops::delete::delete_oldest(&mut *txn, overflow).await?;
                debug!(evicted, "evicted oldest events to make room");
            }
        }

        for dispatch in accepted {
            ops::store::upsert_dispatch(&mut *txn, dispatch).await?;
            ops::store::replace_queue_membership(&mut *txn, dispatch.id(), processors).await?;
        }

        txn.commit().await?;
        Ok(())
    }

    /// Reads up to `limit` of the oldest unexpired entries queued for a
    /// processor, oldest first, skipping any ids in `excluding`. A negative
    /// limit returns everything. Entries are not removed; call
    /// [`QueueStore::delete`] once the processor has accepted them.
    pub async fn dequeue(
        &self,
        processor_id: &str,
        limit: i64,
        excluding: &HashSet<Uuid>,
    ) -> Result<Vec<Dispatch>, QueueError> {
        ops::dequeue::dequeue_dispatches(
            &self.pool,
            processor_id,
            limit,
            excluding,
            self.expiry_cutoff_ms(),
        )
        .await
    }

    /// Removes the given dispatches from one processor's queue. Events no
    /// longer referenced by any queue are garbage-collected by the schema.
    pub async fn delete(
        &self,
        dispatches: &[Dispatch],
        processor_id: &str,
    ) -> Result<(), QueueError> {
        if dispatches.is_empty() {
            return Ok(());
        }
        let mut txn = self.pool.begin().await?;
        for dispatch in dispatches {
            ops::delete::delete_for_processor(&mut *txn, dispatch.id(), processor_id).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Empties one processor's queue.
    pub async fn delete_all(&self, processor_id: &str) -> Result<(), QueueError> {
        ops::delete::delete_all_for_processor(&self.pool, processor_id).await
    }

    /// Drops the queues of any processor not in `active`. An empty set drops
    /// every queue.
    pub async fn delete_queues_not_in(&self, active: &HashSet<String>) -> Result<(), QueueError> {
        ops::delete::delete_queues_not_in(&self.pool, active).await
    }

    /// Changes the capacity, evicting the oldest events if the store is now
    /// over it. Expired entries are purged first so they do not count against
    /// the new capacity. A negative size is ignored.
    pub async fn resize(&self, max_queue_size: i64) -> Result<(), QueueError> {
        if max_queue_size < 0 {
            return Ok(());
        }
        let cutoff = self.expiry_cutoff_ms();
        self.limits.lock().expect("limits lock poisoned").max_queue_size = max_queue_size;

        let mut txn = self.pool.begin().await?;
        ops::delete::delete_expired(&mut *txn, cutoff).await?;
        let size = ops::meta::count_dispatches(&mut *txn).await?;
        if size > max_queue_size {
            ops::delete::delete_oldest(&mut *txn, size - max_queue_size).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    /// Changes the entry expiry and purges everything already outside the new
    /// window.
    pub async fn set_expiry(&self, expiry: Duration) -> Result<(), QueueError> {
        self.limits.lock().expect("limits lock poisoned").expiry = expiry;
        let purged = ops::delete::delete_expired(&self.pool, self.expiry_cutoff_ms()).await?;
        if purged > 0 {
            debug!(purged, "purged expired events");
        }
        Ok(())
    }

    /// The number of distinct queued events.
    pub async fn size(&self) -> Result<i64, QueueError> {
        ops::meta::count_dispatches(&self.pool).await
    }

    /// The summed length of all processor queues. An event queued for three
    /// processors counts three times here and once in [`QueueStore::size`].
    pub async fn processor_queue_size(&self) -> Result<i64, QueueError> {
        ops::meta::count_queue_rows(&self.pool).await
    }

    /// The number of unexpired entries queued for one processor.
    pub async fn size_for_processor(&self, processor_id: &str) -> Result<i64, QueueError> {
        ops::meta::count_for_processor(&self.pool, processor_id, self.expiry_cutoff_ms()).await
    }

    /// Unexpired entry counts keyed by processor id.
    pub async fn sizes_by_processor(&self) -> Result<HashMap<String, i64>, QueueError> {
        ops::meta::counts_by_processor(&self.pool, self.expiry_cutoff_ms()).await
    }
}
