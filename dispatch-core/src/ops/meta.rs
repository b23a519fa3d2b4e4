use std::collections::HashMap;

use sqlx::{Row, Sqlite};

use crate::error::QueueError;

/// The number of distinct queued events, regardless of how many processor
/// queues each one sits in.
pub async fn count_dispatches<'c, E>(executor: E) -> Result<i64, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dispatch")
        .fetch_one(executor)
        .await?;

    Ok(count)
}

/// The total queue row count - each event counted once per processor queue it
/// belongs to. Distinct from [`count_dispatches`] and never interchangeable
/// with it.
pub async fn count_queue_rows<'c, E>(executor: E) -> Result<i64, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue")
        .fetch_one(executor)
        .await?;

    Ok(count)
}

/// The number of unexpired entries queued for one processor.
pub async fn count_for_processor<'c, E>(
    executor: E,
    processor_id: &str,
    expiry_cutoff_ms: i64,
) -> Result<i64, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let count: i64 = sqlx::query_scalar(
        r#"
SELECT COUNT(*)
FROM queue
JOIN dispatch ON dispatch.id = queue.dispatch_id
WHERE queue.processor_id = ?1 AND dispatch.timestamp >= ?2
        "#,
    )
    .bind(processor_id)
    .bind(expiry_cutoff_ms)
    .fetch_one(executor)
    .await?;

    Ok(count)
}

/// Unexpired entry counts keyed by processor id. Processors with empty queues
/// are simply absent.
pub async fn counts_by_processor<'c, E>(
    executor: E,
    expiry_cutoff_ms: i64,
) -> Result<HashMap<String, i64>, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
SELECT queue.processor_id, COUNT(*) AS entries
FROM queue
JOIN dispatch ON dispatch.id = queue.dispatch_id
WHERE dispatch.timestamp >= ?1
GROUP BY queue.processor_id
        "#,
    )
    .bind(expiry_cutoff_ms)
    .fetch_all(executor)
    .await?;

    let mut counts = HashMap::with_capacity(rows.len());
    for row in rows {
        let processor: String = row.try_get("processor_id")?;
        let entries: i64 = row.try_get("entries")?;
        counts.insert(processor, entries);
    }

    Ok(counts)
}
