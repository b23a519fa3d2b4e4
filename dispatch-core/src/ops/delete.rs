use std::collections::HashSet;

use sqlx::{QueryBuilder, Sqlite};
use uuid::Uuid;

use crate::error::QueueError;

/// Removes a single dispatch from one processor's queue. The schema trigger
/// garbage-collects the dispatch row itself once its last queue entry is gone.
pub async fn delete_for_processor<'c, E>(
    executor: E,
    dispatch_id: Uuid,
    processor_id: &str,
) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    sqlx::query("DELETE FROM queue WHERE dispatch_id = ?1 AND processor_id = ?2")
        .bind(dispatch_id.to_string())
        .bind(processor_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Empties one processor's queue entirely.
pub async fn delete_all_for_processor<'c, E>(
    executor: E,
    processor_id: &str,
) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    sqlx::query("DELETE FROM queue WHERE processor_id = ?1")
        .bind(processor_id)
        .execute(executor)
        .await?;

    Ok(())
}

/// Drops queue entries for any processor not in `active` - used when the
/// registered processor set changes so stale queues do not pin dispatch rows
/// forever. An empty set clears every queue.
pub async fn delete_queues_not_in<'c, E>(
    executor: E,
    active: &HashSet<String>,
) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    if active.is_empty() {
        sqlx::query("DELETE FROM queue").execute(executor).await?;
        return Ok(());
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("DELETE FROM queue WHERE processor_id NOT IN (");
    let mut separated = builder.separated(", ");
    for processor in active {
        separated.push_bind(processor);
    }
    builder.push(")");
    builder.build().execute(executor).await?;

    Ok(())
}

/// Deletes dispatches whose timestamp predates `cutoff_ms`, along with their
/// queue entries (cascade).
pub async fn delete_expired<'c, E>(executor: E, cutoff_ms: i64) -> Result<u64, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query("DELETE FROM dispatch WHERE timestamp < ?1")
        .bind(cutoff_ms)
        .execute(executor)
        .await?;

    Ok(result.rows_affected())
}

/// Deletes the `count` oldest dispatches outright, across all processors,
/// along with their queue entries (cascade). Used to make room when the store
/// is at capacity or has been resized down.
pub async fn delete_oldest<'c, E>(executor: E, count: i64) -> Result<u64, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let result = sqlx::query(
        r#"
DELETE FROM dispatch WHERE id IN (
    SELECT id FROM dispatch ORDER BY timestamp ASC LIMIT ?1
)
        "#,
    )
    .bind(count)
    .execute(executor)
    .await?;

    Ok(result.rows_affected())
}
