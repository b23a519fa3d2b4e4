use std::collections::HashSet;

use sqlx::{QueryBuilder, Row, Sqlite};
use tracing::warn;
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::{timestamp_from_millis, Dispatch};

/// Pulls up to `limit` of the oldest queued dispatches for a processor, in
/// chronological order. Entries older than `expiry_cutoff_ms` are excluded
/// (but not deleted), as are any ids in `excluding`. A negative limit means
/// "no limit".
///
/// Rows stay queued: removal only happens via the delete ops once a processor
/// acknowledges delivery.
pub async fn dequeue_dispatches<'c, E>(
    executor: E,
    processor_id: &str,
    limit: i64,
    excluding: &HashSet<Uuid>,
    expiry_cutoff_ms: i64,
) -> Result<Vec<Dispatch>, QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    let mut builder: QueryBuilder<Sqlite> = QueryBuilder::new(
        r#"
SELECT dispatch.id, dispatch.timestamp, dispatch.payload
FROM dispatch
JOIN queue ON queue.dispatch_id = dispatch.id
WHERE queue.processor_id = "#,
    );
    builder.push_bind(processor_id);
    builder.push(" AND dispatch.timestamp >= ");
    builder.push_bind(expiry_cutoff_ms);

    if !excluding.is_empty() {
        builder.push(" AND dispatch.id NOT IN (");
        let mut separated = builder.separated(", ");
        for id in excluding {
            separated.push_bind(id.to_string());
        }
        builder.push(")");
    }

    builder.push(" ORDER BY dispatch.timestamp ASC");
    if limit >= 0 {
        builder.push(" LIMIT ");
        builder.push_bind(limit);
    }

    let rows = builder.build().fetch_all(executor).await?;

    let mut dispatches = Vec::with_capacity(rows.len());
    for row in rows {
        let id: String = row.try_get("id")?;
        let timestamp: i64 = row.try_get("timestamp")?;
        let payload: String = row.try_get("payload")?;
        match read_dispatch(&id, timestamp, &payload) {
            Ok(dispatch) => dispatches.push(dispatch),
            // A malformed row is dropped from the batch rather than wedging
            // the whole dequeue.
            Err(e) => warn!(dispatch_id = %id, error = %e, "skipping malformed queue row"),
        }
    }

    Ok(dispatches)
}

fn read_dispatch(id: &str, timestamp: i64, payload: &str) -> Result<Dispatch, QueueError> {
    let id = Uuid::parse_str(id)
        .map_err(|e| QueueError::CorruptRow(format!("invalid dispatch id {id:?}: {e}")))?;
    let payload = serde_json::from_str(payload)?;
    Ok(Dispatch::restore(id, timestamp_from_millis(timestamp), payload))
}
