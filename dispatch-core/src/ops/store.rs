use std::collections::HashSet;

use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::error::QueueError;
use crate::types::Dispatch;

/// Inserts the dispatch row, or overwrites its payload and position if a row
/// with the same id already exists.
pub async fn upsert_dispatch<'c, E>(executor: E, dispatch: &Dispatch) -> Result<(), QueueError>
where
    E: sqlx::Executor<'c, Database = Sqlite>,
{
    sqlx::query(
        r#"
INSERT INTO dispatch (id, timestamp, payload)
VALUES (?1, ?2, ?3)
ON CONFLICT (id) DO UPDATE SET
    timestamp = excluded.timestamp,
    payload = excluded.payload
        "#,
    )
    .bind(dispatch.id().to_string())
    .bind(dispatch.created().timestamp_millis())
    .bind(dispatch.payload().to_string())
    .execute(executor)
    .await?;

    Ok(())
}

/// Makes `processors` the exact queue membership of a dispatch: rows for
/// processors outside the set are removed, missing rows are created. Storing
/// is a replacement of membership, not an append.
pub async fn replace_queue_membership(
    conn: &mut SqliteConnection,
    dispatch_id: Uuid,
    processors: &HashSet<String>,
) -> Result<(), QueueError> {
    // New rows go in before stale rows come out: deleting first can remove
    // the dispatch's last queue row, at which point the cleanup trigger drops
    // the dispatch itself and the inserts hit a dangling foreign key.
    for processor in processors {
        sqlx::query(
            "INSERT OR IGNORE INTO queue (dispatch_id, processor_id) VALUES (?1, ?2)",
        )
        .bind(dispatch_id.to_string())
        .bind(processor)
        .execute(&mut *conn)
        .await?;
    }

    let mut builder: QueryBuilder<Sqlite> =
        QueryBuilder::new("DELETE FROM queue WHERE dispatch_id = ");
    builder.push_bind(dispatch_id.to_string());
    builder.push(" AND processor_id NOT IN (");
    let mut separated = builder.separated(", ");
    for processor in processors {
        separated.push_bind(processor);
    }
    builder.push(")");
    builder.build().execute(&mut *conn).await?;

    Ok(())
}
