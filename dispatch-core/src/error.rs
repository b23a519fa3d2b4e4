use thiserror::Error;

/// Errors surfaced by the queue store.
///
/// Storage faults are deliberately collapsed into a single kind with an
/// engine-neutral message; the underlying driver error is retained as the
/// source for logging, but callers are expected to treat any persistence
/// failure uniformly (log it, abandon the operation, keep the pipeline
/// running).
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("persistence operation failed")]
    Storage(#[from] sqlx::Error),
    #[error("could not serialize dispatch payload: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("persisted dispatch row is malformed: {0}")]
    CorruptRow(String),
}
