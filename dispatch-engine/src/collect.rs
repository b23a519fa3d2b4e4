//! Collectors enrich a freshly submitted dispatch with ambient data (device,
//! app, connectivity, ...) before it enters the queue. Each collector is
//! individually gated by the load rules under its own id.

use async_trait::async_trait;
use serde_json::Value;

#[async_trait]
pub trait Collector: Send + Sync {
    fn id(&self) -> &str;

    /// Data to shallow-merge into the dispatch payload.
    async fn collect(&self) -> Value;
}
