//! The delivery seam: a processor is a named consumer of queued dispatches,
//! typically wrapping a network client.

use async_trait::async_trait;
use dispatch_core::Dispatch;

/// Maximum dispatches a processor may have dequeued-but-unacknowledged at
/// once; the delivery loop stops pulling until the count drops back under.
pub const MAX_IN_FLIGHT: usize = 50;

const DEFAULT_DISPATCH_LIMIT: i64 = 10;

#[async_trait]
pub trait Processor: Send + Sync {
    fn id(&self) -> &str;

    /// How many dispatches to pull per dequeue cycle.
    fn dispatch_limit(&self) -> i64 {
        DEFAULT_DISPATCH_LIMIT
    }

    /// Delivers a batch, returning the subset that was successfully handled.
    /// Dispatches missing from the return value are not an error: they stay
    /// queued and will be offered again on a later cycle.
    async fn deliver(&self, batch: Vec<Dispatch>) -> Vec<Dispatch>;
}
