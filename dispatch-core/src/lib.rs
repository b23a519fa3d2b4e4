mod config;
mod error;
mod store;
mod types;

// Low-level queue operations, exposed for tooling and tests that want to go
// straight at a connection rather than through a `QueueStore`.
pub mod ops;

// Config
pub use config::PoolConfig;
pub use config::DEFAULT_EXPIRY;
pub use config::DEFAULT_MAX_QUEUE_SIZE;

// Errors
pub use error::QueueError;

// Store
pub use store::QueueStore;

// Types
pub use types::keys;
pub use types::timestamp_from_millis;
pub use types::Dispatch;
pub use types::DispatchType;
