mod barriers;
mod collect;
mod consent;
mod manager;
mod mapping;
mod payload;
mod processor;
mod queue_manager;
mod rules;
mod settings;
mod transform;

// Barriers
pub use barriers::Barrier;
pub use barriers::BarrierCoordinator;
pub use barriers::BarrierRegistry;
pub use barriers::BarrierScope;
pub use barriers::BarrierState;
pub use barriers::ManualBarrier;

// Collection
pub use collect::Collector;

// Consent
pub use consent::ConsentDecision;
pub use consent::ConsentGate;
pub use consent::ConsentStatus;

// Orchestration
pub use manager::DispatchHandle;
pub use manager::DispatchManager;
pub use manager::TrackResult;

// Mappings
pub use mapping::project;
pub use mapping::MappingOperation;
pub use mapping::MappingsEngine;

// Processors
pub use processor::Processor;
pub use processor::MAX_IN_FLIGHT;

// Queueing
pub use queue_manager::QueueManager;

// Rules
pub use rules::Condition;
pub use rules::LoadRuleEngine;
pub use rules::Rule;
pub use rules::RuleError;

// Settings
pub use settings::DispatchSettings;

// Transformations
pub use transform::DispatchScope;
pub use transform::ScopedTransformation;
pub use transform::Transformer;
pub use transform::TransformerCoordinator;

// Re-exported so embedders only need this crate for the common path.
pub use dispatch_core::{Dispatch, DispatchType, PoolConfig, QueueError, QueueStore};
