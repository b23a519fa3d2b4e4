//! The consent gate: a single optional check between the after-collect
//! transform stage and the queue. Only an explicit denial blocks - implicit
//! decisions let the event through so a later explicit choice can still act
//! on queued data downstream.

use dispatch_core::Dispatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsentStatus {
    Granted,
    Denied,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentDecision {
    /// Whether the user made this choice, as opposed to a default.
    pub explicit: bool,
    pub status: ConsentStatus,
}

impl ConsentDecision {
    /// Only an explicit denial drops events before enqueue.
    pub fn blocks(&self) -> bool {
        self.explicit && self.status == ConsentStatus::Denied
    }
}

pub trait ConsentGate: Send + Sync {
    fn decision(&self) -> ConsentDecision;

    /// Stamps consent state into the payload of an admitted dispatch.
    fn apply(&self, dispatch: &mut Dispatch);
}
