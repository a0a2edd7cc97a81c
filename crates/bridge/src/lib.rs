pub mod backoff;
pub mod command;
pub mod gate;
pub mod presence;
pub mod supervisor;

#[cfg(test)]
pub(crate) mod test_support;

pub use backoff::{Backoff, BackoffPolicy};
pub use command::{CommandBridge, RejectReason, SubmitOutcome};
pub use gate::{GateSnapshot, Observation, ReadinessGate, Readiness, Transition};
pub use presence::PresenceManager;
pub use supervisor::Supervisor;
