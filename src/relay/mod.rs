//! Store-and-forward relay
//!
//! [`RelayPublisher`] moves one reading per call from the queue to the broker;
//! [`Orchestrator`] runs it on a fixed interval and decides when to stop.

pub mod orchestrator;
pub mod publisher;

pub use orchestrator::{ExitReason, Orchestrator, Watchdog};
pub use publisher::{DrainOutcome, NotReadyReason, RelayPublisher};
