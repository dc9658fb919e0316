//! Reading and wire-envelope types for the power-status relay
//!
//! Readings are the persisted records produced by the acquisition side; the
//! envelope is what goes over MQTT for each delivered reading.

pub mod envelope;
pub mod reading;
pub mod topics;

pub use envelope::*;
pub use reading::*;
pub use topics::*;
