//! Testing utilities and mock implementations
//!
//! Mocks for the transport, reachability probe and queue, plus a loopback
//! broker stand-in for exercising the real MQTT client without a broker.

pub mod broker;
pub mod mocks;

pub use broker::FakeBroker;
pub use mocks::*;
