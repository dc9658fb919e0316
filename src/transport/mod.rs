//! Transport layer for relaying readings
//!
//! This module provides the broker transport abstraction with its MQTT
//! implementation, and the network reachability probe that gates both
//! reconnection attempts and relay cycles.

use crate::transport::mqtt::{ConnectionState, ConnectionStatus};

pub mod mqtt;
pub mod reachability;

pub use reachability::{ReachabilityMonitor, Transition};

/// Transport trait for confirmed delivery to a broker
///
/// This trait provides an abstraction over the broker session so the relay
/// can be driven against an in-memory transport in tests.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Start the broker session. Returns once the session task is running;
    /// the handshake outcome is observed through [`Transport::connection_status`].
    async fn connect(&self) -> Result<(), Self::Error>;

    /// Stop the session and release broker resources
    async fn disconnect(&self) -> Result<(), Self::Error>;

    /// Publish with at-least-once delivery and wait for the broker acknowledgment
    async fn publish_confirmed(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error>;

    /// Current connection status snapshot
    fn connection_status(&self) -> ConnectionStatus;

    fn connection_state(&self) -> ConnectionState {
        self.connection_status().state
    }

    fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// Whether the session has given up for good
    fn is_fatal(&self) -> bool {
        self.connection_state() == ConnectionState::FatalExit
    }
}

/// Network reachability check shared by the connection manager and the relay loop
#[async_trait::async_trait]
pub trait Reachability: Send + Sync {
    /// Run a fresh probe and record the result
    async fn probe(&self) -> bool;

    /// Result of the most recent probe
    fn is_online(&self) -> bool;
}

/// Type alias for MQTT transport
pub type MqttTransport = mqtt::MqttClient;
