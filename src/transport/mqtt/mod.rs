//! MQTT client with supervised reconnection
//!
//! The module separates pure decisions from I/O:
//!
//! - [`connection`] - connection state, errors and broker options
//! - [`supervisor`] - reconnection state machine and backoff policy
//! - [`session`] - event loop driver and PUBACK correlation
//! - [`client`] - task wiring and the [`Transport`](crate::transport::Transport) implementation
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ups_relay::config::RelayConfig;
//! use ups_relay::shutdown::Shutdown;
//! use ups_relay::transport::mqtt::MqttClient;
//! use ups_relay::transport::ReachabilityMonitor;
//!
//! # tokio_test::block_on(async {
//! let config = RelayConfig::load_from_file("ups-relay.toml".as_ref())?;
//! let (host, port) = config.probe_target()?;
//! let reachability = Arc::new(ReachabilityMonitor::new(host, port, config.probe_timeout()));
//!
//! let client = MqttClient::new(&config, reachability, Shutdown::never())?;
//! client.connect().await?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! # });
//! ```

pub mod client;
pub mod connection;
pub mod session;
pub mod supervisor;

// Re-export public types for convenience
pub use client::MqttClient;
pub use connection::{ConnectionState, ConnectionStatus, MqttError};
pub use session::AckTracker;
pub use supervisor::{Backoff, ReconnectPolicy, SessionCommand, SessionEvent};
