//! UPS power-status relay
//!
//! Store-and-forward delivery of UPS and mains power readings to an MQTT
//! broker over an unreliable link.
//!
//! # Overview
//!
//! - [`queue`] - durable, ordered queue of pending readings (SQLite)
//! - [`transport`] - network reachability probe and the MQTT session with
//!   supervised reconnection
//! - [`relay`] - the drain step and the fixed-interval orchestrator
//! - [`config`], [`observability`], [`shutdown`] - configuration, logging and
//!   metrics, process-wide shutdown
//!
//! # Quick Start
//!
//! ```rust
//! use ups_relay::protocol::{DeliveryEnvelope, NewReading, PowerStatus};
//! use ups_relay::queue::{ReadingQueue, SqliteQueue};
//!
//! let queue = SqliteQueue::open_in_memory().unwrap();
//! queue.enqueue(&NewReading::from_voltages(1_700_000_000, 231, 85)).unwrap();
//!
//! let reading = queue.dequeue_oldest().unwrap().unwrap();
//! assert_eq!(reading.ups_status, PowerStatus::Low);
//!
//! let envelope = DeliveryEnvelope::from_reading(&reading, "40A36BC38E91", "Office", 1_700_000_005);
//! let payload = envelope.to_payload().unwrap();
//! assert!(String::from_utf8(payload).unwrap().contains("\"devId\":\"40A36BC38E91\""));
//! ```

pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod queue;
pub mod relay;
pub mod shutdown;
pub mod testing;
pub mod transport;

pub use config::{ConfigError, RelayConfig};
pub use error::{RelayError, RelayResult};
pub use protocol::*;
pub use queue::{QueueError, ReadingQueue, SqliteQueue};
pub use relay::{ExitReason, Orchestrator, RelayPublisher};
pub use transport::mqtt::MqttClient;
