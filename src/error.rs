//! Top-level error type for relay operations
//!
//! Each layer has its own error enum; `RelayError` collects the queue and
//! transport ones at the orchestrator boundary, where every per-cycle failure
//! is logged and absorbed.

use crate::queue::QueueError;
use crate::transport::mqtt::MqttError;
use thiserror::Error;

/// Main error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Transport error: {0}")]
    Transport(#[from] MqttError),

    #[error("Publish of reading {reading_id} not confirmed: {reason}")]
    PublishUnconfirmed { reading_id: i64, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RelayError {
    /// Create publish-unconfirmed error
    pub fn publish_unconfirmed<S: Into<String>>(reading_id: i64, reason: S) -> Self {
        Self::PublishUnconfirmed {
            reading_id,
            reason: reason.into(),
        }
    }

    /// Whether the failure is a persistence failure (cycle skipped, relay continues)
    pub fn is_persistence_failure(&self) -> bool {
        matches!(self, RelayError::Queue(_))
    }

    /// Whether the failure left a reading queued for the next cycle
    pub fn is_publish_failure(&self) -> bool {
        matches!(
            self,
            RelayError::PublishUnconfirmed { .. } | RelayError::Transport(_)
        )
    }
}

/// Result type for relay operations
pub type RelayResult<T> = Result<T, RelayError>;
