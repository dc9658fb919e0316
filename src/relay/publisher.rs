//! Single-reading drain step
//!
//! One call moves at most one reading from the queue to the broker. The
//! reading is deleted only after the broker has acknowledged it; any failure
//! leaves it queued for the next cycle.

use crate::error::{RelayError, RelayResult};
use crate::observability::metrics;
use crate::protocol::{DeliveryEnvelope, Reading};
use crate::queue::{QueueError, QueueResult, ReadingQueue};
use crate::transport::mqtt::ConnectionState;
use crate::transport::{Reachability, Transport};
use std::sync::Arc;
use tracing::{debug, info};

/// Why a drain step did nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotReadyReason {
    Offline,
    NotConnected(ConnectionState),
}

/// Result of one drain step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    NotReady(NotReadyReason),
    Empty,
    Delivered { reading_id: i64 },
}

/// Moves readings from the queue to the broker, one per call
pub struct RelayPublisher<Q, T> {
    queue: Arc<Q>,
    transport: Arc<T>,
    reachability: Arc<dyn Reachability>,
    device_id: String,
    location: String,
    topic: String,
}

impl<Q, T> RelayPublisher<Q, T>
where
    Q: ReadingQueue + 'static,
    T: Transport,
{
    pub fn new(
        queue: Arc<Q>,
        transport: Arc<T>,
        reachability: Arc<dyn Reachability>,
        device_id: impl Into<String>,
        location: impl Into<String>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            transport,
            reachability,
            device_id: device_id.into(),
            location: location.into(),
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Run a queue operation on the blocking pool
    async fn with_queue<R, F>(&self, operation: F) -> QueueResult<R>
    where
        R: Send + 'static,
        F: FnOnce(&Q) -> QueueResult<R> + Send + 'static,
    {
        let queue = self.queue.clone();
        tokio::task::spawn_blocking(move || operation(&queue))
            .await
            .map_err(|e| QueueError::Worker(e.to_string()))?
    }

    fn envelope_for(&self, reading: &Reading) -> DeliveryEnvelope {
        DeliveryEnvelope::from_reading(
            reading,
            &self.device_id,
            &self.location,
            chrono::Utc::now().timestamp(),
        )
    }

    /// Deliver the oldest pending reading, if the link allows it
    pub async fn drain_one(&self) -> RelayResult<DrainOutcome> {
        let state = self.transport.connection_state();
        if state != ConnectionState::Connected {
            return Ok(DrainOutcome::NotReady(NotReadyReason::NotConnected(state)));
        }
        if !self.reachability.is_online() {
            return Ok(DrainOutcome::NotReady(NotReadyReason::Offline));
        }

        let Some(reading) = self.with_queue(|q| q.dequeue_oldest()).await? else {
            debug!("Queue empty, nothing to relay");
            return Ok(DrainOutcome::Empty);
        };

        let payload = self.envelope_for(&reading).to_payload()?;

        if let Err(e) = self.transport.publish_confirmed(&self.topic, payload).await {
            metrics().publish_failed();
            return Err(RelayError::publish_unconfirmed(reading.id, e.to_string()));
        }

        metrics().reading_published();
        let id = reading.id;
        self.with_queue(move |q| q.delete_by_id(id)).await?;

        info!(
            reading_id = id,
            timestamp = reading.timestamp,
            topic = %self.topic,
            "Reading delivered"
        );
        Ok(DrainOutcome::Delivered { reading_id: id })
    }
}
