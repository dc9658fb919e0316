//! Mock implementations for testing
//!
//! Provides a mock Transport, a mock Reachability probe and an in-memory
//! ReadingQueue so the relay can be exercised without a broker or a database.

use crate::protocol::{NewReading, Reading};
use crate::queue::{QueueError, QueueResult, ReadingQueue};
use crate::transport::mqtt::{ConnectionState, ConnectionStatus, MqttError};
use crate::transport::{Reachability, Transport};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

pub type PublishedMessage = (String, Vec<u8>);

/// Scripted outcome for one publish attempt
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    Confirmed,
    AckTimeout,
    Unconfirmed(String),
}

/// Mock transport for testing
#[derive(Debug)]
pub struct MockTransport {
    pub published_messages: Arc<Mutex<Vec<PublishedMessage>>>,
    script: Mutex<VecDeque<PublishOutcome>>,
    status: StdMutex<ConnectionStatus>,
    state_after_connect: ConnectionState,
    connect_calls: AtomicUsize,
    disconnect_calls: AtomicUsize,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self {
            published_messages: Arc::new(Mutex::new(Vec::new())),
            script: Mutex::new(VecDeque::new()),
            status: StdMutex::new(ConnectionStatus::new(ConnectionState::Disconnected)),
            state_after_connect: ConnectionState::Connected,
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
        }
    }
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that is already connected
    pub fn connected() -> Self {
        let transport = Self::default();
        transport.set_state(ConnectionState::Connected);
        transport
    }

    /// State entered when `connect()` is called
    pub fn with_state_after_connect(state: ConnectionState) -> Self {
        Self {
            state_after_connect: state,
            ..Self::default()
        }
    }

    pub fn set_state(&self, state: ConnectionState) {
        let mut status = self.status.lock().unwrap_or_else(|p| p.into_inner());
        status.state = state;
    }

    /// Queue the outcome of the next publish; unscripted publishes are confirmed
    pub async fn push_outcome(&self, outcome: PublishOutcome) {
        self.script.lock().await.push_back(outcome);
    }

    pub async fn get_published_messages(&self) -> Vec<PublishedMessage> {
        self.published_messages.lock().await.clone()
    }

    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }

    pub fn disconnect_calls(&self) -> usize {
        self.disconnect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    type Error = MqttError;

    async fn connect(&self) -> Result<(), Self::Error> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.set_state(self.state_after_connect);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.is_fatal() {
            self.set_state(ConnectionState::Disconnected);
        }
        Ok(())
    }

    async fn publish_confirmed(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        let state = self.connection_state();
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected(state));
        }

        // Every attempt reaches the wire, confirmed or not
        self.published_messages
            .lock()
            .await
            .push((topic.to_string(), payload));

        match self.script.lock().await.pop_front() {
            None | Some(PublishOutcome::Confirmed) => Ok(()),
            Some(PublishOutcome::AckTimeout) => Err(MqttError::AckTimeout(Duration::from_secs(10))),
            Some(PublishOutcome::Unconfirmed(reason)) => Err(MqttError::Unconfirmed(reason)),
        }
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.status
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|p| p.into_inner().clone())
    }
}

/// Mock reachability probe with a settable answer
#[derive(Debug)]
pub struct MockReachability {
    online: AtomicBool,
    probes: AtomicUsize,
}

impl MockReachability {
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            probes: AtomicUsize::new(0),
        }
    }

    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Reachability for MockReachability {
    async fn probe(&self) -> bool {
        self.probes.fetch_add(1, Ordering::SeqCst);
        self.online.load(Ordering::SeqCst)
    }

    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
struct MemoryQueueInner {
    readings: Vec<Reading>,
    next_id: i64,
    deleted: Vec<i64>,
}

/// In-memory reading queue with switchable failures
#[derive(Debug, Default)]
pub struct MemoryQueue {
    inner: StdMutex<MemoryQueueInner>,
    pub fail_reads: AtomicBool,
    pub fail_deletes: AtomicBool,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue pre-filled with readings, ids assigned in order
    pub fn with_readings(readings: impl IntoIterator<Item = NewReading>) -> QueueResult<Self> {
        let queue = Self::new();
        for reading in readings {
            queue.enqueue(&reading)?;
        }
        Ok(queue)
    }

    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Ids passed to `delete_by_id`, in call order
    pub fn deleted_ids(&self) -> Vec<i64> {
        self.lock().map(|inner| inner.deleted.clone()).unwrap_or_default()
    }

    fn lock(&self) -> QueueResult<std::sync::MutexGuard<'_, MemoryQueueInner>> {
        self.inner.lock().map_err(|_| QueueError::LockPoisoned)
    }

    fn oldest_first(readings: &[Reading]) -> Vec<Reading> {
        let mut sorted = readings.to_vec();
        sorted.sort_by_key(|r| (r.timestamp, r.id));
        sorted
    }
}

impl ReadingQueue for MemoryQueue {
    fn dequeue_oldest(&self) -> QueueResult<Option<Reading>> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(QueueError::InvalidData("simulated read failure".to_string()));
        }
        let inner = self.lock()?;
        Ok(inner
            .readings
            .iter()
            .min_by_key(|r| (r.timestamp, r.id))
            .cloned())
    }

    fn delete_by_id(&self, id: i64) -> QueueResult<()> {
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(QueueError::InvalidData("simulated delete failure".to_string()));
        }
        let mut inner = self.lock()?;
        inner.deleted.push(id);
        inner.readings.retain(|r| r.id != id);
        Ok(())
    }

    fn enqueue(&self, reading: &NewReading) -> QueueResult<Reading> {
        let mut inner = self.lock()?;
        inner.next_id += 1;
        let stored = reading.clone().with_id(inner.next_id);
        inner.readings.push(stored.clone());
        Ok(stored)
    }

    fn pending_count(&self) -> QueueResult<u64> {
        Ok(self.lock()?.readings.len() as u64)
    }

    fn peek(&self, limit: usize) -> QueueResult<Vec<Reading>> {
        let inner = self.lock()?;
        Ok(Self::oldest_first(&inner.readings)
            .into_iter()
            .take(limit)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_transport_requires_connection() {
        let transport = MockTransport::new();
        let result = transport.publish_confirmed("ups/data/x", vec![1]).await;
        assert!(matches!(
            result,
            Err(MqttError::NotConnected(ConnectionState::Disconnected))
        ));

        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        transport.publish_confirmed("ups/data/x", vec![1]).await.unwrap();
        assert_eq!(transport.get_published_messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_mock_transport_script() {
        let transport = MockTransport::connected();
        transport.push_outcome(PublishOutcome::AckTimeout).await;

        assert!(transport.publish_confirmed("t", vec![]).await.is_err());
        assert!(transport.publish_confirmed("t", vec![]).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_transport_keeps_fatal_on_disconnect() {
        let transport = MockTransport::with_state_after_connect(ConnectionState::FatalExit);
        transport.connect().await.unwrap();
        transport.disconnect().await.unwrap();
        assert!(transport.is_fatal());
        assert_eq!(transport.disconnect_calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_reachability() {
        let reachability = MockReachability::new(false);
        assert!(!reachability.probe().await);
        reachability.set_online(true);
        assert!(reachability.probe().await);
        assert_eq!(reachability.probe_count(), 2);
    }

    #[test]
    fn test_memory_queue_orders_by_timestamp() {
        let queue = MemoryQueue::with_readings([
            NewReading::from_voltages(300, 230, 120),
            NewReading::from_voltages(100, 231, 121),
            NewReading::from_voltages(100, 232, 122),
        ])
        .unwrap();

        let oldest = queue.dequeue_oldest().unwrap().unwrap();
        assert_eq!((oldest.id, oldest.timestamp), (2, 100));

        let ids: Vec<i64> = queue.peek(10).unwrap().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1]);
    }

    #[test]
    fn test_memory_queue_failures() {
        let queue = MemoryQueue::with_readings([NewReading::from_voltages(1, 230, 120)]).unwrap();
        queue.set_fail_reads(true);
        assert!(queue.dequeue_oldest().is_err());
        queue.set_fail_reads(false);

        queue.set_fail_deletes(true);
        assert!(queue.delete_by_id(1).is_err());
        assert_eq!(queue.pending_count().unwrap(), 1);
    }
}
