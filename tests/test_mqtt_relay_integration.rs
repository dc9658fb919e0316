//! Integration tests for the full relay against a loopback broker
//!
//! Exercises the real MQTT client, supervisor and SQLite queue together:
//! - confirmed delivery and deletion in timestamp order
//! - redelivery after the broker drops the session mid-publish
//! - clean disconnect on shutdown


use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use test_helpers::{reading, test_config, TOPIC};
use tokio::sync::mpsc;
use ups_relay::queue::{ReadingQueue, SqliteQueue};
use ups_relay::relay::{ExitReason, Orchestrator, RelayPublisher};
use ups_relay::shutdown;
use ups_relay::testing::broker::{BrokerSession, ConnectReturnCode, Packet, Publish};
use ups_relay::testing::{FakeBroker, MockReachability};
use ups_relay::transport::mqtt::MqttClient;

fn timestamp_of(publish: &Publish) -> i64 {
    let json: Value = serde_json::from_slice(&publish.payload).unwrap();
    json["timestamp"].as_i64().unwrap()
}

/// Acknowledge every publish until the client goes away, reporting each one
async fn ack_all(mut session: BrokerSession, seen: mpsc::UnboundedSender<Publish>) {
    while let Ok(Some(publish)) = session.next_publish().await {
        if session.puback(publish.pkid).await.is_err() {
            return;
        }
        let _ = seen.send(publish);
    }
}

async fn wait_until_drained(queue: &SqliteQueue) {
    tokio::time::timeout(Duration::from_secs(20), async {
        while queue.pending_count().unwrap() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    })
    .await
    .expect("Queue should drain");
}

struct Relay {
    queue: Arc<SqliteQueue>,
    trigger: shutdown::ShutdownTrigger,
    handle: tokio::task::JoinHandle<ExitReason>,
    _dir: tempfile::TempDir,
}

fn start_relay(broker: &FakeBroker, timestamps: &[i64]) -> Relay {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config(&broker.url(), &dir.path().join("sensor_data.db"));

    let queue = Arc::new(SqliteQueue::open(&config.queue.path, Duration::from_secs(1)).unwrap());
    for &timestamp in timestamps {
        queue.enqueue(&reading(timestamp)).unwrap();
    }

    let reachability = Arc::new(MockReachability::new(true));
    let (trigger, shutdown) = shutdown::channel();
    let transport =
        Arc::new(MqttClient::new(&config, reachability.clone(), shutdown.clone()).unwrap());

    let publisher = RelayPublisher::new(
        queue.clone(),
        transport.clone(),
        reachability.clone(),
        config.device.id.clone(),
        config.device.location.clone(),
        config.topic(),
    );
    let orchestrator = Orchestrator::new(
        publisher,
        transport,
        reachability,
        config.cycle_interval(),
        config.relay.max_wait_cycles,
        shutdown,
    );

    Relay {
        queue,
        trigger,
        handle: tokio::spawn(orchestrator.run()),
        _dir: dir,
    }
}

#[tokio::test]
async fn test_relay_delivers_backlog_in_order_and_disconnects() {
    let broker = FakeBroker::bind().await.unwrap();
    let relay = start_relay(&broker, &[1_700_000_120, 1_700_000_000, 1_700_000_060]);

    let mut session = broker.accept(ConnectReturnCode::Success).await.unwrap();
    let mut delivered = Vec::new();
    for _ in 0..3 {
        let publish = session.next_publish().await.unwrap().unwrap();
        assert_eq!(publish.topic, TOPIC);
        session.puback(publish.pkid).await.unwrap();
        delivered.push(timestamp_of(&publish));
    }
    assert_eq!(delivered, vec![1_700_000_000, 1_700_000_060, 1_700_000_120]);

    wait_until_drained(&relay.queue).await;

    relay.trigger.trigger();
    let reason = relay.handle.await.unwrap();
    assert_eq!(reason, ExitReason::Shutdown);

    // The client says goodbye instead of just dropping the socket
    let mut packet = Packet::PingReq;
    while packet == Packet::PingReq {
        packet = session.read_packet().await.unwrap();
    }
    assert_eq!(packet, Packet::Disconnect);
}

#[tokio::test]
async fn test_reading_is_redelivered_after_session_drop() {
    let broker = FakeBroker::bind().await.unwrap();
    let relay = start_relay(&broker, &[1_700_000_000, 1_700_000_060]);

    // First session: take the publish but never acknowledge it
    let mut session = broker.accept(ConnectReturnCode::Success).await.unwrap();
    let unacked = session.next_publish().await.unwrap().unwrap();
    assert_eq!(timestamp_of(&unacked), 1_700_000_000);
    session.sever();

    assert_eq!(relay.queue.pending_count().unwrap(), 2);

    // Second session after backoff: everything gets acknowledged
    let session = broker.accept(ConnectReturnCode::Success).await.unwrap();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let broker_side = tokio::spawn(ack_all(session, seen_tx));

    wait_until_drained(&relay.queue).await;
    relay.trigger.trigger();
    assert_eq!(relay.handle.await.unwrap(), ExitReason::Shutdown);
    broker_side.await.unwrap();

    let mut delivered = Vec::new();
    while let Ok(publish) = seen_rx.try_recv() {
        delivered.push(timestamp_of(&publish));
    }
    delivered.dedup();
    assert_eq!(delivered, vec![1_700_000_000, 1_700_000_060]);
}

#[tokio::test]
async fn test_rejected_credentials_stop_relay() {
    let broker = FakeBroker::bind().await.unwrap();
    let relay = start_relay(&broker, &[1_700_000_000]);

    let _session = broker.accept(ConnectReturnCode::NotAuthorized).await.unwrap();

    let reason = tokio::time::timeout(Duration::from_secs(10), relay.handle)
        .await
        .expect("Relay should stop on its own")
        .unwrap();

    assert!(matches!(reason, ExitReason::ConnectionFatal(_)));
    assert_eq!(reason.exit_code(), 1);
    assert_eq!(relay.queue.pending_count().unwrap(), 1);
}
