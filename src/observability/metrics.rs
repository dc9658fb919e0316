//! Thread-safe metrics collection system
//!
//! Provides atomic counters for relay cycles, broker connectivity and network
//! reachability. A snapshot is logged on shutdown and printed by the CLI.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

/// Global metrics collector instance
pub static METRICS: Lazy<MetricsCollector> = Lazy::new(MetricsCollector::new);

/// Get reference to global metrics collector
pub fn metrics() -> &'static MetricsCollector {
    &METRICS
}

/// Thread-safe metrics collector using atomics and mutexes
pub struct MetricsCollector {
    // Relay cycle metrics
    cycles_run: AtomicU64,
    cycles_skipped_offline: AtomicU64,
    cycles_waiting: AtomicU64,
    readings_published: AtomicU64,
    publish_failures: AtomicU64,
    queue_errors: AtomicU64,
    last_publish_time: AtomicU64,

    // MQTT metrics
    mqtt_connected: AtomicBool,
    connection_attempts: AtomicU64,
    connections_established: AtomicU64,
    connection_failures: AtomicU64,
    connections_lost: AtomicU64,
    connection_start_time: AtomicU64,
    connection_state: Mutex<String>,

    // Reachability metrics
    network_online: AtomicBool,
    network_deferrals: AtomicU64,
    network_transitions: AtomicU64,

    uptime_start: AtomicU64,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            cycles_run: AtomicU64::new(0),
            cycles_skipped_offline: AtomicU64::new(0),
            cycles_waiting: AtomicU64::new(0),
            readings_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
            queue_errors: AtomicU64::new(0),
            last_publish_time: AtomicU64::new(0),
            mqtt_connected: AtomicBool::new(false),
            connection_attempts: AtomicU64::new(0),
            connections_established: AtomicU64::new(0),
            connection_failures: AtomicU64::new(0),
            connections_lost: AtomicU64::new(0),
            connection_start_time: AtomicU64::new(0),
            connection_state: Mutex::new("disconnected".to_string()),
            network_online: AtomicBool::new(false),
            network_deferrals: AtomicU64::new(0),
            network_transitions: AtomicU64::new(0),
            uptime_start: AtomicU64::new(current_timestamp()),
        }
    }

    // Relay cycle metrics
    pub fn cycle_started(&self) {
        self.cycles_run.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_skipped_offline(&self) {
        self.cycles_skipped_offline.fetch_add(1, Ordering::Relaxed);
    }

    pub fn cycle_waiting_for_connection(&self) {
        self.cycles_waiting.fetch_add(1, Ordering::Relaxed);
    }

    pub fn reading_published(&self) {
        self.readings_published.fetch_add(1, Ordering::Relaxed);
        self.last_publish_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn publish_failed(&self) {
        self.publish_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn queue_error(&self) {
        self.queue_errors.fetch_add(1, Ordering::Relaxed);
    }

    // MQTT metrics
    pub fn mqtt_connection_attempt(&self) {
        self.connection_attempts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn mqtt_connection_established(&self) {
        self.connections_established.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(true, Ordering::Relaxed);
        self.connection_start_time
            .store(current_timestamp(), Ordering::Relaxed);
    }

    pub fn mqtt_connection_failed(&self) {
        self.connection_failures.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn mqtt_connection_lost(&self) {
        self.connections_lost.fetch_add(1, Ordering::Relaxed);
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.connection_start_time.store(0, Ordering::Relaxed);
    }

    pub fn set_connection_state(&self, state: &str) {
        if let Ok(mut current) = self.connection_state.lock() {
            if *current != state {
                *current = state.to_string();
            }
        }
        if state != "connected" {
            self.mqtt_connected.store(false, Ordering::Relaxed);
        }
    }

    // Reachability metrics
    pub fn network_probed(&self, online: bool) {
        let previous = self.network_online.swap(online, Ordering::Relaxed);
        if previous != online {
            self.network_transitions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn network_deferral(&self) {
        self.network_deferrals.fetch_add(1, Ordering::Relaxed);
    }

    /// Reset all metrics (useful for testing)
    pub fn reset(&self) {
        for counter in [
            &self.cycles_run,
            &self.cycles_skipped_offline,
            &self.cycles_waiting,
            &self.readings_published,
            &self.publish_failures,
            &self.queue_errors,
            &self.last_publish_time,
            &self.connection_attempts,
            &self.connections_established,
            &self.connection_failures,
            &self.connections_lost,
            &self.connection_start_time,
            &self.network_deferrals,
            &self.network_transitions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.mqtt_connected.store(false, Ordering::Relaxed);
        self.network_online.store(false, Ordering::Relaxed);
        self.uptime_start
            .store(current_timestamp(), Ordering::Relaxed);
        if let Ok(mut state) = self.connection_state.lock() {
            *state = "disconnected".to_string();
        }
    }

    fn connection_duration(&self, now: u64) -> u64 {
        if !self.mqtt_connected.load(Ordering::Relaxed) {
            return 0;
        }
        let start = self.connection_start_time.load(Ordering::Relaxed);
        if start > 0 {
            now.saturating_sub(start)
        } else {
            0
        }
    }

    /// Point-in-time copy of every metric
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = current_timestamp();
        let state = self
            .connection_state
            .lock()
            .map(|s| s.clone())
            .unwrap_or_else(|_| "unknown".to_string());

        MetricsSnapshot {
            relay: RelayMetrics {
                cycles_run: self.cycles_run.load(Ordering::Relaxed),
                cycles_skipped_offline: self.cycles_skipped_offline.load(Ordering::Relaxed),
                cycles_waiting: self.cycles_waiting.load(Ordering::Relaxed),
                readings_published: self.readings_published.load(Ordering::Relaxed),
                publish_failures: self.publish_failures.load(Ordering::Relaxed),
                queue_errors: self.queue_errors.load(Ordering::Relaxed),
                last_publish_time: self.last_publish_time.load(Ordering::Relaxed),
            },
            mqtt: MqttMetrics {
                connected: self.mqtt_connected.load(Ordering::Relaxed),
                state,
                connection_attempts: self.connection_attempts.load(Ordering::Relaxed),
                connections_established: self.connections_established.load(Ordering::Relaxed),
                connection_failures: self.connection_failures.load(Ordering::Relaxed),
                connections_lost: self.connections_lost.load(Ordering::Relaxed),
                connection_duration_seconds: self.connection_duration(now),
            },
            network: NetworkMetrics {
                online: self.network_online.load(Ordering::Relaxed),
                deferrals: self.network_deferrals.load(Ordering::Relaxed),
                transitions: self.network_transitions.load(Ordering::Relaxed),
            },
            uptime_seconds: now.saturating_sub(self.uptime_start.load(Ordering::Relaxed)),
            timestamp: now,
        }
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub relay: RelayMetrics,
    pub mqtt: MqttMetrics,
    pub network: NetworkMetrics,
    pub uptime_seconds: u64,
    pub timestamp: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RelayMetrics {
    pub cycles_run: u64,
    pub cycles_skipped_offline: u64,
    pub cycles_waiting: u64,
    pub readings_published: u64,
    pub publish_failures: u64,
    pub queue_errors: u64,
    pub last_publish_time: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct MqttMetrics {
    pub connected: bool,
    pub state: String,
    pub connection_attempts: u64,
    pub connections_established: u64,
    pub connection_failures: u64,
    pub connections_lost: u64,
    pub connection_duration_seconds: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkMetrics {
    pub online: bool,
    pub deferrals: u64,
    pub transitions: u64,
}

fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_relay_metrics() {
        let collector = MetricsCollector::new();

        collector.cycle_started();
        collector.cycle_started();
        collector.cycle_skipped_offline();
        collector.reading_published();
        collector.publish_failed();

        let metrics = collector.snapshot();
        assert_eq!(metrics.relay.cycles_run, 2);
        assert_eq!(metrics.relay.cycles_skipped_offline, 1);
        assert_eq!(metrics.relay.readings_published, 1);
        assert_eq!(metrics.relay.publish_failures, 1);
        assert!(metrics.relay.last_publish_time > 0);
    }

    #[test]
    fn test_mqtt_metrics() {
        let collector = MetricsCollector::new();

        collector.mqtt_connection_attempt();
        collector.mqtt_connection_established();
        collector.set_connection_state("connected");

        let metrics = collector.snapshot();
        assert_eq!(metrics.mqtt.connection_attempts, 1);
        assert_eq!(metrics.mqtt.connections_established, 1);
        assert_eq!(metrics.mqtt.state, "connected");
        assert!(metrics.mqtt.connected);

        collector.mqtt_connection_lost();
        collector.set_connection_state("connecting");
        let metrics = collector.snapshot();
        assert!(!metrics.mqtt.connected);
        assert_eq!(metrics.mqtt.connections_lost, 1);
        assert_eq!(metrics.mqtt.connection_duration_seconds, 0);
    }

    #[test]
    fn test_network_transitions_counted_on_edges() {
        let collector = MetricsCollector::new();

        collector.network_probed(false);
        collector.network_probed(true);
        collector.network_probed(true);
        collector.network_probed(false);

        let metrics = collector.snapshot();
        assert_eq!(metrics.network.transitions, 2);
        assert!(!metrics.network.online);
    }

    #[test]
    fn test_reset() {
        let collector = MetricsCollector::new();
        collector.cycle_started();
        collector.network_deferral();
        collector.set_connection_state("fatal_exit");

        collector.reset();

        let metrics = collector.snapshot();
        assert_eq!(metrics.relay.cycles_run, 0);
        assert_eq!(metrics.network.deferrals, 0);
        assert_eq!(metrics.mqtt.state, "disconnected");
    }

    #[test]
    fn test_thread_safety() {
        let collector = Arc::new(MetricsCollector::new());

        let handles: Vec<_> = (0..10)
            .map(|_| {
                let collector = Arc::clone(&collector);
                thread::spawn(move || {
                    for _ in 0..100 {
                        collector.cycle_started();
                        collector.reading_published();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        let metrics = collector.snapshot();
        assert_eq!(metrics.relay.cycles_run, 1000);
        assert_eq!(metrics.relay.readings_published, 1000);
    }

    #[test]
    fn test_snapshot_serializes() {
        let collector = MetricsCollector::new();
        let json = serde_json::to_value(collector.snapshot()).unwrap();
        assert!(json["relay"]["cycles_run"].is_u64());
        assert!(json["mqtt"]["state"].is_string());
        assert!(json["network"]["online"].is_boolean());
    }
}
