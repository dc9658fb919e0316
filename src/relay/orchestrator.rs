//! Fixed-interval relay loop
//!
//! Each cycle probes the network, checks the broker session and drains at most
//! one reading. Per-cycle failures are logged and absorbed here; only a fatal
//! connection state, the watchdog or shutdown end the loop.

use super::publisher::{DrainOutcome, RelayPublisher};
use crate::{lifecycle_span, relay_span};
use crate::observability::metrics;
use crate::queue::ReadingQueue;
use crate::shutdown::Shutdown;
use crate::transport::mqtt::ConnectionState;
use crate::transport::{Reachability, Transport};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

/// Why the relay stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// Shutdown was requested
    Shutdown,
    /// The connection manager reached FatalExit
    ConnectionFatal(String),
    /// Network reachable but no session for too many consecutive cycles
    WatchdogExpired { cycles: u32 },
}

impl ExitReason {
    pub fn exit_code(&self) -> i32 {
        match self {
            ExitReason::Shutdown => 0,
            ExitReason::ConnectionFatal(_) | ExitReason::WatchdogExpired { .. } => 1,
        }
    }
}

/// Counts consecutive cycles spent online without a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watchdog {
    max_wait_cycles: u32,
    waited: u32,
}

impl Watchdog {
    pub fn new(max_wait_cycles: u32) -> Self {
        Self {
            max_wait_cycles,
            waited: 0,
        }
    }

    pub fn record_wait(&mut self) -> u32 {
        self.waited = self.waited.saturating_add(1);
        self.waited
    }

    pub fn reset(&mut self) {
        self.waited = 0;
    }

    pub fn waited(&self) -> u32 {
        self.waited
    }

    pub fn expired(&self) -> bool {
        self.waited >= self.max_wait_cycles
    }
}

/// Drives the relay until shutdown or a fatal condition
pub struct Orchestrator<Q, T> {
    publisher: RelayPublisher<Q, T>,
    transport: Arc<T>,
    reachability: Arc<dyn Reachability>,
    cycle_interval: Duration,
    watchdog: Watchdog,
    shutdown: Shutdown,
    cycle: u64,
}

impl<Q, T> Orchestrator<Q, T>
where
    Q: ReadingQueue + 'static,
    T: Transport + 'static,
{
    pub fn new(
        publisher: RelayPublisher<Q, T>,
        transport: Arc<T>,
        reachability: Arc<dyn Reachability>,
        cycle_interval: Duration,
        max_wait_cycles: u32,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            publisher,
            transport,
            reachability,
            cycle_interval,
            watchdog: Watchdog::new(max_wait_cycles),
            shutdown,
            cycle: 0,
        }
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    /// Connect, run cycles until an exit condition, then disconnect
    pub async fn run(mut self) -> ExitReason {
        let span = lifecycle_span!(phase = "relay", topic = %self.publisher.topic());
        async move {
            info!(
                cycle_interval_secs = self.cycle_interval.as_secs(),
                "Relay starting"
            );

            if let Err(e) = self.transport.connect().await {
                error!(error = %e, "Failed to start broker session");
                let reason = ExitReason::ConnectionFatal(e.to_string());
                self.finish(&reason).await;
                return reason;
            }

            let reason = loop {
                if self.shutdown.is_requested() {
                    break ExitReason::Shutdown;
                }
                if let Some(reason) = self.run_cycle().await {
                    break reason;
                }
                if !self.shutdown.sleep(self.cycle_interval).await {
                    break ExitReason::Shutdown;
                }
            };

            self.finish(&reason).await;
            reason
        }
        .instrument(span)
        .await
    }

    /// One relay cycle. Returns an exit reason when the relay must stop.
    pub async fn run_cycle(&mut self) -> Option<ExitReason> {
        self.cycle += 1;
        let span = relay_span!(cycle = self.cycle);
        self.step().instrument(span).await
    }

    async fn step(&mut self) -> Option<ExitReason> {
        metrics().cycle_started();

        if let Some(reason) = self.fatal_reason() {
            return Some(reason);
        }

        if !self.reachability.probe().await {
            self.watchdog.reset();
            metrics().cycle_skipped_offline();
            debug!("Network offline, skipping cycle");
            return None;
        }

        match self.transport.connection_state() {
            ConnectionState::FatalExit => self.fatal_reason(),
            ConnectionState::Connected => {
                self.watchdog.reset();
                self.drain().await;
                None
            }
            state => {
                let waited = self.watchdog.record_wait();
                metrics().cycle_waiting_for_connection();
                if self.watchdog.expired() {
                    error!(
                        waited_cycles = waited,
                        state = state.as_str(),
                        "Broker session not available while network is up, giving up"
                    );
                    return Some(ExitReason::WatchdogExpired { cycles: waited });
                }
                info!(
                    waited_cycles = waited,
                    max_wait_cycles = self.watchdog.max_wait_cycles,
                    state = state.as_str(),
                    "Waiting for broker session"
                );
                None
            }
        }
    }

    fn fatal_reason(&self) -> Option<ExitReason> {
        let status = self.transport.connection_status();
        status.is_fatal().then(|| {
            ExitReason::ConnectionFatal(
                status
                    .last_error
                    .unwrap_or_else(|| "connection manager gave up".to_string()),
            )
        })
    }

    async fn drain(&self) {
        match self.publisher.drain_one().await {
            Ok(DrainOutcome::Delivered { .. }) => {}
            Ok(DrainOutcome::Empty) => debug!("No pending readings"),
            Ok(DrainOutcome::NotReady(reason)) => debug!(?reason, "Relay not ready"),
            Err(e) if e.is_persistence_failure() => {
                metrics().queue_error();
                error!(error = %e, "Queue operation failed, skipping cycle");
            }
            Err(e) => {
                warn!(error = %e, "Publish failed, reading stays queued");
            }
        }
    }

    async fn finish(&self, reason: &ExitReason) {
        if let Err(e) = self.transport.disconnect().await {
            warn!(error = %e, "Error while disconnecting from broker");
        }

        let snapshot = metrics().snapshot();
        info!(
            exit_code = reason.exit_code(),
            reason = ?reason,
            readings_published = snapshot.relay.readings_published,
            publish_failures = snapshot.relay.publish_failures,
            queue_errors = snapshot.relay.queue_errors,
            connection_attempts = snapshot.mqtt.connection_attempts,
            "Relay stopped"
        );
    }
}
