//! Reconnection state machine
//!
//! The supervisor owns the connection state. It never touches the socket: the
//! session driver reports handshake outcomes and drops as [`SessionEvent`]s and
//! the supervisor answers with [`SessionCommand::Dial`] when it wants another
//! attempt. Backoff sleeps therefore never stall keepalive or ack handling.
//!
//! Attempts are only consumed by failures the broker caused. While the network
//! probe reports offline the loop keeps waiting at the current delay without
//! counting anything.

use super::connection::{ConnectionState, ConnectionStatus};
use crate::config::BackoffSection;
use crate::mqtt_span;
use crate::observability::metrics;
use crate::shutdown::Shutdown;
use crate::transport::Reachability;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn, Instrument};

/// Injectable reconnection parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub rate: f64,
    pub max_delay: Duration,
    pub max_attempts: u32,
    pub fatal_on_auth_failure: bool,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from(&BackoffSection::default())
    }
}

impl From<&BackoffSection> for ReconnectPolicy {
    fn from(section: &BackoffSection) -> Self {
        Self {
            initial_delay: Duration::from_secs(section.initial_delay_secs),
            rate: section.rate,
            max_delay: Duration::from_secs(section.max_delay_secs),
            max_attempts: section.max_attempts,
            fatal_on_auth_failure: section.fatal_on_auth_failure,
        }
    }
}

/// Backoff progress within one reconnection loop
#[derive(Debug, Clone, PartialEq)]
pub struct Backoff {
    pub attempt: u32,
    pub delay: Duration,
    max_attempts: u32,
    rate: f64,
    max_delay: Duration,
}

impl Backoff {
    pub fn new(policy: &ReconnectPolicy) -> Self {
        Self {
            attempt: 0,
            delay: policy.initial_delay,
            max_attempts: policy.max_attempts,
            rate: policy.rate,
            max_delay: policy.max_delay,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Grow the delay and consume one attempt.
    ///
    /// A product too large for a `Duration` saturates at the cap.
    pub fn record_broker_failure(&mut self) {
        self.delay = Duration::try_from_secs_f64(self.delay.as_secs_f64() * self.rate)
            .map_or(self.max_delay, |grown| grown.min(self.max_delay));
        self.attempt = self.attempt.saturating_add(1);
    }
}

/// Request from the supervisor to the session driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionCommand {
    /// Run one handshake and report exactly one outcome
    Dial,
}

/// Report from the session driver to the supervisor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Broker accepted the handshake
    Established,
    /// Broker answered the handshake with a refusal code
    Refused { reason: String, auth: bool },
    /// Handshake did not complete (I/O error, timeout, protocol error)
    Failed(String),
    /// An established session was lost
    Dropped(String),
}

enum LoopOutcome {
    Connected,
    Fatal,
    Stopped,
}

/// Owner of the connection state machine
pub struct ConnectionSupervisor {
    policy: ReconnectPolicy,
    reachability: Arc<dyn Reachability>,
    state_tx: Arc<watch::Sender<ConnectionStatus>>,
    commands: mpsc::Sender<SessionCommand>,
    events: mpsc::Receiver<SessionEvent>,
    shutdown: Shutdown,
}

impl ConnectionSupervisor {
    pub fn new(
        policy: ReconnectPolicy,
        reachability: Arc<dyn Reachability>,
        state_tx: Arc<watch::Sender<ConnectionStatus>>,
        commands: mpsc::Sender<SessionCommand>,
        events: mpsc::Receiver<SessionEvent>,
        shutdown: Shutdown,
    ) -> Self {
        Self {
            policy,
            reachability,
            state_tx,
            commands,
            events,
            shutdown,
        }
    }

    fn publish_state(&self, state: ConnectionState, backoff: &Backoff, last_error: Option<String>) {
        self.state_tx.send_replace(ConnectionStatus {
            state,
            attempt: backoff.attempt,
            next_delay: backoff.delay,
            last_error,
        });
        metrics().set_connection_state(state.as_str());
    }

    async fn next_event(&mut self) -> Option<SessionEvent> {
        tokio::select! {
            _ = self.shutdown.requested() => None,
            event = self.events.recv() => event,
        }
    }

    async fn dial(&self, attempt: u32) -> bool {
        let span = mqtt_span!(operation = "dial", attempt);
        async {
            metrics().mqtt_connection_attempt();
            debug!("Requesting handshake");
            self.commands.send(SessionCommand::Dial).await.is_ok()
        }
        .instrument(span)
        .await
    }

    fn is_fatal_refusal(&self, auth: bool) -> bool {
        auth && self.policy.fatal_on_auth_failure
    }

    /// Drive the state machine until FatalExit, shutdown or session teardown
    pub async fn run(mut self) {
        let mut backoff = Backoff::new(&self.policy);
        self.publish_state(ConnectionState::Connecting, &backoff, None);
        info!("Connecting to broker");

        if !self.dial(1).await {
            debug!("Session driver gone before first dial");
            return;
        }

        loop {
            let Some(event) = self.next_event().await else {
                break;
            };

            let reason = match event {
                SessionEvent::Established => {
                    metrics().mqtt_connection_established();
                    backoff = Backoff::new(&self.policy);
                    self.publish_state(ConnectionState::Connected, &backoff, None);
                    info!("Connected to broker");
                    continue;
                }
                SessionEvent::Refused { reason, auth } if self.is_fatal_refusal(auth) => {
                    metrics().mqtt_connection_failed();
                    error!(reason = %reason, "Broker rejected credentials, giving up");
                    self.publish_state(ConnectionState::FatalExit, &backoff, Some(reason));
                    return;
                }
                SessionEvent::Refused { reason, .. } | SessionEvent::Failed(reason) => {
                    metrics().mqtt_connection_failed();
                    warn!(reason = %reason, "Initial broker connection failed");
                    reason
                }
                SessionEvent::Dropped(reason) => {
                    metrics().mqtt_connection_lost();
                    warn!(reason = %reason, "Broker connection lost");
                    reason
                }
            };

            backoff = Backoff::new(&self.policy);
            self.publish_state(ConnectionState::Connecting, &backoff, Some(reason));

            match self.reconnect(&mut backoff).await {
                LoopOutcome::Connected => {}
                LoopOutcome::Fatal | LoopOutcome::Stopped => return,
            }
        }

        debug!("Connection supervisor stopped");
    }

    /// Reconnection loop, entered after every disconnect
    async fn reconnect(&mut self, backoff: &mut Backoff) -> LoopOutcome {
        while !backoff.is_exhausted() {
            if self.shutdown.is_requested() {
                info!("Shutdown requested, stopping reconnection");
                return LoopOutcome::Stopped;
            }

            if !self.reachability.probe().await {
                metrics().network_deferral();
                info!(
                    delay_secs = backoff.delay.as_secs_f64(),
                    "Network unreachable, deferring reconnection"
                );
                if !self.shutdown.sleep(backoff.delay).await {
                    return LoopOutcome::Stopped;
                }
                continue;
            }

            info!(
                attempt = backoff.attempt + 1,
                max_attempts = self.policy.max_attempts,
                delay_secs = backoff.delay.as_secs_f64(),
                "Reconnecting to broker"
            );
            if !self.shutdown.sleep(backoff.delay).await {
                return LoopOutcome::Stopped;
            }
            if self.shutdown.is_requested() || !self.dial(backoff.attempt + 1).await {
                return LoopOutcome::Stopped;
            }

            let Some(event) = self.next_event().await else {
                return LoopOutcome::Stopped;
            };

            match event {
                SessionEvent::Established => {
                    metrics().mqtt_connection_established();
                    info!(attempt = backoff.attempt + 1, "Reconnected to broker");
                    *backoff = Backoff::new(&self.policy);
                    self.publish_state(ConnectionState::Connected, backoff, None);
                    return LoopOutcome::Connected;
                }
                SessionEvent::Refused { reason, auth } if self.is_fatal_refusal(auth) => {
                    metrics().mqtt_connection_failed();
                    error!(reason = %reason, "Broker rejected credentials, giving up");
                    self.publish_state(ConnectionState::FatalExit, backoff, Some(reason));
                    return LoopOutcome::Fatal;
                }
                SessionEvent::Refused { reason, .. }
                | SessionEvent::Failed(reason)
                | SessionEvent::Dropped(reason) => {
                    metrics().mqtt_connection_failed();
                    backoff.record_broker_failure();
                    warn!(
                        attempt = backoff.attempt,
                        max_attempts = self.policy.max_attempts,
                        next_delay_secs = backoff.delay.as_secs_f64(),
                        reason = %reason,
                        "Reconnection attempt failed"
                    );
                    self.publish_state(ConnectionState::Connecting, backoff, Some(reason));
                }
            }
        }

        let reason = format!(
            "Max reconnection attempts ({}) exceeded",
            self.policy.max_attempts
        );
        error!("{}", reason);
        self.publish_state(ConnectionState::FatalExit, backoff, Some(reason));
        LoopOutcome::Fatal
    }
}
