//! Session I/O driver
//!
//! The driver is the only code that polls the rumqttc event loop. It runs a
//! handshake whenever the supervisor asks for one, then keeps the session
//! alive (keepalive, PUBACK routing) until the connection drops, the client
//! closes it or the owner stops the driver.

use super::connection::{describe_return_code, is_auth_refusal};
use super::supervisor::{SessionCommand, SessionEvent};
use rumqttc::{ConnectionError, Event, EventLoop, Outgoing, Packet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info, trace, warn};

/// Outcome delivered to a waiting publisher
pub type AckResult = Result<(), String>;

#[derive(Debug)]
struct PendingAck {
    pkid: Option<u16>,
    tx: oneshot::Sender<AckResult>,
}

/// Correlates the single in-flight publish with its PUBACK.
///
/// The publisher registers before handing the message to the client; the
/// driver binds the next outgoing packet id to that registration and resolves
/// it when the matching PUBACK arrives.
#[derive(Debug, Default)]
pub struct AckTracker {
    pending: Mutex<Option<PendingAck>>,
}

impl AckTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self) -> MutexGuard<'_, Option<PendingAck>> {
        self.pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register the next publish. Replaces any stale registration.
    pub fn register(&self) -> oneshot::Receiver<AckResult> {
        let (tx, rx) = oneshot::channel();
        *self.slot() = Some(PendingAck { pkid: None, tx });
        rx
    }

    /// The event loop wrote a PUBLISH with this packet id
    pub fn sent(&self, pkid: u16) {
        let mut slot = self.slot();
        match slot.as_mut() {
            Some(pending) if pending.pkid.is_none() => {
                trace!(pkid, "Publish written");
                pending.pkid = Some(pkid);
            }
            _ => debug!(pkid, "Untracked publish written"),
        }
    }

    /// A PUBACK arrived for this packet id
    pub fn acknowledged(&self, pkid: u16) {
        let mut slot = self.slot();
        if slot.as_ref().and_then(|p| p.pkid) == Some(pkid) {
            if let Some(pending) = slot.take() {
                let _ = pending.tx.send(Ok(()));
            }
        } else {
            debug!(pkid, "Ignoring PUBACK for untracked packet");
        }
    }

    /// Resolve the in-flight publish as unconfirmed
    pub fn fail_pending(&self, reason: &str) {
        if let Some(pending) = self.slot().take() {
            let _ = pending.tx.send(Err(reason.to_string()));
        }
    }

    /// Drop the registration without resolving it
    pub fn clear(&self) {
        self.slot().take();
    }

    pub fn has_pending(&self) -> bool {
        self.slot().is_some()
    }
}

enum ServeEnd {
    Dropped(String),
    Closed,
    Stopped,
}

/// Resolves once the stop flag is raised or its sender is gone
async fn stopped(stop: &mut watch::Receiver<bool>) {
    loop {
        if *stop.borrow_and_update() {
            return;
        }
        if stop.changed().await.is_err() {
            return;
        }
    }
}

/// Poll until the broker answers the CONNECT, bounded by the handshake timeout
async fn handshake(event_loop: &mut EventLoop, timeout: Duration) -> SessionEvent {
    let attempt = async {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return SessionEvent::Established,
                Ok(event) => trace!(?event, "Event before ConnAck"),
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return SessionEvent::Refused {
                        reason: describe_return_code(code).to_string(),
                        auth: is_auth_refusal(code),
                    };
                }
                Err(e) => return SessionEvent::Failed(e.to_string()),
            }
        }
    };

    match tokio::time::timeout(timeout, attempt).await {
        Ok(outcome) => outcome,
        Err(_) => SessionEvent::Failed(format!("handshake timed out after {timeout:?}")),
    }
}

/// Owner of the rumqttc event loop
pub struct SessionDriver {
    event_loop: EventLoop,
    handshake_timeout: Duration,
    acks: Arc<AckTracker>,
    commands: mpsc::Receiver<SessionCommand>,
    events: mpsc::Sender<SessionEvent>,
    stop: watch::Receiver<bool>,
}

impl SessionDriver {
    pub fn new(
        event_loop: EventLoop,
        handshake_timeout: Duration,
        acks: Arc<AckTracker>,
        commands: mpsc::Receiver<SessionCommand>,
        events: mpsc::Sender<SessionEvent>,
        stop: watch::Receiver<bool>,
    ) -> Self {
        Self {
            event_loop,
            handshake_timeout,
            acks,
            commands,
            events,
            stop,
        }
    }

    pub async fn run(mut self) {
        loop {
            let command = tokio::select! {
                _ = stopped(&mut self.stop) => break,
                command = self.commands.recv() => command,
            };
            let Some(SessionCommand::Dial) = command else {
                break;
            };

            let outcome = tokio::select! {
                _ = stopped(&mut self.stop) => break,
                outcome = handshake(&mut self.event_loop, self.handshake_timeout) => outcome,
            };
            let established = outcome == SessionEvent::Established;
            if self.events.send(outcome).await.is_err() {
                break;
            }
            if !established {
                continue;
            }

            match self.serve().await {
                ServeEnd::Dropped(reason) => {
                    self.acks.fail_pending(&reason);
                    self.discard_retransmissions();
                    if self.events.send(SessionEvent::Dropped(reason)).await.is_err() {
                        break;
                    }
                }
                ServeEnd::Closed => {
                    info!("Broker session closed");
                    break;
                }
                ServeEnd::Stopped => break,
            }
        }

        self.acks.fail_pending("session stopped");
        debug!("Session driver stopped");
    }

    /// Keep an established session running
    async fn serve(&mut self) -> ServeEnd {
        loop {
            let polled = tokio::select! {
                _ = stopped(&mut self.stop) => return ServeEnd::Stopped,
                polled = self.event_loop.poll() => polled,
            };

            match polled {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) => self.acks.sent(pkid),
                Ok(Event::Incoming(Packet::PubAck(ack))) => self.acks.acknowledged(ack.pkid),
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    return ServeEnd::Dropped("broker sent DISCONNECT".to_string());
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => return ServeEnd::Closed,
                Ok(event) => trace!(?event, "MQTT event"),
                Err(e) => {
                    warn!(error = %e, "MQTT event loop error");
                    return ServeEnd::Dropped(e.to_string());
                }
            }
        }
    }

    /// Unconfirmed publishes are retried from the queue, not replayed by the client
    fn discard_retransmissions(&mut self) {
        let discarded = self.event_loop.pending.len();
        self.event_loop.pending.clear();
        if discarded > 0 {
            debug!(discarded, "Discarded unacknowledged requests");
        }
    }
}
