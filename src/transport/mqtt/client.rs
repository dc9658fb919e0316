//! Impure I/O coordination for the MQTT client
//!
//! `MqttClient` wires the rumqttc client to two background tasks: the session
//! driver, which owns the event loop, and the connection supervisor, which
//! owns the reconnection state machine. Callers only see the connection status
//! and a confirmed publish.

use super::connection::{configure_mqtt_options, ConnectionState, ConnectionStatus, MqttError};
use super::session::{AckTracker, SessionDriver};
use super::supervisor::{ConnectionSupervisor, ReconnectPolicy};
use crate::config::RelayConfig;
use crate::observability::metrics;
use crate::shutdown::Shutdown;
use crate::transport::{Reachability, Transport};
use async_trait::async_trait;
use rumqttc::{AsyncClient, EventLoop, QoS};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Time allowed for each background task to finish during disconnect
const GRACE_PERIOD: Duration = Duration::from_secs(2);

struct SessionTasks {
    driver: JoinHandle<()>,
    supervisor: JoinHandle<()>,
    stop_tx: watch::Sender<bool>,
}

/// MQTT transport with supervised reconnection and confirmed publishing
pub struct MqttClient {
    client: AsyncClient,
    event_loop: StdMutex<Option<EventLoop>>,
    policy: ReconnectPolicy,
    handshake_timeout: Duration,
    ack_timeout: Duration,
    reachability: Arc<dyn Reachability>,
    shutdown: Shutdown,
    state_tx: Arc<watch::Sender<ConnectionStatus>>,
    acks: Arc<AckTracker>,
    publish_lock: Mutex<()>,
    tasks: StdMutex<Option<SessionTasks>>,
}

fn lock<T>(mutex: &StdMutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MqttClient {
    pub fn new(
        config: &RelayConfig,
        reachability: Arc<dyn Reachability>,
        shutdown: Shutdown,
    ) -> Result<Self, MqttError> {
        let mqtt_options = configure_mqtt_options(config)?;
        let (client, event_loop) = AsyncClient::new(mqtt_options, 10);
        let (state_tx, _) = watch::channel(ConnectionStatus::new(ConnectionState::Disconnected));

        Ok(Self {
            client,
            event_loop: StdMutex::new(Some(event_loop)),
            policy: ReconnectPolicy::from(&config.backoff),
            handshake_timeout: config.mqtt.handshake_timeout(),
            ack_timeout: config.mqtt.ack_timeout(),
            reachability,
            shutdown,
            state_tx: Arc::new(state_tx),
            acks: Arc::new(AckTracker::new()),
            publish_lock: Mutex::new(()),
            tasks: StdMutex::new(None),
        })
    }

    /// Subscribe to connection status changes
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.state_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state_tx.borrow().clone()
    }

    /// Start the session. Non-blocking: returns with the state at Connecting.
    pub async fn connect(&self) -> Result<(), MqttError> {
        let event_loop = lock(&self.event_loop)
            .take()
            .ok_or(MqttError::AlreadyStarted)?;

        let (commands_tx, commands_rx) = mpsc::channel(4);
        let (events_tx, events_rx) = mpsc::channel(4);
        let (stop_tx, stop_rx) = watch::channel(false);

        self.state_tx
            .send_replace(ConnectionStatus::new(ConnectionState::Connecting));

        let driver = SessionDriver::new(
            event_loop,
            self.handshake_timeout,
            self.acks.clone(),
            commands_rx,
            events_tx,
            stop_rx,
        );
        let supervisor = ConnectionSupervisor::new(
            self.policy.clone(),
            self.reachability.clone(),
            self.state_tx.clone(),
            commands_tx,
            events_rx,
            self.shutdown.clone(),
        );

        let tasks = SessionTasks {
            driver: tokio::spawn(driver.run()),
            supervisor: tokio::spawn(supervisor.run()),
            stop_tx,
        };
        *lock(&self.tasks) = Some(tasks);

        debug!("MQTT session tasks started");
        Ok(())
    }

    /// Publish at QoS 1 and wait for the PUBACK
    pub async fn publish_confirmed(&self, topic: &str, payload: Vec<u8>) -> Result<(), MqttError> {
        let _in_flight = self.publish_lock.lock().await;

        let state = self.state_tx.borrow().state;
        if state != ConnectionState::Connected {
            return Err(MqttError::NotConnected(state));
        }

        let ack = self.acks.register();
        if let Err(e) = self
            .client
            .publish(topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            self.acks.clear();
            return Err(MqttError::PublishFailed(Box::new(e)));
        }

        match tokio::time::timeout(self.ack_timeout, ack).await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(reason))) => Err(MqttError::Unconfirmed(reason)),
            Ok(Err(_)) => Err(MqttError::Unconfirmed(
                "acknowledgment tracker dropped".to_string(),
            )),
            Err(_) => {
                self.acks.clear();
                Err(MqttError::AckTimeout(self.ack_timeout))
            }
        }
    }

    /// Close the session and stop the background tasks within the grace period
    pub async fn disconnect(&self) -> Result<(), MqttError> {
        let tasks = lock(&self.tasks).take();

        if let Some(mut tasks) = tasks {
            if self.status().is_connected() {
                match self.client.try_disconnect() {
                    Ok(()) => {
                        if tokio::time::timeout(GRACE_PERIOD, &mut tasks.driver)
                            .await
                            .is_err()
                        {
                            warn!("Session did not close gracefully");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to request MQTT disconnect"),
                }
            }

            let _ = tasks.stop_tx.send(true);
            tasks.supervisor.abort();

            if !tasks.driver.is_finished()
                && tokio::time::timeout(GRACE_PERIOD, &mut tasks.driver)
                    .await
                    .is_err()
            {
                warn!("Session task didn't stop in time, forcing abort");
                tasks.driver.abort();
            }
        }

        if !self.status().is_fatal() {
            self.state_tx
                .send_replace(ConnectionStatus::new(ConnectionState::Disconnected));
            metrics().set_connection_state(ConnectionState::Disconnected.as_str());
        }

        info!("MQTT client disconnected");
        Ok(())
    }
}

impl Drop for MqttClient {
    fn drop(&mut self) {
        if let Some(tasks) = lock(&self.tasks).take() {
            let _ = tasks.stop_tx.send(true);
            tasks.supervisor.abort();
            tasks.driver.abort();
        }
    }
}

#[async_trait]
impl Transport for MqttClient {
    type Error = MqttError;

    async fn connect(&self) -> Result<(), Self::Error> {
        MqttClient::connect(self).await
    }

    async fn disconnect(&self) -> Result<(), Self::Error> {
        MqttClient::disconnect(self).await
    }

    async fn publish_confirmed(&self, topic: &str, payload: Vec<u8>) -> Result<(), Self::Error> {
        MqttClient::publish_confirmed(self, topic, payload).await
    }

    fn connection_status(&self) -> ConnectionStatus {
        self.status()
    }
}
