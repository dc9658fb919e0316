//! Pure connection state management for the MQTT session
//!
//! This module contains the connection state types, error types and the
//! construction of broker options from configuration.

use crate::config::{ConfigError, RelayConfig};
use rumqttc::Transport as RumqttcTransport;
use rumqttc::{ConnectReturnCode, MqttOptions};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

/// Connection state of the broker session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session and no attempt in progress
    Disconnected,
    /// Handshake or reconnection loop in progress
    Connecting,
    /// Session usable for publishing
    Connected,
    /// Terminal: credentials rejected or reconnection budget exhausted
    FatalExit,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::FatalExit => "fatal_exit",
        }
    }
}

/// Snapshot of the connection manager, published through a watch channel
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    /// Broker-caused reconnect failures in the current reconnection loop
    pub attempt: u32,
    /// Delay before the next reconnect attempt
    pub next_delay: Duration,
    /// Reason for the last failure, if any
    pub last_error: Option<String>,
}

impl ConnectionStatus {
    pub fn new(state: ConnectionState) -> Self {
        Self {
            state,
            attempt: 0,
            next_delay: Duration::ZERO,
            last_error: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_fatal(&self) -> bool {
        self.state == ConnectionState::FatalExit
    }
}

/// MQTT transport errors
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("Connection failed")]
    ConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publishing failed")]
    PublishFailed(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("Publish not acknowledged within {0:?}")]
    AckTimeout(Duration),
    #[error("Publish not confirmed: {0}")]
    Unconfirmed(String),
    #[error("Invalid broker configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    #[error("Not connected - current state: {0:?}")]
    NotConnected(ConnectionState),
    #[error("Session already started")]
    AlreadyStarted,
}

/// Whether a CONNACK refusal means the credentials will never be accepted
pub fn is_auth_refusal(code: ConnectReturnCode) -> bool {
    matches!(
        code,
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized
    )
}

/// Human-readable description of a CONNACK return code
pub fn describe_return_code(code: ConnectReturnCode) -> &'static str {
    match code {
        ConnectReturnCode::Success => "connection accepted",
        ConnectReturnCode::RefusedProtocolVersion => "unacceptable protocol version",
        ConnectReturnCode::BadClientId => "client identifier rejected",
        ConnectReturnCode::ServiceUnavailable => "server unavailable",
        ConnectReturnCode::BadUserNamePassword => "bad username or password",
        ConnectReturnCode::NotAuthorized => "not authorized",
    }
}

/// Pure function to configure MQTT options from config
pub fn configure_mqtt_options(config: &RelayConfig) -> Result<MqttOptions, MqttError> {
    let endpoint = config.mqtt.endpoint()?;
    let mut mqtt_options =
        MqttOptions::new(config.mqtt.client_id.clone(), endpoint.host, endpoint.port);

    if endpoint.tls {
        mqtt_options.set_transport(RumqttcTransport::tls_with_default_config());
    }

    if let Some(credentials) = config.mqtt.credentials()? {
        mqtt_options.set_credentials(credentials.username, credentials.password);
    }

    mqtt_options.set_keep_alive(config.mqtt.keepalive());
    mqtt_options.set_clean_session(true);

    Ok(mqtt_options)
}

/// Wait until the connection reaches `target`.
///
/// Fails early if the connection becomes fatal while waiting.
pub async fn wait_for_state(
    state_rx: &mut watch::Receiver<ConnectionStatus>,
    target: ConnectionState,
    timeout: Duration,
) -> Result<(), MqttError> {
    let result = tokio::time::timeout(timeout, async {
        loop {
            let status = state_rx.borrow_and_update().clone();
            if status.state == target {
                return Ok(());
            }
            if status.is_fatal() {
                return Err(MqttError::ConnectionFailed(
                    status
                        .last_error
                        .unwrap_or_else(|| "connection is fatal".to_string())
                        .into(),
                ));
            }
            if state_rx.changed().await.is_err() {
                return Err(MqttError::NotConnected(status.state));
            }
        }
    })
    .await;

    match result {
        Ok(outcome) => outcome,
        Err(_) => Err(MqttError::NotConnected(state_rx.borrow().state)),
    }
}
