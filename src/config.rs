//! Relay configuration loaded from TOML
//!
//! Every field the relay needs is resolved and validated at start; a relay that
//! starts with a bad configuration would only fail later in the field, so
//! loading errors are fatal.

use crate::protocol::{validate_device_id, validate_topic_template};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use url::Url;

/// Default locations searched when no `--config` is given
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["ups-relay.toml", "config/ups-relay.toml"];

/// Smallest keepalive the MQTT client accepts
pub const MIN_KEEPALIVE_SECS: u64 = 5;

/// Main relay configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelayConfig {
    pub device: DeviceSection,
    pub mqtt: MqttSection,
    #[serde(default)]
    pub reachability: ReachabilitySection,
    #[serde(default)]
    pub backoff: BackoffSection,
    #[serde(default)]
    pub relay: RelaySection,
    pub queue: QueueSection,
}

/// Identity of the device whose readings are relayed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// Device identifier (must match [a-zA-Z0-9._-]+)
    pub id: String,
    /// Human-readable location label included in every envelope
    pub location: String,
}

/// MQTT section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MqttSection {
    /// Broker URL, `mqtt://host:port` or `mqtts://host:port`
    pub broker_url: String,
    /// Environment variable containing username
    pub username_env: Option<String>,
    /// Environment variable containing password
    pub password_env: Option<String>,
    /// MQTT client identifier
    pub client_id: String,
    /// Publish topic; `{device_id}` is substituted
    pub topic_template: String,
    #[serde(default = "default_keepalive")]
    pub keepalive_secs: u64,
    /// Upper bound on a single connect + CONNACK exchange
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    /// Upper bound on waiting for a PUBACK
    #[serde(default = "default_ack_timeout")]
    pub ack_timeout_secs: u64,
}

fn default_keepalive() -> u64 {
    60
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_ack_timeout() -> u64 {
    10
}

/// Reachability probe target. Host and port default to the broker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReachabilitySection {
    pub host: Option<String>,
    pub port: Option<u16>,
    #[serde(default = "default_probe_timeout")]
    pub timeout_secs: u64,
}

fn default_probe_timeout() -> u64 {
    3
}

impl Default for ReachabilitySection {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            timeout_secs: default_probe_timeout(),
        }
    }
}

/// Reconnection policy
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackoffSection {
    pub initial_delay_secs: u64,
    pub rate: f64,
    pub max_delay_secs: u64,
    pub max_attempts: u32,
    /// Treat a credential rejection as terminal instead of retrying it
    #[serde(default = "default_true")]
    pub fatal_on_auth_failure: bool,
}

fn default_true() -> bool {
    true
}

impl Default for BackoffSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: 1,
            rate: 2.0,
            max_delay_secs: 60,
            max_attempts: 12,
            fatal_on_auth_failure: true,
        }
    }
}

/// Orchestrator cycle settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RelaySection {
    #[serde(default = "default_cycle_interval")]
    pub cycle_interval_secs: u64,
    /// Consecutive online-but-disconnected cycles before the watchdog fires
    #[serde(default = "default_max_wait_cycles")]
    pub max_wait_cycles: u32,
}

fn default_cycle_interval() -> u64 {
    10
}

fn default_max_wait_cycles() -> u32 {
    10
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            cycle_interval_secs: default_cycle_interval(),
            max_wait_cycles: default_max_wait_cycles(),
        }
    }
}

/// Location of the durable queue
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSection {
    pub path: PathBuf,
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,
}

fn default_busy_timeout() -> u64 {
    5000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),
    #[error("Invalid device ID: {0}")]
    InvalidDeviceId(String),
    #[error("Invalid broker URL: {0}")]
    InvalidBrokerUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("No configuration file found (tried {0})")]
    NotFound(String),
}

/// Host and port of the broker, extracted from `broker_url`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    pub tls: bool,
}

/// Credentials resolved from the environment at start
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

impl MqttSection {
    /// Parse the broker URL into an endpoint
    pub fn endpoint(&self) -> Result<BrokerEndpoint, ConfigError> {
        let url = Url::parse(&self.broker_url)
            .map_err(|_| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?;

        let tls = match url.scheme() {
            "mqtt" | "tcp" => false,
            "mqtts" | "ssl" => true,
            _ => return Err(ConfigError::InvalidBrokerUrl(self.broker_url.clone())),
        };

        let host = url
            .host_str()
            .ok_or_else(|| ConfigError::InvalidBrokerUrl(self.broker_url.clone()))?
            .to_string();
        let port = url.port().unwrap_or(if tls { 8883 } else { 1883 });

        Ok(BrokerEndpoint { host, port, tls })
    }

    /// Resolve credentials from the configured environment variables.
    ///
    /// Returns `None` when no username variable is configured (anonymous
    /// session). A configured variable that is unset is an error.
    pub fn credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        let Some(username_env) = &self.username_env else {
            return Ok(None);
        };
        let username = get_env_var_required(username_env)?;
        let password = match &self.password_env {
            Some(password_env) => get_env_var_required(password_env)?,
            None => String::new(),
        };
        Ok(Some(Credentials { username, password }))
    }

    pub fn keepalive(&self) -> Duration {
        Duration::from_secs(self.keepalive_secs)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }
}

impl RelayConfig {
    /// Load configuration from TOML file and validate it
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Load from the first default location that exists
    pub fn load_from_default_paths() -> Result<(PathBuf, Self), ConfigError> {
        for path_str in DEFAULT_CONFIG_PATHS {
            let path = PathBuf::from(path_str);
            if path.exists() {
                let config = Self::load_from_file(&path)?;
                return Ok((path, config));
            }
        }
        Err(ConfigError::NotFound(DEFAULT_CONFIG_PATHS.join(", ")))
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RelayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate field formats and value ranges, and that credentials resolve
    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_device_id(&self.device.id)
            .map_err(|e| ConfigError::InvalidDeviceId(e.to_string()))?;

        self.mqtt.endpoint()?;
        self.mqtt.credentials()?;

        if self.mqtt.client_id.trim().is_empty() {
            return Err(invalid("mqtt.client_id must not be empty"));
        }
        validate_topic_template(&self.mqtt.topic_template)
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;
        if self.mqtt.keepalive_secs < MIN_KEEPALIVE_SECS {
            return Err(ConfigError::InvalidConfig(format!(
                "mqtt.keepalive_secs must be at least {MIN_KEEPALIVE_SECS}"
            )));
        }
        require_positive("mqtt.handshake_timeout_secs", self.mqtt.handshake_timeout_secs)?;
        require_positive("mqtt.ack_timeout_secs", self.mqtt.ack_timeout_secs)?;

        require_positive("reachability.timeout_secs", self.reachability.timeout_secs)?;
        if let Some(host) = &self.reachability.host {
            if host.trim().is_empty() {
                return Err(invalid("reachability.host must not be empty"));
            }
        }

        let backoff = &self.backoff;
        require_positive("backoff.initial_delay_secs", backoff.initial_delay_secs)?;
        if !backoff.rate.is_finite() || backoff.rate < 1.0 {
            return Err(invalid("backoff.rate must be a finite number >= 1.0"));
        }
        if backoff.max_delay_secs < backoff.initial_delay_secs {
            return Err(invalid(
                "backoff.max_delay_secs must be >= backoff.initial_delay_secs",
            ));
        }
        if backoff.max_attempts == 0 {
            return Err(invalid("backoff.max_attempts must be greater than 0"));
        }

        require_positive("relay.cycle_interval_secs", self.relay.cycle_interval_secs)?;
        if self.relay.max_wait_cycles == 0 {
            return Err(invalid("relay.max_wait_cycles must be greater than 0"));
        }

        if self.queue.path.as_os_str().is_empty() {
            return Err(invalid("queue.path must not be empty"));
        }

        Ok(())
    }

    /// Reachability probe target, falling back to the broker endpoint
    pub fn probe_target(&self) -> Result<(String, u16), ConfigError> {
        let endpoint = self.mqtt.endpoint()?;
        let host = self.reachability.host.clone().unwrap_or(endpoint.host);
        let port = self.reachability.port.unwrap_or(endpoint.port);
        Ok((host, port))
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.reachability.timeout_secs)
    }

    pub fn cycle_interval(&self) -> Duration {
        Duration::from_secs(self.relay.cycle_interval_secs)
    }

    /// Publish topic for this device
    pub fn topic(&self) -> String {
        crate::protocol::render_topic(&self.mqtt.topic_template, &self.device.id)
    }
}

fn get_env_var_required(env_var_name: &str) -> Result<String, ConfigError> {
    std::env::var(env_var_name).map_err(|_| ConfigError::EnvVarNotFound(env_var_name.to_string()))
}

fn require_positive(field: &str, value: u64) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::InvalidConfig(format!(
            "{field} must be greater than 0"
        )));
    }
    Ok(())
}

fn invalid(message: &str) -> ConfigError {
    ConfigError::InvalidConfig(message.to_string())
}

#[cfg(test)]
impl RelayConfig {
    /// Create a test configuration for unit testing
    pub fn test_config() -> Self {
        let toml_content = r#"
[device]
id = "40A36BC38E91"
location = "Office"

[mqtt]
broker_url = "mqtt://localhost:1883"
client_id = "test-relay"
topic_template = "ups/data/{device_id}"

[queue]
path = "sensor_data.db"
"#;
        toml::from_str(toml_content).expect("Test config should parse")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL_CONFIG: &str = r#"
[device]
id = "40A36BC38E91"
location = "Office"

[mqtt]
broker_url = "mqtts://broker.example.com"
client_id = "office-relay"
topic_template = "kosine/assets/ups/data/{device_id}"
keepalive_secs = 30
handshake_timeout_secs = 5
ack_timeout_secs = 7

[reachability]
host = "gateway.example.com"
port = 443
timeout_secs = 2

[backoff]
initial_delay_secs = 2
rate = 1.5
max_delay_secs = 120
max_attempts = 20
fatal_on_auth_failure = false

[relay]
cycle_interval_secs = 30
max_wait_cycles = 4

[queue]
path = "/var/lib/ups/sensor_data.db"
busy_timeout_ms = 1000
"#;

    #[test]
    fn test_full_config() {
        let config = RelayConfig::from_toml_str(FULL_CONFIG).unwrap();
        assert_eq!(config.device.id, "40A36BC38E91");
        assert_eq!(config.mqtt.keepalive(), Duration::from_secs(30));
        assert_eq!(config.mqtt.ack_timeout(), Duration::from_secs(7));
        assert_eq!(config.backoff.rate, 1.5);
        assert!(!config.backoff.fatal_on_auth_failure);
        assert_eq!(config.relay.max_wait_cycles, 4);
        assert_eq!(config.queue.busy_timeout_ms, 1000);
        assert_eq!(
            config.probe_target().unwrap(),
            ("gateway.example.com".to_string(), 443)
        );
        assert_eq!(config.topic(), "kosine/assets/ups/data/40A36BC38E91");
    }

    #[test]
    fn test_minimal_config_defaults() {
        let config = RelayConfig::test_config();
        config.validate().unwrap();

        assert_eq!(config.mqtt.keepalive_secs, 60);
        assert_eq!(config.mqtt.handshake_timeout_secs, 10);
        assert_eq!(config.reachability.timeout_secs, 3);
        assert_eq!(config.backoff, BackoffSection::default());
        assert_eq!(config.relay.cycle_interval_secs, 10);
        assert_eq!(config.relay.max_wait_cycles, 10);
        assert_eq!(config.queue.busy_timeout_ms, 5000);
    }

    #[test]
    fn test_probe_target_defaults_to_broker() {
        let config = RelayConfig::test_config();
        assert_eq!(
            config.probe_target().unwrap(),
            ("localhost".to_string(), 1883)
        );
    }

    #[test]
    fn test_endpoint_parsing() {
        let mut section = RelayConfig::test_config().mqtt;
        section.broker_url = "mqtts://broker.example.com".to_string();
        let endpoint = section.endpoint().unwrap();
        assert_eq!(endpoint.host, "broker.example.com");
        assert_eq!(endpoint.port, 8883);
        assert!(endpoint.tls);

        section.broker_url = "mqtt://10.0.0.5:1884".to_string();
        let endpoint = section.endpoint().unwrap();
        assert_eq!(endpoint.port, 1884);
        assert!(!endpoint.tls);

        section.broker_url = "http://broker.example.com".to_string();
        assert!(matches!(
            section.endpoint(),
            Err(ConfigError::InvalidBrokerUrl(_))
        ));

        section.broker_url = "not a url".to_string();
        assert!(section.endpoint().is_err());
    }

    #[test]
    fn test_invalid_device_id() {
        let mut config = RelayConfig::test_config();
        config.device.id = "bad/id".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidDeviceId(_))
        ));
    }

    #[test]
    fn test_backoff_validation() {
        let mut config = RelayConfig::test_config();
        config.backoff.rate = 0.5;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::test_config();
        config.backoff.max_delay_secs = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::test_config();
        config.backoff.max_attempts = 0;
        assert!(config.validate().is_err());

        let mut config = RelayConfig::test_config();
        config.backoff.initial_delay_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_keepalive_lower_bound() {
        let mut config = RelayConfig::test_config();
        config.mqtt.keepalive_secs = 2;
        assert!(config.validate().is_err());

        config.mqtt.keepalive_secs = MIN_KEEPALIVE_SECS;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_topic_template_requires_placeholder() {
        let mut config = RelayConfig::test_config();
        config.mqtt.topic_template = "ups/data".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_missing_credential_env_var() {
        let mut config = RelayConfig::test_config();
        config.mqtt.username_env = Some("UPS_RELAY_TEST_UNSET_USERNAME_VAR".to_string());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::EnvVarNotFound(name)) if name == "UPS_RELAY_TEST_UNSET_USERNAME_VAR"
        ));
    }

    #[test]
    fn test_credentials_resolved_from_env() {
        std::env::set_var("UPS_RELAY_TEST_CFG_USER", "relay");
        std::env::set_var("UPS_RELAY_TEST_CFG_PASS", "s3cret");
        let mut section = RelayConfig::test_config().mqtt;
        section.username_env = Some("UPS_RELAY_TEST_CFG_USER".to_string());
        section.password_env = Some("UPS_RELAY_TEST_CFG_PASS".to_string());

        let credentials = section.credentials().unwrap().unwrap();
        assert_eq!(credentials.username, "relay");
        assert_eq!(credentials.password, "s3cret");
        assert!(!format!("{credentials:?}").contains("s3cret"));
    }

    #[test]
    fn test_anonymous_credentials() {
        let section = RelayConfig::test_config().mqtt;
        assert_eq!(section.credentials().unwrap(), None);
    }

    #[test]
    fn test_missing_required_section() {
        let toml_content = r#"
[device]
id = "dev"
location = "Office"

[queue]
path = "q.db"
"#;
        assert!(matches!(
            RelayConfig::from_toml_str(toml_content),
            Err(ConfigError::TomlParse(_))
        ));
    }
}
