//! Configuration loading and validation tests
//!
//! Tests focus on BEHAVIOR of configuration loading, validation, and error handling.
//! We test observable outcomes, not implementation details of TOML parsing.

use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;
use ups_relay::config::{ConfigError, RelayConfig};
use ups_relay::transport::mqtt::{Backoff, ReconnectPolicy};

fn write_config(content: &str) -> NamedTempFile {
    let mut temp_file = NamedTempFile::new().unwrap();
    writeln!(temp_file, "{content}").unwrap();
    temp_file
}

const MINIMAL: &str = r#"
[device]
id = "40A36BC38E91"
location = "Office"

[mqtt]
broker_url = "mqtt://broker.example.com:1883"
client_id = "office-relay"
topic_template = "kosine/assets/ups/data/{device_id}"

[queue]
path = "/var/lib/ups-relay/sensor_data.db"
"#;

#[test]
fn test_config_loads_successfully_from_valid_toml() {
    let temp_file = write_config(MINIMAL);

    let config = RelayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.device.id, "40A36BC38E91");
    assert_eq!(config.device.location, "Office");
    assert_eq!(config.mqtt.broker_url, "mqtt://broker.example.com:1883");
    assert_eq!(config.mqtt.client_id, "office-relay");
    assert_eq!(config.topic(), "kosine/assets/ups/data/40A36BC38E91");
    assert_eq!(
        config.queue.path,
        Path::new("/var/lib/ups-relay/sensor_data.db")
    );
}

#[test]
fn test_config_applies_defaults_when_sections_omitted() {
    let temp_file = write_config(MINIMAL);

    let config = RelayConfig::load_from_file(temp_file.path()).unwrap();

    assert_eq!(config.mqtt.keepalive_secs, 60);
    assert_eq!(config.relay.cycle_interval_secs, 10);
    assert_eq!(config.relay.max_wait_cycles, 10);
    assert_eq!(config.reachability.timeout_secs, 3);
    assert_eq!(config.queue.busy_timeout_ms, 5000);

    let policy = ReconnectPolicy::from(&config.backoff);
    assert_eq!(policy.max_attempts, 12);
    assert!(policy.fatal_on_auth_failure);

    // Probe target falls back to the broker endpoint
    assert_eq!(
        config.probe_target().unwrap(),
        ("broker.example.com".to_string(), 1883)
    );
}

#[test]
fn test_config_resolves_credentials_from_environment() {
    std::env::set_var("UPS_RELAY_IT_USERNAME", "relay-user");
    std::env::set_var("UPS_RELAY_IT_PASSWORD", "relay-secret");

    let temp_file = write_config(
        r#"
[device]
id = "40A36BC38E91"
location = "Office"

[mqtt]
broker_url = "mqtts://broker.example.com"
username_env = "UPS_RELAY_IT_USERNAME"
password_env = "UPS_RELAY_IT_PASSWORD"
client_id = "office-relay"
topic_template = "ups/data/{device_id}"

[queue]
path = "sensor_data.db"
"#,
    );

    let config = RelayConfig::load_from_file(temp_file.path()).unwrap();
    let credentials = config.mqtt.credentials().unwrap().unwrap();

    assert_eq!(credentials.username, "relay-user");
    assert_eq!(credentials.password, "relay-secret");
    assert!(!format!("{credentials:?}").contains("relay-secret"));

    let endpoint = config.mqtt.endpoint().unwrap();
    assert!(endpoint.tls);
    assert_eq!(endpoint.port, 8883);
}

#[test]
fn test_config_fails_when_credential_variable_is_unset() {
    let temp_file = write_config(
        r#"
[device]
id = "40A36BC38E91"
location = "Office"

[mqtt]
broker_url = "mqtt://broker.example.com"
username_env = "UPS_RELAY_IT_DEFINITELY_UNSET"
client_id = "office-relay"
topic_template = "ups/data/{device_id}"

[queue]
path = "sensor_data.db"
"#,
    );

    let result = RelayConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::EnvVarNotFound(name)) if name == "UPS_RELAY_IT_DEFINITELY_UNSET"));
}

#[test]
fn test_config_fails_with_missing_file() {
    let result = RelayConfig::load_from_file(Path::new("/nonexistent/ups-relay.toml"));

    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_config_fails_with_malformed_toml() {
    let temp_file = write_config("[device\nid = ");

    let result = RelayConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_fails_with_missing_required_section() {
    let temp_file = write_config(
        r#"
[device]
id = "40A36BC38E91"
location = "Office"

[queue]
path = "sensor_data.db"
"#,
    );

    let result = RelayConfig::load_from_file(temp_file.path());

    assert!(matches!(result, Err(ConfigError::TomlParse(_))));
}

#[test]
fn test_config_rejects_invalid_values() {
    let cases = [
        ("id = \"40A36BC38E91\"", "id = \"bad id!\""),
        (
            "broker_url = \"mqtt://broker.example.com:1883\"",
            "broker_url = \"http://broker.example.com\"",
        ),
        (
            "topic_template = \"kosine/assets/ups/data/{device_id}\"",
            "topic_template = \"ups/data/fixed\"",
        ),
        (
            "client_id = \"office-relay\"",
            "client_id = \"office-relay\"\nkeepalive_secs = 1",
        ),
        (
            "[queue]",
            "[relay]\nmax_wait_cycles = 0\n\n[queue]",
        ),
        (
            "[queue]",
            "[backoff]\ninitial_delay_secs = 10\nrate = 2.0\nmax_delay_secs = 5\nmax_attempts = 3\n\n[queue]",
        ),
        (
            "[queue]",
            "[backoff]\ninitial_delay_secs = 1\nrate = 0.5\nmax_delay_secs = 60\nmax_attempts = 3\n\n[queue]",
        ),
    ];

    for (original, replacement) in cases {
        let content = MINIMAL.replacen(original, replacement, 1);
        let temp_file = write_config(&content);

        let result = RelayConfig::load_from_file(temp_file.path());
        assert!(
            result.is_err(),
            "Expected validation failure after replacing {original:?} with {replacement:?}"
        );
    }
}

#[test]
fn test_extreme_backoff_rate_stays_capped() {
    let content = MINIMAL.replacen(
        "[queue]",
        "[backoff]\ninitial_delay_secs = 1\nrate = 1e20\nmax_delay_secs = 60\nmax_attempts = 12\n\n[queue]",
        1,
    );
    let temp_file = write_config(&content);

    let config = RelayConfig::load_from_file(temp_file.path()).unwrap();
    let mut backoff = Backoff::new(&ReconnectPolicy::from(&config.backoff));

    while !backoff.is_exhausted() {
        backoff.record_broker_failure();
        assert_eq!(backoff.delay, Duration::from_secs(60));
    }
    assert_eq!(backoff.attempt, 12);
}

#[test]
fn test_config_round_trips_through_show_output() {
    let config = RelayConfig::from_toml_str(MINIMAL).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = RelayConfig::from_toml_str(&rendered).unwrap();

    assert_eq!(config, reparsed);
}
