//! Loading configuration files from disk

use edge_mqtt::config::{ClientConfig, ConfigError};
use edge_mqtt::QoS;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn test_load_device_config() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://10.0.0.2:1883"

[session]
client_id = "thermostat-01"
keep_alive_secs = 20

[session.will]
topic = "thermostat-01/status"
message = "0"
retain = true

[session.birth]
topic = "thermostat-01/status"
message = "1"
"#,
    );

    let config = ClientConfig::load_from_file(file.path()).unwrap();
    let options = config.to_client_options().unwrap();

    assert_eq!(options.host, "10.0.0.2");
    assert_eq!(options.port, 1883);
    assert_eq!(options.connect.client_id, "thermostat-01");
    assert_eq!(options.connect.keep_alive_secs, 20);

    let will = options.connect.will.unwrap();
    assert_eq!(will.qos, QoS::AtMostOnce);
    assert!(will.retain);
    assert_eq!(options.birth.unwrap().message, b"1");
    assert_eq!(options.connect_timeout, Duration::from_secs(10));
}

#[test]
fn test_reconnect_disabled() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost"

[reconnect]
enabled = false
"#,
    );

    let options = ClientConfig::load_from_file(file.path())
        .unwrap()
        .to_client_options()
        .unwrap();
    assert!(!options.reconnect.enabled);
}

#[test]
fn test_missing_file() {
    let result = ClientConfig::load_from_file(std::path::Path::new("/nonexistent/edge-mqtt.toml"));
    assert!(matches!(result, Err(ConfigError::FileRead(_))));
}

#[test]
fn test_invalid_toml() {
    let file = write_config("[broker\nurl = ");
    assert!(matches!(
        ClientConfig::load_from_file(file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_missing_broker_section() {
    let file = write_config("[session]\nclient_id = \"dev1\"\n");
    assert!(matches!(
        ClientConfig::load_from_file(file.path()),
        Err(ConfigError::TomlParse(_))
    ));
}

#[test]
fn test_bad_broker_url_rejected_on_load() {
    let file = write_config("[broker]\nurl = \"https://localhost\"\n");
    let err = ClientConfig::load_from_file(file.path()).unwrap_err();
    assert!(matches!(err, ConfigError::InvalidBrokerUrl { .. }));
    assert!(err.to_string().contains("https://localhost"));
}

#[test]
fn test_show_round_trips_through_toml() {
    let file = write_config(
        r#"
[broker]
url = "mqtt://localhost:1884"

[session]
client_id = "dev1"
log_traffic = true
"#,
    );
    let config = ClientConfig::load_from_file(file.path()).unwrap();

    let rendered = toml::to_string_pretty(&config).unwrap();
    let reparsed = ClientConfig::from_toml(&rendered).unwrap();
    assert_eq!(reparsed, config);
}
