//! Configuration file for the edge-mqtt client
//!
//! A TOML file with `[broker]`, `[session]` and `[reconnect]` tables. Broker
//! credentials never live in the file: it names the environment variables to
//! read them from, and those are resolved when the options are built.

use crate::client::options::{
    generate_client_id, BirthMessage, ClientOptions, ConnectOptions, DEFAULT_CONNECT_TIMEOUT,
    DEFAULT_KEEP_ALIVE_SECS, DEFAULT_PORT, MAX_CLIENT_ID_LEN,
};
use crate::client::reconnect::ReconnectConfig;
use crate::error::OptionsError;
use crate::protocol::packet::{QoS, Will};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    pub broker: BrokerSection,
    #[serde(default)]
    pub session: SessionSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerSection {
    /// Broker URL, `mqtt://host[:port]`
    pub url: String,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSection {
    /// Generated at startup when absent
    pub client_id: Option<String>,
    /// Environment variable containing the username
    pub username_env: Option<String>,
    /// Environment variable containing the password
    pub password_env: Option<String>,
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u16,
    #[serde(default = "default_true")]
    pub clean_session: bool,
    /// Log every packet in and out as hex
    #[serde(default)]
    pub log_traffic: bool,
    pub will: Option<WillSection>,
    pub birth: Option<BirthSection>,
}

impl Default for SessionSection {
    fn default() -> Self {
        Self {
            client_id: None,
            username_env: None,
            password_env: None,
            keep_alive_secs: default_keep_alive_secs(),
            clean_session: true,
            log_traffic: false,
            will: None,
            birth: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WillSection {
    pub topic: String,
    pub message: String,
    #[serde(default)]
    pub qos: u8,
    #[serde(default)]
    pub retain: bool,
}

/// Retained status message published after every successful connect
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BirthSection {
    pub topic: String,
    pub message: String,
    #[serde(default)]
    pub qos: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconnectSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_step_ms")]
    pub step_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            enabled: true,
            step_ms: default_step_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT.as_secs()
}

fn default_keep_alive_secs() -> u16 {
    DEFAULT_KEEP_ALIVE_SECS
}

fn default_true() -> bool {
    true
}

fn default_step_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid broker URL '{url}': {reason}")]
    InvalidBrokerUrl { url: String, reason: String },
    #[error("Invalid client options: {0}")]
    InvalidOptions(#[from] OptionsError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ClientConfig {
    /// Load and validate a configuration file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse and validate configuration text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Configuration pointing at `url` with every other value defaulted
    pub fn for_broker<S: Into<String>>(url: S) -> Self {
        Self {
            broker: BrokerSection {
                url: url.into(),
                connect_timeout_secs: default_connect_timeout_secs(),
            },
            session: SessionSection::default(),
            reconnect: ReconnectSection::default(),
        }
    }

    /// Checks that need no environment
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.broker_address()?;

        if self.broker.connect_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "connect_timeout_secs must be greater than zero".to_string(),
            ));
        }

        if let Some(client_id) = &self.session.client_id {
            let len = client_id.chars().count();
            if len == 0 || len > MAX_CLIENT_ID_LEN {
                return Err(OptionsError::InvalidClientId(len).into());
            }
        }

        if let Some(will) = &self.session.will {
            if will.topic.is_empty() {
                return Err(OptionsError::MissingWillTopic.into());
            }
            parse_qos(will.qos)?;
        }

        if let Some(birth) = &self.session.birth {
            if birth.topic.is_empty() {
                return Err(ConfigError::InvalidConfig(
                    "[session.birth] requires a topic".to_string(),
                ));
            }
            parse_qos(birth.qos)?;
        }

        if self.reconnect.enabled && self.reconnect.step_ms == 0 {
            return Err(ConfigError::InvalidConfig(
                "reconnect step_ms must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }

    /// Host and port from the broker URL
    pub fn broker_address(&self) -> Result<(String, u16), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidBrokerUrl {
            url: self.broker.url.clone(),
            reason: reason.to_string(),
        };

        let url = url::Url::parse(&self.broker.url).map_err(|e| invalid(&e.to_string()))?;
        if !matches!(url.scheme(), "mqtt" | "tcp") {
            return Err(invalid("scheme must be mqtt or tcp"));
        }
        let host = url
            .host_str()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| invalid("missing host"))?;

        Ok((host.to_string(), url.port().unwrap_or(DEFAULT_PORT)))
    }

    /// Get the broker username from its environment variable
    pub fn username(&self) -> Option<String> {
        Self::get_env_var_optional(self.session.username_env.as_ref())
    }

    /// Get the broker password from its environment variable
    pub fn password(&self) -> Option<String> {
        Self::get_env_var_optional(self.session.password_env.as_ref())
    }

    fn get_env_var_optional(env_var_name: Option<&String>) -> Option<String> {
        env_var_name.and_then(|name| std::env::var(name).ok())
    }

    /// Build validated client options, resolving credentials from the
    /// environment
    pub fn to_client_options(&self) -> Result<ClientOptions, ConfigError> {
        let (host, port) = self.broker_address()?;
        let session = &self.session;

        let will = match &session.will {
            Some(will) => Some(Will {
                topic: will.topic.clone(),
                message: will.message.clone().into_bytes(),
                qos: parse_qos(will.qos)?,
                retain: will.retain,
            }),
            None => None,
        };

        let birth = match &session.birth {
            Some(birth) => Some(BirthMessage {
                topic: birth.topic.clone(),
                message: birth.message.clone().into_bytes(),
                qos: parse_qos(birth.qos)?,
            }),
            None => None,
        };

        let options = ClientOptions {
            host,
            port,
            connect: ConnectOptions {
                client_id: session.client_id.clone().unwrap_or_else(generate_client_id),
                username: self.username(),
                password: self.password(),
                will,
                keep_alive_secs: session.keep_alive_secs,
                clean_session: session.clean_session,
            },
            connect_timeout: Duration::from_secs(self.broker.connect_timeout_secs),
            reconnect: ReconnectConfig {
                enabled: self.reconnect.enabled,
                step: Duration::from_millis(self.reconnect.step_ms),
                max_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            },
            birth,
            log_traffic: session.log_traffic,
        };

        options.validate()?;
        Ok(options)
    }
}

fn parse_qos(qos: u8) -> Result<QoS, OptionsError> {
    QoS::from_bits(qos).ok_or(OptionsError::InvalidQos(qos))
}
