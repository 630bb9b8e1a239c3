//! Client and connect options

use crate::client::reconnect::ReconnectConfig;
use crate::error::OptionsError;
use crate::protocol::packet::{Connect, QoS, Will};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_KEEP_ALIVE_SECS: u16 = 30;
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Longest username or password the client accepts
pub const MAX_CREDENTIAL_LEN: usize = 12;
/// MQTT 3.1 client identifier limit
pub const MAX_CLIENT_ID_LEN: usize = 23;

/// Build a client id of the form `a<unix millis><0-999>`
pub fn generate_client_id() -> String {
    let millis = chrono::Utc::now().timestamp_millis();
    let suffix = uuid::Uuid::new_v4().as_u128() % 1000;
    let id = format!("a{millis}{suffix}");
    id.chars().take(MAX_CLIENT_ID_LEN).collect()
}

/// Everything that goes into the CONNECT packet. Fixed for a connection's lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub will: Option<Will>,
    pub keep_alive_secs: u16,
    pub clean_session: bool,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            client_id: generate_client_id(),
            username: None,
            password: None,
            will: None,
            keep_alive_secs: DEFAULT_KEEP_ALIVE_SECS,
            clean_session: true,
        }
    }
}

impl ConnectOptions {
    pub fn validate(&self) -> Result<(), OptionsError> {
        let id_len = self.client_id.chars().count();
        if id_len == 0 || id_len > MAX_CLIENT_ID_LEN {
            return Err(OptionsError::InvalidClientId(id_len));
        }
        if let Some(username) = &self.username {
            let len = username.chars().count();
            if len > MAX_CREDENTIAL_LEN {
                return Err(OptionsError::UsernameTooLong(len));
            }
        }
        if let Some(password) = &self.password {
            if self.username.is_none() {
                return Err(OptionsError::PasswordWithoutUsername);
            }
            let len = password.chars().count();
            if len > MAX_CREDENTIAL_LEN {
                return Err(OptionsError::PasswordTooLong(len));
            }
        }
        if let Some(will) = &self.will {
            if will.topic.is_empty() {
                return Err(OptionsError::MissingWillTopic);
            }
        }
        Ok(())
    }

    pub fn to_connect(&self) -> Connect {
        Connect {
            client_id: self.client_id.clone(),
            username: self.username.clone(),
            password: self.password.clone(),
            will: self.will.clone(),
            keep_alive_secs: self.keep_alive_secs,
            clean_session: self.clean_session,
        }
    }
}

/// Retained "connected" status published after every successful CONNACK
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BirthMessage {
    pub topic: String,
    pub message: Vec<u8>,
    pub qos: QoS,
}

/// Full client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientOptions {
    pub host: String,
    pub port: u16,
    pub connect: ConnectOptions,
    /// Bounds both the transport open and the wait for CONNACK
    pub connect_timeout: Duration,
    pub reconnect: ReconnectConfig,
    pub birth: Option<BirthMessage>,
    /// Log every packet in hex through `on_log`
    pub log_traffic: bool,
}

impl ClientOptions {
    pub fn new<H: Into<String>>(host: H, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            connect: ConnectOptions::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            reconnect: ReconnectConfig::default(),
            birth: None,
            log_traffic: false,
        }
    }

    pub fn with_client_id<S: Into<String>>(mut self, client_id: S) -> Self {
        self.connect.client_id = client_id.into();
        self
    }

    pub fn with_credentials<U>(mut self, username: U, password: Option<String>) -> Self
    where
        U: Into<String>,
    {
        self.connect.username = Some(username.into());
        self.connect.password = password;
        self
    }

    pub fn with_will(mut self, will: Will) -> Self {
        self.connect.will = Some(will);
        self
    }

    pub fn with_keep_alive(mut self, secs: u16) -> Self {
        self.connect.keep_alive_secs = secs;
        self
    }

    pub fn with_clean_session(mut self, clean_session: bool) -> Self {
        self.connect.clean_session = clean_session;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_birth(mut self, birth: BirthMessage) -> Self {
        self.birth = Some(birth);
        self
    }

    pub fn with_log_traffic(mut self, enabled: bool) -> Self {
        self.log_traffic = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), OptionsError> {
        self.connect.validate()
    }
}

/// Per-call publish flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishOptions {
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
}

impl PublishOptions {
    pub fn qos(qos: QoS) -> Self {
        Self {
            qos,
            ..Self::default()
        }
    }

    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// Per-call subscribe flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
    pub qos: QoS,
}
