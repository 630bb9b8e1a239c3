//! edge-mqtt - embeddable MQTT 3.1 client
//!
//! A small MQTT 3.1 (`MQIsdp`, protocol level 3) client for devices and
//! services that publish telemetry and react to commands.
//!
//! # Overview
//!
//! - Packet encoding and decoding for all fourteen control packet types
//! - Stream reassembly of packets split or coalesced by the transport
//! - QoS 0 and 1 publishing with acknowledgement callbacks, best-effort QoS 2
//! - Topic subscriptions with trailing `#` prefix matching
//! - Keepalive pings and automatic reconnect with linear backoff
//! - TOML configuration and a small CLI
//!
//! All connection state lives in one event-loop task. [`MqttClient`] handles
//! send it commands, so they can be cloned freely across tasks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use edge_mqtt::{ClientOptions, MqttClient, PublishOptions, QoS, SubscribeOptions};
//! use edge_mqtt::transport::TcpTransport;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let options = ClientOptions::new("localhost", 1883).with_client_id("dev1");
//! let (client, _task) = MqttClient::spawn(options, TcpTransport::new());
//!
//! client.on_connect(|| println!("connected"))?;
//! client.connect()?;
//! client.wait_until_connected(Duration::from_secs(10)).await?;
//!
//! client.subscribe("home/#", SubscribeOptions::default(), |topic: &str, payload: &[u8]| {
//!     println!("{topic}: {}", String::from_utf8_lossy(payload));
//! })?;
//! client
//!     .publish_and_wait("home/tv", "on", PublishOptions::qos(QoS::AtLeastOnce))
//!     .await?;
//! client.stop()?;
//! # Ok::<(), edge_mqtt::ClientError>(())
//! # }).unwrap();
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod testing;
pub mod transport;

pub use client::{
    AckResult, BirthMessage, ClientOptions, ConnectOptions, ConnectionState, MqttClient,
    PublishOptions, ReconnectConfig, SubscribeOptions,
};
pub use config::{ClientConfig, ConfigError};
pub use error::{ClientError, CodecError, OptionsError, TransportError};
pub use protocol::{ConnectReturnCode, Packet, PacketType, QoS, Will};
