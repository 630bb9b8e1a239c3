//! MQTT client
//!
//! [`MqttClient`] is the handle callers hold. Behind it a single event-loop
//! task drives the [`ConnectionStateMachine`], which sequences the pending-ack
//! tracker, subscription registry, keepalive monitor and reconnect policy.

pub mod actions;
pub mod event_loop;
pub mod handle;
pub mod hooks;
pub mod keepalive;
pub mod options;
pub mod pending;
pub mod reconnect;
pub mod state_machine;
pub mod subscriptions;

pub use actions::{Action, TimerKind};
pub use handle::MqttClient;
pub use options::{
    BirthMessage, ClientOptions, ConnectOptions, PublishOptions, SubscribeOptions, DEFAULT_PORT,
};
pub use pending::{AckResult, PendingAckTracker};
pub use reconnect::ReconnectConfig;
pub use state_machine::{ConnectionState, ConnectionStateMachine};
pub use subscriptions::{SubscriptionRegistry, TopicFilter};
