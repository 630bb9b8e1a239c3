//! Connection state machine
//!
//! Owns every piece of per-connection state (reassembler, pending acks,
//! subscriptions, keepalive, reconnect policy) and reacts to one event at a
//! time. It performs no I/O: each event returns the [`Action`]s the event loop
//! must carry out, in order.

use crate::client::actions::{Action, TimerKind};
use crate::client::hooks::Hooks;
use crate::client::keepalive::KeepAliveMonitor;
use crate::client::options::{ClientOptions, PublishOptions, SubscribeOptions};
use crate::client::pending::{AckCallback, AckResult, OperationKind, PendingAckTracker};
use crate::client::reconnect::{ReconnectPolicy, ReconnectionDecision};
use crate::client::subscriptions::{MessageHandler, SubscriptionRegistry};
use crate::error::{ClientError, TransportError};
use crate::protocol::codec::{self, encode_disconnect, encode_puback, encode_pubrec, encode_pubrel};
use crate::protocol::packet::{
    ConnAck, ConnectReturnCode, Packet, PacketType, Publish, QoS, Subscribe, Unsubscribe,
};
use crate::protocol::reassembler::StreamReassembler;
use bytes::Bytes;
use std::fmt::{self, Write as _};
use tracing::{debug, info, warn};

/// Client connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Transport opening or CONNACK outstanding
    Connecting,
    Connected,
    /// DISCONNECT sent, waiting for the transport to close
    Stopping,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Stopping => "stopping",
        };
        f.write_str(name)
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

pub struct ConnectionStateMachine {
    options: ClientOptions,
    state: ConnectionState,
    /// Set by `stop()`; suppresses reconnects until the next explicit connect
    stopping: bool,
    /// Set by a CONNACK refusal; suppresses automatic reconnects
    rejected: bool,
    transport_open: bool,
    reassembler: StreamReassembler,
    pending: PendingAckTracker,
    subscriptions: SubscriptionRegistry,
    keepalive: KeepAliveMonitor,
    reconnect: ReconnectPolicy,
    hooks: Hooks,
}

impl fmt::Debug for ConnectionStateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionStateMachine")
            .field("state", &self.state)
            .field("stopping", &self.stopping)
            .field("rejected", &self.rejected)
            .field("transport_open", &self.transport_open)
            .field("pending", &self.pending.len())
            .field("subscriptions", &self.subscriptions.len())
            .finish()
    }
}

impl ConnectionStateMachine {
    pub fn new(options: ClientOptions) -> Self {
        let keepalive = KeepAliveMonitor::new(options.connect.keep_alive_secs);
        let reconnect = ReconnectPolicy::new(options.reconnect.clone());
        Self {
            options,
            state: ConnectionState::Disconnected,
            stopping: false,
            rejected: false,
            transport_open: false,
            reassembler: StreamReassembler::new(),
            pending: PendingAckTracker::new(),
            subscriptions: SubscriptionRegistry::new(),
            keepalive,
            reconnect,
            hooks: Hooks::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn is_transport_open(&self) -> bool {
        self.transport_open
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    pub fn hooks_mut(&mut self) -> &mut Hooks {
        &mut self.hooks
    }

    pub fn pending(&self) -> &PendingAckTracker {
        &self.pending
    }

    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    pub fn reconnect_failures(&self) -> u32 {
        self.reconnect.failures()
    }

    /// Start a connection. Only valid while disconnected.
    pub fn connect(&mut self) -> Vec<Action> {
        if self.state != ConnectionState::Disconnected {
            debug!(target: "mqtt_client", "connect() ignored while {}", self.state);
            return Vec::new();
        }
        if let Err(e) = self.options.validate() {
            self.hooks.error(&ClientError::InvalidOptions(e));
            return Vec::new();
        }
        self.stopping = false;
        self.rejected = false;
        self.begin_connect()
    }

    /// Caller-initiated reconnect. A no-op while connecting or connected,
    /// otherwise clears a previous stop or refusal and connects.
    pub fn reconnect(&mut self) -> Vec<Action> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!(target: "mqtt_client", "reconnect() ignored while {}", self.state);
                Vec::new()
            }
            ConnectionState::Stopping => Vec::new(),
            ConnectionState::Disconnected => self.connect(),
        }
    }

    fn begin_connect(&mut self) -> Vec<Action> {
        info!(
            target: "mqtt_client",
            "Connecting to {}:{} as {}",
            self.options.host, self.options.port, self.options.connect.client_id
        );
        self.state = ConnectionState::Connecting;
        vec![
            Action::CancelTimer(TimerKind::Reconnect),
            Action::Open {
                host: self.options.host.clone(),
                port: self.options.port,
            },
        ]
    }

    /// The transport finished opening: send CONNECT and wait for CONNACK
    pub fn transport_opened(&mut self) -> Vec<Action> {
        let mut actions = Vec::new();
        self.transport_open = true;
        self.hooks.log("Socket connection opened.");

        match codec::encode_connect(&self.options.connect.to_connect()) {
            Ok(bytes) => {
                self.push_send(&mut actions, bytes);
                actions.push(Action::arm(
                    TimerKind::ConnectTimeout,
                    self.options.connect_timeout,
                ));
            }
            Err(e) => {
                self.hooks.error(&ClientError::MalformedPacket(e));
                self.rejected = true;
                actions.push(Action::Close);
            }
        }
        actions
    }

    /// The transport could not be opened
    pub fn transport_open_failed(&mut self, error: TransportError) -> Vec<Action> {
        self.hooks.error(&ClientError::could_not_connect(
            self.options.host.clone(),
            self.options.port,
            error.to_string(),
        ));
        self.teardown()
    }

    /// The transport closed, by either side or after an I/O error
    pub fn transport_closed(&mut self) -> Vec<Action> {
        self.teardown()
    }

    /// Bytes arrived from the transport
    pub fn bytes_received(&mut self, chunk: &[u8]) -> Vec<Action> {
        let mut actions = Vec::new();
        for result in self.reassembler.feed(chunk) {
            let raw = match result {
                Ok(raw) => raw,
                Err(e) => {
                    self.hooks.error(&ClientError::MalformedPacket(e));
                    continue;
                }
            };
            if self.options.log_traffic {
                self.hooks.trace(&format!(
                    "IN: {}: {}",
                    raw.packet_type,
                    hex(&raw.payload)
                ));
            }
            match Packet::decode(&raw) {
                Ok(packet) => self.handle_packet(packet, &mut actions),
                Err(e) => self.hooks.error(&ClientError::MalformedPacket(e)),
            }
        }
        actions
    }

    fn handle_packet(&mut self, packet: Packet, actions: &mut Vec<Action>) {
        debug!(target: "mqtt_client", "Received {}", packet.packet_type());
        match packet {
            Packet::ConnAck(connack) => self.handle_connack(connack, actions),
            Packet::Publish(publish) => self.handle_publish(publish, actions),
            Packet::PubAck(id) | Packet::PubComp(id) => {
                self.pending
                    .resolve(id, AckResult::Published { packet_id: id });
            }
            Packet::PubRec(id) => {
                // QoS 2 is best-effort: answer with a fresh PUBREL and wait for PUBCOMP
                self.push_send(actions, encode_pubrel(id));
            }
            Packet::PubRel(id) => {
                debug!(
                    target: "mqtt_client",
                    "Ignoring PUBREL for {}, inbound QoS 2 is not completed",
                    id
                );
            }
            Packet::SubAck(suback) => {
                self.pending.resolve(
                    suback.packet_id,
                    AckResult::Subscribed {
                        packet_id: suback.packet_id,
                        granted_qos: suback.granted_qos,
                    },
                );
            }
            Packet::UnsubAck(id) => {
                self.pending
                    .resolve(id, AckResult::Unsubscribed { packet_id: id });
            }
            Packet::PingResp => {
                let keepalive = self.keepalive.pong_received();
                self.push_all(actions, keepalive);
            }
            other @ (Packet::Connect(_)
            | Packet::Subscribe(_)
            | Packet::Unsubscribe(_)
            | Packet::PingReq
            | Packet::Disconnect) => {
                self.hooks
                    .error(&ClientError::UnexpectedPacket(other.packet_type()));
            }
        }
    }

    fn handle_connack(&mut self, connack: ConnAck, actions: &mut Vec<Action>) {
        if self.state != ConnectionState::Connecting {
            warn!(target: "mqtt_client", "CONNACK received while {}", self.state);
            self.hooks
                .error(&ClientError::UnexpectedPacket(PacketType::ConnAck));
            return;
        }
        actions.push(Action::CancelTimer(TimerKind::ConnectTimeout));

        if connack.return_code != ConnectReturnCode::Accepted {
            self.hooks
                .error(&ClientError::ConnectionRefused(connack.return_code));
            self.rejected = true;
            actions.push(Action::Close);
            return;
        }

        self.state = ConnectionState::Connected;
        self.pending.reset_ids();
        self.reconnect.reset();
        let keepalive = self.keepalive.start();
        self.push_all(actions, keepalive);

        if let Some(birth) = self.options.birth.clone() {
            let options = PublishOptions::qos(birth.qos).retained();
            let birth_actions =
                self.publish(&birth.topic, Bytes::from(birth.message), options, None);
            actions.extend(birth_actions);
        }

        self.hooks.log(&format!(
            "Connected to {}:{}",
            self.options.host, self.options.port
        ));
        self.hooks.connected();
    }

    fn handle_publish(&mut self, publish: Publish, actions: &mut Vec<Action>) {
        let delivered = self.subscriptions.dispatch(&publish.topic, &publish.payload);
        if delivered == 0 {
            debug!(target: "mqtt_client", "No subscription matched {}", publish.topic);
        }

        match (publish.qos, publish.packet_id) {
            (QoS::AtLeastOnce, Some(id)) => self.push_send(actions, encode_puback(id)),
            (QoS::ExactlyOnce, Some(id)) => self.push_send(actions, encode_pubrec(id)),
            _ => {}
        }
    }

    /// A timer armed by an earlier action fired
    pub fn timer_fired(&mut self, kind: TimerKind) -> Vec<Action> {
        match kind {
            TimerKind::ConnectTimeout => {
                if self.state != ConnectionState::Connecting {
                    return Vec::new();
                }
                self.hooks.error(&ClientError::ConnectTimeout);
                vec![Action::Close]
            }
            TimerKind::Ping => {
                if self.state != ConnectionState::Connected {
                    return Vec::new();
                }
                let mut actions = Vec::new();
                let keepalive = self.keepalive.ping_due();
                self.push_all(&mut actions, keepalive);
                actions
            }
            TimerKind::PingTimeout => {
                if !self.keepalive.deadline_passed() {
                    return Vec::new();
                }
                self.hooks.error(&ClientError::KeepAliveTimeout);
                vec![Action::Close]
            }
            TimerKind::Reconnect => {
                if self.state != ConnectionState::Disconnected || self.stopping || self.rejected {
                    debug!(target: "mqtt_client", "Reconnect timer ignored while {}", self.state);
                    return Vec::new();
                }
                self.begin_connect()
            }
        }
    }

    /// Publish a message. Silently does nothing unless connected.
    ///
    /// The callback is only kept for QoS above 0 and runs on PUBACK or PUBCOMP.
    pub fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        options: PublishOptions,
        callback: Option<AckCallback>,
    ) -> Vec<Action> {
        if self.state != ConnectionState::Connected {
            debug!(target: "mqtt_client", "Not connected, dropping publish to {}", topic);
            return Vec::new();
        }

        let packet_id = (options.qos != QoS::AtMostOnce).then(|| self.pending.next_id());
        let publish = Publish {
            topic: topic.to_string(),
            packet_id,
            payload,
            qos: options.qos,
            retain: options.retain,
            dup: options.dup,
        };

        match codec::encode_publish(&publish) {
            Ok(bytes) => {
                if let Some(id) = packet_id {
                    self.pending.register(id, OperationKind::Publish, callback);
                }
                let mut actions = Vec::new();
                self.push_send(&mut actions, bytes);
                actions
            }
            Err(e) => {
                self.hooks.error(&ClientError::MalformedPacket(e));
                Vec::new()
            }
        }
    }

    /// Register a handler and send SUBSCRIBE. Silently does nothing unless connected.
    pub fn subscribe(
        &mut self,
        filter: &str,
        options: SubscribeOptions,
        handler: MessageHandler,
        callback: Option<AckCallback>,
    ) -> Vec<Action> {
        if self.state != ConnectionState::Connected {
            debug!(target: "mqtt_client", "Not connected, dropping subscribe to {}", filter);
            return Vec::new();
        }

        let packet_id = self.pending.next_id();
        let subscribe = Subscribe {
            packet_id,
            filters: vec![(filter.to_string(), options.qos.as_u8())],
        };
        match codec::encode_subscribe(&subscribe) {
            Ok(bytes) => {
                self.subscriptions.subscribe(filter, options.qos, handler);
                self.pending
                    .register(packet_id, OperationKind::Subscribe, callback);
                let mut actions = Vec::new();
                self.push_send(&mut actions, bytes);
                actions
            }
            Err(e) => {
                self.hooks.error(&ClientError::MalformedPacket(e));
                Vec::new()
            }
        }
    }

    /// Send UNSUBSCRIBE. The local handler stays registered for the rest of the
    /// connection.
    pub fn unsubscribe(&mut self, filter: &str, callback: Option<AckCallback>) -> Vec<Action> {
        if self.state != ConnectionState::Connected {
            debug!(target: "mqtt_client", "Not connected, dropping unsubscribe from {}", filter);
            return Vec::new();
        }

        let packet_id = self.pending.next_id();
        let unsubscribe = Unsubscribe {
            packet_id,
            filters: vec![filter.to_string()],
        };
        match codec::encode_unsubscribe(&unsubscribe) {
            Ok(bytes) => {
                self.pending
                    .register(packet_id, OperationKind::Unsubscribe, callback);
                let mut actions = Vec::new();
                self.push_send(&mut actions, bytes);
                actions
            }
            Err(e) => {
                self.hooks.error(&ClientError::MalformedPacket(e));
                Vec::new()
            }
        }
    }

    /// Cancel every timer and close the transport if it is open. The close that
    /// follows does not schedule a reconnect.
    pub fn stop(&mut self) -> Vec<Action> {
        self.stopping = true;
        let mut actions: Vec<Action> = TimerKind::ALL
            .iter()
            .map(|kind| Action::CancelTimer(*kind))
            .collect();
        self.keepalive.stop();

        if self.transport_open {
            info!(target: "mqtt_client", "Stopping, closing connection");
            self.state = ConnectionState::Stopping;
            self.push_send(&mut actions, encode_disconnect());
            actions.push(Action::Close);
        } else {
            self.state = ConnectionState::Disconnected;
        }
        actions
    }

    /// Single exit path for every way a connection can end
    fn teardown(&mut self) -> Vec<Action> {
        let mut actions: Vec<Action> = TimerKind::ALL
            .iter()
            .map(|kind| Action::CancelTimer(*kind))
            .collect();
        self.keepalive.stop();

        let was_open = self.transport_open;
        if self.state == ConnectionState::Connecting {
            self.reconnect.record_failure();
        }

        self.transport_open = false;
        self.state = ConnectionState::Disconnected;
        self.pending.clear();
        self.subscriptions.clear();
        self.reassembler.reset();

        if was_open {
            self.hooks.log("Socket connection closed.");
            self.hooks.disconnected();
        }

        match self.reconnect.next(self.stopping, self.rejected) {
            ReconnectionDecision::Proceed { attempt, delay } => {
                info!(
                    target: "mqtt_client",
                    "Scheduling reconnect attempt {} in {:?}",
                    attempt, delay
                );
                actions.push(Action::arm(TimerKind::Reconnect, delay));
            }
            decision => {
                debug!(target: "mqtt_client", "Not reconnecting: {:?}", decision);
            }
        }
        actions
    }

    fn push_send(&mut self, actions: &mut Vec<Action>, bytes: Bytes) {
        if self.options.log_traffic {
            self.hooks.trace(&format!("OUT: {}", hex(&bytes)));
        }
        actions.push(Action::Send(bytes));
    }

    fn push_all(&mut self, actions: &mut Vec<Action>, new: Vec<Action>) {
        for action in new {
            match action {
                Action::Send(bytes) => self.push_send(actions, bytes),
                other => actions.push(other),
            }
        }
    }
}
