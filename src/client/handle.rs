//! Caller-facing client handle

use crate::client::event_loop::{Command, EventLoop, HookRegistration};
use crate::client::options::{ClientOptions, PublishOptions, SubscribeOptions};
use crate::client::pending::AckResult;
use crate::client::state_machine::{ConnectionState, ConnectionStateMachine};
use crate::error::ClientError;
use bytes::Bytes;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::transport::Transport;

/// Cloneable handle to a running client.
///
/// Every method posts a message to the client's event loop and returns at
/// once; results arrive later through hooks and callbacks. Publishing or
/// subscribing while disconnected is silently ignored. Methods only fail when
/// the event loop has shut down.
#[derive(Clone, Debug)]
pub struct MqttClient {
    commands: mpsc::UnboundedSender<Command>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl MqttClient {
    /// Spawn the event loop for `transport` and return a handle to it.
    /// Nothing is opened until [`connect`](Self::connect).
    pub fn spawn<T>(options: ClientOptions, transport: T) -> (Self, JoinHandle<()>)
    where
        T: Transport + 'static,
    {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);

        info!(
            target: "mqtt_client",
            "Spawning MQTT client {} for {}:{}",
            options.connect.client_id, options.host, options.port
        );
        let machine = ConnectionStateMachine::new(options);
        let event_loop = EventLoop::new(machine, transport, command_rx, state_tx);
        let handle = tokio::spawn(event_loop.run());

        (Self { commands, state_rx }, handle)
    }

    fn send(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).map_err(|_| ClientError::Closed)
    }

    pub fn connect(&self) -> Result<(), ClientError> {
        self.send(Command::Connect)
    }

    /// Connect again after a disconnect, refusal or stop. Ignored while a
    /// connection is being made or is up.
    pub fn reconnect(&self) -> Result<(), ClientError> {
        self.send(Command::Reconnect)
    }

    /// Send DISCONNECT, close the transport and cancel every timer. No
    /// reconnect follows.
    pub fn stop(&self) -> Result<(), ClientError> {
        self.send(Command::Stop)
    }

    /// Alias for [`stop`](Self::stop)
    pub fn close(&self) -> Result<(), ClientError> {
        self.stop()
    }

    /// Stop and end the event loop. Later calls on any handle fail with
    /// [`ClientError::Closed`].
    pub fn shutdown(&self) -> Result<(), ClientError> {
        self.send(Command::Shutdown)
    }

    pub fn publish<P: Into<Bytes>>(
        &self,
        topic: &str,
        payload: P,
        options: PublishOptions,
    ) -> Result<(), ClientError> {
        self.send(Command::Publish {
            topic: topic.to_string(),
            payload: payload.into(),
            options,
            callback: None,
        })
    }

    /// Publish and call `on_ack` with the packet id once the broker
    /// acknowledges. Never called for QoS 0.
    pub fn publish_with_ack<P, F>(
        &self,
        topic: &str,
        payload: P,
        options: PublishOptions,
        on_ack: F,
    ) -> Result<(), ClientError>
    where
        P: Into<Bytes>,
        F: FnOnce(AckResult) + Send + 'static,
    {
        self.send(Command::Publish {
            topic: topic.to_string(),
            payload: payload.into(),
            options,
            callback: Some(Box::new(on_ack)),
        })
    }

    pub fn subscribe<H>(
        &self,
        filter: &str,
        options: SubscribeOptions,
        handler: H,
    ) -> Result<(), ClientError>
    where
        H: FnMut(&str, &[u8]) + Send + 'static,
    {
        self.send(Command::Subscribe {
            filter: filter.to_string(),
            options,
            handler: Box::new(handler),
            callback: None,
        })
    }

    /// Subscribe and call `on_ack` with the granted QoS from the SUBACK
    pub fn subscribe_with_ack<H, F>(
        &self,
        filter: &str,
        options: SubscribeOptions,
        handler: H,
        on_ack: F,
    ) -> Result<(), ClientError>
    where
        H: FnMut(&str, &[u8]) + Send + 'static,
        F: FnOnce(AckResult) + Send + 'static,
    {
        self.send(Command::Subscribe {
            filter: filter.to_string(),
            options,
            handler: Box::new(handler),
            callback: Some(Box::new(on_ack)),
        })
    }

    /// Send UNSUBSCRIBE. Messages already matching a local handler keep being
    /// delivered until the connection ends.
    pub fn unsubscribe(&self, filter: &str) -> Result<(), ClientError> {
        self.send(Command::Unsubscribe {
            filter: filter.to_string(),
            callback: None,
        })
    }

    pub fn unsubscribe_with_ack<F>(&self, filter: &str, on_ack: F) -> Result<(), ClientError>
    where
        F: FnOnce(AckResult) + Send + 'static,
    {
        self.send(Command::Unsubscribe {
            filter: filter.to_string(),
            callback: Some(Box::new(on_ack)),
        })
    }

    /// Publish and wait for the acknowledgement. Resolves to `None` if the
    /// connection ends first, or straight away for QoS 0.
    pub async fn publish_and_wait<P: Into<Bytes>>(
        &self,
        topic: &str,
        payload: P,
        options: PublishOptions,
    ) -> Result<Option<AckResult>, ClientError> {
        let (tx, rx) = oneshot::channel();
        self.publish_with_ack(topic, payload, options, move |result| {
            let _ = tx.send(result);
        })?;
        Ok(rx.await.ok())
    }

    pub fn on_connect<F>(&self, hook: F) -> Result<(), ClientError>
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Command::SetHook(HookRegistration::Connect(Box::new(hook))))
    }

    pub fn on_disconnect<F>(&self, hook: F) -> Result<(), ClientError>
    where
        F: FnMut() + Send + 'static,
    {
        self.send(Command::SetHook(HookRegistration::Disconnect(Box::new(
            hook,
        ))))
    }

    pub fn on_error<F>(&self, hook: F) -> Result<(), ClientError>
    where
        F: FnMut(&ClientError) + Send + 'static,
    {
        self.send(Command::SetHook(HookRegistration::Error(Box::new(hook))))
    }

    pub fn on_log<F>(&self, hook: F) -> Result<(), ClientError>
    where
        F: FnMut(&str) + Send + 'static,
    {
        self.send(Command::SetHook(HookRegistration::Log(Box::new(hook))))
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Receiver that sees every published state change
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Wait until the client reports `Connected`, or give up after `timeout`
    pub async fn wait_until_connected(&self, timeout: Duration) -> Result<(), ClientError> {
        let mut state_rx = self.state_rx.clone();
        let wait = async {
            loop {
                if *state_rx.borrow_and_update() == ConnectionState::Connected {
                    return Ok(());
                }
                if state_rx.changed().await.is_err() {
                    return Err(ClientError::Closed);
                }
            }
        };
        tokio::time::timeout(timeout, wait)
            .await
            .map_err(|_| ClientError::ConnectTimeout)?
    }
}
