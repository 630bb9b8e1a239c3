//! Single-owner event loop
//!
//! One tokio task owns the state machine, the transport and every timer.
//! Caller requests arrive as [`Command`]s over a channel, so all client state
//! is mutated from this task only.

use crate::client::actions::{Action, TimerKind};
use crate::client::hooks::{ConnectHook, DisconnectHook, ErrorHook, LogHook};
use crate::client::options::{PublishOptions, SubscribeOptions};
use crate::client::pending::AckCallback;
use crate::client::state_machine::{ConnectionState, ConnectionStateMachine};
use crate::client::subscriptions::MessageHandler;
use crate::error::{ClientError, TransportError};
use crate::transport::Transport;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

const READ_BUFFER_SIZE: usize = 4096;

/// Hook registrations carried to the loop
pub enum HookRegistration {
    Connect(ConnectHook),
    Disconnect(DisconnectHook),
    Error(ErrorHook),
    Log(LogHook),
}

/// Requests from [`MqttClient`](crate::client::MqttClient) handles
pub enum Command {
    Connect,
    Reconnect,
    Stop,
    Publish {
        topic: String,
        payload: Bytes,
        options: PublishOptions,
        callback: Option<AckCallback>,
    },
    Subscribe {
        filter: String,
        options: SubscribeOptions,
        handler: MessageHandler,
        callback: Option<AckCallback>,
    },
    Unsubscribe {
        filter: String,
        callback: Option<AckCallback>,
    },
    SetHook(HookRegistration),
    /// Stop, then end the loop
    Shutdown,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Connect => f.write_str("Connect"),
            Command::Reconnect => f.write_str("Reconnect"),
            Command::Stop => f.write_str("Stop"),
            Command::Publish { topic, options, .. } => f
                .debug_struct("Publish")
                .field("topic", topic)
                .field("options", options)
                .finish_non_exhaustive(),
            Command::Subscribe { filter, options, .. } => f
                .debug_struct("Subscribe")
                .field("filter", filter)
                .field("options", options)
                .finish_non_exhaustive(),
            Command::Unsubscribe { filter, .. } => f
                .debug_struct("Unsubscribe")
                .field("filter", filter)
                .finish_non_exhaustive(),
            Command::SetHook(_) => f.write_str("SetHook"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

pub struct EventLoop<T: Transport> {
    machine: ConnectionStateMachine,
    transport: T,
    commands: mpsc::UnboundedReceiver<Command>,
    state_tx: watch::Sender<ConnectionState>,
    timers: HashMap<TimerKind, Instant>,
    /// Commands that arrived while the transport was opening
    deferred: VecDeque<Command>,
    buf: Vec<u8>,
}

impl<T: Transport> EventLoop<T> {
    pub fn new(
        machine: ConnectionStateMachine,
        transport: T,
        commands: mpsc::UnboundedReceiver<Command>,
        state_tx: watch::Sender<ConnectionState>,
    ) -> Self {
        Self {
            machine,
            transport,
            commands,
            state_tx,
            timers: HashMap::new(),
            deferred: VecDeque::new(),
            buf: vec![0u8; READ_BUFFER_SIZE],
        }
    }

    /// Run until shutdown or until every client handle is dropped
    pub async fn run(mut self) {
        info!(target: "mqtt_client", "Starting MQTT client event loop");

        loop {
            if let Some(command) = self.deferred.pop_front() {
                if !self.dispatch(Some(command)).await {
                    break;
                }
                self.publish_state();
                continue;
            }

            let deadline = self.next_deadline();
            let open = self.machine.is_transport_open();

            tokio::select! {
                command = self.commands.recv() => {
                    if !self.dispatch(command).await {
                        break;
                    }
                }

                result = self.transport.recv(&mut self.buf), if open => {
                    let actions = match result {
                        Ok(0) => {
                            debug!(target: "mqtt_client", "Peer closed the connection");
                            self.close_transport().await
                        }
                        Ok(n) => self.machine.bytes_received(&self.buf[..n]),
                        Err(e) => {
                            self.machine.hooks_mut().error(&ClientError::Transport(e));
                            self.close_transport().await
                        }
                    };
                    self.execute(actions).await;
                }

                kind = wait_for(deadline) => {
                    self.timers.remove(&kind);
                    debug!(target: "mqtt_client", "Timer fired: {:?}", kind);
                    let actions = self.machine.timer_fired(kind);
                    self.execute(actions).await;
                }
            }

            self.publish_state();
        }

        info!(target: "mqtt_client", "MQTT client event loop stopped");
    }

    /// Run one command. Returns false once the loop should end.
    async fn dispatch(&mut self, command: Option<Command>) -> bool {
        match command {
            Some(Command::Shutdown) | None => {
                let actions = self.machine.stop();
                self.execute(actions).await;
                self.publish_state();
                false
            }
            Some(command) => {
                let actions = self.handle_command(command);
                self.execute(actions).await;
                true
            }
        }
    }

    fn handle_command(&mut self, command: Command) -> Vec<Action> {
        debug!(target: "mqtt_client", "Command: {:?}", command);
        match command {
            Command::Connect => self.machine.connect(),
            Command::Reconnect => self.machine.reconnect(),
            Command::Stop => self.machine.stop(),
            Command::Publish {
                topic,
                payload,
                options,
                callback,
            } => self.machine.publish(&topic, payload, options, callback),
            Command::Subscribe {
                filter,
                options,
                handler,
                callback,
            } => self.machine.subscribe(&filter, options, handler, callback),
            Command::Unsubscribe { filter, callback } => {
                self.machine.unsubscribe(&filter, callback)
            }
            Command::SetHook(registration) => {
                let hooks = self.machine.hooks_mut();
                match registration {
                    HookRegistration::Connect(hook) => hooks.set_on_connect(hook),
                    HookRegistration::Disconnect(hook) => hooks.set_on_disconnect(hook),
                    HookRegistration::Error(hook) => hooks.set_on_error(hook),
                    HookRegistration::Log(hook) => hooks.set_on_log(hook),
                }
                Vec::new()
            }
            // handled by the loop
            Command::Shutdown => Vec::new(),
        }
    }

    /// Carry out actions in order, including those produced while doing so
    async fn execute(&mut self, actions: Vec<Action>) {
        let mut queue: VecDeque<Action> = actions.into();

        while let Some(action) = queue.pop_front() {
            self.publish_state();
            match action {
                Action::Open { host, port } => {
                    let follow_up = match self.open(&host, port).await {
                        Some(Ok(())) => self.machine.transport_opened(),
                        Some(Err(e)) => self.machine.transport_open_failed(e),
                        // a deferred stop takes it from here
                        None => break,
                    };
                    queue.extend(follow_up);
                }
                Action::Send(bytes) => {
                    if !self.machine.is_transport_open() {
                        debug!(
                            target: "mqtt_client",
                            "Dropping {} bytes, transport closed",
                            bytes.len()
                        );
                        continue;
                    }
                    if let Err(e) = self.transport.send(&bytes).await {
                        self.machine.hooks_mut().error(&ClientError::Transport(e));
                        queue.extend(self.close_transport().await);
                    }
                }
                Action::Close => {
                    if self.machine.is_transport_open() {
                        queue.extend(self.close_transport().await);
                    }
                }
                Action::ArmTimer { kind, after } => {
                    self.timers.insert(kind, Instant::now() + after);
                }
                Action::CancelTimer(kind) => {
                    self.timers.remove(&kind);
                }
            }
        }
    }

    /// Open the transport while still listening for stop requests. Other
    /// commands are deferred until the open settles. `None` means a stop or
    /// shutdown abandoned the attempt.
    async fn open(&mut self, host: &str, port: u16) -> Option<Result<(), TransportError>> {
        let timeout = self.machine.options().connect_timeout;
        let opening = tokio::time::timeout(timeout, self.transport.connect(host, port));
        tokio::pin!(opening);

        loop {
            tokio::select! {
                result = &mut opening => {
                    return Some(result.unwrap_or(Err(TransportError::TimedOut)));
                }
                command = self.commands.recv() => {
                    let command = command.unwrap_or(Command::Shutdown);
                    let stopping = matches!(command, Command::Stop | Command::Shutdown);
                    self.deferred.push_back(command);
                    if stopping {
                        info!(
                            target: "mqtt_client",
                            "Abandoning connection attempt to {}:{}",
                            host,
                            port
                        );
                        return None;
                    }
                }
            }
        }
    }

    async fn close_transport(&mut self) -> Vec<Action> {
        if let Err(e) = self.transport.close().await {
            warn!(target: "mqtt_client", "Error closing transport: {}", e);
        }
        self.machine.transport_closed()
    }

    /// Earliest armed timer; ties go to the order in `TimerKind::ALL`
    fn next_deadline(&self) -> Option<(TimerKind, Instant)> {
        TimerKind::ALL
            .iter()
            .filter_map(|kind| self.timers.get(kind).map(|at| (*kind, *at)))
            .fold(None, |earliest, candidate| match earliest {
                Some((_, at)) if at <= candidate.1 => earliest,
                _ => Some(candidate),
            })
    }

    fn publish_state(&self) {
        let state = self.machine.state();
        self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            debug!(target: "mqtt_client", "Connection state: {} -> {}", current, state);
            *current = state;
            true
        });
    }
}

async fn wait_for(deadline: Option<(TimerKind, Instant)>) -> TimerKind {
    match deadline {
        Some((kind, at)) => {
            tokio::time::sleep_until(at).await;
            kind
        }
        None => std::future::pending().await,
    }
}
