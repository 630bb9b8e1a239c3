//! Side effects requested by the connection state machine
//!
//! The state machine never touches sockets or clocks. It returns a list of
//! [`Action`]s and the event loop carries them out in order.

use bytes::Bytes;
use std::time::Duration;

/// The timers a client can have armed, at most one of each
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Bounds the transport open and the wait for CONNACK
    ConnectTimeout,
    /// Next keepalive probe
    Ping,
    /// Deadline for the PINGRESP to an outstanding probe
    PingTimeout,
    /// Delay before the next reconnect attempt
    Reconnect,
}

impl TimerKind {
    pub const ALL: [TimerKind; 4] = [
        TimerKind::ConnectTimeout,
        TimerKind::Ping,
        TimerKind::PingTimeout,
        TimerKind::Reconnect,
    ];
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Open the transport to the broker
    Open { host: String, port: u16 },
    /// Write encoded packet bytes
    Send(Bytes),
    /// Close the transport; the loop reports back with `transport_closed`
    Close,
    /// Arm (or re-arm) a timer
    ArmTimer { kind: TimerKind, after: Duration },
    CancelTimer(TimerKind),
}

impl Action {
    pub fn arm(kind: TimerKind, after: Duration) -> Self {
        Action::ArmTimer { kind, after }
    }
}
