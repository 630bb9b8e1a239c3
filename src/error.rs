//! Error types for the MQTT client
//!
//! Codec, option and transport failures each have their own enum. [`ClientError`]
//! is the value handed to the caller's `on_error` hook and wraps the others.

use crate::protocol::packet::{ConnectReturnCode, PacketType};
use thiserror::Error;

/// Failures while encoding or decoding control packets
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Malformed remaining length")]
    MalformedRemainingLength,

    #[error("Reserved packet type: {0}")]
    ReservedPacketType(u8),

    #[error("Invalid QoS bits: {0}")]
    InvalidQos(u8),

    #[error("{packet} format error: expected at least {min} bytes, got {actual}")]
    Format {
        packet: PacketType,
        min: usize,
        actual: usize,
    },

    #[error("Invalid UTF-8 in {packet} string field")]
    InvalidUtf8 { packet: PacketType },

    #[error("Remaining length {0} exceeds the 268435455 byte maximum")]
    TooLarge(usize),

    #[error("String field of {0} bytes exceeds the 65535 byte maximum")]
    FieldTooLong(usize),
}

impl CodecError {
    /// Create a minimum-length violation for a packet type
    pub fn format(packet: PacketType, min: usize, actual: usize) -> Self {
        Self::Format {
            packet,
            min,
            actual,
        }
    }
}

/// Invalid connect options, caught before anything reaches the wire
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OptionsError {
    #[error("Username must be at most 12 characters, got {0}")]
    UsernameTooLong(usize),

    #[error("Password must be at most 12 characters, got {0}")]
    PasswordTooLong(usize),

    #[error("Client id must be 1-23 characters, got {0}")]
    InvalidClientId(usize),

    #[error("Will requires a topic")]
    MissingWillTopic,

    #[error("Invalid QoS: {0}")]
    InvalidQos(u8),

    #[error("Password requires a username")]
    PasswordWithoutUsername,
}

/// Byte-stream transport failures
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Transport is not connected")]
    NotConnected,

    #[error("Connection attempt timed out")]
    TimedOut,
}

/// Errors reported through the client's `on_error` hook
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("Malformed packet: {0}")]
    MalformedPacket(#[from] CodecError),

    #[error("{}", .0.reason())]
    ConnectionRefused(ConnectReturnCode),

    #[error("Could not connect to {host}:{port}: {reason}")]
    CouldNotConnect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Connect timeout")]
    ConnectTimeout,

    #[error("Timeout")]
    KeepAliveTimeout,

    #[error("Transport failure: {0}")]
    Transport(#[from] TransportError),

    #[error("Unexpected packet type: {0}")]
    UnexpectedPacket(PacketType),

    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),

    #[error("Client event loop has shut down")]
    Closed,
}

impl ClientError {
    /// Create a could-not-connect error
    pub fn could_not_connect<H, R>(host: H, port: u16, reason: R) -> Self
    where
        H: Into<String>,
        R: Into<String>,
    {
        Self::CouldNotConnect {
            host: host.into(),
            port,
            reason: reason.into(),
        }
    }

    /// True for failures that should lead to a reconnect rather than a hard stop
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::CouldNotConnect { .. }
                | ClientError::ConnectTimeout
                | ClientError::KeepAliveTimeout
                | ClientError::Transport(_)
        )
    }
}
