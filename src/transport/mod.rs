//! Byte-stream transport
//!
//! The client never does I/O itself; it drives a [`Transport`] from its event
//! loop. [`TcpTransport`] is the production implementation and
//! `testing::mocks::MockTransport` stands in for it in tests.

use crate::error::TransportError;

pub mod tcp;

pub use tcp::TcpTransport;

/// Transport trait for a broker connection
///
/// Implementations must be cancel-safe in `recv`: the event loop may drop a
/// pending `recv` future when another event arrives first.
#[async_trait::async_trait]
pub trait Transport: Send {
    /// Open a connection to the broker
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError>;

    /// Write all of `bytes`
    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError>;

    /// Read whatever is available into `buf`. `Ok(0)` means the peer closed.
    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    /// Close the connection. Closing a closed transport is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;

    fn is_connected(&self) -> bool;
}
