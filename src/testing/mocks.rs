//! In-memory transport and the broker that drives it
//!
//! [`MockTransport`] is handed to the client. The paired [`MockBroker`] stays
//! with the test: it sees every connect, packet and close as a [`MockEvent`]
//! and pushes bytes back through the transport.

use crate::error::TransportError;
use crate::protocol::codec::{self, decode_control_packet};
use crate::protocol::packet::{ConnAck, Connect, ConnectReturnCode, Packet, Publish, QoS, SubAck};
use crate::transport::Transport;
use async_trait::async_trait;
use bytes::{Buf, Bytes, BytesMut};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// What the broker pushes into the transport
#[derive(Debug, Clone)]
pub enum MockInput {
    Bytes(Bytes),
    /// Peer closes the connection
    Close,
}

/// What the client did to the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Connected { host: String, port: u16 },
    ConnectRefused { host: String, port: u16 },
    Sent(Bytes),
    Closed,
}

/// Transport half of the pair
#[derive(Debug)]
pub struct MockTransport {
    inbound: mpsc::UnboundedReceiver<MockInput>,
    events: mpsc::UnboundedSender<MockEvent>,
    leftover: BytesMut,
    connected: bool,
    refuse: Arc<AtomicBool>,
    connect_delay_ms: Arc<AtomicU64>,
}

impl MockTransport {
    /// Create a connected transport/broker pair
    pub fn pair() -> (MockTransport, MockBroker) {
        let (input_tx, input_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let refuse = Arc::new(AtomicBool::new(false));
        let connect_delay_ms = Arc::new(AtomicU64::new(0));

        let transport = MockTransport {
            inbound: input_rx,
            events: event_tx,
            leftover: BytesMut::new(),
            connected: false,
            refuse: Arc::clone(&refuse),
            connect_delay_ms: Arc::clone(&connect_delay_ms),
        };
        let broker = MockBroker {
            inbound: input_tx,
            events: event_rx,
            refuse,
            connect_delay_ms,
        };
        (transport, broker)
    }

    fn emit(&self, event: MockEvent) {
        // the broker may already be gone at the end of a test
        let _ = self.events.send(event);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.refuse.load(Ordering::SeqCst) {
            self.emit(MockEvent::ConnectRefused {
                host: host.to_string(),
                port,
            });
            return Err(TransportError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "connection refused",
            )));
        }

        // input queued for an earlier connection is stale
        while self.inbound.try_recv().is_ok() {}
        self.leftover.clear();

        self.connected = true;
        self.emit(MockEvent::Connected {
            host: host.to_string(),
            port,
        });
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }
        self.emit(MockEvent::Sent(Bytes::copy_from_slice(bytes)));
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        if !self.connected {
            return Err(TransportError::NotConnected);
        }

        if self.leftover.is_empty() {
            match self.inbound.recv().await {
                Some(MockInput::Bytes(bytes)) => self.leftover.extend_from_slice(&bytes),
                Some(MockInput::Close) | None => return Ok(0),
            }
        }

        let n = buf.len().min(self.leftover.len());
        buf[..n].copy_from_slice(&self.leftover[..n]);
        self.leftover.advance(n);
        Ok(n)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.connected {
            self.connected = false;
            self.emit(MockEvent::Closed);
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// Broker half of the pair
///
/// The `expect_*` helpers panic on anything unexpected, so a test fails at
/// the first divergence from the exchange it scripts.
#[derive(Debug)]
pub struct MockBroker {
    inbound: mpsc::UnboundedSender<MockInput>,
    events: mpsc::UnboundedReceiver<MockEvent>,
    refuse: Arc<AtomicBool>,
    connect_delay_ms: Arc<AtomicU64>,
}

impl MockBroker {
    /// Make later connection attempts fail at the transport level
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Make later connection attempts take `delay` before they settle
    pub fn delay_connections(&self, delay: Duration) {
        let millis = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self.connect_delay_ms.store(millis, Ordering::SeqCst);
    }

    pub async fn next_event(&mut self) -> Option<MockEvent> {
        self.events.recv().await
    }

    /// Next event if one is already queued
    pub fn try_next_event(&mut self) -> Option<MockEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for an event
    pub async fn next_event_within(&mut self, timeout: Duration) -> Option<MockEvent> {
        tokio::time::timeout(timeout, self.events.recv())
            .await
            .ok()
            .flatten()
    }

    pub async fn expect_connected(&mut self) -> (String, u16) {
        match self.next_event().await {
            Some(MockEvent::Connected { host, port }) => (host, port),
            other => panic!("expected a connection, got {other:?}"),
        }
    }

    pub async fn expect_refused(&mut self) {
        match self.next_event().await {
            Some(MockEvent::ConnectRefused { .. }) => {}
            other => panic!("expected a refused connection, got {other:?}"),
        }
    }

    /// Raw bytes of the next packet the client sends
    pub async fn expect_sent(&mut self) -> Bytes {
        match self.next_event().await {
            Some(MockEvent::Sent(bytes)) => bytes,
            other => panic!("expected a packet, got {other:?}"),
        }
    }

    /// Next packet the client sends, decoded
    pub async fn expect_packet(&mut self) -> Packet {
        let bytes = self.expect_sent().await;
        decode_control_packet(&bytes)
            .and_then(|control| Packet::decode(&control))
            .unwrap_or_else(|e| panic!("client sent an undecodable packet {bytes:02X?}: {e}"))
    }

    pub async fn expect_closed(&mut self) {
        match self.next_event().await {
            Some(MockEvent::Closed) => {}
            other => panic!("expected the connection to close, got {other:?}"),
        }
    }

    /// Accept the transport connection, read CONNECT and answer with `code`
    pub async fn handshake(&mut self, code: ConnectReturnCode) -> Connect {
        self.expect_connected().await;
        let connect = match self.expect_packet().await {
            Packet::Connect(connect) => connect,
            other => panic!("expected CONNECT, got {other:?}"),
        };
        self.send_packet(&Packet::ConnAck(ConnAck {
            return_code: code,
        }));
        connect
    }

    /// Handshake and accept the session
    pub async fn accept(&mut self) -> Connect {
        self.handshake(ConnectReturnCode::Accepted).await
    }

    pub fn send_bytes<B: Into<Bytes>>(&self, bytes: B) {
        let _ = self.inbound.send(MockInput::Bytes(bytes.into()));
    }

    pub fn send_packet(&self, packet: &Packet) {
        match packet.encode() {
            Ok(bytes) => self.send_bytes(bytes),
            Err(e) => panic!("cannot encode {:?}: {e}", packet.packet_type()),
        }
    }

    /// Deliver an application message to the client
    pub fn publish(&self, topic: &str, payload: &[u8], qos: QoS, packet_id: Option<u16>) {
        self.send_packet(&Packet::Publish(Publish {
            topic: topic.to_string(),
            packet_id,
            payload: Bytes::copy_from_slice(payload),
            qos,
            retain: false,
            dup: false,
        }));
    }

    pub fn suback(&self, packet_id: u16, granted_qos: u8) {
        self.send_bytes(
            codec::encode_suback(&SubAck {
                packet_id,
                granted_qos,
            })
            .unwrap_or_else(|e| panic!("cannot encode SUBACK: {e}")),
        );
    }

    pub fn pingresp(&self) {
        self.send_bytes(codec::encode_pingresp());
    }

    /// Close the connection from the broker side
    pub fn close(&self) {
        let _ = self.inbound.send(MockInput::Close);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_transport_reports_to_broker() {
        let (mut transport, mut broker) = MockTransport::pair();

        transport.connect("broker.local", 1883).await.unwrap();
        assert_eq!(
            broker.expect_connected().await,
            ("broker.local".to_string(), 1883)
        );

        transport.send(&codec::encode_pingreq()).await.unwrap();
        assert_eq!(broker.expect_packet().await, Packet::PingReq);

        transport.close().await.unwrap();
        broker.expect_closed().await;
        assert!(broker.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_recv_splits_large_input() {
        let (mut transport, broker) = MockTransport::pair();
        transport.connect("localhost", 1883).await.unwrap();

        broker.send_bytes(vec![1u8, 2, 3, 4, 5]);
        let mut buf = [0u8; 2];
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [1, 2]);
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 2);
        assert_eq!(buf, [3, 4]);
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], 5);

        broker.close();
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_input_dropped_on_connect() {
        let (mut transport, mut broker) = MockTransport::pair();
        broker.send_bytes(vec![0xD0u8, 0x00]);

        transport.connect("localhost", 1883).await.unwrap();
        broker.expect_connected().await;
        broker.pingresp();

        let mut buf = [0u8; 8];
        let n = transport.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xD0, 0x00]);
        assert!(broker.try_next_event().is_none());
    }

    #[tokio::test]
    async fn test_refused_connection() {
        let (mut transport, mut broker) = MockTransport::pair();
        broker.refuse_connections(true);

        assert!(transport.connect("localhost", 1883).await.is_err());
        broker.expect_refused().await;
        assert!(!transport.is_connected());
        assert!(matches!(
            transport.send(&[0xC0, 0x00]).await,
            Err(TransportError::NotConnected)
        ));
    }
}
