//! TCP transport over `tokio::net::TcpStream`

use super::Transport;
use crate::error::TransportError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

#[derive(Debug, Default)]
pub struct TcpTransport {
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn connect(&mut self, host: &str, port: u16) -> Result<(), TransportError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        debug!(target: "mqtt_client", "TCP connection to {}:{} established", host, port);
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        stream.write_all(bytes).await?;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::NotConnected)?;
        Ok(stream.read(buf).await?)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if let Some(mut stream) = self.stream.take() {
            // the peer may already be gone
            if let Err(e) = stream.shutdown().await {
                debug!(target: "mqtt_client", "TCP shutdown failed: {}", e);
            }
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_round_trip_over_loopback() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 2];
            socket.read_exact(&mut buf).await.unwrap();
            assert_eq!(buf, [0xC0, 0x00]);
            socket.write_all(&[0xD0, 0x00]).await.unwrap();
        });

        let mut transport = TcpTransport::new();
        transport.connect("127.0.0.1", port).await.unwrap();
        assert!(transport.is_connected());

        transport.send(&[0xC0, 0x00]).await.unwrap();
        let mut buf = [0u8; 16];
        let n = transport.recv(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], &[0xD0, 0x00]);

        server.await.unwrap();
        assert_eq!(transport.recv(&mut buf).await.unwrap(), 0);

        transport.close().await.unwrap();
        assert!(!transport.is_connected());
        transport.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_without_connection() {
        let mut transport = TcpTransport::new();
        assert!(matches!(
            transport.send(&[0xC0, 0x00]).await,
            Err(TransportError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut transport = TcpTransport::new();
        assert!(transport.connect("127.0.0.1", port).await.is_err());
        assert!(!transport.is_connected());
    }
}
