//! AMQP 0-9-1 Transport Layer
//!
//! Owns the byte stream under a session: a TCP connection, optionally
//! wrapped in TLS. The stream type is erased behind a boxed trait object so
//! TCP, TLS, and in-memory test streams all share one frame path.
//!
//! Reads go through an internal buffer and only complete frames are
//! surfaced, so a caller may cancel a pending read (for example with a
//! timeout) without losing partial frame bytes.

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};

use crate::constants::{FRAME_END, FRAME_HEADER_SIZE};
use crate::error::{AmqpError, AmqpResult};
use crate::frame::Frame;

/// Byte stream a transport can drive
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// AMQP 0-9-1 Transport
pub struct Transport {
    stream: Box<dyn IoStream>,
    read_buffer: BytesMut,
}

impl Transport {
    /// Create a transport over an already-connected stream
    pub fn from_stream(stream: impl IoStream + 'static) -> Self {
        Transport {
            stream: Box::new(stream),
            read_buffer: BytesMut::with_capacity(8 * 1024),
        }
    }

    /// Send raw bytes
    pub async fn send_raw(&mut self, data: &[u8]) -> AmqpResult<()> {
        self.stream
            .write_all(data)
            .await
            .map_err(|e| AmqpError::transport(format!("failed to write to socket: {}", e)))?;
        self.stream
            .flush()
            .await
            .map_err(|e| AmqpError::transport(format!("failed to flush socket: {}", e)))?;
        Ok(())
    }

    /// Encode and send one frame
    pub async fn send_frame(&mut self, frame: &Frame) -> AmqpResult<()> {
        let encoded = frame.to_bytes()?;
        self.send_raw(&encoded).await
    }

    /// Receive exactly `size` raw bytes
    pub async fn receive_raw(&mut self, size: usize) -> AmqpResult<Bytes> {
        while self.read_buffer.len() < size {
            self.fill_buffer().await?;
        }
        Ok(self.read_buffer.split_to(size).freeze())
    }

    /// Receive one full frame, verifying the end marker.
    ///
    /// Cancel-safe: a cancelled call leaves partial bytes in the read
    /// buffer and the next call resumes from them.
    pub async fn receive_frame(&mut self) -> AmqpResult<Frame> {
        loop {
            if let Some(frame) = self.parse_frame()? {
                return Ok(frame);
            }
            self.fill_buffer().await?;
        }
    }

    async fn fill_buffer(&mut self) -> AmqpResult<()> {
        let n = self
            .stream
            .read_buf(&mut self.read_buffer)
            .await
            .map_err(|e| AmqpError::transport(format!("failed to read from socket: {}", e)))?;
        if n == 0 {
            return Err(AmqpError::transport("connection closed by peer"));
        }
        Ok(())
    }

    fn parse_frame(&mut self) -> AmqpResult<Option<Frame>> {
        if self.read_buffer.len() < FRAME_HEADER_SIZE {
            return Ok(None);
        }
        let size = u32::from_be_bytes([
            self.read_buffer[3],
            self.read_buffer[4],
            self.read_buffer[5],
            self.read_buffer[6],
        ]) as usize;
        let total = FRAME_HEADER_SIZE + size + 1;
        if self.read_buffer.len() < total {
            return Ok(None);
        }

        let wire = self.read_buffer.split_to(total).freeze();
        let frame_type = wire[0];
        let channel = u16::from_be_bytes([wire[1], wire[2]]);
        let end = wire[total - 1];
        if end != FRAME_END {
            return Err(AmqpError::decoding(format!(
                "frame end marker missing, found 0x{:02x}",
                end
            )));
        }
        let payload = wire.slice(FRAME_HEADER_SIZE..total - 1);
        Frame::decode(frame_type, channel, payload).map(Some)
    }

    /// Shut down the stream
    pub async fn shutdown(&mut self) -> AmqpResult<()> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| AmqpError::transport(format!("failed to shutdown socket: {}", e)))?;
        Ok(())
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("buffered", &self.read_buffer.len())
            .finish()
    }
}

/// AMQP 0-9-1 Transport Builder
#[derive(Debug, Clone)]
pub struct TransportBuilder {
    host: String,
    port: u16,
    ssl: bool,
    connect_timeout: Duration,
}

impl TransportBuilder {
    /// Create a new transport builder
    pub fn new() -> Self {
        TransportBuilder {
            host: "localhost".to_string(),
            port: 5672,
            ssl: false,
            connect_timeout: Duration::from_secs(5),
        }
    }

    /// Set the hostname
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Enable TLS
    pub fn ssl(mut self, ssl: bool) -> Self {
        self.ssl = ssl;
        self
    }

    /// Set the connect timeout
    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// Connect, optionally run the TLS handshake, and create a transport
    pub async fn connect(self) -> AmqpResult<Transport> {
        let addr = format!("{}:{}", self.host, self.port);
        let tcp = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| AmqpError::timeout(format!("connect to {} timed out", addr)))?
            .map_err(|e| AmqpError::transport(format!("failed to connect to {}: {}", addr, e)))?;

        if !self.ssl {
            return Ok(Transport::from_stream(tcp));
        }

        let connector = native_tls::TlsConnector::new()
            .map_err(|e| AmqpError::transport(format!("failed to build TLS connector: {}", e)))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = timeout(self.connect_timeout, connector.connect(&self.host, tcp))
            .await
            .map_err(|_| AmqpError::timeout(format!("TLS handshake with {} timed out", addr)))?
            .map_err(|e| AmqpError::transport(format!("TLS handshake failed: {}", e)))?;
        Ok(Transport::from_stream(tls))
    }
}

impl Default for TransportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::FRAME_HEARTBEAT;
    use tokio::io::duplex;

    #[test]
    fn test_transport_builder_defaults() {
        let builder = TransportBuilder::new();
        assert_eq!(builder.host, "localhost");
        assert_eq!(builder.port, 5672);
        assert!(!builder.ssl);
        assert_eq!(builder.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_transport_builder_fluent_api() {
        let builder = TransportBuilder::new()
            .host("broker.example.com")
            .port(5671)
            .ssl(true)
            .connect_timeout(Duration::from_millis(250));

        assert_eq!(builder.host, "broker.example.com");
        assert_eq!(builder.port, 5671);
        assert!(builder.ssl);
        assert_eq!(builder.connect_timeout, Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_frame_round_trip_over_duplex() {
        let (client, server) = duplex(4096);
        let mut near = Transport::from_stream(client);
        let mut far = Transport::from_stream(server);

        near.send_frame(&Frame::heartbeat()).await.unwrap();
        let received = far.receive_frame().await.unwrap();
        assert_eq!(received, Frame::Heartbeat(0));
    }

    #[tokio::test]
    async fn test_receive_frame_across_split_writes() {
        let (client, server) = duplex(4096);
        let mut near = Transport::from_stream(client);
        let mut far = Transport::from_stream(server);

        let bytes = Frame::heartbeat().to_bytes().unwrap();
        let (head, tail) = bytes.split_at(3);
        near.send_raw(head).await.unwrap();

        let reader = tokio::spawn(async move { far.receive_frame().await });
        tokio::task::yield_now().await;
        near.send_raw(tail).await.unwrap();

        let received = reader.await.unwrap().unwrap();
        assert_eq!(received, Frame::Heartbeat(0));
    }

    #[tokio::test]
    async fn test_bad_end_marker_is_fatal() {
        let (client, server) = duplex(4096);
        let mut near = Transport::from_stream(client);
        let mut far = Transport::from_stream(server);

        // heartbeat frame with a corrupted end byte
        near.send_raw(&[FRAME_HEARTBEAT, 0, 0, 0, 0, 0, 0, 0x00])
            .await
            .unwrap();

        let result = far.receive_frame().await;
        assert!(matches!(result, Err(AmqpError::Decoding(_))));
    }

    #[tokio::test]
    async fn test_peer_close_is_transport_error() {
        let (client, server) = duplex(4096);
        let mut far = Transport::from_stream(server);
        drop(client);

        let result = far.receive_frame().await;
        assert!(matches!(result, Err(AmqpError::Transport(_))));
    }

    #[tokio::test]
    async fn test_receive_raw() {
        let (client, server) = duplex(4096);
        let mut near = Transport::from_stream(client);
        let mut far = Transport::from_stream(server);

        near.send_raw(b"AMQP\x00\x00\x09\x01").await.unwrap();
        let header = far.receive_raw(8).await.unwrap();
        assert_eq!(&header[..], b"AMQP\x00\x00\x09\x01");
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let result = TransportBuilder::new()
            .host("127.0.0.1")
            .port(1)
            .connect_timeout(Duration::from_millis(500))
            .connect()
            .await;

        let error = result.unwrap_err();
        assert!(matches!(
            error,
            AmqpError::Transport(_) | AmqpError::Timeout(_)
        ));
    }
}
