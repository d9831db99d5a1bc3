//! Transport capability and the TLS/TCP socket implementation
//!
//! The connection only talks to a [`Transport`]; the socket transport
//! writes one request and reads until the [`ResponseReader`] yields a
//! complete frame.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, trace, warn};

use super::config::ConnectionConfig;
use crate::protocol::{DecodeOptions, DriverError, Frame, ResponseReader, Result};

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Trait alias for socket streams
pub trait SocketStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> SocketStream for T {}

pub type BoxedStream = Box<dyn SocketStream>;

#[async_trait::async_trait]
pub trait Transport: Send {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()>;

    /// Write one serialized request and wait for its complete response.
    async fn send_raw(&mut self, request: &[u8]) -> Result<Frame>;

    async fn close(&mut self) -> Result<()>;

    fn is_open(&self) -> bool;
}

pub struct SocketTransport {
    stream: Option<BoxedStream>,
    reader: ResponseReader,
    read_buf: Vec<u8>,
}

impl SocketTransport {
    pub fn new(options: DecodeOptions) -> Self {
        Self {
            stream: None,
            reader: ResponseReader::new(options),
            read_buf: vec![0u8; READ_BUFFER_SIZE],
        }
    }

    /// Wrap an already open stream; `connect` then keeps it as is.
    pub fn from_stream(stream: BoxedStream, options: DecodeOptions) -> Self {
        Self {
            stream: Some(stream),
            ..Self::new(options)
        }
    }

    async fn open(config: &ConnectionConfig) -> Result<BoxedStream> {
        let addr = config.address();
        let tcp = TcpStream::connect(&addr).await.map_err(|e| {
            DriverError::ConnectionError(format!("Failed to connect to {}: {}", addr, e))
        })?;
        tcp.set_nodelay(true).map_err(|e| {
            DriverError::ConnectionError(format!("Failed to set TCP_NODELAY: {}", e))
        })?;

        if config.tls.insecure {
            debug!("Connected to {} without TLS", addr);
            return Ok(Box::new(tcp));
        }

        let mut builder = native_tls::TlsConnector::builder();
        if config.tls.accept_invalid_certs {
            builder.danger_accept_invalid_certs(true);
            builder.danger_accept_invalid_hostnames(true);
        }
        if let Some(pem) = &config.tls.root_certificate_pem {
            let cert = native_tls::Certificate::from_pem(pem).map_err(|e| {
                DriverError::ConnectionError(format!("Invalid root certificate: {}", e))
            })?;
            builder.add_root_certificate(cert);
        }
        let connector = builder.build().map_err(|e| {
            DriverError::ConnectionError(format!("Failed to build TLS connector: {}", e))
        })?;

        let tls = tokio_native_tls::TlsConnector::from(connector)
            .connect(&config.host, tcp)
            .await
            .map_err(|e| {
                DriverError::ConnectionError(format!("TLS handshake with {} failed: {}", addr, e))
            })?;
        debug!("TLS session established with {}", addr);
        Ok(Box::new(tls))
    }
}

#[async_trait::async_trait]
impl Transport for SocketTransport {
    async fn connect(&mut self, config: &ConnectionConfig) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let stream = tokio::time::timeout(config.connect_timeout, Self::open(config))
            .await
            .map_err(|_| DriverError::Timeout(config.connect_timeout))??;
        self.stream = Some(stream);
        self.reader.reset();
        Ok(())
    }

    async fn send_raw(&mut self, request: &[u8]) -> Result<Frame> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| DriverError::ConnectionError("Socket is not open".to_string()))?;

        stream
            .write_all(request)
            .await
            .map_err(|e| DriverError::ConnectionError(format!("Write failed: {}", e)))?;
        stream
            .flush()
            .await
            .map_err(|e| DriverError::ConnectionError(format!("Flush failed: {}", e)))?;

        loop {
            if let Some(frame) = self.reader.next_frame()? {
                // the next response would be read out of these bytes
                let extra = self.reader.buffered();
                if extra > 0 {
                    warn!("{} bytes left over after a complete response", extra);
                    self.reader.reset();
                    return Err(DriverError::ProtocolError(format!(
                        "{} unexpected bytes after a complete response",
                        extra
                    )));
                }
                return Ok(frame);
            }

            let n = stream
                .read(&mut self.read_buf)
                .await
                .map_err(|e| DriverError::ConnectionError(format!("Read failed: {}", e)))?;
            if n == 0 {
                return Err(DriverError::ConnectionError(
                    "Connection closed by server".to_string(),
                ));
            }
            trace!("Read {} bytes ({} buffered)", n, self.reader.buffered() + n);
            self.reader.feed(&self.read_buf[..n]);
        }
    }

    async fn close(&mut self) -> Result<()> {
        self.reader.reset();
        if let Some(mut stream) = self.stream.take() {
            stream
                .shutdown()
                .await
                .map_err(|e| DriverError::ConnectionError(format!("Shutdown failed: {}", e)))?;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::io::Builder;

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let mock = Builder::new()
            .write(b"+8 SELECT 1")
            .read(b":12")
            .read(b"34")
            .read(b" ")
            .build();
        let mut transport = SocketTransport::from_stream(Box::new(mock), DecodeOptions::default());
        let frame = transport.send_raw(b"+8 SELECT 1").await.unwrap();
        assert_eq!(frame, Frame::Integer(1234));
    }

    #[tokio::test]
    async fn test_trailing_bytes_are_protocol_error() {
        let mock = Builder::new().write(b"+4 PING").read(b"+2 OK:1 ").build();
        let mut transport = SocketTransport::from_stream(Box::new(mock), DecodeOptions::default());
        let err = transport.send_raw(b"+4 PING").await.unwrap_err();
        assert!(matches!(err, DriverError::ProtocolError(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_connection_error() {
        let mock = Builder::new().write(b"+4 PING").read(b"+10 par").build();
        let mut transport = SocketTransport::from_stream(Box::new(mock), DecodeOptions::default());
        let err = transport.send_raw(b"+4 PING").await.unwrap_err();
        assert!(matches!(err, DriverError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_send_without_socket() {
        let mut transport = SocketTransport::new(DecodeOptions::default());
        assert!(!transport.is_open());
        assert!(matches!(
            transport.send_raw(b"+4 PING").await,
            Err(DriverError::ConnectionError(_))
        ));
    }

    #[tokio::test]
    async fn test_close_drops_stream() {
        let mock = Builder::new().build();
        let mut transport = SocketTransport::from_stream(Box::new(mock), DecodeOptions::default());
        assert!(transport.is_open());
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }
}
