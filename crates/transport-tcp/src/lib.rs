//! TCP transport implementation
//!
//! TCP is a byte stream, so every frame travels behind a 24-bit length
//! prefix (see [`FrameCodec`]). Clients connect with `tcp://host:port`.

pub mod codec;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use reflux_transport::{Connection, Listener, Transport, TransportError, socket_address};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

pub use codec::{FrameCodec, MAX_FRAME_SIZE};

/// TCP-specific configuration
#[derive(Debug, Clone)]
pub struct TcpOptions {
    /// Local address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for TcpOptions {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        }
    }
}

/// TCP transport implementation
#[derive(Debug, Clone, Default)]
pub struct TcpTransport {
    options: TcpOptions,
}

impl TcpTransport {
    /// Create a new TCP transport
    pub const fn new(options: TcpOptions) -> Self {
        Self { options }
    }

    /// Bind the configured address, returning the concrete listener
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn bind(&self) -> Result<TcpFrameListener, TransportError> {
        let listener = tokio::net::TcpListener::bind(self.options.listen_addr).await?;
        let local_addr = listener.local_addr()?;

        info!("TCP transport listening on {}", local_addr);

        Ok(TcpFrameListener {
            listener,
            local_addr,
            shutdown: CancellationToken::new(),
        })
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        if url.scheme() != "tcp" {
            return Err(TransportError::InvalidAddress(format!(
                "expected tcp:// URL, got {url}"
            )));
        }

        let addr = socket_address(url)?;
        debug!("Connecting to {}", addr);

        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| TransportError::ConnectionFailed(format!("{addr}: {e}")))?;

        let conn = TcpConnection::new(stream);
        info!("TCP connection {} established to {}", conn.id, addr);

        Ok(Box::new(conn))
    }

    async fn listen(&self) -> Result<Box<dyn Listener>, TransportError> {
        Ok(Box::new(self.bind().await?))
    }
}

/// A framed TCP connection; each direction has its own lock
#[derive(Debug)]
pub struct TcpConnection {
    id: Uuid,
    reader: Mutex<FramedRead<OwnedReadHalf, FrameCodec>>,
    writer: Mutex<FramedWrite<OwnedWriteHalf, FrameCodec>>,
    closed: AtomicBool,
}

impl TcpConnection {
    fn new(stream: TcpStream) -> Self {
        let _ = stream.set_nodelay(true);
        let (read_half, write_half) = stream.into_split();

        Self {
            id: Uuid::new_v4(),
            reader: Mutex::new(FramedRead::new(read_half, FrameCodec::new())),
            writer: Mutex::new(FramedWrite::new(write_half, FrameCodec::new())),
            closed: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Connection for TcpConnection {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        self.writer.lock().await.send(data).await
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        match self.reader.lock().await.next().await {
            Some(frame) => frame,
            None => {
                debug!("TCP connection {} reached end of stream", self.id);
                self.closed.store(true, Ordering::Release);
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Closing TCP connection {}", self.id);

        // Shuts down the write half; the peer sees end of stream
        self.writer.lock().await.close().await
    }
}

/// Listener returned by [`TcpTransport::bind`]
#[derive(Debug)]
pub struct TcpFrameListener {
    listener: tokio::net::TcpListener,
    local_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl TcpFrameListener {
    /// Address actually bound (useful when listening on port 0)
    #[must_use]
    pub const fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl Listener for TcpFrameListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        tokio::select! {
            () = self.shutdown.cancelled() => Err(TransportError::ConnectionClosed),
            accepted = self.listener.accept() => {
                let (stream, addr) = accepted?;
                debug!("Accepted connection from {}", addr);
                Ok(Box::new(TcpConnection::new(stream)) as Box<dyn Connection>)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        info!("TCP listener on {} shutting down", self.local_addr);
        self.shutdown.cancel();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rejects_foreign_scheme() {
        let transport = TcpTransport::default();
        let url = Url::parse("ws://127.0.0.1:1/rsocket").unwrap();

        assert!(matches!(
            transport.connect(&url).await,
            Err(TransportError::InvalidAddress(_))
        ));
    }

    #[tokio::test]
    async fn test_listener_close_stops_accept() {
        let listener = TcpTransport::default().bind().await.unwrap();
        listener.close().await.unwrap();

        assert!(matches!(
            listener.accept().await,
            Err(TransportError::ConnectionClosed)
        ));
    }
}
