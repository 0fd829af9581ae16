//! WebSocket transport implementation
//!
//! Each frame travels as one binary WebSocket message.
//! - For listening: Provides an Axum handler that can be mounted into an existing server
//! - For connecting: Uses standard WebSocket client connections (`ws://` or `wss://`)

use async_trait::async_trait;
use axum::extract::{WebSocketUpgrade, ws::WebSocket};
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use reflux_transport::{Connection, Listener, Transport, TransportError};
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, mpsc};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use url::Url;
use uuid::Uuid;

type ClientStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket transport implementation
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    /// The single listener for this transport
    listener: Arc<RwLock<Option<WebSocketListener>>>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport
    pub fn new() -> Self {
        Self {
            listener: Arc::new(RwLock::new(None)),
        }
    }
}

impl Default for WebSocketTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidAddress(format!(
                "expected ws:// or wss:// URL, got {url}"
            )));
        }

        debug!("Connecting to WebSocket at {}", url);

        let (ws_stream, _) = connect_async(url.as_str()).await.map_err(|e| {
            TransportError::ConnectionFailed(format!("WebSocket connect failed: {e}"))
        })?;

        let conn = WebSocketClientConnection::new(ws_stream);
        info!("WebSocket connection {} established to {}", conn.id, url);

        Ok(Box::new(conn))
    }

    async fn listen(&self) -> Result<Box<dyn Listener>, TransportError> {
        let mut slot = self.listener.write().await;
        if slot.is_some() {
            return Err(TransportError::Other(
                "Transport already has a listener".to_string(),
            ));
        }

        // No socket is bound here; connections arrive through the Axum handler
        let (connection_tx, connection_rx) = mpsc::channel(100);

        let listener = WebSocketListener {
            connection_rx: Arc::new(Mutex::new(connection_rx)),
            connection_tx,
            shutdown: CancellationToken::new(),
        };

        *slot = Some(listener.clone());

        info!("WebSocket listener created");

        Ok(Box::new(listener))
    }
}

/// WebSocket listener that receives connections from the Axum handler
#[derive(Debug, Clone)]
struct WebSocketListener {
    connection_rx: Arc<Mutex<mpsc::Receiver<Box<dyn Connection>>>>,
    connection_tx: mpsc::Sender<Box<dyn Connection>>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Listener for WebSocketListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        let mut rx = self.connection_rx.lock().await;
        tokio::select! {
            () = self.shutdown.cancelled() => Err(TransportError::ConnectionClosed),
            conn = rx.recv() => conn.ok_or(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.shutdown.cancel();
        Ok(())
    }
}

/// WebSocket connection for client-side connections
struct WebSocketClientConnection {
    id: Uuid,
    sink: Mutex<SplitSink<ClientStream, Message>>,
    stream: Mutex<SplitStream<ClientStream>>,
    closed: AtomicBool,
}

impl WebSocketClientConnection {
    fn new(ws_stream: ClientStream) -> Self {
        let (sink, stream) = ws_stream.split();

        Self {
            id: Uuid::new_v4(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

impl Debug for WebSocketClientConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketClientConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for WebSocketClientConnection {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink
            .lock()
            .await
            .send(Message::Binary(data))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e)))
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::ConnectionClosed);
            }

            match stream.next().await {
                Some(Ok(Message::Binary(data))) => return Ok(data),
                // Ignore other message types (Text, Ping, Pong)
                Some(Ok(Message::Text(_) | Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(_))) | None => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => return Err(TransportError::Io(std::io::Error::other(e))),
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Closing WebSocket connection {}", self.id);
        let _ = self.sink.lock().await.close().await;
        Ok(())
    }
}

/// WebSocket connection for server-side connections (from Axum)
struct WebSocketServerConnection {
    id: Uuid,
    sink: Mutex<SplitSink<WebSocket, axum::extract::ws::Message>>,
    stream: Mutex<SplitStream<WebSocket>>,
    closed: AtomicBool,
}

impl WebSocketServerConnection {
    fn new(socket: WebSocket) -> Self {
        let (sink, stream) = socket.split();

        Self {
            id: Uuid::new_v4(),
            sink: Mutex::new(sink),
            stream: Mutex::new(stream),
            closed: AtomicBool::new(false),
        }
    }
}

impl Debug for WebSocketServerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketServerConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for WebSocketServerConnection {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::ConnectionClosed);
        }

        self.sink
            .lock()
            .await
            .send(axum::extract::ws::Message::Binary(data))
            .await
            .map_err(|e| TransportError::Io(std::io::Error::other(e.to_string())))
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        use axum::extract::ws::Message as AxumMessage;

        let mut stream = self.stream.lock().await;
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::ConnectionClosed);
            }

            match stream.next().await {
                Some(Ok(AxumMessage::Binary(data))) => return Ok(data),
                Some(Ok(AxumMessage::Text(_) | AxumMessage::Ping(_) | AxumMessage::Pong(_))) => {}
                Some(Ok(AxumMessage::Close(_))) | None => {
                    self.closed.store(true, Ordering::Release);
                    return Err(TransportError::ConnectionClosed);
                }
                Some(Err(e)) => {
                    return Err(TransportError::Io(std::io::Error::other(e.to_string())));
                }
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        debug!("Closing WebSocket connection {}", self.id);
        let _ = self.sink.lock().await.close().await;
        Ok(())
    }
}

/// Extension methods for integrating with Axum
impl WebSocketTransport {
    /// Get the current listener if one exists
    pub async fn get_listener(&self) -> Option<Box<dyn Listener>> {
        self.listener
            .read()
            .await
            .as_ref()
            .map(|l| Box::new(l.clone()) as Box<dyn Listener>)
    }

    /// Mount a WebSocket endpoint into an Axum router
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot be created.
    pub async fn mount_into_router(
        &self,
        router: axum::Router,
        path: &str,
    ) -> Result<axum::Router, TransportError> {
        // Ensure we have a listener
        if self.listener.read().await.is_none() {
            self.listen().await?;
        }

        let listener = self.listener.clone();

        let handler = move |ws: WebSocketUpgrade| {
            let listener = listener.clone();

            async move {
                ws.on_upgrade(move |socket| async move {
                    let connection_tx = listener
                        .read()
                        .await
                        .as_ref()
                        .map(|l| l.connection_tx.clone());

                    match connection_tx {
                        Some(tx) => {
                            let conn = WebSocketServerConnection::new(socket);
                            debug!("WebSocket connection {} upgraded", conn.id);
                            if tx.send(Box::new(conn)).await.is_err() {
                                error!("Failed to send connection to listener");
                            }
                        }
                        None => error!("No listener configured"),
                    }
                })
            }
        };

        Ok(router.route(path, axum::routing::get(handler)))
    }
}
