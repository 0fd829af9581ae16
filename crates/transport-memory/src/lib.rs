//! In-memory transport implementation for testing
//!
//! This transport routes frames between endpoints within the same process,
//! perfect for testing and development scenarios. Listeners register under a
//! name and clients connect with `memory://<name>`.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use reflux_transport::{Connection, Listener, Transport, TransportError};
use std::fmt::Debug;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};
use url::Url;
use uuid::Uuid;

/// Global registry of memory listeners for cross-connection routing
static GLOBAL_REGISTRY: once_cell::sync::Lazy<Arc<DashMap<String, MemoryListener>>> =
    once_cell::sync::Lazy::new(|| Arc::new(DashMap::new()));

/// Frames buffered per direction before `send` waits
const CHANNEL_CAPACITY: usize = 100;

/// Configuration for memory transport
#[derive(Debug, Clone, Default)]
pub struct MemoryOptions {
    /// Name to listen on (if acting as a listener)
    pub listen_name: Option<String>,
}

/// Memory transport implementation
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    options: MemoryOptions,
}

impl MemoryTransport {
    /// Create a new memory transport with options
    pub const fn new(options: MemoryOptions) -> Self {
        Self { options }
    }

    /// Create a transport that listens on `name`
    pub fn listening_on(name: impl Into<String>) -> Self {
        Self::new(MemoryOptions {
            listen_name: Some(name.into()),
        })
    }

    /// Clear all global state (useful for tests)
    pub fn clear_global_state() {
        GLOBAL_REGISTRY.clear();
    }

    /// Create a connected pair without going through the registry
    pub fn pair() -> (Box<dyn Connection>, Box<dyn Connection>) {
        let (client, server) = MemoryConnection::pair();
        (Box::new(client), Box::new(server))
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError> {
        if url.scheme() != "memory" {
            return Err(TransportError::InvalidAddress(format!(
                "expected memory:// URL, got {url}"
            )));
        }

        let name = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidAddress(format!("{url} has no name")))?
            .to_string();

        debug!("Connecting to memory listener {}", name);

        // Clone out of the registry so no shard lock is held across the await
        let incoming_tx = GLOBAL_REGISTRY
            .get(&name)
            .map(|listener| listener.incoming_tx.clone())
            .ok_or_else(|| TransportError::ConnectionFailed(format!("No listener for {name}")))?;

        let (client_conn, server_conn) = MemoryConnection::pair();

        // Send the server connection to the listener
        incoming_tx
            .send_async(Box::new(server_conn))
            .await
            .map_err(|_| TransportError::ConnectionFailed("Listener closed".to_string()))?;

        info!("Memory connection {} established to {}", client_conn.id, name);

        Ok(Box::new(client_conn))
    }

    async fn listen(&self) -> Result<Box<dyn Listener>, TransportError> {
        let name = self.options.listen_name.clone().ok_or_else(|| {
            TransportError::InvalidAddress("No listen name configured".to_string())
        })?;

        debug!("Creating memory listener for {}", name);

        // Check if the name is already taken
        if GLOBAL_REGISTRY.contains_key(&name) {
            return Err(TransportError::Other(format!(
                "{name} already has a listener"
            )));
        }

        let (incoming_tx, incoming_rx) = flume::unbounded();
        let listener = MemoryListener {
            name: name.clone(),
            incoming_rx: Arc::new(RwLock::new(incoming_rx)),
            incoming_tx,
            closed: Arc::new(RwLock::new(false)),
        };

        GLOBAL_REGISTRY.insert(name.clone(), listener.clone());

        info!("Memory listener created for {}", name);

        Ok(Box::new(listener))
    }
}

/// Memory connection implementation
struct MemoryConnection {
    id: Uuid,
    sender: RwLock<Option<flume::Sender<Bytes>>>,
    receiver: flume::Receiver<Bytes>,
    closed: RwLock<bool>,
}

impl MemoryConnection {
    fn pair() -> (Self, Self) {
        let (client_to_server_tx, client_to_server_rx) = flume::bounded(CHANNEL_CAPACITY);
        let (server_to_client_tx, server_to_client_rx) = flume::bounded(CHANNEL_CAPACITY);

        let id = Uuid::new_v4();

        let client = Self {
            id,
            sender: RwLock::new(Some(client_to_server_tx)),
            receiver: server_to_client_rx,
            closed: RwLock::new(false),
        };

        let server = Self {
            id,
            sender: RwLock::new(Some(server_to_client_tx)),
            receiver: client_to_server_rx,
            closed: RwLock::new(false),
        };

        (client, server)
    }
}

impl Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("id", &self.id)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&self, data: Bytes) -> Result<(), TransportError> {
        if *self.closed.read().await {
            return Err(TransportError::ConnectionClosed);
        }

        let sender = self
            .sender
            .read()
            .await
            .clone()
            .ok_or(TransportError::ConnectionClosed)?;

        debug!("Memory connection {} sending {} bytes", self.id, data.len());

        sender
            .send_async(data)
            .await
            .map_err(|_| TransportError::ConnectionClosed)
    }

    async fn recv(&self) -> Result<Bytes, TransportError> {
        if *self.closed.read().await {
            return Err(TransportError::ConnectionClosed);
        }

        match self.receiver.recv_async().await {
            Ok(data) => {
                debug!(
                    "Memory connection {} received {} bytes",
                    self.id,
                    data.len()
                );
                Ok(data)
            }
            Err(_) => {
                *self.closed.write().await = true;
                Err(TransportError::ConnectionClosed)
            }
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing memory connection {}", self.id);
        *self.closed.write().await = true;

        // Dropping our sender ends the peer's receive loop
        self.sender.write().await.take();

        Ok(())
    }
}

/// Memory listener implementation
#[derive(Clone)]
struct MemoryListener {
    name: String,
    incoming_rx: Arc<RwLock<flume::Receiver<Box<dyn Connection>>>>,
    incoming_tx: flume::Sender<Box<dyn Connection>>,
    closed: Arc<RwLock<bool>>,
}

impl Debug for MemoryListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryListener")
            .field("name", &self.name)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Listener for MemoryListener {
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError> {
        if *self.closed.read().await {
            return Err(TransportError::ConnectionClosed);
        }

        let receiver = self.incoming_rx.read().await;
        match receiver.recv_async().await {
            Ok(conn) => {
                info!("Memory listener {} accepted connection", self.name);
                Ok(conn)
            }
            Err(_) => Err(TransportError::ConnectionClosed),
        }
    }

    async fn close(&self) -> Result<(), TransportError> {
        debug!("Closing memory listener {}", self.name);
        *self.closed.write().await = true;

        GLOBAL_REGISTRY.remove(&self.name);

        Ok(())
    }
}
