//! Generic transport abstraction for reactive-streaming connections
//!
//! This crate provides a transport-agnostic interface for exchanging whole
//! frames over a duplex connection. Specific transports (in-memory, TCP,
//! WebSocket) are provided in separate crates.
//!
//! Transports handle:
//! - Establishing client connections to a URL
//! - Accepting server connections
//! - Preserving frame boundaries in both directions
//!
//! They do not interpret frames, retry, or keep connections alive; that is
//! the engine's job.

pub mod error;

use std::fmt::Debug;

use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

pub use error::TransportError;

/// Transport trait for opening and accepting connections
#[async_trait]
pub trait Transport: Debug + Send + Sync + 'static {
    /// Connect to the peer at `url`
    async fn connect(&self, url: &Url) -> Result<Box<dyn Connection>, TransportError>;

    /// Start accepting connections
    async fn listen(&self) -> Result<Box<dyn Listener>, TransportError>;
}

/// A duplex, frame-preserving connection
///
/// `send` and `recv` may be called concurrently from different tasks; each
/// direction is serialized internally.
#[async_trait]
pub trait Connection: Debug + Send + Sync + 'static {
    /// Send one frame
    async fn send(&self, data: Bytes) -> Result<(), TransportError>;

    /// Receive the next frame
    async fn recv(&self) -> Result<Bytes, TransportError>;

    /// Close the connection; later sends and receives fail
    async fn close(&self) -> Result<(), TransportError>;
}

/// Source of inbound connections
#[async_trait]
pub trait Listener: Debug + Send + Sync + 'static {
    /// Wait for the next inbound connection
    async fn accept(&self) -> Result<Box<dyn Connection>, TransportError>;

    /// Stop accepting connections
    async fn close(&self) -> Result<(), TransportError>;
}

/// Extracts `host:port` from a URL, falling back to the scheme's default port
pub fn socket_address(url: &Url) -> Result<String, TransportError> {
    let host = url
        .host_str()
        .ok_or_else(|| TransportError::InvalidAddress(format!("{url} has no host")))?;
    let port = url
        .port_or_known_default()
        .ok_or_else(|| TransportError::InvalidAddress(format!("{url} has no port")))?;

    Ok(format!("{host}:{port}"))
}
