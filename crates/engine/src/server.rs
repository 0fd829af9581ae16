//! Server side: accepting connections and validating their SETUP.

use std::sync::Arc;
use std::time::Duration;

use reflux_transport::{Connection, Listener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::connection::{self, KeepAlive, RSocket, Side};
use crate::connector::SetupConfig;
use crate::error::{ConnectionError, Error, Result};
use crate::frame::{Body, ErrorCode, Frame, MAJOR_VERSION};
use crate::responder::Responder;

/// How long a new connection may take to send its SETUP frame.
const SETUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Decides whether to accept a connection, given its SETUP.
pub trait SocketAcceptor: Send + Sync + 'static {
    /// The responder serving the connection.
    ///
    /// # Errors
    ///
    /// An `Err` refuses the connection with `REJECTED_SETUP`.
    fn accept(&self, setup: &SetupConfig) -> Result<Arc<dyn Responder>>;
}

impl<F> SocketAcceptor for F
where
    F: Fn(&SetupConfig) -> Result<Arc<dyn Responder>> + Send + Sync + 'static,
{
    fn accept(&self, setup: &SetupConfig) -> Result<Arc<dyn Responder>> {
        self(setup)
    }
}

/// Accepts connections from a [`Listener`] and serves each one.
#[derive(Debug)]
pub struct Server<A> {
    acceptor: Arc<A>,
}

impl<A> Clone for Server<A> {
    fn clone(&self) -> Self {
        Self {
            acceptor: Arc::clone(&self.acceptor),
        }
    }
}

impl<A: SocketAcceptor> Server<A> {
    /// A server consulting `acceptor` for every connection.
    pub fn new(acceptor: A) -> Self {
        Self {
            acceptor: Arc::new(acceptor),
        }
    }

    /// Accept connections until `shutdown` is cancelled, then close the
    /// listener and every connection it produced.
    ///
    /// # Errors
    ///
    /// Fails if the listener fails before shutdown.
    pub async fn serve(&self, listener: Box<dyn Listener>, shutdown: CancellationToken) -> Result<()> {
        info!("Serving connections");

        loop {
            let accepted = tokio::select! {
                () = shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            let connection = match accepted {
                Ok(connection) => connection,
                Err(e) if shutdown.is_cancelled() => {
                    debug!("Listener stopped during shutdown: {e}");
                    break;
                }
                Err(e) => {
                    error!("Listener failed: {e}");
                    return Err(e.into());
                }
            };

            let server = self.clone();
            let shutdown = shutdown.child_token();
            tokio::spawn(async move {
                let socket = match server.establish(connection).await {
                    Ok(socket) => socket,
                    Err(e) => {
                        debug!("Connection not established: {e}");
                        return;
                    }
                };

                tokio::select! {
                    reason = socket.closed() => debug!("Connection ended: {reason}"),
                    () = shutdown.cancelled() => socket.close(),
                }
            });
        }

        listener.close().await?;
        info!("Server stopped");
        Ok(())
    }

    /// Validate the SETUP frame of a freshly accepted connection and start
    /// serving it.
    ///
    /// # Errors
    ///
    /// Fails when the connection is refused; the peer has been sent an
    /// ERROR frame in that case.
    pub async fn establish(&self, connection: Box<dyn Connection>) -> Result<RSocket> {
        let first = match tokio::time::timeout(SETUP_TIMEOUT, connection.recv()).await {
            Ok(received) => received?,
            Err(_) => {
                return reject(connection, ErrorCode::INVALID_SETUP, "no SETUP received".to_string())
                    .await;
            }
        };

        let setup = match Frame::decode(first) {
            Ok(Some(Frame {
                body: Body::Setup(setup),
                ..
            })) => setup,
            Ok(_) => {
                return reject(
                    connection,
                    ErrorCode::INVALID_SETUP,
                    "first frame must be SETUP".to_string(),
                )
                .await;
            }
            Err(e) => return reject(connection, ErrorCode::INVALID_SETUP, e.to_string()).await,
        };

        if setup.major_version != MAJOR_VERSION {
            let message = format!(
                "unsupported protocol version {}.{}",
                setup.major_version, setup.minor_version
            );
            return reject(connection, ErrorCode::UNSUPPORTED_SETUP, message).await;
        }
        if setup.lease {
            return reject(
                connection,
                ErrorCode::UNSUPPORTED_SETUP,
                "leasing is not supported".to_string(),
            )
            .await;
        }
        if setup.resume_token.is_some() {
            return reject(
                connection,
                ErrorCode::UNSUPPORTED_SETUP,
                "resumption is not supported".to_string(),
            )
            .await;
        }

        let config = SetupConfig::from(setup);
        let responder = match self.acceptor.accept(&config) {
            Ok(responder) => responder,
            Err(e) => {
                return reject(connection, ErrorCode::REJECTED_SETUP, e.wire_message()).await;
            }
        };

        info!(
            "Accepted connection (data: {}, metadata: {})",
            config.data_mime_type, config.metadata_mime_type
        );

        Ok(connection::start(
            connection,
            Side::Server,
            Some(responder),
            Some(KeepAlive::monitoring(config.lifetime)),
        ))
    }
}

async fn reject(connection: Box<dyn Connection>, code: ErrorCode, message: String) -> Result<RSocket> {
    warn!("Refusing connection ({code}): {message}");

    let frame = Frame::new(
        0,
        Body::Error {
            code,
            message: message.clone(),
        },
    );
    match frame.encode() {
        Ok(bytes) => {
            if let Err(e) = connection.send(bytes).await {
                debug!("Could not send setup error: {e}");
            }
        }
        Err(e) => debug!("Could not encode setup error: {e}"),
    }

    if let Err(e) = connection.close().await {
        debug!("Error closing refused connection: {e}");
    }

    Err(Error::Connection(ConnectionError::Rejected { code, message }))
}
