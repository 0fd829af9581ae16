//! Command line client and demo server for reflux.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use reflux_engine::Server;
use reflux_session::{
    ChannelPlan, DEFAULT_URL, FIND_BY_ID_ROUTE, RECENT_ROUTE, Session, SessionConfig,
    SessionError, demo,
};
use reflux_transport::{Transport, TransportError};
use reflux_transport_tcp::{TcpOptions, TcpTransport};
use reflux_transport_ws::WebSocketTransport;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::Url;

/// CLI-specific error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Engine error while serving
    #[error(transparent)]
    Engine(#[from] reflux_engine::Error),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Session error
    #[error(transparent)]
    Session(#[from] SessionError),

    /// Transport error
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Server address (ws://, wss:// or tcp://)
    #[arg(long, default_value = DEFAULT_URL, env = "REFLUX_URL", global = true)]
    url: Url,

    /// Application name announced in the setup metadata
    #[arg(long, default_value = "demo-app", env = "REFLUX_APP_NAME", global = true)]
    app_name: String,

    /// Keep-alive interval in milliseconds
    #[arg(long, default_value_t = 1_000_000, env = "REFLUX_KEEP_ALIVE_MS", global = true)]
    keep_alive_ms: u64,

    /// Connection lifetime in milliseconds
    #[arg(long, default_value_t = 100_000, env = "REFLUX_LIFETIME_MS", global = true)]
    lifetime_ms: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, Subcommand)]
enum Command {
    /// Send one request and print the response
    RequestResponse {
        /// Route of the request
        #[arg(long, default_value = FIND_BY_ID_ROUTE, env = "REFLUX_ROUTE")]
        route: String,

        /// Request data
        #[arg(long, default_value = "[1]", env = "REFLUX_DATA")]
        data: String,
    },

    /// Open a request-channel sending one message per credit granted
    RequestChannel {
        /// Route of the channel
        #[arg(long, default_value = RECENT_ROUTE, env = "REFLUX_ROUTE")]
        route: String,

        /// Messages to send, the opening one included
        #[arg(long, default_value_t = 10, env = "REFLUX_TOTAL")]
        total: u32,

        /// Delay before each produced message in milliseconds
        #[arg(long, default_value_t = 1000, env = "REFLUX_DELAY_MS")]
        delay_ms: u64,

        /// Credit granted to the responder when opening
        #[arg(long, default_value_t = 1, env = "REFLUX_INITIAL_REQUEST_N")]
        initial_request_n: u32,

        /// Cancel the channel once this many messages were sent
        #[arg(long, env = "REFLUX_CANCEL_AFTER")]
        cancel_after: Option<u32>,
    },

    /// Serve the demo user service
    Serve {
        /// Address to listen on
        #[arg(long, default_value = "127.0.0.1:19999", env = "REFLUX_LISTEN")]
        listen: SocketAddr,

        /// Transport to serve
        #[arg(long, value_enum, default_value_t = Listen::Ws, env = "REFLUX_TRANSPORT")]
        transport: Listen,

        /// WebSocket endpoint path
        #[arg(long, default_value = "/", env = "REFLUX_WS_PATH")]
        path: String,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Listen {
    Tcp,
    Ws,
}

impl Args {
    fn session_config(&self) -> SessionConfig {
        SessionConfig {
            app_name: self.app_name.clone(),
            keep_alive: Duration::from_millis(self.keep_alive_ms),
            lifetime: Duration::from_millis(self.lifetime_ms),
            ..SessionConfig::new(self.url.clone())
        }
    }
}

/// Cancel `shutdown` on the first interrupt.
fn cancel_on_interrupt(shutdown: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received interrupt signal");
        }
        info!("Shutting down");
        shutdown.cancel();
    });
}

async fn serve(listen: SocketAddr, transport: Listen, path: &str) -> Result<(), Error> {
    let shutdown = CancellationToken::new();
    cancel_on_interrupt(shutdown.clone());

    let server = Server::new(demo::acceptor);

    match transport {
        Listen::Tcp => {
            let listener = TcpTransport::new(TcpOptions {
                listen_addr: listen,
            })
            .listen()
            .await?;
            server.serve(listener, shutdown).await?;
        }
        Listen::Ws => {
            let transport = WebSocketTransport::new();
            let router = transport.mount_into_router(axum::Router::new(), path).await?;
            let listener = transport.get_listener().await.ok_or_else(|| {
                TransportError::Other("WebSocket listener missing".to_string())
            })?;

            let http = tokio::net::TcpListener::bind(listen).await?;
            info!("WebSocket endpoint on ws://{}{path}", http.local_addr()?);

            let http_shutdown = shutdown.clone();
            let http = tokio::spawn(async move {
                axum::serve(http, router)
                    .with_graceful_shutdown(http_shutdown.cancelled_owned())
                    .await
            });

            server.serve(listener, shutdown).await?;
            if let Ok(result) = http.await {
                result?;
            }
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command.clone() {
        Command::RequestResponse { route, data } => {
            let session = Session::connect(&args.session_config()).await?;
            match session.request_response(&route, data).await? {
                Some(response) => info!("Response: {response}"),
                None => info!("Completed without a response"),
            }
            session.close();
        }
        Command::RequestChannel {
            route,
            total,
            delay_ms,
            initial_request_n,
            cancel_after,
        } => {
            let plan = ChannelPlan {
                total,
                delay: Duration::from_millis(delay_ms),
                initial_request_n,
                cancel_after,
            };

            let session = Session::connect(&args.session_config()).await?;
            let report = session.request_channel(&route, &plan).await?;
            info!(
                "Channel {:?}: sent {}, received {}",
                report.outcome,
                report.sent,
                report.received.len()
            );
            session.close();
        }
        Command::Serve {
            listen,
            transport,
            path,
        } => serve(listen, transport, &path).await?,
    }

    Ok(())
}
