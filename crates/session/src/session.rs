//! Connecting and driving one interaction at a time.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use reflux_engine::error::Error;
use reflux_engine::{
    ChannelRequester, ChannelSubscriber, CompositeMessageBuilder, Connector, Outcome, Payload,
    RSocket, Subscriber,
};
use reflux_metadata::WellKnownMimeType;
use reflux_transport::Transport;
use reflux_transport_tcp::TcpTransport;
use reflux_transport_ws::WebSocketTransport;
use tracing::{debug, info, instrument};

use crate::config::{ChannelPlan, SessionConfig};
use crate::error::{Result, SessionError};

/// Summary of a finished request-channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelReport {
    /// Messages sent, the opening one included.
    pub sent: u32,
    /// Messages received, in order.
    pub received: Vec<Payload>,
    /// How the channel ended.
    pub outcome: Outcome,
}

/// A connected client.
#[derive(Clone, Debug)]
pub struct Session {
    socket: RSocket,
}

impl Session {
    /// Connect using the transport matching the URL scheme (`ws`, `wss` or
    /// `tcp`).
    ///
    /// # Errors
    ///
    /// [`SessionError::Config`] for other schemes, [`SessionError::Connect`]
    /// when the connection fails.
    pub async fn connect(config: &SessionConfig) -> Result<Self> {
        match config.url.scheme() {
            "ws" | "wss" => Self::connect_with(&WebSocketTransport::new(), config).await,
            "tcp" => Self::connect_with(&TcpTransport::default(), config).await,
            other => Err(SessionError::Config(format!(
                "unsupported URL scheme: {other}"
            ))),
        }
    }

    /// Connect over `transport`.
    ///
    /// # Errors
    ///
    /// [`SessionError::Connect`] when the connection fails.
    #[instrument(skip_all, fields(url = %config.url))]
    pub async fn connect_with(transport: &dyn Transport, config: &SessionConfig) -> Result<Self> {
        let setup = config.setup()?;

        let socket = Connector::new()
            .setup(setup)
            .connect(transport, &config.url)
            .await
            .map_err(SessionError::Connect)?;

        info!("Connected as {}", config.app_name);
        Ok(Self { socket })
    }

    /// The underlying connection.
    #[must_use]
    pub const fn socket(&self) -> &RSocket {
        &self.socket
    }

    /// Close the connection.
    pub fn close(&self) {
        self.socket.close();
    }

    /// Send `data` to `route` and wait for the response.
    ///
    /// Resolves with the response payload, or `None` when the peer completed
    /// without one.
    ///
    /// # Errors
    ///
    /// [`SessionError::Build`] for an invalid route, otherwise
    /// [`SessionError::Interaction`].
    #[instrument(skip(self, data))]
    pub async fn request_response(
        &self,
        route: &str,
        data: impl Into<Bytes>,
    ) -> Result<Option<Payload>> {
        let request = message(route, data.into())?;

        let response = Arc::new(Mutex::new(None));
        let handle = self
            .socket
            .request_response(
                request,
                Capture {
                    response: Arc::clone(&response),
                },
            )
            .map_err(SessionError::Interaction)?;

        match handle.closed().await {
            Outcome::Completed => Ok(response.lock().take()),
            Outcome::Errored(error) => Err(SessionError::Interaction(error)),
            Outcome::Canceled => {
                debug!("Request-response canceled");
                Ok(None)
            }
        }
    }

    /// Drive a request-channel on `route` according to `plan`.
    ///
    /// Message `"0"` opens the channel. Every unit of credit granted by the
    /// peer schedules one more message after `plan.delay`, until `plan.total`
    /// messages were sent; the last one completes the outbound direction.
    /// Every received message that is not the last grants the peer one more.
    ///
    /// # Errors
    ///
    /// [`SessionError::Config`] for an invalid plan, [`SessionError::Build`]
    /// for an invalid route, [`SessionError::Interaction`] when the channel
    /// fails.
    #[instrument(skip(self, plan), fields(total = plan.total))]
    pub async fn request_channel(&self, route: &str, plan: &ChannelPlan) -> Result<ChannelReport> {
        plan.validate()?;

        let opening = message(route, Bytes::from_static(b"0"))?;
        let progress = Arc::new(Mutex::new(Progress::opened()));
        let last = plan.total == 1;

        let requester = self
            .socket
            .request_channel(opening, plan.initial_request_n, last, |requester| {
                ChannelDriver {
                    producer: Arc::new(Producer {
                        requester,
                        plan: plan.clone(),
                        progress: Arc::clone(&progress),
                        send: Mutex::new(()),
                    }),
                }
            })
            .map_err(SessionError::Interaction)?;

        if plan.cancel_after.is_some_and(|limit| limit <= 1) {
            info!("Canceling after the opening message");
            requester.cancel();
        }

        let outcome = requester.closed().await;
        let Progress { sent, received, .. } = std::mem::take(&mut *progress.lock());

        match outcome {
            Outcome::Errored(error) => Err(SessionError::Interaction(error)),
            outcome => {
                info!("Channel finished: {outcome:?}, sent {sent}, received {}", received.len());
                Ok(ChannelReport {
                    sent,
                    received,
                    outcome,
                })
            }
        }
    }
}

fn message(route: &str, data: Bytes) -> Result<Payload> {
    CompositeMessageBuilder::new()
        .data(data)
        .route(route)
        .mime_type(WellKnownMimeType::ApplicationJson)
        .build()
        .map_err(SessionError::Build)
}

/// Keeps the single response.
struct Capture {
    response: Arc<Mutex<Option<Payload>>>,
}

impl Subscriber for Capture {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        info!("{payload}|{complete}");
        *self.response.lock() = Some(payload);
    }

    fn on_error(&mut self, error: Error) {
        debug!("Request-response failed: {error}");
    }

    fn on_complete(&mut self) {
        debug!("Request-response completed");
    }
}

#[derive(Default)]
struct Progress {
    /// Index of the next message.
    next: u32,
    /// Productions scheduled but not yet fired.
    scheduled: u32,
    sent: u32,
    received: Vec<Payload>,
}

impl Progress {
    /// Progress right after the opening message `"0"`.
    fn opened() -> Self {
        Self {
            next: 1,
            sent: 1,
            ..Self::default()
        }
    }
}

/// Produces numbered messages as credit arrives.
struct Producer {
    requester: ChannelRequester,
    plan: ChannelPlan,
    progress: Arc<Mutex<Progress>>,
    /// Held while a message is numbered and sent, keeping them in order.
    send: Mutex<()>,
}

impl Producer {
    /// Schedule one production per credit unit, within the message budget.
    fn schedule(self: &Arc<Self>, n: u32) {
        let count = {
            let mut progress = self.progress.lock();
            let remaining = self
                .plan
                .total
                .saturating_sub(progress.next)
                .saturating_sub(progress.scheduled);
            let count = n.min(remaining);
            progress.scheduled += count;
            count
        };

        if count < n {
            debug!("Ignoring {} credit beyond the message budget", n - count);
        }

        for _ in 0..count {
            let producer = Arc::clone(self);
            self.requester
                .spawn_deferred(self.plan.delay, move || producer.produce());
        }
    }

    fn produce(&self) {
        let _ordered = self.send.lock();

        let (index, last) = {
            let mut progress = self.progress.lock();
            progress.scheduled -= 1;
            let index = progress.next;
            progress.next += 1;
            (index, progress.next == self.plan.total)
        };

        if let Err(e) = self
            .requester
            .on_next(Payload::from_data(index.to_string()), last)
        {
            debug!("Message {index} not sent: {e}");
            return;
        }

        let sent = {
            let mut progress = self.progress.lock();
            progress.sent += 1;
            progress.sent
        };

        if self.plan.cancel_after.is_some_and(|limit| sent >= limit) {
            info!("Canceling after {sent} messages");
            self.requester.cancel();
        }
    }
}

/// Client-side subscriber of a driven channel.
struct ChannelDriver {
    producer: Arc<Producer>,
}

impl Subscriber for ChannelDriver {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        info!("{payload}|{complete}");
        self.producer.progress.lock().received.push(payload);

        if !complete {
            if let Err(e) = self.producer.requester.request(1) {
                debug!("Credit not granted: {e}");
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        debug!("Channel failed: {error}");
    }

    fn on_complete(&mut self) {
        debug!("Peer completed the channel");
    }
}

impl ChannelSubscriber for ChannelDriver {
    fn request(&mut self, n: u32) {
        info!("request({n})");
        self.producer.schedule(n);
    }

    fn cancel(&mut self) {
        debug!("Peer canceled the channel");
    }
}
