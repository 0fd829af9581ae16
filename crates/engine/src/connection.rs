//! Connection multiplexer.
//!
//! One connection runs three tasks:
//!
//! - a **writer** draining the outbound frame queue into the transport;
//! - a **reader** decoding inbound frames and routing them by stream id;
//! - a **keep-alive** task sending KEEPALIVE frames (client side) and
//!   failing the connection when nothing was received within its lifetime.
//!
//! Any fatal condition goes through [`Shared::terminate`], which records the
//! first error, stops the tasks and fails every live interaction with it.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use reflux_transport::Connection;
use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::error::{ConnectionError, Error, Result};
use crate::frame::{Body, ErrorCode, Frame, MAX_STREAM_ID, StreamId};
use crate::interaction::{ChannelEvent, ChannelState, RemoteEvent, RequestResponseEvent, Signal};
use crate::payload::Payload;
use crate::requester::ChannelRequester;
use crate::responder::Responder;
use crate::stream::{ChannelStream, Interaction, RequestResponseStream};

/// Which end of the connection this is; decides stream id parity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Side {
    Client,
    Server,
}

/// Keep-alive parameters of a running connection.
#[derive(Clone, Copy, Debug)]
pub(crate) struct KeepAlive {
    interval: Duration,
    lifetime: Duration,
    send: bool,
}

impl KeepAlive {
    const MIN_PERIOD: Duration = Duration::from_millis(1);

    /// Send KEEPALIVE every `interval` and expect traffic within `lifetime`.
    pub(crate) fn sending(interval: Duration, lifetime: Duration) -> Self {
        Self {
            interval: interval.max(Self::MIN_PERIOD),
            lifetime: lifetime.max(Self::MIN_PERIOD),
            send: true,
        }
    }

    /// Only watch for traffic within `lifetime`.
    pub(crate) fn monitoring(lifetime: Duration) -> Self {
        let lifetime = lifetime.max(Self::MIN_PERIOD);
        Self {
            interval: lifetime,
            lifetime,
            send: false,
        }
    }
}

#[derive(Clone)]
pub(crate) enum StreamEntry {
    RequestResponse(Arc<RequestResponseStream>),
    Channel(Arc<ChannelStream>),
    /// A request-response answered by the local responder.
    Responding(CancellationToken),
}

impl StreamEntry {
    fn remote(&self, stream_id: StreamId, event: RemoteEvent) {
        let result = match self {
            Self::RequestResponse(stream) => stream.apply(RequestResponseEvent::Remote(event)),
            Self::Channel(stream) => stream.apply(ChannelEvent::Remote(event)),
            Self::Responding(token) => {
                match event {
                    RemoteEvent::Cancel => token.cancel(),
                    other => debug!("Ignoring {other:?} for responding stream {stream_id}"),
                }
                Ok(())
            }
        };

        if let Err(violation) = result {
            warn!("Stream {stream_id} rejected peer event: {violation}");
        }
    }

    fn fail(&self, error: Error) {
        match self {
            Self::RequestResponse(stream) => stream.fail(error),
            Self::Channel(stream) => stream.fail(error),
            Self::Responding(token) => token.cancel(),
        }
    }
}

/// State shared by the connection tasks and every interaction.
pub(crate) struct Shared {
    side: Side,
    writer: mpsc::UnboundedSender<Frame>,
    streams: DashMap<StreamId, StreamEntry>,
    next_stream_id: AtomicU32,
    responder: Option<Arc<dyn Responder>>,
    shutdown: CancellationToken,
    last_received: Mutex<Instant>,
    failure: Mutex<Option<Error>>,
}

impl Shared {
    /// Queue a frame for the writer.
    pub(crate) fn send_frame(&self, frame: Frame) {
        trace!(
            "Queueing {} on stream {}",
            frame.frame_type().name(),
            frame.stream_id
        );
        if self.writer.send(frame).is_err() {
            debug!("Dropping frame, writer stopped");
        }
    }

    /// Forget a finished stream.
    pub(crate) fn release(&self, stream_id: StreamId) {
        self.streams.remove(&stream_id);
    }

    fn check_open(&self) -> Result<()> {
        match &*self.failure.lock() {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn allocate_stream_id(&self) -> Result<StreamId> {
        let id = self.next_stream_id.fetch_add(2, Ordering::Relaxed);
        if id == 0 || id > MAX_STREAM_ID {
            return Err(ConnectionError::StreamIdsExhausted.into());
        }
        Ok(id)
    }

    /// Register a stream, failing if the connection terminated meanwhile.
    fn register(&self, stream_id: StreamId, entry: StreamEntry) -> Result<()> {
        self.streams.insert(stream_id, entry);

        let failure = self.failure.lock().clone();
        if let Some(error) = failure {
            self.streams.remove(&stream_id);
            return Err(error);
        }
        Ok(())
    }

    /// Terminate the connection; only the first error counts.
    pub(crate) fn terminate(&self, error: Error) {
        {
            let mut failure = self.failure.lock();
            if failure.is_some() {
                return;
            }
            *failure = Some(error.clone());
        }

        match &error {
            Error::Connection(ConnectionError::Closed) => info!("Connection closed"),
            other => warn!("Connection terminated: {other}"),
        }

        self.shutdown.cancel();

        let ids: Vec<StreamId> = self.streams.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.streams.remove(&id) {
                entry.fail(error.clone());
            }
        }
    }

    fn dispatch(self: &Arc<Self>, frame: Frame) {
        let Frame { stream_id, body } = frame;
        trace!("Received {} on stream {stream_id}", body.frame_type().name());

        match body {
            Body::KeepAlive { respond, data, .. } => {
                if respond {
                    self.send_frame(Frame::new(
                        0,
                        Body::KeepAlive {
                            respond: false,
                            last_received_position: 0,
                            data,
                        },
                    ));
                }
            }

            Body::Setup(_) => warn!("Ignoring SETUP on an established connection"),

            Body::Error { code, message } if stream_id == 0 => {
                self.terminate(ConnectionError::Rejected { code, message }.into());
            }

            Body::RequestResponse { payload } => self.accept_request_response(stream_id, payload),

            Body::RequestChannel {
                initial_request_n,
                complete,
                payload,
            } => self.accept_channel(stream_id, payload, initial_request_n, complete),

            body => {
                let entry = self.streams.get(&stream_id).map(|entry| entry.value().clone());
                let Some(entry) = entry else {
                    debug!(
                        "Ignoring {} for unknown stream {stream_id}",
                        body.frame_type().name()
                    );
                    return;
                };

                if let Some(event) = RemoteEvent::from_body(body) {
                    entry.remote(stream_id, event);
                }
            }
        }
    }

    /// The responder for a new peer-initiated stream, or `None` once the
    /// peer has been answered.
    fn accepting(&self, stream_id: StreamId) -> Option<Arc<dyn Responder>> {
        if self.streams.contains_key(&stream_id) {
            warn!("Ignoring request reusing live stream {stream_id}");
            return None;
        }

        let responder = self.responder.clone();
        if responder.is_none() {
            debug!("Rejecting stream {stream_id}: no responder");
            self.send_frame(Frame::new(
                stream_id,
                Body::Error {
                    code: ErrorCode::REJECTED,
                    message: "no responder on this connection".to_string(),
                },
            ));
        }
        responder
    }

    fn accept_request_response(self: &Arc<Self>, stream_id: StreamId, payload: Payload) {
        let Some(responder) = self.accepting(stream_id) else {
            return;
        };

        let token = self.shutdown.child_token();
        self.streams
            .insert(stream_id, StreamEntry::Responding(token.clone()));

        let shared = Arc::clone(self);
        tokio::spawn(async move {
            let result = tokio::select! {
                () = token.cancelled() => {
                    debug!("Request-response {stream_id} canceled");
                    shared.release(stream_id);
                    return;
                }
                result = responder.request_response(payload) => result,
            };

            if shared.streams.remove(&stream_id).is_none() {
                return;
            }

            let body = match result {
                Ok(payload) => Body::Payload {
                    payload,
                    next: true,
                    complete: true,
                },
                Err(error) => {
                    debug!("Request-response {stream_id} failed: {error}");
                    Body::Error {
                        code: error.error_code(),
                        message: error.wire_message(),
                    }
                }
            };
            shared.send_frame(Frame::new(stream_id, body));
        });
    }

    fn accept_channel(
        self: &Arc<Self>,
        stream_id: StreamId,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
    ) {
        if initial_request_n == 0 {
            self.send_frame(Frame::new(
                stream_id,
                Body::Error {
                    code: ErrorCode::INVALID,
                    message: "initial request n must be positive".to_string(),
                },
            ));
            return;
        }

        let Some(responder) = self.accepting(stream_id) else {
            return;
        };

        let stream: Arc<ChannelStream> = Interaction::new(
            stream_id,
            ChannelState::responder(initial_request_n, complete),
            Arc::clone(self),
        );
        self.streams
            .insert(stream_id, StreamEntry::Channel(Arc::clone(&stream)));

        let requester = ChannelRequester::new(Arc::clone(&stream));
        tokio::spawn(async move {
            match responder
                .request_channel(payload, complete, requester.clone())
                .await
            {
                Ok(subscriber) => {
                    stream.install(subscriber, vec![Signal::Request(initial_request_n)]);
                }
                Err(error) => {
                    debug!("Channel {stream_id} refused: {error}");
                    requester.fail(&error);
                    stream.discard();
                }
            }
        });
    }
}

/// A live connection.
///
/// Cheap to clone; every clone drives the same connection.
#[derive(Clone)]
pub struct RSocket {
    pub(crate) shared: Arc<Shared>,
}

impl fmt::Debug for RSocket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RSocket")
            .field("side", &self.shared.side)
            .field("streams", &self.shared.streams.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl RSocket {
    /// Close the connection; live interactions fail with
    /// [`ConnectionError::Closed`].
    pub fn close(&self) {
        self.shared.terminate(ConnectionError::Closed.into());
    }

    /// True once the connection terminated.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.shutdown.is_cancelled()
    }

    /// Wait until the connection terminates and return why.
    pub async fn closed(&self) -> Error {
        self.shared.shutdown.cancelled().await;
        self.shared
            .failure
            .lock()
            .clone()
            .unwrap_or(Error::Connection(ConnectionError::Closed))
    }

    /// Number of streams currently tracked.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.shared.streams.len()
    }

    pub(crate) fn check_open(&self) -> Result<()> {
        self.shared.check_open()
    }

    pub(crate) fn allocate_stream_id(&self) -> Result<StreamId> {
        self.shared.allocate_stream_id()
    }

    pub(crate) fn register_request_response(&self, stream: &Arc<RequestResponseStream>) -> Result<()> {
        self.shared.register(
            stream.stream_id(),
            StreamEntry::RequestResponse(Arc::clone(stream)),
        )
    }

    pub(crate) fn register_channel(&self, stream: &Arc<ChannelStream>) -> Result<()> {
        self.shared
            .register(stream.stream_id(), StreamEntry::Channel(Arc::clone(stream)))
    }
}

/// Start the connection tasks over an established transport connection.
pub(crate) fn start(
    connection: Box<dyn Connection>,
    side: Side,
    responder: Option<Arc<dyn Responder>>,
    keep_alive: Option<KeepAlive>,
) -> RSocket {
    let connection: Arc<dyn Connection> = Arc::from(connection);
    let (writer, frames) = mpsc::unbounded_channel();

    let shared = Arc::new(Shared {
        side,
        writer,
        streams: DashMap::new(),
        next_stream_id: AtomicU32::new(match side {
            Side::Client => 1,
            Side::Server => 2,
        }),
        responder,
        shutdown: CancellationToken::new(),
        last_received: Mutex::new(Instant::now()),
        failure: Mutex::new(None),
    });

    debug!("Starting {side:?} connection");

    tokio::spawn(write_loop(
        Arc::clone(&connection),
        frames,
        Arc::clone(&shared),
    ));
    tokio::spawn(read_loop(connection, Arc::clone(&shared)));
    if let Some(keep_alive) = keep_alive {
        tokio::spawn(keep_alive_loop(Arc::clone(&shared), keep_alive));
    }

    RSocket { shared }
}

async fn write_loop(
    connection: Arc<dyn Connection>,
    mut frames: mpsc::UnboundedReceiver<Frame>,
    shared: Arc<Shared>,
) {
    loop {
        let frame = tokio::select! {
            biased;
            frame = frames.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
            () = shared.shutdown.cancelled() => break,
        };

        if let Err(error) = write_frame(&*connection, &frame).await {
            shared.terminate(error);
            break;
        }
    }

    // Flush what was queued before shutdown, such as a final ERROR frame
    while let Ok(frame) = frames.try_recv() {
        if write_frame(&*connection, &frame).await.is_err() {
            break;
        }
    }

    if let Err(e) = connection.close().await {
        debug!("Error closing transport: {e}");
    }
    debug!("Writer stopped");
}

async fn write_frame(connection: &dyn Connection, frame: &Frame) -> Result<()> {
    let bytes = frame.encode()?;
    connection.send(bytes).await?;
    Ok(())
}

async fn read_loop(connection: Arc<dyn Connection>, shared: Arc<Shared>) {
    loop {
        let received = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            received = connection.recv() => received,
        };

        let bytes = match received {
            Ok(bytes) => bytes,
            Err(e) => {
                shared.terminate(e.into());
                break;
            }
        };

        *shared.last_received.lock() = Instant::now();

        match Frame::decode(bytes) {
            Ok(Some(frame)) => shared.dispatch(frame),
            Ok(None) => debug!("Ignoring frame of unknown type"),
            Err(e) => {
                warn!("Malformed frame: {e}");
                shared.send_frame(Frame::new(
                    0,
                    Body::Error {
                        code: ErrorCode::CONNECTION_ERROR,
                        message: e.to_string(),
                    },
                ));
                shared.terminate(e.into());
                break;
            }
        }
    }

    debug!("Reader stopped");
}

async fn keep_alive_loop(shared: Arc<Shared>, keep_alive: KeepAlive) {
    let mut ticker = tokio::time::interval(keep_alive.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let idle = shared.last_received.lock().elapsed();
                if idle > keep_alive.lifetime {
                    shared.terminate(ConnectionError::KeepAliveTimeout(keep_alive.lifetime).into());
                    break;
                }

                if keep_alive.send {
                    shared.send_frame(Frame::new(
                        0,
                        Body::KeepAlive {
                            respond: true,
                            last_received_position: 0,
                            data: None,
                        },
                    ));
                }
            }
        }
    }
}
