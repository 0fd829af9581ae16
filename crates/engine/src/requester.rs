//! Handles for starting and driving interactions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, instrument};

use crate::connection::RSocket;
use crate::error::{ContractViolation, Error, Result};
use crate::frame::StreamId;
use crate::interaction::{
    ChannelEvent, ChannelState, ChannelStats, Outcome, RequestResponseEvent, RequestResponseState,
};
use crate::payload::Payload;
use crate::stream::{ChannelStream, Interaction, RequestResponseStream};
use crate::subscriber::{ChannelSubscriber, Subscriber};

impl RSocket {
    /// Send a request and report the single response to `subscriber`.
    ///
    /// # Errors
    ///
    /// Fails if the connection is closed or out of stream ids.
    #[instrument(skip_all)]
    pub fn request_response<S>(&self, payload: Payload, subscriber: S) -> Result<ResponseHandle>
    where
        S: Subscriber,
    {
        self.check_open()?;
        let stream_id = self.allocate_stream_id()?;

        let stream: Arc<RequestResponseStream> = Interaction::new(
            stream_id,
            RequestResponseState::default(),
            Arc::clone(&self.shared),
        );
        stream.install(Box::new(subscriber), Vec::new());
        self.register_request_response(&stream)?;
        stream.apply(RequestResponseEvent::Request(payload))?;

        debug!("Started request-response on stream {stream_id}");
        Ok(ResponseHandle { stream })
    }

    /// Open a request-channel.
    ///
    /// `initial_request_n` is the credit granted to the responder with the
    /// opening frame. `subscriber` builds the subscriber from the requester
    /// handle, so it can grant credit and send from its callbacks.
    ///
    /// # Errors
    ///
    /// Fails if `initial_request_n` is zero, or if the connection is closed
    /// or out of stream ids.
    #[instrument(skip(self, payload, subscriber))]
    pub fn request_channel<F, S>(
        &self,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
        subscriber: F,
    ) -> Result<ChannelRequester>
    where
        F: FnOnce(ChannelRequester) -> S,
        S: ChannelSubscriber,
    {
        if initial_request_n == 0 {
            return Err(ContractViolation::ZeroRequestN.into());
        }

        self.check_open()?;
        let stream_id = self.allocate_stream_id()?;

        let stream: Arc<ChannelStream> = Interaction::new(
            stream_id,
            ChannelState::requester(),
            Arc::clone(&self.shared),
        );
        let requester = ChannelRequester::new(Arc::clone(&stream));
        stream.install(Box::new(subscriber(requester.clone())), Vec::new());
        self.register_channel(&stream)?;
        stream.apply(ChannelEvent::Open {
            payload,
            initial_request_n,
            complete,
        })?;

        debug!("Opened channel on stream {stream_id}");
        Ok(requester)
    }
}

/// Handle on a running request-response.
pub struct ResponseHandle {
    stream: Arc<RequestResponseStream>,
}

impl fmt::Debug for ResponseHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseHandle")
            .field("stream_id", &self.stream.stream_id())
            .field("state", &self.stream.inspect(|state| *state))
            .finish()
    }
}

impl ResponseHandle {
    /// Stream the request was sent on.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream.stream_id()
    }

    /// Cancel the request. No callback fires afterwards.
    pub fn cancel(&self) {
        if let Err(violation) = self.stream.apply(RequestResponseEvent::Cancel) {
            debug!("Cancel on stream {}: {violation}", self.stream.stream_id());
        }
    }

    /// Wait for the terminal outcome.
    pub async fn closed(&self) -> Outcome {
        self.stream.closed().await
    }
}

/// Local side of a request-channel, held by whoever sends on it.
///
/// On the requesting end it is returned by
/// [`RSocket::request_channel`]; on the responding end it is handed to
/// [`Responder::request_channel`](crate::Responder::request_channel).
#[derive(Clone)]
pub struct ChannelRequester {
    stream: Arc<ChannelStream>,
}

impl fmt::Debug for ChannelRequester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelRequester")
            .field("stream_id", &self.stream.stream_id())
            .field("stats", &self.stats())
            .finish()
    }
}

impl ChannelRequester {
    pub(crate) const fn new(stream: Arc<ChannelStream>) -> Self {
        Self { stream }
    }

    /// Stream the channel runs on.
    #[must_use]
    pub fn stream_id(&self) -> StreamId {
        self.stream.stream_id()
    }

    /// Send a message, consuming one unit of credit. Without credit the
    /// message is queued until the peer grants more.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::OutboundClosed`] once the outbound direction is
    /// finished, [`ContractViolation::NotOpened`] before the channel opened.
    pub fn on_next(&self, payload: Payload, complete: bool) -> Result<()> {
        self.stream
            .apply(ChannelEvent::Send { payload, complete })
            .map_err(Error::from)
    }

    /// Finish the outbound direction.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::OutboundClosed`] if it is already finished.
    pub fn on_complete(&self) -> Result<()> {
        self.stream
            .apply(ChannelEvent::Complete)
            .map_err(Error::from)
    }

    /// Grant the peer `n` more messages.
    ///
    /// # Errors
    ///
    /// [`ContractViolation::ZeroRequestN`] when `n` is zero.
    pub fn request(&self, n: u32) -> Result<()> {
        self.stream
            .apply(ChannelEvent::Request(n))
            .map_err(Error::from)
    }

    /// Cancel the channel in both directions.
    pub fn cancel(&self) {
        if let Err(violation) = self.stream.apply(ChannelEvent::Cancel) {
            debug!("Cancel on stream {}: {violation}", self.stream.stream_id());
        }
    }

    /// Fail the channel with an application error sent to the peer.
    pub fn on_error(&self, message: impl Into<String>) {
        self.fail(&Error::application(message));
    }

    pub(crate) fn fail(&self, error: &Error) {
        let event = ChannelEvent::Fail {
            code: error.error_code(),
            message: error.wire_message(),
        };
        if let Err(violation) = self.stream.apply(event) {
            debug!("Error on stream {}: {violation}", self.stream.stream_id());
        }
    }

    /// Run `f` after `delay` unless the channel terminates first.
    pub fn spawn_deferred<F>(&self, delay: Duration, f: F) -> JoinHandle<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let token = self.stream.token().clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(delay) => f(),
            }
        })
    }

    /// Message and credit counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        self.stream.inspect(ChannelState::stats)
    }

    /// True once both directions are finished.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.stream.is_terminal()
    }

    /// Wait for the terminal outcome.
    pub async fn closed(&self) -> Outcome {
        self.stream.closed().await
    }
}
