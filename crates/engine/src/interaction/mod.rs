//! Interaction state machines.
//!
//! Each interaction kind is a plain state object fed one event at a time.
//! Handling an event never performs I/O: it returns a [`Transition`] listing
//! the frames to send, the signals to deliver to the subscriber and, at most
//! once, the terminal [`Outcome`]. The connection applies transitions in
//! order.
//!
//! Local events (the caller's own actions) never produce signals; only peer
//! events and connection failures do.

pub mod channel;
pub mod credit;
pub mod request_response;

use crate::error::{ContractViolation, Error};
use crate::frame::{Body, ErrorCode};
use crate::payload::Payload;

pub use channel::{ChannelEvent, ChannelState, ChannelStats, DirectionState};
pub use credit::Credit;
pub use request_response::{RequestResponseEvent, RequestResponseState};

/// Terminal result of an interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Every direction completed normally.
    Completed,
    /// Canceled by either side.
    Canceled,
    /// Failed with the given error.
    Errored(Error),
}

/// Callback to deliver to the subscriber.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Signal {
    /// `on_next(payload, complete)`.
    Next(Payload, bool),
    /// `on_complete()`.
    Complete,
    /// `on_error(error)`.
    Error(Error),
    /// `request(n)` (channels only).
    Request(u32),
    /// `cancel()` (channels only).
    Cancel,
    /// `on_extension(..)`.
    Extension {
        /// Extended type.
        extended_type: u32,
        /// Extension payload.
        payload: Payload,
        /// Receiver may ignore it.
        can_ignore: bool,
    },
}

/// Frame-level event from the peer, already addressed to this interaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteEvent {
    /// PAYLOAD frame.
    Payload {
        /// Carried message.
        payload: Payload,
        /// NEXT flag.
        next: bool,
        /// COMPLETE flag.
        complete: bool,
    },
    /// REQUEST_N frame.
    RequestN(u32),
    /// CANCEL frame.
    Cancel,
    /// ERROR frame, already mapped to an [`Error`].
    Error(Error),
    /// EXT frame.
    Extension {
        /// Extended type.
        extended_type: u32,
        /// Extension payload.
        payload: Payload,
        /// IGNORE flag.
        can_ignore: bool,
    },
}

impl RemoteEvent {
    /// Maps a stream frame body; returns `None` for bodies that do not
    /// address an existing interaction.
    #[must_use]
    pub fn from_body(body: Body) -> Option<Self> {
        match body {
            Body::Payload {
                payload,
                next,
                complete,
            } => Some(Self::Payload {
                payload,
                next,
                complete,
            }),
            Body::RequestN { n } => Some(Self::RequestN(n)),
            Body::Cancel => Some(Self::Cancel),
            Body::Error { code, message } => Some(Self::Error(Error::from_frame(code, message))),
            Body::Ext {
                extended_type,
                can_ignore,
                payload,
            } => Some(Self::Extension {
                extended_type,
                payload,
                can_ignore,
            }),
            Body::Setup(_)
            | Body::KeepAlive { .. }
            | Body::RequestResponse { .. }
            | Body::RequestChannel { .. } => None,
        }
    }
}

/// Result of handling one event.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Transition {
    /// Frames to send, in order.
    pub frames: Vec<Body>,
    /// Signals to deliver, in order.
    pub signals: Vec<Signal>,
    /// Set exactly once, when the interaction becomes terminal.
    pub outcome: Option<Outcome>,
}

impl Transition {
    fn frame(&mut self, body: Body) {
        self.frames.push(body);
    }

    fn signal(&mut self, signal: Signal) {
        self.signals.push(signal);
    }
}

/// A state machine driven by events of type `Event`.
pub trait StateMachine: Send + 'static {
    /// Event type accepted by [`StateMachine::handle`].
    type Event;

    /// Apply one event.
    ///
    /// # Errors
    ///
    /// Returns a [`ContractViolation`] when a local event is not allowed in
    /// the current state; the state is unchanged in that case.
    fn handle(&mut self, event: Self::Event) -> Result<Transition, ContractViolation>;

    /// True once the interaction is terminal.
    fn is_terminal(&self) -> bool;
}

fn cancel_frame() -> Body {
    Body::Cancel
}

fn error_frame(code: ErrorCode, message: impl Into<String>) -> Body {
    Body::Error {
        code,
        message: message.into(),
    }
}
