//! Requester side of a request-response interaction.
//!
//! `Idle → Requested → Responded → Complete`, with terminal `Errored` and
//! `Canceled` reachable from any non-terminal state.

use tracing::debug;

use super::{Outcome, RemoteEvent, Signal, StateMachine, Transition, cancel_frame};
use crate::error::{ContractViolation, Error, ProtocolError};
use crate::frame::Body;
use crate::payload::Payload;

/// States of a request-response interaction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RequestResponseState {
    /// Nothing sent yet.
    #[default]
    Idle,
    /// Request sent, awaiting the response.
    Requested,
    /// Response delivered, awaiting completion.
    Responded,
    /// Completed normally.
    Complete,
    /// Failed.
    Errored,
    /// Canceled locally.
    Canceled,
}

impl RequestResponseState {
    /// True for `Complete`, `Errored` and `Canceled`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Errored | Self::Canceled)
    }
}

/// Events accepted by [`RequestResponseState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RequestResponseEvent {
    /// Send the request.
    Request(Payload),
    /// Cancel locally.
    Cancel,
    /// Frame from the peer.
    Remote(RemoteEvent),
    /// The connection failed.
    Fail(Error),
}

impl StateMachine for RequestResponseState {
    type Event = RequestResponseEvent;

    fn handle(&mut self, event: RequestResponseEvent) -> Result<Transition, ContractViolation> {
        let mut t = Transition::default();

        match event {
            RequestResponseEvent::Request(payload) => {
                if *self != Self::Idle {
                    return Err(ContractViolation::AlreadyRequested);
                }
                t.frame(Body::RequestResponse { payload });
                *self = Self::Requested;
            }

            // Terminal states absorb everything else
            _ if self.is_terminal() => {}

            RequestResponseEvent::Cancel => {
                if *self != Self::Idle {
                    t.frame(cancel_frame());
                }
                *self = Self::Canceled;
                t.outcome = Some(Outcome::Canceled);
            }

            RequestResponseEvent::Fail(error) => self.fail(&mut t, error),

            RequestResponseEvent::Remote(_) if *self == Self::Idle => {
                debug!("Ignoring peer event before the request was sent");
            }

            RequestResponseEvent::Remote(remote) => self.remote(&mut t, remote),
        }

        Ok(t)
    }

    fn is_terminal(&self) -> bool {
        RequestResponseState::is_terminal(*self)
    }
}

impl RequestResponseState {
    fn remote(&mut self, t: &mut Transition, event: RemoteEvent) {
        match event {
            RemoteEvent::Payload {
                payload,
                next: true,
                complete,
            } => {
                if *self == Self::Responded {
                    t.frame(cancel_frame());
                    self.fail(
                        t,
                        ProtocolError::UnexpectedFrame("second response payload".to_string())
                            .into(),
                    );
                    return;
                }

                t.signal(Signal::Next(payload, complete));
                if complete {
                    *self = Self::Complete;
                    t.outcome = Some(Outcome::Completed);
                } else {
                    *self = Self::Responded;
                }
            }

            RemoteEvent::Payload { complete: true, .. } => {
                t.signal(Signal::Complete);
                *self = Self::Complete;
                t.outcome = Some(Outcome::Completed);
            }

            RemoteEvent::Payload { .. } => {
                debug!("Ignoring PAYLOAD without NEXT or COMPLETE");
            }

            RemoteEvent::Error(error) => self.fail(t, error),

            RemoteEvent::Extension {
                extended_type,
                payload,
                can_ignore,
            } => t.signal(Signal::Extension {
                extended_type,
                payload,
                can_ignore,
            }),

            RemoteEvent::RequestN(_) | RemoteEvent::Cancel => {
                debug!("Ignoring {event:?} on request-response requester");
            }
        }
    }

    fn fail(&mut self, t: &mut Transition, error: Error) {
        t.signal(Signal::Error(error.clone()));
        *self = Self::Errored;
        t.outcome = Some(Outcome::Errored(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConnectionError;

    fn next(data: &'static str, complete: bool) -> RequestResponseEvent {
        RequestResponseEvent::Remote(RemoteEvent::Payload {
            payload: Payload::from_data(data),
            next: true,
            complete,
        })
    }

    fn complete() -> RequestResponseEvent {
        RequestResponseEvent::Remote(RemoteEvent::Payload {
            payload: Payload::default(),
            next: false,
            complete: true,
        })
    }

    fn requested() -> RequestResponseState {
        let mut state = RequestResponseState::default();
        let t = state
            .handle(RequestResponseEvent::Request(Payload::from_data("[1]")))
            .unwrap();
        assert_eq!(
            t.frames,
            vec![Body::RequestResponse {
                payload: Payload::from_data("[1]")
            }]
        );
        state
    }

    #[test]
    fn test_response_with_completion() {
        let mut state = requested();

        let t = state.handle(next("user", true)).unwrap();
        assert_eq!(t.signals, vec![Signal::Next(Payload::from_data("user"), true)]);
        assert_eq!(t.outcome, Some(Outcome::Completed));
        assert_eq!(state, RequestResponseState::Complete);

        // Nothing after terminal
        assert_eq!(state.handle(next("late", true)).unwrap(), Transition::default());
    }

    #[test]
    fn test_response_then_complete() {
        let mut state = requested();

        let t = state.handle(next("user", false)).unwrap();
        assert_eq!(t.outcome, None);
        assert_eq!(state, RequestResponseState::Responded);

        let t = state.handle(complete()).unwrap();
        assert_eq!(t.signals, vec![Signal::Complete]);
        assert_eq!(t.outcome, Some(Outcome::Completed));
    }

    #[test]
    fn test_complete_without_data() {
        let mut state = requested();

        let t = state.handle(complete()).unwrap();
        assert_eq!(t.signals, vec![Signal::Complete]);
        assert_eq!(state, RequestResponseState::Complete);
    }

    #[test]
    fn test_second_payload_is_protocol_error() {
        let mut state = requested();
        state.handle(next("one", false)).unwrap();

        let t = state.handle(next("two", false)).unwrap();
        assert_eq!(t.frames, vec![Body::Cancel]);
        assert!(matches!(
            t.signals.as_slice(),
            [Signal::Error(Error::Protocol(ProtocolError::UnexpectedFrame(_)))]
        ));
        assert_eq!(state, RequestResponseState::Errored);
    }

    #[test]
    fn test_second_request_is_contract_violation() {
        let mut state = requested();

        assert_eq!(
            state.handle(RequestResponseEvent::Request(Payload::default())),
            Err(ContractViolation::AlreadyRequested)
        );
        assert_eq!(state, RequestResponseState::Requested);
    }

    #[test]
    fn test_cancel_is_idempotent_and_silent() {
        let mut state = requested();

        let t = state.handle(RequestResponseEvent::Cancel).unwrap();
        assert_eq!(t.frames, vec![Body::Cancel]);
        assert!(t.signals.is_empty());
        assert_eq!(t.outcome, Some(Outcome::Canceled));

        assert_eq!(
            state.handle(RequestResponseEvent::Cancel).unwrap(),
            Transition::default()
        );
        assert_eq!(state.handle(next("late", true)).unwrap(), Transition::default());
    }

    #[test]
    fn test_peer_error_and_connection_failure() {
        let mut state = requested();
        let error = Error::application("no such user");

        let t = state
            .handle(RequestResponseEvent::Remote(RemoteEvent::Error(error.clone())))
            .unwrap();
        assert_eq!(t.signals, vec![Signal::Error(error.clone())]);
        assert_eq!(t.outcome, Some(Outcome::Errored(error)));

        let mut state = requested();
        let error = Error::Connection(ConnectionError::Closed);
        let t = state.handle(RequestResponseEvent::Fail(error.clone())).unwrap();
        assert_eq!(t.outcome, Some(Outcome::Errored(error)));
        assert!(t.frames.is_empty());
    }
}
