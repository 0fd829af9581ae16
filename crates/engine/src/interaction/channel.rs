//! Request-channel interaction.
//!
//! Both directions are tracked independently (`Open → Completed | Errored |
//! Canceled`); the interaction is terminal once both are. Every message
//! except the requester's first consumes one unit of credit granted by the
//! receiver. Sends beyond the available credit are queued in order and
//! drained when the peer grants more.

use std::collections::VecDeque;

use tracing::debug;

use super::{
    Credit, Outcome, RemoteEvent, Signal, StateMachine, Transition, cancel_frame, error_frame,
};
use crate::error::{ContractViolation, Error, ProtocolError};
use crate::frame::{Body, ErrorCode};
use crate::payload::Payload;

/// State of one direction of a channel.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DirectionState {
    /// Messages may still flow.
    #[default]
    Open,
    /// Finished normally.
    Completed,
    /// Failed.
    Errored,
    /// Canceled by either side.
    Canceled,
}

impl DirectionState {
    /// True for every state but `Open`.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Open)
    }
}

/// Flow-control counters of a channel.
///
/// `sent` counts credited messages only (the requester's first payload and
/// completion-only frames are free), so `sent <= granted_outbound` holds at
/// every point.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ChannelStats {
    /// Credited messages sent.
    pub sent: u64,
    /// Messages received from the peer.
    pub received: u64,
    /// Total credit granted by the peer.
    pub granted_outbound: u64,
    /// Total credit granted to the peer.
    pub granted_inbound: u64,
    /// Messages waiting for credit.
    pub queued: usize,
}

/// Events accepted by [`ChannelState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChannelEvent {
    /// Open the channel (requester only).
    Open {
        /// First payload, not charged to credit.
        payload: Payload,
        /// Credit granted to the responder.
        initial_request_n: u32,
        /// The requester has nothing more to send.
        complete: bool,
    },
    /// Send a message.
    Send {
        /// The message.
        payload: Payload,
        /// Last message of the outbound direction.
        complete: bool,
    },
    /// Finish the outbound direction without a message.
    Complete,
    /// Grant the peer `n` more messages.
    Request(u32),
    /// Fail the interaction and tell the peer.
    Fail {
        /// Code sent to the peer.
        code: ErrorCode,
        /// Message sent to the peer.
        message: String,
    },
    /// Cancel locally.
    Cancel,
    /// Frame from the peer.
    Remote(RemoteEvent),
    /// The connection failed.
    Fatal(Error),
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Pending {
    Next(Payload, bool),
    Complete,
}

/// State of one channel, from either side.
#[derive(Debug)]
pub struct ChannelState {
    opened: bool,
    outbound: DirectionState,
    inbound: DirectionState,
    outbound_credit: Credit,
    inbound_credit: Credit,
    pending: VecDeque<Pending>,
    completing: bool,
    error: Option<Error>,
    stats: ChannelStats,
}

impl ChannelState {
    /// Requester side; opened by [`ChannelEvent::Open`].
    #[must_use]
    pub fn requester() -> Self {
        Self {
            opened: false,
            outbound: DirectionState::Open,
            inbound: DirectionState::Open,
            outbound_credit: Credit::default(),
            inbound_credit: Credit::default(),
            pending: VecDeque::new(),
            completing: false,
            error: None,
            stats: ChannelStats::default(),
        }
    }

    /// Responder side, after accepting a REQUEST_CHANNEL.
    ///
    /// `complete` is the requester's complete flag: when set the inbound
    /// direction is already finished.
    #[must_use]
    pub fn responder(initial_request_n: u32, complete: bool) -> Self {
        let mut state = Self::requester();
        state.opened = true;
        state.outbound_credit = Credit::new(initial_request_n);
        state.stats.granted_outbound = u64::from(initial_request_n);
        if complete {
            state.inbound = DirectionState::Completed;
        }
        state
    }

    /// Outbound direction state.
    #[must_use]
    pub const fn outbound(&self) -> DirectionState {
        self.outbound
    }

    /// Inbound direction state.
    #[must_use]
    pub const fn inbound(&self) -> DirectionState {
        self.inbound
    }

    /// Credit the peer has granted and that is still unused.
    #[must_use]
    pub const fn outbound_credit(&self) -> Credit {
        self.outbound_credit
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            queued: self.pending.len(),
            ..self.stats
        }
    }

    fn both_terminal(&self) -> bool {
        self.outbound.is_terminal() && self.inbound.is_terminal()
    }

    /// Moves every open direction to `state`, dropping queued sends.
    fn close_open(&mut self, state: DirectionState) {
        if !self.outbound.is_terminal() {
            self.outbound = state;
        }
        if !self.inbound.is_terminal() {
            self.inbound = state;
        }
        self.pending.clear();
        self.completing = true;
    }

    fn fatal(&mut self, t: &mut Transition, error: Error, notify: bool) {
        self.outbound = DirectionState::Errored;
        self.inbound = DirectionState::Errored;
        self.pending.clear();
        self.completing = true;
        if notify {
            t.signal(Signal::Error(error.clone()));
        }
        self.error = Some(error);
    }

    /// Protocol violation by the peer: cancel the stream and fail locally.
    fn violation(&mut self, t: &mut Transition, error: ProtocolError) {
        t.frame(cancel_frame());
        self.fatal(t, error.into(), true);
    }

    fn emit(&mut self, t: &mut Transition, payload: Payload, complete: bool) {
        t.frame(Body::Payload {
            payload,
            next: true,
            complete,
        });
        if complete {
            self.outbound = DirectionState::Completed;
        }
    }

    fn emit_complete(&mut self, t: &mut Transition) {
        t.frame(Body::Payload {
            payload: Payload::default(),
            next: false,
            complete: true,
        });
        self.outbound = DirectionState::Completed;
    }

    fn drain(&mut self, t: &mut Transition) {
        while let Some(front) = self.pending.front() {
            match front {
                Pending::Next(..) => {
                    if !self.outbound_credit.try_consume() {
                        break;
                    }
                    if let Some(Pending::Next(payload, complete)) = self.pending.pop_front() {
                        self.stats.sent += 1;
                        self.emit(t, payload, complete);
                    }
                }
                Pending::Complete => {
                    self.pending.pop_front();
                    self.emit_complete(t);
                }
            }
        }
    }

    fn send(&mut self, t: &mut Transition, payload: Payload, complete: bool) {
        if complete {
            self.completing = true;
        }

        if self.pending.is_empty() && self.outbound_credit.try_consume() {
            self.stats.sent += 1;
            self.emit(t, payload, complete);
        } else {
            debug!("No outbound credit, queueing message");
            self.pending.push_back(Pending::Next(payload, complete));
        }
    }

    fn local_outbound_allowed(&self) -> Result<(), ContractViolation> {
        if !self.opened {
            return Err(ContractViolation::NotOpened);
        }
        if self.outbound.is_terminal() || self.completing {
            return Err(ContractViolation::OutboundClosed);
        }
        Ok(())
    }

    fn remote(&mut self, t: &mut Transition, event: RemoteEvent) {
        match event {
            RemoteEvent::Payload { next: true, .. } | RemoteEvent::Payload { complete: true, .. }
                if self.inbound.is_terminal() =>
            {
                debug!("Ignoring PAYLOAD on finished inbound direction");
            }

            RemoteEvent::Payload {
                payload,
                next: true,
                complete,
            } => {
                if !self.inbound_credit.try_consume() {
                    self.violation(t, ProtocolError::CreditExceeded);
                    return;
                }
                self.stats.received += 1;
                t.signal(Signal::Next(payload, complete));
                if complete {
                    self.inbound = DirectionState::Completed;
                }
            }

            RemoteEvent::Payload { complete: true, .. } => {
                self.inbound = DirectionState::Completed;
                t.signal(Signal::Complete);
            }

            RemoteEvent::Payload { .. } => {
                debug!("Ignoring PAYLOAD without NEXT or COMPLETE");
            }

            RemoteEvent::RequestN(0) => self.violation(t, ProtocolError::ZeroRequestN),

            RemoteEvent::RequestN(n) => {
                if self.outbound.is_terminal() {
                    debug!("Ignoring REQUEST_N({n}) on finished outbound direction");
                    return;
                }
                self.outbound_credit.grant(n);
                self.stats.granted_outbound = self.stats.granted_outbound.saturating_add(u64::from(n));
                self.drain(t);

                // Only ask for more while more may still be sent
                if !self.outbound.is_terminal() && !self.completing {
                    t.signal(Signal::Request(n));
                }
            }

            RemoteEvent::Cancel => {
                self.close_open(DirectionState::Canceled);
                t.signal(Signal::Cancel);
            }

            RemoteEvent::Error(error) => self.fatal(t, error, true),

            RemoteEvent::Extension {
                extended_type,
                payload,
                can_ignore,
            } => t.signal(Signal::Extension {
                extended_type,
                payload,
                can_ignore,
            }),
        }
    }

    fn outcome(&self) -> Outcome {
        if let Some(error) = &self.error {
            return Outcome::Errored(error.clone());
        }

        if self.outbound == DirectionState::Canceled || self.inbound == DirectionState::Canceled {
            Outcome::Canceled
        } else {
            Outcome::Completed
        }
    }
}

impl StateMachine for ChannelState {
    type Event = ChannelEvent;

    fn handle(&mut self, event: ChannelEvent) -> Result<Transition, ContractViolation> {
        let mut t = Transition::default();

        // Already terminal: local events are no-ops, peer events are dropped
        if self.opened && self.both_terminal() {
            return match event {
                ChannelEvent::Open { .. } => Err(ContractViolation::AlreadyOpened),
                ChannelEvent::Send { .. } | ChannelEvent::Complete => {
                    Err(ContractViolation::OutboundClosed)
                }
                ChannelEvent::Request(0) => Err(ContractViolation::ZeroRequestN),
                _ => Ok(t),
            };
        }

        match event {
            ChannelEvent::Open {
                payload,
                initial_request_n,
                complete,
            } => {
                if self.opened {
                    return Err(ContractViolation::AlreadyOpened);
                }
                if initial_request_n == 0 {
                    return Err(ContractViolation::ZeroRequestN);
                }

                self.opened = true;
                self.inbound_credit = Credit::new(initial_request_n);
                self.stats.granted_inbound = u64::from(initial_request_n);
                t.frame(Body::RequestChannel {
                    initial_request_n,
                    complete,
                    payload,
                });
                if complete {
                    self.completing = true;
                    self.outbound = DirectionState::Completed;
                }
            }

            ChannelEvent::Send { payload, complete } => {
                self.local_outbound_allowed()?;
                self.send(&mut t, payload, complete);
            }

            ChannelEvent::Complete => {
                self.local_outbound_allowed()?;
                self.completing = true;
                if self.pending.is_empty() {
                    self.emit_complete(&mut t);
                } else {
                    self.pending.push_back(Pending::Complete);
                }
            }

            ChannelEvent::Request(0) => return Err(ContractViolation::ZeroRequestN),

            ChannelEvent::Request(n) => {
                if !self.opened {
                    return Err(ContractViolation::NotOpened);
                }
                if self.inbound.is_terminal() {
                    debug!("Ignoring request({n}) on finished inbound direction");
                } else {
                    self.inbound_credit.grant(n);
                    self.stats.granted_inbound =
                        self.stats.granted_inbound.saturating_add(u64::from(n));
                    t.frame(Body::RequestN { n });
                }
            }

            ChannelEvent::Fail { code, message } => {
                if self.opened {
                    t.frame(error_frame(code, message.clone()));
                }
                self.fatal(&mut t, Error::Application { code, message }, false);
            }

            ChannelEvent::Cancel => {
                if self.opened {
                    t.frame(cancel_frame());
                }
                self.close_open(DirectionState::Canceled);
            }

            ChannelEvent::Remote(_) if !self.opened => {
                debug!("Ignoring peer event before the channel was opened");
            }

            ChannelEvent::Remote(remote) => self.remote(&mut t, remote),

            ChannelEvent::Fatal(error) => self.fatal(&mut t, error, true),
        }

        if self.both_terminal() {
            // Unopened channels only get here through cancel or failure
            self.opened = true;
            t.outcome = Some(self.outcome());
        }

        Ok(t)
    }

    fn is_terminal(&self) -> bool {
        self.opened && self.both_terminal()
    }
}
