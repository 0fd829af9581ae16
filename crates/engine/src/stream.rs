//! Per-stream runtime: a state machine plus the subscriber it reports to.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::connection::Shared;
use crate::error::{ConnectionError, ContractViolation, Error};
use crate::frame::{Frame, StreamId};
use crate::interaction::{
    ChannelState, Outcome, RequestResponseState, Signal, StateMachine, Transition,
};
use crate::subscriber::{ChannelSubscriber, Subscriber};

pub(crate) type RequestResponseStream = Interaction<RequestResponseState, dyn Subscriber>;
pub(crate) type ChannelStream = Interaction<ChannelState, dyn ChannelSubscriber>;

/// Routes a [`Signal`] to the matching callback.
pub(crate) trait Deliver: Send {
    fn deliver(&mut self, signal: Signal);
}

impl Deliver for dyn Subscriber {
    fn deliver(&mut self, signal: Signal) {
        match signal {
            Signal::Next(payload, complete) => self.on_next(payload, complete),
            Signal::Complete => self.on_complete(),
            Signal::Error(error) => self.on_error(error),
            Signal::Extension {
                extended_type,
                payload,
                can_ignore,
            } => self.on_extension(extended_type, payload, can_ignore),
            Signal::Request(_) | Signal::Cancel => {
                trace!("Dropping outbound signal for a request-response subscriber");
            }
        }
    }
}

impl Deliver for dyn ChannelSubscriber {
    fn deliver(&mut self, signal: Signal) {
        match signal {
            Signal::Next(payload, complete) => self.on_next(payload, complete),
            Signal::Complete => self.on_complete(),
            Signal::Error(error) => self.on_error(error),
            Signal::Request(n) => self.request(n),
            Signal::Cancel => self.cancel(),
            Signal::Extension {
                extended_type,
                payload,
                can_ignore,
            } => self.on_extension(extended_type, payload, can_ignore),
        }
    }
}

/// Signals awaiting delivery, and the outcome once the machine is terminal.
#[derive(Default)]
struct Inbox {
    signals: VecDeque<Signal>,
    outcome: Option<Outcome>,
}

enum Slot<S: ?Sized> {
    /// No subscriber yet; signals wait here.
    Pending(Vec<Signal>),
    Installed(Box<S>),
    /// Terminal and fully delivered.
    Done,
}

/// One live interaction on a connection.
///
/// Frames produced by a transition are queued while the machine lock is
/// held, so concurrent callers cannot reorder them. Signals go through an
/// inbox and are delivered by whichever caller holds the subscriber; a
/// callback that re-enters the interaction only enqueues. The outcome is
/// published by the caller that empties the inbox, after the last callback
/// returned.
pub(crate) struct Interaction<M, S: ?Sized> {
    stream_id: StreamId,
    machine: Mutex<M>,
    inbox: Mutex<Inbox>,
    subscriber: Mutex<Slot<S>>,
    token: CancellationToken,
    outcome: watch::Sender<Option<Outcome>>,
    shared: Arc<Shared>,
}

impl<M, S> Interaction<M, S>
where
    M: StateMachine,
    S: ?Sized + Deliver,
{
    pub(crate) fn new(stream_id: StreamId, machine: M, shared: Arc<Shared>) -> Arc<Self> {
        let (outcome, _) = watch::channel(None);
        Arc::new(Self {
            stream_id,
            machine: Mutex::new(machine),
            inbox: Mutex::new(Inbox::default()),
            subscriber: Mutex::new(Slot::Pending(Vec::new())),
            token: CancellationToken::new(),
            outcome,
            shared,
        })
    }

    pub(crate) const fn stream_id(&self) -> StreamId {
        self.stream_id
    }

    /// Cancelled once the interaction is terminal.
    pub(crate) const fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub(crate) fn is_terminal(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Read the machine state.
    pub(crate) fn inspect<T>(&self, f: impl FnOnce(&M) -> T) -> T {
        f(&self.machine.lock())
    }

    /// Feed one event and carry out the resulting transition.
    pub(crate) fn apply(&self, event: M::Event) -> Result<(), ContractViolation> {
        let outcome = {
            let mut machine = self.machine.lock();
            let Transition {
                frames,
                signals,
                outcome,
            } = machine.handle(event)?;

            for body in frames {
                self.shared.send_frame(Frame::new(self.stream_id, body));
            }
            if !signals.is_empty() {
                self.inbox.lock().signals.extend(signals);
            }
            outcome
        };

        if let Some(slot) = self.subscriber.try_lock() {
            self.pump(slot);
        }

        if let Some(outcome) = outcome {
            self.finish(outcome);
        }

        Ok(())
    }

    /// Install the subscriber, delivering `initial` and then anything that
    /// arrived before it.
    pub(crate) fn install(&self, subscriber: Box<S>, initial: Vec<Signal>) {
        let mut slot = self.subscriber.lock();
        let backlog = match std::mem::replace(&mut *slot, Slot::Installed(subscriber)) {
            Slot::Pending(backlog) => backlog,
            Slot::Installed(_) | Slot::Done => Vec::new(),
        };

        {
            let mut inbox = self.inbox.lock();
            for signal in initial.into_iter().chain(backlog).rev() {
                inbox.signals.push_front(signal);
            }
        }

        self.pump(slot);
    }

    /// Give up on installing a subscriber; pending signals are dropped.
    pub(crate) fn discard(&self) {
        let mut slot = self.subscriber.lock();
        if matches!(*slot, Slot::Pending(_)) {
            *slot = Slot::Done;
        }
        self.pump(slot);
    }

    /// Wait for the terminal outcome.
    pub(crate) async fn closed(&self) -> Outcome {
        let mut outcome = self.outcome.subscribe();
        outcome
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|state| state.clone())
            .unwrap_or(Outcome::Errored(ConnectionError::Closed.into()))
    }

    fn next_signal(&self) -> Option<Signal> {
        self.inbox.lock().signals.pop_front()
    }

    fn pump<'a>(&'a self, mut slot: MutexGuard<'a, Slot<S>>) {
        loop {
            while let Some(signal) = self.next_signal() {
                match &mut *slot {
                    Slot::Pending(backlog) => backlog.push(signal),
                    Slot::Installed(subscriber) => subscriber.deliver(signal),
                    Slot::Done => trace!("Dropping signal on finished stream {}", self.stream_id),
                }
            }

            // Drop the subscriber once terminal so it cannot keep the stream alive.
            // The token is cancelled after the terminal signals are queued.
            if self.token.is_cancelled()
                && matches!(*slot, Slot::Installed(_))
                && self.inbox.lock().signals.is_empty()
            {
                *slot = Slot::Done;
            }

            // A pending subscriber has yet to see the backlog
            let waiting = matches!(*slot, Slot::Pending(_));
            if !waiting {
                let outcome = {
                    let mut inbox = self.inbox.lock();
                    if inbox.signals.is_empty() {
                        inbox.outcome.take()
                    } else {
                        None
                    }
                };
                if let Some(outcome) = outcome {
                    self.outcome.send_replace(Some(outcome));
                }
            }
            drop(slot);

            // Work enqueued while we were releasing the lock
            let more = {
                let inbox = self.inbox.lock();
                !inbox.signals.is_empty() || (!waiting && inbox.outcome.is_some())
            };
            if !more {
                return;
            }
            match self.subscriber.try_lock() {
                Some(next) => slot = next,
                None => return,
            }
        }
    }

    fn finish(&self, outcome: Outcome) {
        debug!("Stream {} finished: {outcome:?}", self.stream_id);

        self.token.cancel();
        self.shared.release(self.stream_id);
        self.inbox.lock().outcome = Some(outcome);

        if let Some(slot) = self.subscriber.try_lock() {
            self.pump(slot);
        }
    }
}

impl Interaction<RequestResponseState, dyn Subscriber> {
    pub(crate) fn fail(&self, error: Error) {
        use crate::interaction::RequestResponseEvent;

        if let Err(violation) = self.apply(RequestResponseEvent::Fail(error)) {
            debug!("Failing stream {}: {violation}", self.stream_id);
        }
    }
}

impl Interaction<ChannelState, dyn ChannelSubscriber> {
    pub(crate) fn fail(&self, error: Error) {
        use crate::interaction::ChannelEvent;

        if let Err(violation) = self.apply(ChannelEvent::Fatal(error)) {
            debug!("Failing stream {}: {violation}", self.stream_id);
        }
    }
}
