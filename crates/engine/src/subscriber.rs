//! Callbacks through which interactions report to their caller.

use tracing::debug;

use crate::error::Error;
use crate::payload::Payload;

/// Receives the inbound side of an interaction.
///
/// Callbacks run on the connection's reader task, one at a time and in
/// frame order. They may call back into the interaction (for example
/// [`ChannelRequester::request`](crate::ChannelRequester::request) from
/// `on_next`) but should not block.
pub trait Subscriber: Send + 'static {
    /// A message arrived; `complete` marks it as the last one.
    fn on_next(&mut self, payload: Payload, complete: bool);

    /// The interaction failed.
    fn on_error(&mut self, error: Error);

    /// The peer finished without sending another message.
    fn on_complete(&mut self);

    /// The peer sent an extension frame.
    fn on_extension(&mut self, extended_type: u32, payload: Payload, can_ignore: bool) {
        debug!(
            "Ignoring extension {:#x} ({payload}, can_ignore: {can_ignore})",
            extended_type
        );
    }
}

/// Subscriber for a request-channel; also receives the outbound signals.
pub trait ChannelSubscriber: Subscriber {
    /// The peer granted `n` more outbound messages.
    fn request(&mut self, n: u32);

    /// The peer canceled; nothing more will be accepted.
    fn cancel(&mut self) {}
}
