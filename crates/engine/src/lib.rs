//! Reactive-streaming interaction engine.
//!
//! The engine multiplexes interactions over one duplex [`Connection`]:
//!
//! - **request/response**: one request, at most one response, then terminal;
//! - **request/channel**: a bidirectional stream where every message consumes
//!   one unit of credit previously granted by the receiver.
//!
//! Each interaction is an explicit state machine fed a tagged event enum
//! (see [`interaction`]); the [`connection`] module owns the reader, writer
//! and keep-alive tasks and routes frames to the right machine.
//!
//! ```no_run
//! use reflux_engine::{CompositeMessageBuilder, Connector, Payload, Subscriber};
//! use reflux_engine::error::Error;
//! use reflux_metadata::WellKnownMimeType;
//! use reflux_transport_memory::MemoryTransport;
//!
//! struct Print;
//!
//! impl Subscriber for Print {
//!     fn on_next(&mut self, payload: Payload, complete: bool) {
//!         println!("{payload}|{complete}");
//!     }
//!     fn on_error(&mut self, error: Error) {
//!         eprintln!("{error}");
//!     }
//!     fn on_complete(&mut self) {}
//! }
//!
//! # async fn example() -> Result<(), Error> {
//! let url = "memory://users".parse().unwrap();
//! let socket = Connector::new().connect(&MemoryTransport::default(), &url).await?;
//!
//! let request = CompositeMessageBuilder::new()
//!     .data("[1]")
//!     .route("com.alibaba.user.UserService.findById")
//!     .mime_type(WellKnownMimeType::ApplicationJson)
//!     .build()?;
//!
//! let handle = socket.request_response(request, Print)?;
//! handle.closed().await;
//! # Ok(())
//! # }
//! ```
//!
//! [`Connection`]: reflux_transport::Connection

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod builder;
pub mod connection;
pub mod connector;
pub mod error;
pub mod frame;
pub mod interaction;
pub mod payload;
pub mod requester;
pub mod responder;
pub mod server;
mod stream;
pub mod subscriber;

pub use builder::CompositeMessageBuilder;
pub use connection::RSocket;
pub use connector::{Connector, SetupConfig};
pub use error::{ConnectionError, ContractViolation, Error, ProtocolError, Result};
pub use frame::{ErrorCode, MAX_REQUEST_N, StreamId};
pub use interaction::{ChannelStats, Outcome};
pub use payload::Payload;
pub use requester::{ChannelRequester, ResponseHandle};
pub use responder::{Responder, Router};
pub use server::{Server, SocketAcceptor};
pub use subscriber::{ChannelSubscriber, Subscriber};
