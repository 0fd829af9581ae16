//! Client session driver.
//!
//! A [`Session`] connects to a server (the URL scheme picks the transport),
//! announces the application in its SETUP metadata and drives one
//! interaction at a time:
//!
//! - [`Session::request_response`] sends a routed JSON request and resolves
//!   with the single response;
//! - [`Session::request_channel`] opens a channel and produces one numbered
//!   message per unit of credit the peer grants, following a [`ChannelPlan`].
//!
//! The [`demo`] module holds the matching user service.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod demo;
mod error;
mod session;

pub use config::{
    APPLICATION_METADATA_MIME_TYPE, AppMetadata, ChannelPlan, DEFAULT_URL, FIND_BY_ID_ROUTE,
    RECENT_ROUTE, SessionConfig,
};
pub use error::{Result, SessionError};
pub use session::{ChannelReport, Session};
