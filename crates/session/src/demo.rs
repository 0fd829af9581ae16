//! Demo user service answering the session's routes.

use std::sync::Arc;

use async_trait::async_trait;
use reflux_engine::error::{Error, Result};
use reflux_engine::{
    ChannelRequester, ChannelSubscriber, Payload, Responder, Router, SetupConfig, Subscriber,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::{AppMetadata, FIND_BY_ID_ROUTE, RECENT_ROUTE};

/// A user as returned by the demo service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    /// User id.
    pub id: u64,
    /// Nickname.
    pub nick: String,
}

/// Router serving the demo routes.
#[must_use]
pub fn router() -> Router {
    Router::new()
        .route(FIND_BY_ID_ROUTE, FindById)
        .route(RECENT_ROUTE, Recent)
}

/// Socket acceptor logging the connecting application and serving
/// [`router`].
///
/// # Errors
///
/// Never fails; the signature matches [`reflux_engine::SocketAcceptor`].
#[allow(clippy::unnecessary_wraps)]
pub fn acceptor(setup: &SetupConfig) -> Result<Arc<dyn Responder>> {
    match AppMetadata::from_setup(setup) {
        Some(app) => info!("Accepting {}", app.name),
        None => info!("Accepting anonymous client"),
    }
    Ok(Arc::new(router()))
}

/// Looks a user up by the first id of a JSON array such as `[1]`.
struct FindById;

#[async_trait]
impl Responder for FindById {
    async fn request_response(&self, payload: Payload) -> Result<Payload> {
        let data = payload.data().map(|data| data.as_ref()).unwrap_or_default();
        let ids: Vec<u64> = serde_json::from_slice(data)
            .map_err(|e| Error::application(format!("expected a JSON array of ids: {e}")))?;
        let id = *ids
            .first()
            .ok_or_else(|| Error::application("no user id given"))?;

        let user = User {
            id,
            nick: format!("user-{id}"),
        };
        debug!("Found {user:?}");

        let json = serde_json::to_vec(&user).map_err(|e| Error::application(e.to_string()))?;
        Ok(Payload::from_data(json))
    }
}

/// Echoes the data of every message back, granting one more each time.
struct Recent;

#[async_trait]
impl Responder for Recent {
    async fn request_channel(
        &self,
        payload: Payload,
        complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        requester.on_next(Payload::new(payload.data().cloned(), None), complete)?;
        if !complete {
            requester.request(1)?;
        }
        Ok(Box::new(Echo { requester }))
    }
}

struct Echo {
    requester: ChannelRequester,
}

impl Subscriber for Echo {
    fn on_next(&mut self, payload: Payload, complete: bool) {
        if let Err(e) = self.requester.on_next(payload, complete) {
            debug!("Echo not sent: {e}");
            return;
        }
        if !complete {
            if let Err(e) = self.requester.request(1) {
                debug!("Credit not granted: {e}");
            }
        }
    }

    fn on_error(&mut self, error: Error) {
        debug!("Recent channel failed: {error}");
    }

    fn on_complete(&mut self) {
        if let Err(e) = self.requester.on_complete() {
            debug!("Completion not sent: {e}");
        }
    }
}

impl ChannelSubscriber for Echo {
    fn request(&mut self, n: u32) {
        debug!("Client granted {n}");
    }
}
