//! Serving side: answering requests initiated by the peer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reflux_metadata::CompositeMetadata;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::payload::Payload;
use crate::requester::ChannelRequester;
use crate::subscriber::ChannelSubscriber;

/// Handles interactions the peer starts.
///
/// Every method defaults to rejecting the interaction.
#[async_trait]
pub trait Responder: Send + Sync + 'static {
    /// Answer one request. An `Err` is sent to the peer as an ERROR frame.
    async fn request_response(&self, payload: Payload) -> Result<Payload> {
        let _ = payload;
        Err(Error::rejected("request-response not supported"))
    }

    /// Accept a channel opened by the peer.
    ///
    /// `payload` is the peer's first message and `complete` tells whether
    /// the peer already finished its direction. `requester` sends on the
    /// responding direction; the returned subscriber receives the peer's
    /// messages and the credit it grants. The initial credit is delivered
    /// through [`ChannelSubscriber::request`] right after this returns.
    async fn request_channel(
        &self,
        payload: Payload,
        complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        let _ = (payload, complete, requester);
        Err(Error::rejected("request-channel not supported"))
    }
}

#[async_trait]
impl<R: Responder + ?Sized> Responder for Arc<R> {
    async fn request_response(&self, payload: Payload) -> Result<Payload> {
        (**self).request_response(payload).await
    }

    async fn request_channel(
        &self,
        payload: Payload,
        complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        (**self)
            .request_channel(payload, complete, requester)
            .await
    }
}

/// Dispatches on the first route of a request's composite metadata.
#[derive(Clone, Default)]
pub struct Router {
    routes: HashMap<String, Arc<dyn Responder>>,
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut routes: Vec<&str> = self.routes().collect();
        routes.sort_unstable();
        f.debug_struct("Router").field("routes", &routes).finish()
    }
}

impl Router {
    /// An empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `route` with `responder`, replacing any previous handler.
    #[must_use]
    pub fn route(mut self, route: impl Into<String>, responder: impl Responder) -> Self {
        self.routes.insert(route.into(), Arc::new(responder));
        self
    }

    /// Registered routes, in no particular order.
    pub fn routes(&self) -> impl Iterator<Item = &str> {
        self.routes.keys().map(String::as_str)
    }

    fn resolve(&self, payload: &Payload) -> Result<Arc<dyn Responder>> {
        let metadata = payload
            .metadata()
            .ok_or_else(|| Error::application("request carries no routing metadata"))?;

        let route = CompositeMetadata::decode(metadata.clone())?
            .route()?
            .ok_or_else(|| Error::application("request carries no route"))?;

        debug!("Routing to {route}");
        self.routes.get(&route).cloned().ok_or_else(|| {
            warn!("No handler for route {route}");
            Error::application(format!("no handler for route {route}"))
        })
    }
}

#[async_trait]
impl Responder for Router {
    async fn request_response(&self, payload: Payload) -> Result<Payload> {
        let responder = self.resolve(&payload)?;
        responder.request_response(payload).await
    }

    async fn request_channel(
        &self,
        payload: Payload,
        complete: bool,
        requester: ChannelRequester,
    ) -> Result<Box<dyn ChannelSubscriber>> {
        let responder = self.resolve(&payload)?;
        responder.request_channel(payload, complete, requester).await
    }
}
