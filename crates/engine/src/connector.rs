//! Client-side connection setup.

use std::sync::Arc;
use std::time::Duration;

use reflux_metadata::WellKnownMimeType;
use reflux_transport::{Connection, Transport};
use tracing::{info, instrument};
use url::Url;

use crate::connection::{self, KeepAlive, RSocket, Side};
use crate::error::Result;
use crate::frame::{Body, Frame, MAJOR_VERSION, MAX_REQUEST_N, MINOR_VERSION, Setup};
use crate::payload::Payload;
use crate::responder::Responder;

/// Parameters negotiated by the SETUP frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SetupConfig {
    /// Mime type of payload data.
    pub data_mime_type: String,
    /// Mime type of payload metadata.
    pub metadata_mime_type: String,
    /// Interval between client KEEPALIVE frames.
    pub keep_alive: Duration,
    /// Time without any frame after which the connection is dead.
    pub lifetime: Duration,
    /// Setup payload.
    pub payload: Payload,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            data_mime_type: WellKnownMimeType::ApplicationJson.as_str().to_string(),
            metadata_mime_type: WellKnownMimeType::MessageRSocketCompositeMetadata
                .as_str()
                .to_string(),
            keep_alive: Duration::from_secs(20),
            lifetime: Duration::from_secs(90),
            payload: Payload::default(),
        }
    }
}

impl SetupConfig {
    pub(crate) fn to_frame(&self) -> Setup {
        Setup {
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            keep_alive: millis(self.keep_alive),
            lifetime: millis(self.lifetime),
            resume_token: None,
            lease: false,
            metadata_mime_type: self.metadata_mime_type.clone(),
            data_mime_type: self.data_mime_type.clone(),
            payload: self.payload.clone(),
        }
    }
}

impl From<Setup> for SetupConfig {
    fn from(setup: Setup) -> Self {
        Self {
            data_mime_type: setup.data_mime_type,
            metadata_mime_type: setup.metadata_mime_type,
            keep_alive: Duration::from_millis(u64::from(setup.keep_alive)),
            lifetime: Duration::from_millis(u64::from(setup.lifetime)),
            payload: setup.payload,
        }
    }
}

/// Durations travel as positive 31-bit millisecond counts.
fn millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis()).map_or(MAX_REQUEST_N, |ms| ms.clamp(1, MAX_REQUEST_N))
}

/// Builds client connections.
#[derive(Clone, Default)]
pub struct Connector {
    setup: SetupConfig,
    responder: Option<Arc<dyn Responder>>,
}

impl std::fmt::Debug for Connector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connector")
            .field("setup", &self.setup)
            .field("responder", &self.responder.is_some())
            .finish()
    }
}

impl Connector {
    /// A connector with the default setup and no responder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `setup` for the SETUP frame.
    #[must_use]
    pub fn setup(mut self, setup: SetupConfig) -> Self {
        self.setup = setup;
        self
    }

    /// Answer requests the server initiates with `responder`.
    #[must_use]
    pub fn responder(mut self, responder: impl Responder) -> Self {
        self.responder = Some(Arc::new(responder));
        self
    }

    /// Connect to `url` over `transport`.
    ///
    /// # Errors
    ///
    /// Fails if the transport cannot connect or the SETUP frame cannot be
    /// sent.
    #[instrument(skip_all, fields(url = %url))]
    pub async fn connect(&self, transport: &dyn Transport, url: &Url) -> Result<RSocket> {
        info!("Connecting");
        let connection = transport.connect(url).await?;
        self.start(connection).await
    }

    /// Run the protocol over an already established connection.
    ///
    /// # Errors
    ///
    /// Fails if the SETUP frame cannot be sent.
    pub async fn start(&self, connection: Box<dyn Connection>) -> Result<RSocket> {
        let setup = Frame::new(0, Body::Setup(self.setup.to_frame()));
        connection.send(setup.encode()?).await?;

        Ok(connection::start(
            connection,
            Side::Client,
            self.responder.clone(),
            Some(KeepAlive::sending(
                self.setup.keep_alive,
                self.setup.lifetime,
            )),
        ))
    }
}
