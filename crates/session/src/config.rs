//! Session and channel configuration.

use std::time::Duration;

use reflux_engine::{CompositeMessageBuilder, SetupConfig};
use reflux_metadata::{CompositeMetadata, MimeType, WellKnownMimeType};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, SessionError};

/// Mime type of the application metadata entry sent with SETUP.
pub const APPLICATION_METADATA_MIME_TYPE: &str = "message/x.rsocket.application+json";

/// Address the demo client connects to by default.
pub const DEFAULT_URL: &str = "ws://localhost:19999";

/// Route answering a single user lookup.
pub const FIND_BY_ID_ROUTE: &str = "com.alibaba.user.UserService.findById";

/// Route streaming recent users over a channel.
pub const RECENT_ROUTE: &str = "com.alibaba.user.UserService.recent";

/// How a session connects.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Server address; the scheme picks the transport.
    pub url: Url,
    /// Name announced in the setup metadata.
    pub app_name: String,
    /// Mime type of payload data.
    pub data_mime_type: String,
    /// Mime type of payload metadata.
    pub metadata_mime_type: String,
    /// Interval between keep-alive frames.
    pub keep_alive: Duration,
    /// Time without traffic after which the connection is dead.
    pub lifetime: Duration,
}

impl SessionConfig {
    /// A config for `url` with every other field defaulted.
    #[must_use]
    pub fn new(url: Url) -> Self {
        Self {
            url,
            app_name: "demo-app".to_string(),
            data_mime_type: WellKnownMimeType::ApplicationJson.as_str().to_string(),
            metadata_mime_type: WellKnownMimeType::MessageRSocketCompositeMetadata
                .as_str()
                .to_string(),
            keep_alive: Duration::from_secs(1000),
            lifetime: Duration::from_secs(100),
        }
    }

    /// Parameters of the SETUP frame, including the application metadata.
    ///
    /// # Errors
    ///
    /// Fails if the application metadata cannot be encoded.
    pub fn setup(&self) -> Result<SetupConfig> {
        let metadata = AppMetadata {
            name: self.app_name.clone(),
        };
        let json = serde_json::to_vec(&metadata)
            .map_err(|e| SessionError::Config(format!("application metadata: {e}")))?;

        let payload = CompositeMessageBuilder::new()
            .custom_entry(APPLICATION_METADATA_MIME_TYPE, json)
            .build()
            .map_err(SessionError::Build)?;

        Ok(SetupConfig {
            data_mime_type: self.data_mime_type.clone(),
            metadata_mime_type: self.metadata_mime_type.clone(),
            keep_alive: self.keep_alive,
            lifetime: self.lifetime,
            payload,
        })
    }
}

/// Application metadata announced in SETUP.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppMetadata {
    /// Application name.
    pub name: String,
}

impl AppMetadata {
    /// Extract the application metadata from a SETUP payload, if present.
    #[must_use]
    pub fn from_setup(setup: &SetupConfig) -> Option<Self> {
        let metadata = CompositeMetadata::decode(setup.payload.metadata()?.clone()).ok()?;
        let expected = MimeType::Custom(APPLICATION_METADATA_MIME_TYPE.to_string());

        metadata
            .entries()
            .iter()
            .find(|entry| entry.mime_type == expected)
            .and_then(|entry| serde_json::from_slice(&entry.content).ok())
    }
}

/// How a request-channel is driven.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelPlan {
    /// Messages to send, numbered `0..total`; the last one completes the
    /// outbound direction.
    pub total: u32,
    /// Delay before each produced message.
    pub delay: Duration,
    /// Credit granted to the responder when opening.
    pub initial_request_n: u32,
    /// Cancel the channel once this many messages were sent.
    pub cancel_after: Option<u32>,
}

impl Default for ChannelPlan {
    fn default() -> Self {
        Self {
            total: 10,
            delay: Duration::from_secs(1),
            initial_request_n: 1,
            cancel_after: None,
        }
    }
}

impl ChannelPlan {
    /// Check the plan can be executed.
    ///
    /// # Errors
    ///
    /// Fails when nothing would be sent, no credit would be granted, or the
    /// cancellation point is zero.
    pub fn validate(&self) -> Result<()> {
        if self.total == 0 {
            return Err(SessionError::Config("total must be at least 1".to_string()));
        }
        if self.initial_request_n == 0 {
            return Err(SessionError::Config(
                "initial request n must be at least 1".to_string(),
            ));
        }
        if self.cancel_after == Some(0) {
            return Err(SessionError::Config(
                "cancel-after must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
