//! Error types for sessions.

use reflux_engine::Error as EngineError;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, SessionError>;

/// Everything that can make a session operation fail.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// The connection could not be established.
    #[error("Connect failed: {0}")]
    Connect(EngineError),

    /// The interaction failed or could not be started.
    #[error("Interaction failed: {0}")]
    Interaction(EngineError),

    /// The request message could not be built.
    #[error("Message build failed: {0}")]
    Build(EngineError),

    /// Invalid session or plan configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),
}
