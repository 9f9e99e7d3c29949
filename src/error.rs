//! Error types shared across the crate.
//!
//! Two classes exist: [`ConstructionError`] is returned synchronously when a
//! component is wired up incorrectly, and [`TransportError`] is only ever
//! delivered through the transport `on_error` notification.

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Fatal, caller-side wiring errors raised while building components.
#[derive(Debug, Error)]
pub enum ConstructionError {
    #[error("Peer identifier is required for {0}")]
    MissingPeerId(&'static str),

    #[error("Listener provider function is required for {0}")]
    MissingListenerProvider(&'static str),

    #[error(
        "Invalid peer identifier format: {0}. Expected: projects/<PROJECT_ID>/locations/<REGION_ID>/(agents|apps)/<AGENT_ID>"
    )]
    InvalidPeerId(String),

    #[error("Unsupported peer identifier {peer} for {transport}: {reason}")]
    UnsupportedNamespace {
        peer: String,
        transport: &'static str,
        reason: &'static str,
    },

    #[error(
        "Invalid deployment ID: {0}. Expected format: projects/<PROJECT_ID>/locations/<REGION_ID>/apps/<AGENT_ID>/deployments/<DEPLOYMENT_ID>"
    )]
    InvalidDeploymentId(String),

    #[error("Raw socket transport requires a ws:// or wss:// URI")]
    MissingSocketUri,

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

/// Status tag attached to every runtime transport failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportStatus {
    AuthError,
    SendError,
    CreateError,
    NotConnected,
    /// An already open channel failed or delivered an undecodable frame.
    StreamError,
}

impl TransportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransportStatus::AuthError => "AUTH_ERROR",
            TransportStatus::SendError => "SEND_ERROR",
            TransportStatus::CreateError => "CREATE_ERROR",
            TransportStatus::NotConnected => "NOT_CONNECTED",
            TransportStatus::StreamError => "STREAM_ERROR",
        }
    }
}

impl fmt::Display for TransportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recoverable transport failure, surfaced through `on_error`.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{status}: {message}")]
pub struct TransportError {
    pub status: TransportStatus,
    pub message: String,
}

impl TransportError {
    pub fn new(status: TransportStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn not_connected() -> Self {
        Self::new(TransportStatus::NotConnected, "Cannot send: Not connected")
    }
}
