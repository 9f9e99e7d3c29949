//! transport - Message delivery to the agent backend
//!
//! Three mechanisms share one lifecycle contract: an authenticated persistent
//! stream, a raw socket for proxies and external runtimes, and a
//! connectionless HTTP request/response stream. Every outcome is reported
//! through [`TransportListeners`]; nothing here reconnects on its own.

pub mod duplex;
pub mod http;
pub mod listeners;
pub mod webchannel;
pub mod websocket;

use serde_json::Value;

use crate::adaptor::{AdaptorKind, ProtocolAdaptor};
use crate::config::AgentConfig;
use crate::error::ConstructionError;

pub use duplex::ConnectionState;
pub use http::HttpSessionStream;
pub use listeners::{ListenerProvider, TransportEvent, TransportListeners};
pub use webchannel::WebChannelStream;
pub use websocket::WebSocketStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    WebChannel,
    WebSocket,
    Http,
}

/// Text-only sessions go over HTTP; a proxy address or an external runtime
/// needs the raw socket; everything else uses the managed stream.
pub fn select_transport(adaptor: AdaptorKind, config: &AgentConfig) -> TransportKind {
    match adaptor {
        AdaptorKind::RunSession => TransportKind::Http,
        AdaptorKind::External => TransportKind::WebSocket,
        _ if config.websocket_uri().is_some() => TransportKind::WebSocket,
        _ => TransportKind::WebChannel,
    }
}

pub enum Transport {
    WebChannel(WebChannelStream),
    WebSocket(WebSocketStream),
    Http(HttpSessionStream),
}

impl Transport {
    pub fn for_session(
        config: &AgentConfig,
        adaptor: &ProtocolAdaptor,
        provider: Option<ListenerProvider>,
    ) -> Result<Self, ConstructionError> {
        let kind = select_transport(adaptor.kind(), config);
        log::info!("Using {:?} transport", kind);
        let transport = match kind {
            TransportKind::Http => Transport::Http(HttpSessionStream::new(
                config.api_uri.as_deref(),
                config.http_host(),
                &config.peer_id,
                adaptor.session_id(),
                provider,
            )?),
            TransportKind::WebSocket => Transport::WebSocket(WebSocketStream::new(
                config.websocket_uri(),
                &config.peer_id,
                provider,
            )?),
            TransportKind::WebChannel => Transport::WebChannel(WebChannelStream::new(
                config.webchannel_host(),
                &config.peer_id,
                provider,
            )?),
        };
        Ok(transport)
    }

    pub fn kind(&self) -> TransportKind {
        match self {
            Transport::WebChannel(_) => TransportKind::WebChannel,
            Transport::WebSocket(_) => TransportKind::WebSocket,
            Transport::Http(_) => TransportKind::Http,
        }
    }

    pub async fn connect(&mut self, credential: Option<&str>) {
        match self {
            Transport::WebChannel(t) => t.connect(credential).await,
            Transport::WebSocket(t) => t.connect().await,
            Transport::Http(t) => t.connect(credential),
        }
    }

    pub fn disconnect(&mut self) {
        match self {
            Transport::WebChannel(t) => t.disconnect(),
            Transport::WebSocket(t) => t.disconnect(),
            Transport::Http(t) => t.disconnect(),
        }
    }

    pub fn send(&self, payload: Value) {
        match self {
            Transport::WebChannel(t) => t.send(payload),
            Transport::WebSocket(t) => t.send(payload),
            Transport::Http(t) => t.send(payload),
        }
    }

    pub fn is_connected(&self) -> bool {
        match self {
            Transport::WebChannel(t) => t.is_connected(),
            Transport::WebSocket(t) => t.is_connected(),
            Transport::Http(t) => t.is_connected(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        match self {
            Transport::WebChannel(t) => t.state(),
            Transport::WebSocket(t) => t.state(),
            Transport::Http(t) => t.state(),
        }
    }

    /// Connectionless transports need every request to carry its config.
    pub fn is_connectionless(&self) -> bool {
        matches!(self, Transport::Http(_))
    }

    pub fn set_session_id(&mut self, session_id: &str) {
        if let Transport::Http(t) = self {
            t.set_session_id(session_id);
        }
    }
}
