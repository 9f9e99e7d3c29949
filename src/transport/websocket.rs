//! Raw duplex socket to a proxy or an externally hosted runtime.

use serde_json::Value;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use super::duplex::{ConnectionState, DuplexSocket};
use super::listeners::ListenerProvider;
use crate::error::{ConstructionError, TransportError, TransportStatus};
use crate::peer::{self, PeerId};

const NAME: &str = "WebSocketStream";

pub struct WebSocketStream {
    peer: PeerId,
    uri: String,
    socket: DuplexSocket,
}

fn decode_frame(text: &str) -> Result<Option<Value>, String> {
    let message: Value =
        serde_json::from_str(text).map_err(|e| format!("Undecodable frame: {}", e))?;
    if message.get("connection_closed").is_some() {
        log::info!("{}: received connection_closed message: {}", NAME, message);
    }
    Ok(Some(message))
}

impl WebSocketStream {
    /// `socket_uri` is the proxy address; an external runtime identifier is
    /// its own address.
    pub fn new(
        socket_uri: Option<&str>,
        peer_id: &str,
        provider: Option<ListenerProvider>,
    ) -> Result<Self, ConstructionError> {
        if peer_id.trim().is_empty() {
            return Err(ConstructionError::MissingPeerId(NAME));
        }
        let provider = provider.ok_or(ConstructionError::MissingListenerProvider(NAME))?;
        let peer = PeerId::parse(peer_id)?;
        let uri = match (socket_uri.filter(|u| peer::is_socket_uri(u)), &peer) {
            (Some(uri), _) => uri.to_string(),
            (None, PeerId::External(uri)) => uri.clone(),
            (None, PeerId::Agent(_)) => return Err(ConstructionError::MissingSocketUri),
        };
        Ok(Self {
            peer,
            uri,
            socket: DuplexSocket::new(NAME, provider, decode_frame),
        })
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    pub fn peer(&self) -> &PeerId {
        &self.peer
    }

    /// The socket carries no credential; the config message does.
    pub async fn connect(&mut self) {
        match self.uri.as_str().into_client_request() {
            Ok(request) => self.socket.connect(request).await,
            Err(e) => self.socket.listeners().error(TransportError::new(
                TransportStatus::CreateError,
                format!("Failed to create or open websocket: {}", e),
            )),
        }
    }

    pub fn disconnect(&mut self) {
        self.socket.disconnect();
    }

    pub fn send(&self, payload: Value) {
        self.socket.send(payload);
    }

    pub fn is_connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn state(&self) -> ConnectionState {
        self.socket.state()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::listeners::TransportListeners;
    use serde_json::json;

    fn provider() -> Option<ListenerProvider> {
        Some(Box::new(TransportListeners::default))
    }

    #[test]
    fn external_peer_is_its_own_uri() {
        let s = WebSocketStream::new(None, "ws://localhost:9000/run", provider()).unwrap();
        assert_eq!(s.uri(), "ws://localhost:9000/run");
        let s = WebSocketStream::new(
            Some("wss://proxy.example.com/ws"),
            "projects/p/locations/l/agents/a",
            provider(),
        )
        .unwrap();
        assert_eq!(s.uri(), "wss://proxy.example.com/ws");
    }

    #[test]
    fn agent_without_proxy_is_rejected() {
        assert!(matches!(
            WebSocketStream::new(None, "projects/p/locations/l/agents/a", provider()),
            Err(ConstructionError::MissingSocketUri)
        ));
        assert!(matches!(
            WebSocketStream::new(None, "ws://x", None),
            Err(ConstructionError::MissingListenerProvider(_))
        ));
    }

    #[test]
    fn frames_are_json() {
        assert_eq!(
            decode_frame(r#"{"connection_closed": true}"#),
            Ok(Some(json!({"connection_closed": true})))
        );
        assert!(decode_frame("{").is_err());
    }
}
