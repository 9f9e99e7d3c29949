//! Authenticated, persistent multiplexed stream to the managed backend.

use serde_json::Value;
use tokio_tungstenite::tungstenite::handshake::client::generate_key;
use tokio_tungstenite::tungstenite::http::Request;
use url::Url;

use super::duplex::{ConnectionState, DuplexSocket};
use super::listeners::ListenerProvider;
use crate::error::{ConstructionError, TransportError, TransportStatus};
use crate::peer::{AgentPath, Namespace, PeerId};

const NAME: &str = "WebChannelStream";

pub struct WebChannelStream {
    peer: AgentPath,
    endpoint: String,
    access_token: Option<String>,
    socket: DuplexSocket,
}

/// Stream endpoint for a peer. Agents go to the regional detect-intent
/// service, apps to `stream_host`.
pub fn endpoint_for(peer: &AgentPath, stream_host: &str) -> String {
    match peer.namespace {
        Namespace::Agents => format!(
            "wss://{}-dialogflow.googleapis.com/ws/google.cloud.dialogflow.v3alpha1.Sessions/BidiStreamingDetectIntent",
            peer.location
        ),
        Namespace::Apps => format!(
            "wss://{}/ws/google.cloud.ces.v1.SessionService/BidiRunSession/locations/{}",
            stream_host, peer.location
        ),
    }
}

/// Frames hold one JSON message or an array whose first element is the message.
fn decode_frame(text: &str) -> Result<Option<Value>, String> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| format!("Undecodable frame: {}", e))?;
    match value {
        Value::Array(mut items) if !items.is_empty() => Ok(Some(items.swap_remove(0))),
        Value::Array(_) => Ok(None),
        other => Ok(Some(other)),
    }
}

impl WebChannelStream {
    pub fn new(
        stream_host: &str,
        peer_id: &str,
        provider: Option<ListenerProvider>,
    ) -> Result<Self, ConstructionError> {
        if peer_id.trim().is_empty() {
            return Err(ConstructionError::MissingPeerId(NAME));
        }
        let provider = provider.ok_or(ConstructionError::MissingListenerProvider(NAME))?;
        let peer = PeerId::parse_agent(peer_id)?;
        Ok(Self {
            endpoint: endpoint_for(&peer, stream_host),
            peer,
            access_token: None,
            socket: DuplexSocket::new(NAME, provider, decode_frame),
        })
    }

    /// Point the stream at a different endpoint, e.g. a local test server.
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub async fn connect(&mut self, access_token: Option<&str>) {
        let Some(token) = access_token.filter(|t| !t.is_empty()) else {
            log::error!("{}: access token is required to connect", NAME);
            self.socket.listeners().error(TransportError::new(
                TransportStatus::AuthError,
                "Access Token is required.",
            ));
            return;
        };
        self.access_token = Some(token.to_string());

        match self.request(token) {
            Ok(request) => self.socket.connect(request).await,
            Err(e) => self.socket.listeners().error(TransportError::new(
                TransportStatus::CreateError,
                format!("Failed to create {}: {}", NAME, e),
            )),
        }
    }

    fn request(&self, token: &str) -> anyhow::Result<Request<()>> {
        let url = Url::parse(&self.endpoint)?;
        let host = match (url.host_str(), url.port()) {
            (Some(host), Some(port)) => format!("{}:{}", host, port),
            (Some(host), None) => host.to_string(),
            (None, _) => anyhow::bail!("endpoint {} has no host", self.endpoint),
        };
        let request = Request::builder()
            .method("GET")
            .uri(url.as_str())
            .header("Host", host)
            .header("Connection", "Upgrade")
            .header("Upgrade", "websocket")
            .header("Sec-WebSocket-Version", "13")
            .header("Sec-WebSocket-Key", generate_key())
            .header("Authorization", format!("Bearer {}", token))
            .header("X-Goog-User-Project", &self.peer.project)
            .header("Content-Type", "application/json")
            .body(())?;
        Ok(request)
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
