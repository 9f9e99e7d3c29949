//! Connectionless transport: one HTTP POST per message.

use serde_json::Value;
use std::sync::Arc;

use super::duplex::ConnectionState;
use super::listeners::{LazyListeners, ListenerProvider};
use crate::error::{ConstructionError, TransportError, TransportStatus};
use crate::peer::{Namespace, PeerId};

const NAME: &str = "HttpSessionStream";

pub struct HttpSessionStream {
    base_url: String,
    peer: String,
    session_id: String,
    access_token: Option<String>,
    client: reqwest::Client,
    listeners: Arc<LazyListeners>,
}

impl HttpSessionStream {
    pub fn new(
        api_uri: Option<&str>,
        http_host: &str,
        peer_id: &str,
        session_id: &str,
        provider: Option<ListenerProvider>,
    ) -> Result<Self, ConstructionError> {
        if peer_id.trim().is_empty() {
            return Err(ConstructionError::MissingPeerId(NAME));
        }
        let provider = provider.ok_or(ConstructionError::MissingListenerProvider(NAME))?;
        let peer = PeerId::parse_agent(peer_id)?;
        if peer.namespace == Namespace::Agents {
            return Err(ConstructionError::UnsupportedNamespace {
                peer: peer.raw,
                transport: NAME,
                reason: "text-only sessions are not supported for agents",
            });
        }
        let base_url = match api_uri
            .filter(|u| u.starts_with("https://") || u.starts_with("http://"))
        {
            Some(uri) => uri.trim_end_matches('/').to_string(),
            None => format!("https://{}/v1beta", http_host),
        };
        Ok(Self {
            base_url,
            peer: peer.raw,
            session_id: session_id.to_string(),
            access_token: None,
            client: reqwest::Client::new(),
            listeners: Arc::new(LazyListeners::new(provider)),
        })
    }

    pub fn session_url(&self) -> String {
        format!(
            "{}/{}/sessions/{}:runSession",
            self.base_url, self.peer, self.session_id
        )
    }

    pub fn set_session_id(&mut self, session_id: &str) {
        self.session_id = session_id.to_string();
    }

    /// Stores the credential; the stream counts as connected while one is held.
    pub fn connect(&mut self, access_token: Option<&str>) {
        let listeners = self.listeners.get();
        match access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                self.access_token = Some(token.to_string());
                listeners.open();
            }
            None => {
                self.access_token = None;
                listeners.error(TransportError::new(
                    TransportStatus::AuthError,
                    "Access Token is required.",
                ));
            }
        }
    }

    pub fn disconnect(&mut self) {
        self.access_token = None;
    }

    pub fn is_connected(&self) -> bool {
        self.access_token.is_some()
    }

    pub fn state(&self) -> ConnectionState {
        if self.is_connected() {
            ConnectionState::Connected
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Fire the request in the background; the reply arrives on `on_message`.
    pub fn send(&self, payload: Value) {
        let Some(token) = self.access_token.clone() else {
            log::warn!("{}: cannot send, access token is required", NAME);
            self.listeners.get().error(TransportError::not_connected());
            return;
        };
        let request = self
            .client
            .post(self.session_url())
            .bearer_auth(token)
            .json(&payload);
        let listeners = self.listeners.clone();
        tokio::spawn(async move {
            let listeners = listeners.get();
            match post(request).await {
                Ok(reply) => {
                    listeners.message(reply);
                    listeners.message_sent(&payload);
                }
                Err(e) => listeners.error(e),
            }
        });
    }
}

async fn post(request: reqwest::RequestBuilder) -> Result<Value, TransportError> {
    let response = request.send().await.map_err(|e| {
        TransportError::new(TransportStatus::SendError, format!("Failed to send message: {}", e))
    })?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        let message = format!("HTTP error! status: {}, message: {}", status.as_u16(), body);
        let tag = match status.as_u16() {
            401 | 403 => TransportStatus::AuthError,
            _ => TransportStatus::SendError,
        };
        return Err(TransportError::new(tag, message));
    }
    response.json::<Value>().await.map_err(|e| {
        TransportError::new(TransportStatus::SendError, format!("Invalid reply: {}", e))
    })
}
