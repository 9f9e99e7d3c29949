//! adaptor - Protocol adaptors
//!
//! Each backend wire format gets one adaptor that builds the opening config
//! message, marshals outgoing unified messages into wire envelopes and
//! unmarshals wire messages into an ordered list of unified messages. The
//! adaptor also owns the session identity and, for detect-intent sessions,
//! the client-side barge-in heuristic.

pub mod detect_intent;
pub mod http_session;
pub mod merge;
pub mod run_session;
pub mod templates;

use serde_json::{Value, json};
use std::time::Instant;

use crate::audio::PlaybackConfig;
use crate::codec;
use crate::config::{AgentConfig, InputMode};
use crate::error::ConstructionError;
use crate::message::{IncomingMessage, OutgoingMessage, ToolCall, ToolId, str_field, u64_field};
use crate::peer::{Namespace, PeerId};
use crate::session::{BargeInPolicy, Session};

pub use detect_intent::DetectIntentAdaptor;
pub use http_session::RunSessionAdaptor;
pub use run_session::BidiRunSessionAdaptor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdaptorKind {
    DetectIntent,
    BidiRunSession,
    RunSession,
    External,
}

impl AdaptorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdaptorKind::DetectIntent => "BIDI_SDI",
            AdaptorKind::BidiRunSession => "BIDI_RS",
            AdaptorKind::RunSession => "RS",
            AdaptorKind::External => "BIDI_EXTERNAL",
        }
    }
}

/// Pick the wire format for a peer and input modality.
pub fn select_kind(peer: &PeerId, input_mode: InputMode) -> AdaptorKind {
    match peer.namespace() {
        Some(Namespace::Agents) => AdaptorKind::DetectIntent,
        Some(Namespace::Apps) if input_mode == InputMode::None => AdaptorKind::RunSession,
        Some(Namespace::Apps) => AdaptorKind::BidiRunSession,
        None => AdaptorKind::External,
    }
}

#[derive(Debug, Clone)]
pub enum ProtocolAdaptor {
    DetectIntent(DetectIntentAdaptor),
    BidiRunSession(BidiRunSessionAdaptor),
    RunSession(RunSessionAdaptor),
    External(BidiRunSessionAdaptor),
}

impl ProtocolAdaptor {
    pub fn from_config(config: &AgentConfig) -> Result<Self, ConstructionError> {
        if config.peer_id.trim().is_empty() {
            return Err(ConstructionError::MissingPeerId("ProtocolAdaptor"));
        }
        let peer = PeerId::parse(&config.peer_id)?;
        let kind = select_kind(&peer, config.audio_input_mode);
        log::info!("Using {} adaptor for {}", kind.as_str(), peer);

        let adaptor = match (kind, peer) {
            (AdaptorKind::DetectIntent, PeerId::Agent(agent)) => ProtocolAdaptor::DetectIntent(
                DetectIntentAdaptor::new(agent, Session::new(config.barge_in_policy())),
            ),
            (AdaptorKind::BidiRunSession, PeerId::Agent(app)) => ProtocolAdaptor::BidiRunSession(
                BidiRunSessionAdaptor::new(&app, Session::default()),
            ),
            (AdaptorKind::RunSession, PeerId::Agent(app)) => {
                ProtocolAdaptor::RunSession(RunSessionAdaptor::new(
                    &app,
                    config.deployment_id.clone(),
                    Session::default(),
                ))
            }
            (_, peer) => {
                log::debug!("External runtime at {}", peer);
                ProtocolAdaptor::External(BidiRunSessionAdaptor::external(Session::default()))
            }
        };
        Ok(adaptor)
    }

    pub fn kind(&self) -> AdaptorKind {
        match self {
            ProtocolAdaptor::DetectIntent(_) => AdaptorKind::DetectIntent,
            ProtocolAdaptor::BidiRunSession(_) => AdaptorKind::BidiRunSession,
            ProtocolAdaptor::RunSession(_) => AdaptorKind::RunSession,
            ProtocolAdaptor::External(_) => AdaptorKind::External,
        }
    }

    fn session(&self) -> &Session {
        match self {
            ProtocolAdaptor::DetectIntent(a) => &a.session,
            ProtocolAdaptor::BidiRunSession(a) | ProtocolAdaptor::External(a) => &a.session,
            ProtocolAdaptor::RunSession(a) => &a.session,
        }
    }

    fn session_mut(&mut self) -> &mut Session {
        match self {
            ProtocolAdaptor::DetectIntent(a) => &mut a.session,
            ProtocolAdaptor::BidiRunSession(a) | ProtocolAdaptor::External(a) => &mut a.session,
            ProtocolAdaptor::RunSession(a) => &mut a.session,
        }
    }

    pub fn session_id(&self) -> &str {
        self.session().id()
    }

    /// Fully qualified session resource name used on the wire.
    pub fn session_path(&self) -> String {
        match self {
            ProtocolAdaptor::DetectIntent(a) => a.session_path(),
            ProtocolAdaptor::BidiRunSession(a) | ProtocolAdaptor::External(a) => a.session_path(),
            ProtocolAdaptor::RunSession(a) => a.session_path(),
        }
    }

    pub fn new_session(&mut self) {
        self.session_mut().regenerate();
        log::info!("New session {}", self.session_id());
    }

    /// Rotate the session id and return the closing message for the wire
    /// format, if it has one. None of the current formats define one.
    pub fn end_session(&mut self) -> Option<Value> {
        self.session_mut().regenerate();
        None
    }

    pub fn set_barge_in_policy(&mut self, policy: BargeInPolicy) {
        if let ProtocolAdaptor::DetectIntent(a) = self {
            a.session.barge_in = crate::session::BargeInDetector::new(policy);
        }
    }

    pub fn barge_in_policy(&self) -> BargeInPolicy {
        self.session().barge_in.policy()
    }

    pub fn config_message(&self, config: &AgentConfig, access_token: Option<&str>) -> Value {
        match self {
            ProtocolAdaptor::DetectIntent(a) => a.config_message(config, access_token),
            ProtocolAdaptor::BidiRunSession(a) | ProtocolAdaptor::External(a) => {
                a.config_message(config, access_token)
            }
            ProtocolAdaptor::RunSession(a) => a.config_message(),
        }
    }

    /// Zero or more wire envelopes, in send order.
    pub fn marshal(&self, message: &OutgoingMessage) -> Vec<Value> {
        match self {
            ProtocolAdaptor::DetectIntent(a) => a.marshal(message),
            ProtocolAdaptor::BidiRunSession(a) | ProtocolAdaptor::External(a) => a.marshal(message),
            ProtocolAdaptor::RunSession(a) => a.marshal(message),
        }
    }

    pub fn unmarshal(&mut self, wire: &Value) -> Vec<IncomingMessage> {
        self.unmarshal_at(wire, Instant::now())
    }

    /// Same as [`unmarshal`](Self::unmarshal) with an explicit arrival time
    /// for the barge-in heuristic.
    pub fn unmarshal_at(&mut self, wire: &Value, now: Instant) -> Vec<IncomingMessage> {
        match self {
            ProtocolAdaptor::DetectIntent(a) => a.unmarshal_at(wire, now),
            ProtocolAdaptor::BidiRunSession(a) | ProtocolAdaptor::External(a) => a.unmarshal(wire),
            ProtocolAdaptor::RunSession(a) => a.unmarshal(wire),
        }
    }

    pub fn playback_config(&self, config: &AgentConfig) -> PlaybackConfig {
        let sample_rate = match self {
            ProtocolAdaptor::External(_) => templates::EXTERNAL_SAMPLE_RATE,
            _ => templates::output_sample_rate(&self.config_message(config, None))
                .unwrap_or(templates::DEFAULT_SAMPLE_RATE),
        };
        PlaybackConfig {
            sample_rate,
            fade_in: matches!(self, ProtocolAdaptor::DetectIntent(_)),
            ..PlaybackConfig::default()
        }
    }
}

/// `{data, mime_type}` for a `data:image/...` URL, empty otherwise.
pub(crate) fn image_input(url: &str) -> Value {
    match codec::split_data_url(url).filter(|(mime, _)| mime.starts_with("image/")) {
        Some((mime, data)) => json!({ "data": data, "mime_type": mime }),
        None => {
            log::warn!("Dropping image that is not a data:image URL");
            json!({})
        }
    }
}

/// Run-session tool call `{id, tool, displayName, args}`.
pub(crate) fn tool_call_from_wire(call: &Value, turn_index: Option<u64>) -> ToolCall {
    ToolCall {
        id: str_field(call, "id"),
        tool_id: ToolId::new(
            str_field(call, "tool").unwrap_or_default(),
            str_field(call, "displayName"),
        ),
        input: call.get("args").cloned().unwrap_or_else(|| json!({})),
        turn_index: turn_index.or_else(|| u64_field(call, "turnIndex")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BargeInSensitivity;
    use std::time::Duration;

    fn config(peer: &str, mode: InputMode) -> AgentConfig {
        AgentConfig {
            peer_id: peer.into(),
            audio_input_mode: mode,
            ..Default::default()
        }
    }

    #[test]
    fn selection_is_pure() {
        let agents = PeerId::parse("projects/p/locations/l/agents/a").unwrap();
        let apps = PeerId::parse("projects/p/locations/l/apps/a").unwrap();
        let external = PeerId::parse("ws://localhost:8080/run").unwrap();
        for _ in 0..3 {
            assert_eq!(select_kind(&agents, InputMode::None), AdaptorKind::DetectIntent);
            assert_eq!(select_kind(&agents, InputMode::DefaultOn), AdaptorKind::DetectIntent);
            assert_eq!(select_kind(&apps, InputMode::None), AdaptorKind::RunSession);
            assert_eq!(select_kind(&apps, InputMode::DefaultOff), AdaptorKind::BidiRunSession);
            assert_eq!(
                select_kind(&apps, InputMode::SpaceBarToTalk),
                AdaptorKind::BidiRunSession
            );
            assert_eq!(select_kind(&external, InputMode::None), AdaptorKind::External);
        }
    }

    #[test]
    fn from_config_rejects_bad_peers() {
        assert!(matches!(
            ProtocolAdaptor::from_config(&config("  ", InputMode::DefaultOff)),
            Err(ConstructionError::MissingPeerId(_))
        ));
        assert!(matches!(
            ProtocolAdaptor::from_config(&config("agents/a", InputMode::DefaultOff)),
            Err(ConstructionError::InvalidPeerId(_))
        ));
    }

    #[test]
    fn session_rotation() {
        let mut a =
            ProtocolAdaptor::from_config(&config("projects/p/locations/l/apps/a", InputMode::None))
                .unwrap();
        assert_eq!(a.kind(), AdaptorKind::RunSession);
        let first = a.session_id().to_string();
        assert!(!first.is_empty());
        a.new_session();
        let second = a.session_id().to_string();
        assert_ne!(first, second);
        assert!(a.end_session().is_none());
        assert_ne!(a.session_id(), second);
        assert!(a.session_path().ends_with(a.session_id()));
    }

    #[test]
    fn barge_in_preset_only_for_detect_intent() {
        let mut cfg = config("projects/p/locations/l/agents/a", InputMode::DefaultOn);
        cfg.barge_in_sensitivity = Some(BargeInSensitivity::High);
        let a = ProtocolAdaptor::from_config(&cfg).unwrap();
        assert_eq!(
            a.barge_in_policy(),
            BargeInPolicy::After {
                transcripts: 1,
                max_gap: Duration::from_millis(1000)
            }
        );

        let mut cfg = config("projects/p/locations/l/apps/a", InputMode::DefaultOn);
        cfg.barge_in_sensitivity = Some(BargeInSensitivity::High);
        let mut b = ProtocolAdaptor::from_config(&cfg).unwrap();
        assert_eq!(b.barge_in_policy(), BargeInPolicy::default());
        b.set_barge_in_policy(BargeInPolicy::Disabled);
        assert_eq!(b.barge_in_policy(), BargeInPolicy::default());
    }

    #[test]
    fn playback_config_per_variant() {
        let di = ProtocolAdaptor::from_config(&config(
            "projects/p/locations/l/agents/a",
            InputMode::DefaultOn,
        ))
        .unwrap();
        let cfg = di.playback_config(&AgentConfig::default());
        assert_eq!(cfg.sample_rate, 16000);
        assert!(cfg.fade_in);

        let ext =
            ProtocolAdaptor::from_config(&config("wss://runtime.local/ws", InputMode::DefaultOn))
                .unwrap();
        let cfg = ext.playback_config(&AgentConfig::default());
        assert_eq!(cfg.sample_rate, 24000);
        assert!(!cfg.fade_in);

        let mut custom = config("projects/p/locations/l/apps/a", InputMode::DefaultOn);
        custom.custom_config_json =
            Some(r#"{"config": {"outputAudioConfig": {"sampleRateHertz": 22050}}}"#.into());
        let bidi = ProtocolAdaptor::from_config(&custom).unwrap();
        assert_eq!(bidi.playback_config(&custom).sample_rate, 22050);

        let rs = ProtocolAdaptor::from_config(&config(
            "projects/p/locations/l/apps/a",
            InputMode::None,
        ))
        .unwrap();
        assert_eq!(rs.playback_config(&AgentConfig::default()).sample_rate, 16000);
    }

    #[test]
    fn image_inputs() {
        assert_eq!(
            image_input("data:image/webp;base64,Zm9v"),
            json!({"data": "Zm9v", "mime_type": "image/webp"})
        );
        assert_eq!(image_input("data:text/plain;base64,Zm9v"), json!({}));
    }
}
