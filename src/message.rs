//! Unified message model exchanged between the protocol layer and the rest of
//! the client, independent of the backend wire format.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::codec;

/// Audio carried either as raw bytes or as the base64 text received on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum AudioPayload {
    Bytes(Vec<u8>),
    Base64(String),
}

impl AudioPayload {
    /// Base64 form, encoding raw bytes if necessary.
    pub fn to_base64(&self) -> String {
        match self {
            AudioPayload::Bytes(bytes) => codec::encode_base64(bytes),
            AudioPayload::Base64(text) => text.clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            AudioPayload::Bytes(bytes) => bytes.is_empty(),
            AudioPayload::Base64(text) => text.trim().is_empty(),
        }
    }
}

/// Text, structured variables and images submitted in one user turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInput {
    pub text: Option<String>,
    pub vars: Option<Map<String, Value>>,
    /// `data:image/...;base64,...` URLs.
    pub images: Vec<String>,
}

impl SessionInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub(crate) fn non_empty_text(&self) -> Option<&str> {
        self.text.as_deref().filter(|t| !t.is_empty())
    }

    pub(crate) fn non_empty_vars(&self) -> Option<&Map<String, Value>> {
        self.vars.as_ref().filter(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutgoingMessage {
    SessionInput(SessionInput),
    Audio(AudioPayload),
    Vars(Map<String, Value>),
    ToolResponse(Value),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DisconnectReason {
    AgentRequested,
    HardHandover,
}

/// Identifies a client-side tool by its name and optional display name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolId {
    pub tool_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_display_name: Option<String>,
}

impl ToolId {
    pub fn new(tool_name: impl Into<String>, display_name: Option<String>) -> Self {
        Self {
            tool_name: tool_name.into(),
            tool_display_name: display_name,
        }
    }

    /// Name shown in logs and error messages.
    pub fn label(&self) -> &str {
        self.tool_display_name.as_deref().unwrap_or(&self.tool_name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TextOutput {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioOutput {
    #[serde(skip)]
    pub audio: AudioPayload,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample_rate_hz: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_completed: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
}

impl AudioOutput {
    pub fn new(audio: AudioPayload) -> Self {
        Self {
            audio,
            sample_rate_hz: None,
            encoding: None,
            turn_index: None,
            turn_completed: None,
            partial: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transcript {
    pub text: String,
    pub is_final: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub partial: Option<bool>,
    /// Set when the client-side barge-in heuristic fired on this transcript.
    pub interruption_signal: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub tool_id: ToolId,
    pub input: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_index: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlSignal {
    pub turn_completed: bool,
    pub agent_disconnect: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect_reason: Option<DisconnectReason>,
    pub interruption_signal: bool,
    pub go_away: bool,
}

impl ControlSignal {
    pub fn turn_completed() -> Self {
        Self {
            turn_completed: true,
            ..Default::default()
        }
    }

    pub fn interruption() -> Self {
        Self {
            interruption_signal: true,
            ..Default::default()
        }
    }

    pub fn agent_disconnect(reason: Option<DisconnectReason>) -> Self {
        Self {
            agent_disconnect: true,
            disconnect_reason: reason,
            ..Default::default()
        }
    }

    pub fn go_away() -> Self {
        Self {
            go_away: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncomingMessage {
    Text(TextOutput),
    Audio(AudioOutput),
    Transcript(Transcript),
    ToolCall(ToolCall),
    ControlSignal(ControlSignal),
}

impl IncomingMessage {
    pub fn text(text: impl Into<String>) -> Self {
        IncomingMessage::Text(TextOutput {
            text: text.into(),
            ..Default::default()
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            IncomingMessage::Text(_) => "TEXT",
            IncomingMessage::Audio(_) => "AUDIO",
            IncomingMessage::Transcript(_) => "TRANSCRIPT",
            IncomingMessage::ToolCall(_) => "TOOL_CALL",
            IncomingMessage::ControlSignal(_) => "CONTROL_SIGNAL",
        }
    }
}

// Wire helpers shared by the unmarshallers.

pub(crate) fn str_field(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn bool_field(value: &Value, key: &str) -> Option<bool> {
    value.get(key).and_then(Value::as_bool)
}

/// Reads a numeric field that may arrive either as a JSON number or as a
/// decimal string (64-bit integers are string-encoded on the wire).
pub(crate) fn u64_field(value: &Value, key: &str) -> Option<u64> {
    match value.get(key)? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn truthy(value: &Value, key: &str) -> bool {
    match value.get(key) {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}
