//! Bidirectional run-session wire format (apps namespace and external
//! runtimes).

use serde_json::{Map, Value, json};

use super::{image_input, merge, templates, tool_call_from_wire};
use crate::config::{AgentConfig, Environment};
use crate::message::{
    AudioOutput, AudioPayload, ControlSignal, IncomingMessage, OutgoingMessage, TextOutput,
    Transcript, bool_field, str_field, truthy, u64_field,
};
use crate::peer::AgentPath;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct BidiRunSessionAdaptor {
    /// `projects/.../apps/<id>`, absent for an external runtime.
    app: Option<String>,
    sample_rate: u32,
    pub(crate) session: Session,
}

impl BidiRunSessionAdaptor {
    pub fn new(app: &AgentPath, session: Session) -> Self {
        Self {
            app: Some(app.base_path()),
            sample_rate: templates::DEFAULT_SAMPLE_RATE,
            session,
        }
    }

    pub fn external(session: Session) -> Self {
        Self {
            app: None,
            sample_rate: templates::EXTERNAL_SAMPLE_RATE,
            session,
        }
    }

    pub fn session_path(&self) -> String {
        match &self.app {
            Some(app) => format!("{}/sessions/{}", app, self.session.id()),
            None => format!("sessions/{}", self.session.id()),
        }
    }

    pub fn config_message(&self, config: &AgentConfig, access_token: Option<&str>) -> Value {
        let mut envelope = templates::bidi_run_session(self.sample_rate);
        let inner = &mut envelope["config"];
        inner["session"] = json!(self.session_path());
        if let Some(deployment) = config.deployment_id.as_deref() {
            inner["deployment"] = json!(deployment);
        }
        if let Some(token) = access_token {
            inner["accessToken"] = json!(token);
        }
        if config.environment == Environment::Dev && config.api_uri.is_some() {
            inner["environment"] = json!("dev");
        }
        merge::apply_custom_config(envelope, config.custom_config_json.as_deref())
    }

    pub fn marshal(&self, message: &OutgoingMessage) -> Vec<Value> {
        match message {
            OutgoingMessage::SessionInput(input) => {
                let mut envelopes = Vec::new();
                if let Some(vars) = input.non_empty_vars() {
                    envelopes.push(realtime("variables", json!(vars)));
                }
                for image in &input.images {
                    envelopes.push(realtime("image", image_input(image)));
                }
                if let Some(text) = input.non_empty_text() {
                    envelopes.push(realtime("text", json!(text)));
                }
                envelopes
            }
            OutgoingMessage::Audio(audio) => vec![realtime("audio", json!(audio.to_base64()))],
            OutgoingMessage::Vars(vars) => vec![realtime("variables", json!(vars))],
            OutgoingMessage::ToolResponse(payload) => vec![realtime(
                "toolResponses",
                json!({ "toolResponses": [payload] }),
            )],
        }
    }

    pub fn unmarshal(&self, wire: &Value) -> Vec<IncomingMessage> {
        let mut received = Vec::new();
        let output = wire.get("sessionOutput");

        if let Some(output) = output {
            let turn_index = u64_field(output, "turnIndex");
            let turn_completed = truthy(output, "turnCompleted").then_some(true);
            let partial = bool_field(output, "partial");

            if let Some(text) = str_field(output, "text").filter(|t| !t.is_empty()) {
                received.push(IncomingMessage::Text(TextOutput {
                    text,
                    turn_index,
                    turn_completed,
                    partial,
                    response_type: None,
                }));
            } else if let Some(audio) = str_field(output, "audio").filter(|a| !a.is_empty()) {
                let mut out = AudioOutput::new(AudioPayload::Base64(audio));
                out.turn_index = turn_index;
                out.turn_completed = turn_completed;
                out.partial = partial;
                out.sample_rate_hz = Some(self.sample_rate);
                received.push(IncomingMessage::Audio(out));
            } else if let Some(calls) = output.pointer("/toolCalls/toolCalls").and_then(Value::as_array)
            {
                received.extend(
                    calls
                        .iter()
                        .map(|call| IncomingMessage::ToolCall(tool_call_from_wire(call, turn_index))),
                );
            }
        }

        if let Some(recognition) = wire.get("recognitionResult") {
            received.push(IncomingMessage::Transcript(Transcript {
                text: str_field(recognition, "transcript").unwrap_or_default(),
                is_final: truthy(recognition, "isFinal"),
                partial: bool_field(recognition, "partial"),
                interruption_signal: false,
            }));
        }

        if truthy(wire, "interruptionSignal") {
            received.push(IncomingMessage::ControlSignal(ControlSignal::interruption()));
        }

        if truthy(wire, "turnCompleted") || output.is_some_and(|o| truthy(o, "turnCompleted")) {
            received.push(IncomingMessage::ControlSignal(ControlSignal::turn_completed()));
        }

        if truthy(wire, "endSession") {
            received.push(IncomingMessage::ControlSignal(
                ControlSignal::agent_disconnect(None),
            ));
        }

        if truthy(wire, "goAway") {
            received.push(IncomingMessage::ControlSignal(ControlSignal::go_away()));
        }

        received
    }
}

fn realtime(key: &str, value: Value) -> Value {
    let mut input = Map::new();
    input.insert(key.to_string(), value);
    json!({ "realtimeInput": input })
}
