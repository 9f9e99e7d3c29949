//! Single request/response run-session format used for text-only apps.

use serde_json::{Value, json};

use super::{image_input, tool_call_from_wire};
use crate::message::{
    IncomingMessage, OutgoingMessage, TextOutput, bool_field, str_field, truthy, u64_field,
};
use crate::peer::AgentPath;
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct RunSessionAdaptor {
    app: String,
    deployment: Option<String>,
    pub(crate) session: Session,
}

impl RunSessionAdaptor {
    pub fn new(app: &AgentPath, deployment: Option<String>, session: Session) -> Self {
        Self {
            app: app.base_path(),
            deployment,
            session,
        }
    }

    pub fn session_path(&self) -> String {
        format!("{}/sessions/{}", self.app, self.session.id())
    }

    /// Every request carries its own config; no override merge happens here.
    pub fn config_message(&self) -> Value {
        let mut config = json!({ "session": self.session_path() });
        if let Some(deployment) = &self.deployment {
            config["deployment"] = json!(deployment);
        }
        json!({ "config": config })
    }

    pub fn marshal(&self, message: &OutgoingMessage) -> Vec<Value> {
        let mut inputs = Vec::new();
        match message {
            OutgoingMessage::SessionInput(input) => {
                if let Some(vars) = input.non_empty_vars() {
                    inputs.push(json!({ "variables": vars }));
                }
                for image in &input.images {
                    inputs.push(json!({ "image": image_input(image) }));
                }
                if let Some(text) = input.non_empty_text() {
                    inputs.push(json!({ "text": text }));
                }
            }
            OutgoingMessage::ToolResponse(payload) => {
                inputs.push(json!({ "toolResponses": { "toolResponses": [payload] } }));
            }
            OutgoingMessage::Audio(_) | OutgoingMessage::Vars(_) => {
                log::debug!("run-session requests carry no standalone audio or vars");
                return Vec::new();
            }
        }
        if inputs.is_empty() {
            return Vec::new();
        }
        let mut envelope = self.config_message();
        envelope["inputs"] = Value::Array(inputs);
        vec![envelope]
    }

    pub fn unmarshal(&self, wire: &Value) -> Vec<IncomingMessage> {
        let Some(outputs) = wire.get("outputs") else {
            return Vec::new();
        };
        let items = match outputs {
            Value::Array(items) => items.as_slice(),
            single => std::slice::from_ref(single),
        };
        let partial = bool_field(outputs, "partial");

        let mut received = Vec::new();
        for item in items {
            if let Some(text) = str_field(item, "text").filter(|t| !t.is_empty()) {
                received.push(IncomingMessage::Text(TextOutput {
                    text,
                    turn_index: u64_field(item, "turnIndex"),
                    turn_completed: truthy(item, "turnCompleted").then_some(true),
                    partial,
                    response_type: None,
                }));
            }
            if let Some(calls) = item.pointer("/toolCalls/toolCalls").and_then(Value::as_array) {
                received.extend(
                    calls
                        .iter()
                        .map(|call| IncomingMessage::ToolCall(tool_call_from_wire(call, None))),
                );
            }
        }
        received
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{AudioPayload, SessionInput};
    use crate::peer::PeerId;

    fn adaptor(deployment: Option<&str>) -> RunSessionAdaptor {
        let app = PeerId::parse_agent("projects/p/locations/us/apps/app1").unwrap();
        RunSessionAdaptor::new(&app, deployment.map(str::to_string), Session::default())
    }

    #[test]
    fn one_envelope_per_input() {
        let a = adaptor(Some("projects/p/locations/us/apps/app1/deployments/d"));
        let input = SessionInput {
            text: Some("hi".into()),
            vars: None,
            images: vec!["data:image/png;base64,AAA".into()],
        };
        let out = a.marshal(&OutgoingMessage::SessionInput(input));
        assert_eq!(out.len(), 1);
        assert_eq!(out[0]["config"]["session"], json!(a.session_path()));
        assert_eq!(
            out[0]["config"]["deployment"],
            "projects/p/locations/us/apps/app1/deployments/d"
        );
        assert_eq!(
            out[0]["inputs"],
            json!([
                {"image": {"data": "AAA", "mime_type": "image/png"}},
                {"text": "hi"}
            ])
        );
    }

    #[test]
    fn tool_response_input() {
        let a = adaptor(None);
        let out = a.marshal(&OutgoingMessage::ToolResponse(json!({"id": "c"})));
        assert_eq!(out[0]["inputs"], json!([{"toolResponses": {"toolResponses": [{"id": "c"}]}}]));
        assert!(out[0]["config"].get("deployment").is_none());
        assert!(a.marshal(&OutgoingMessage::Audio(AudioPayload::Bytes(vec![0]))).is_empty());
    }

    #[test]
    fn outputs_object_and_array() {
        let a = adaptor(None);
        let single = json!({"outputs": {"text": "one", "turnIndex": 2, "partial": true}});
        let out = a.unmarshal(&single);
        let IncomingMessage::Text(text) = &out[0] else { panic!() };
        assert_eq!(text.text, "one");
        assert_eq!(text.turn_index, Some(2));
        assert_eq!(text.partial, Some(true));

        let many = json!({"outputs": [
            {"text": "a", "turnCompleted": true},
            {"toolCalls": {"toolCalls": [{"id": "x", "tool": "t", "args": {}}]}}
        ]});
        let out = a.unmarshal(&many);
        let kinds: Vec<_> = out.iter().map(IncomingMessage::kind).collect();
        assert_eq!(kinds, ["TEXT", "TOOL_CALL"]);
        let IncomingMessage::Text(text) = &out[0] else { panic!() };
        assert_eq!(text.turn_completed, Some(true));
        assert_eq!(text.partial, None);
    }
}
