//! Streaming detect-intent wire format (agents namespace).

use serde_json::{Value, json};
use std::time::Instant;

use super::{merge, templates};
use crate::config::AgentConfig;
use crate::message::{
    AudioOutput, AudioPayload, ControlSignal, DisconnectReason, IncomingMessage, OutgoingMessage,
    TextOutput, ToolCall, ToolId, Transcript, str_field, truthy, u64_field,
};
use crate::peer::AgentPath;
use crate::session::Session;

const END_EVENTS: [&str; 2] = ["END_SESSION", "flow.cancelled"];
const HANDOVER_EVENT: &str = "flow.failed.human-escalation";

#[derive(Debug, Clone)]
pub struct DetectIntentAdaptor {
    agent: AgentPath,
    pub(crate) session: Session,
}

impl DetectIntentAdaptor {
    pub fn new(agent: AgentPath, session: Session) -> Self {
        Self { agent, session }
    }

    pub fn session_path(&self) -> String {
        format!("{}/sessions/{}", self.agent.base_path(), self.session.id())
    }

    pub fn config_message(&self, config: &AgentConfig, access_token: Option<&str>) -> Value {
        let mut envelope = templates::detect_intent();
        let message = &mut envelope["configMessage"];
        message["session"] = json!(self.session_path());
        message["inputAudioConfig"]["languageCode"] = json!(config.language_code);
        message["languageCode"] = json!(config.language_code);
        message["outputAudioConfig"]["synthesizeSpeechConfig"]["voice"]["name"] =
            json!(config.voice);
        message["streamingMode"] = json!(config.streaming_mode);
        message["enableStreamingSynthesize"] = json!(config.streaming_tts);
        if let Some(playbook) = config.current_playbook.as_deref().filter(|p| !p.is_empty()) {
            message["query_params"]["current_playbook"] = json!(playbook);
        }
        if let Some(token) = access_token {
            message["accessToken"] = json!(token);
        }
        merge::apply_custom_config(envelope, config.custom_config_json.as_deref())
    }

    pub fn marshal(&self, message: &OutgoingMessage) -> Vec<Value> {
        match message {
            OutgoingMessage::SessionInput(input) => match input.non_empty_text() {
                Some(text) => vec![json!({ "inputData": { "text": text } })],
                None => Vec::new(),
            },
            OutgoingMessage::Audio(audio) => {
                vec![json!({ "inputData": { "audio": audio.to_base64() } })]
            }
            OutgoingMessage::Vars(_) | OutgoingMessage::ToolResponse(_) => {
                log::debug!("detect-intent sessions take no vars or tool responses");
                Vec::new()
            }
        }
    }

    pub fn unmarshal_at(&mut self, wire: &Value, now: Instant) -> Vec<IncomingMessage> {
        let mut received = Vec::new();

        if let Some(audio) = wire.get("audioOutput").and_then(|a| a.get("audio")) {
            if let Some(text) = audio.as_str().filter(|t| !t.is_empty()) {
                let mut out = AudioOutput::new(AudioPayload::Base64(text.to_string()));
                if let Some(cfg) = wire.pointer("/audioOutput/outputAudioConfig") {
                    out.sample_rate_hz = u64_field(cfg, "sampleRateHertz")
                        .map(|r| u32::try_from(r).unwrap_or(templates::DEFAULT_SAMPLE_RATE));
                    out.encoding = str_field(cfg, "audioEncoding");
                }
                received.push(IncomingMessage::Audio(out));
            }
        }

        if let Some(response) = wire.get("detectIntentResponse") {
            if let Some(result) = response.get("queryResult") {
                self.unmarshal_query_result(response, result, &mut received);
            }
        }

        if let Some(recognition) = wire.get("recognitionResult") {
            let is_final = truthy(recognition, "isFinal");
            let interruption_signal = self.session.barge_in.observe(is_final, now);
            received.push(IncomingMessage::Transcript(Transcript {
                text: str_field(recognition, "transcript").unwrap_or_default(),
                is_final,
                partial: None,
                interruption_signal,
            }));
        }

        received
    }

    fn unmarshal_query_result(
        &self,
        response: &Value,
        result: &Value,
        received: &mut Vec<IncomingMessage>,
    ) {
        let response_type = str_field(response, "responseType");
        let messages = result
            .get("responseMessages")
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or_default();

        for text in messages
            .iter()
            .filter_map(|m| m.pointer("/text/text").and_then(Value::as_array))
            .flatten()
            .filter_map(Value::as_str)
            .filter(|t| !t.is_empty())
        {
            received.push(IncomingMessage::Text(TextOutput {
                text: text.to_string(),
                response_type: response_type.clone(),
                ..Default::default()
            }));
        }

        if let Some(call) = messages.iter().find_map(|m| m.get("toolCall")) {
            received.push(IncomingMessage::ToolCall(ToolCall {
                id: None,
                tool_id: ToolId::new(
                    str_field(call, "tool").unwrap_or_default(),
                    str_field(call, "action"),
                ),
                input: call.get("inputParameters").cloned().unwrap_or(json!({})),
                turn_index: None,
            }));
        }

        if response_type.as_deref() == Some("FINAL") {
            received.push(IncomingMessage::ControlSignal(ControlSignal::turn_completed()));
        }

        let event = result.pointer("/match/event").and_then(Value::as_str);
        let end_interaction = messages.iter().any(|m| truthy(m, "endInteraction"));
        if end_interaction || event.is_some_and(|e| END_EVENTS.contains(&e)) {
            let reason = if event == Some(HANDOVER_EVENT) {
                DisconnectReason::HardHandover
            } else {
                DisconnectReason::AgentRequested
            };
            received.push(IncomingMessage::ControlSignal(
                ControlSignal::agent_disconnect(Some(reason)),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SessionInput;
    use crate::peer::PeerId;
    use crate::session::BargeInPolicy;
    use std::time::Duration;

    fn adaptor() -> DetectIntentAdaptor {
        let agent = PeerId::parse_agent("projects/p/locations/global/agents/a").unwrap();
        DetectIntentAdaptor::new(agent, Session::new(BargeInPolicy::default()))
    }

    #[test]
    fn config_message_fills_template() {
        let a = adaptor();
        let config = AgentConfig {
            current_playbook: Some("pb".into()),
            custom_config_json: Some(r#"{"configMessage": {"languageCode": "fr-FR"}}"#.into()),
            ..Default::default()
        };
        let msg = a.config_message(&config, Some("tok"));
        let cm = &msg["configMessage"];
        assert_eq!(cm["session"], json!(a.session_path()));
        assert!(a.session_path().starts_with("projects/p/locations/global/agents/a/sessions/"));
        assert_eq!(cm["inputAudioConfig"]["languageCode"], "en-US");
        assert_eq!(cm["languageCode"], "fr-FR");
        assert_eq!(
            cm["outputAudioConfig"]["synthesizeSpeechConfig"]["voice"]["name"],
            "en-US-Chirp3-HD-Aoede"
        );
        assert_eq!(cm["query_params"]["current_playbook"], "pb");
        assert_eq!(cm["accessToken"], "tok");
        assert_eq!(cm["streamingMode"], "STREAMING_MODE_PROACTIVE");
        assert_eq!(cm["enableStreamingSynthesize"], true);
    }

    #[test]
    fn marshal_text_and_audio() {
        let a = adaptor();
        assert_eq!(
            a.marshal(&OutgoingMessage::SessionInput(SessionInput::text("hi"))),
            vec![json!({"inputData": {"text": "hi"}})]
        );
        assert_eq!(
            a.marshal(&OutgoingMessage::Audio(AudioPayload::Bytes(vec![1, 2]))),
            vec![json!({"inputData": {"audio": "AQI="}})]
        );
        assert!(a.marshal(&OutgoingMessage::ToolResponse(json!({}))).is_empty());
    }

    #[test]
    fn fans_out_in_order() {
        let mut a = adaptor();
        let wire = json!({
            "audioOutput": {"audio": "AAAA", "outputAudioConfig": {"sampleRateHertz": 24000, "audioEncoding": "LINEAR16"}},
            "detectIntentResponse": {
                "responseType": "FINAL",
                "queryResult": {
                    "responseMessages": [
                        {"text": {"text": ["one", "two"]}},
                        {"toolCall": {"tool": "projects/p/tools/t", "action": "lookup", "inputParameters": {"q": 1}}},
                        {"endInteraction": {}}
                    ],
                    "match": {"event": "flow.failed.human-escalation"}
                }
            }
        });
        let out = a.unmarshal_at(&wire, Instant::now());
        let kinds: Vec<_> = out.iter().map(IncomingMessage::kind).collect();
        assert_eq!(
            kinds,
            ["AUDIO", "TEXT", "TEXT", "TOOL_CALL", "CONTROL_SIGNAL", "CONTROL_SIGNAL"]
        );
        let IncomingMessage::Audio(audio) = &out[0] else { panic!() };
        assert_eq!(audio.sample_rate_hz, Some(24000));
        let IncomingMessage::Text(t) = &out[2] else { panic!() };
        assert_eq!(t.text, "two");
        assert_eq!(t.response_type.as_deref(), Some("FINAL"));
        let IncomingMessage::ToolCall(call) = &out[3] else { panic!() };
        assert_eq!(call.tool_id.tool_display_name.as_deref(), Some("lookup"));
        assert_eq!(call.input, json!({"q": 1}));
        let IncomingMessage::ControlSignal(end) = &out[5] else { panic!() };
        assert!(end.agent_disconnect);
        assert_eq!(end.disconnect_reason, Some(DisconnectReason::HardHandover));
    }

    #[test]
    fn oversized_sample_rate_uses_default() {
        let mut a = adaptor();
        let wire = json!({"audioOutput": {
            "audio": "AAA=",
            "outputAudioConfig": {"sampleRateHertz": 5_000_000_000u64}
        }});
        let out = a.unmarshal_at(&wire, Instant::now());
        let IncomingMessage::Audio(audio) = &out[0] else { panic!() };
        assert_eq!(audio.sample_rate_hz, Some(templates::DEFAULT_SAMPLE_RATE));
    }

    #[test]
    fn end_session_event_is_agent_requested() {
        let mut a = adaptor();
        let wire = json!({"detectIntentResponse": {"queryResult": {"match": {"event": "END_SESSION"}}}});
        let out = a.unmarshal_at(&wire, Instant::now());
        assert_eq!(
            out,
            vec![IncomingMessage::ControlSignal(ControlSignal::agent_disconnect(Some(
                DisconnectReason::AgentRequested
            )))]
        );
    }

    #[test]
    fn transcripts_drive_barge_in() {
        let mut a = adaptor();
        let t0 = Instant::now();
        let partial = json!({"recognitionResult": {"transcript": "hel"}});
        let signals: Vec<bool> = (0..4)
            .map(|i| {
                let out = a.unmarshal_at(&partial, t0 + Duration::from_millis(i * 100));
                match &out[0] {
                    IncomingMessage::Transcript(t) => t.interruption_signal,
                    _ => panic!("expected transcript"),
                }
            })
            .collect();
        assert_eq!(signals, [false, false, false, true]);

        let done = json!({"recognitionResult": {"transcript": "hello", "isFinal": true}});
        let out = a.unmarshal_at(&done, t0 + Duration::from_secs(10));
        let IncomingMessage::Transcript(t) = &out[0] else { panic!() };
        assert!(t.is_final && t.interruption_signal);
    }
}
