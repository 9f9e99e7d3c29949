//! Config message templates per wire format.

use serde_json::{Value, json};

pub const DEFAULT_SAMPLE_RATE: u32 = 16000;
/// Sample rate spoken by externally hosted runtimes.
pub const EXTERNAL_SAMPLE_RATE: u32 = 24000;

pub fn detect_intent() -> Value {
    json!({
        "configMessage": {
            "session": "",
            "inputAudioConfig": {
                "audioEncoding": "AUDIO_ENCODING_LINEAR_16",
                "sampleRateHertz": DEFAULT_SAMPLE_RATE,
                "languageCode": ""
            },
            "outputAudioConfig": {
                "audioEncoding": "OUTPUT_AUDIO_ENCODING_LINEAR_16",
                "sample_rate_hertz": DEFAULT_SAMPLE_RATE,
                "synthesizeSpeechConfig": {
                    "voice": { "name": "" }
                }
            },
            "languageCode": "",
            "streamingMode": "",
            "enableStreamingSynthesize": true
        }
    })
}

pub fn bidi_run_session(sample_rate: u32) -> Value {
    json!({
        "config": {
            "session": "",
            "inputAudioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": DEFAULT_SAMPLE_RATE
            },
            "outputAudioConfig": {
                "audioEncoding": "LINEAR16",
                "sampleRateHertz": sample_rate
            }
        }
    })
}

/// Output sample rate requested by a config message, if any.
pub fn output_sample_rate(config_message: &Value) -> Option<u32> {
    config_message
        .pointer("/configMessage/outputAudioConfig/sample_rate_hertz")
        .or_else(|| config_message.pointer("/config/outputAudioConfig/sampleRateHertz"))
        .and_then(Value::as_u64)
        .and_then(|rate| u32::try_from(rate).ok())
        .filter(|rate| *rate > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_rate_lookup() {
        assert_eq!(output_sample_rate(&detect_intent()), Some(16000));
        assert_eq!(output_sample_rate(&bidi_run_session(24000)), Some(24000));
        assert_eq!(output_sample_rate(&json!({"config": {"session": "s"}})), None);
    }
}
