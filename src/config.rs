use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::ConstructionError;
use crate::peer;
use crate::session::BargeInPolicy;
use crate::tools::ToolConfig;

/// 生产环境的双向流式端点
pub const PROD_WEBCHANNEL_HOST: &str = "ces-webchannel.googleapis.com";
/// 生产环境的 HTTP 端点
pub const PROD_HTTP_HOST: &str = "ces.googleapis.com";

/// How the microphone is gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InputMode {
    /// Mic always streams.
    DefaultOn,
    /// Hold-to-talk, starts released.
    #[default]
    DefaultOff,
    SpaceBarToTalk,
    /// Text only.
    None,
}

impl InputMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            InputMode::DefaultOn => "DEFAULT_ON",
            InputMode::DefaultOff => "DEFAULT_OFF",
            InputMode::SpaceBarToTalk => "SPACE_BAR_TO_TALK",
            InputMode::None => "NONE",
        }
    }

    /// Captured audio is replaced by silence unless the user is holding talk.
    pub fn is_hold_to_talk(&self) -> bool {
        !matches!(self, InputMode::DefaultOn | InputMode::None)
    }

    pub fn is_voice(&self) -> bool {
        *self != InputMode::None
    }
}

impl FromStr for InputMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DEFAULT_ON" | "OPEN_MIC" => Ok(InputMode::DefaultOn),
            "DEFAULT_OFF" | "PUSH_TO_TALK_BUTTON" => Ok(InputMode::DefaultOff),
            "SPACE_BAR_TO_TALK" | "PUSH_TO_TALK_DISCREET" => Ok(InputMode::SpaceBarToTalk),
            "NONE" => Ok(InputMode::None),
            other => Err(format!("unknown audio input mode: {}", other)),
        }
    }
}

impl TryFrom<String> for InputMode {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InputMode> for String {
    fn from(mode: InputMode) -> Self {
        mode.as_str().to_string()
    }
}

impl fmt::Display for InputMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutputMode {
    AlwaysOn,
    #[default]
    DefaultOn,
    DefaultOff,
    Disabled,
}

impl OutputMode {
    /// Whether agent audio starts unmuted.
    pub fn starts_enabled(&self) -> bool {
        matches!(self, OutputMode::AlwaysOn | OutputMode::DefaultOn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BargeInSensitivity {
    Low,
    #[default]
    Medium,
    High,
    Disabled,
}

impl BargeInSensitivity {
    pub fn policy(&self) -> BargeInPolicy {
        let (transcripts, gap_ms) = match self {
            BargeInSensitivity::Low => (5, 300),
            BargeInSensitivity::Medium => (3, 500),
            BargeInSensitivity::High => (1, 1000),
            BargeInSensitivity::Disabled => return BargeInPolicy::Disabled,
        };
        BargeInPolicy::After {
            transcripts,
            max_gap: Duration::from_millis(gap_ms),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Prod,
    Dev,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub multiplier: u32,
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 500,
            multiplier: 2,
            max_attempts: 5,
        }
    }
}

impl ReconnectConfig {
    /// Delay before reconnect `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = (self.multiplier as u64).saturating_pow(attempt.saturating_sub(1));
        Duration::from_millis(self.initial_delay_ms.saturating_mul(factor))
    }
}

/// 与外部 UI 进程的 UDP 通信配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UiBridgeConfig {
    pub enabled: bool,
    pub local_addr: String,
    pub remote_addr: String,
    pub buffer_size: usize,
}

impl Default for UiBridgeConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            local_addr: "127.0.0.1:5679".to_string(),
            remote_addr: "127.0.0.1:5678".to_string(),
            buffer_size: 4096,
        }
    }
}

/// 本地音频文件，代替声卡
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioFilesConfig {
    /// WAV file streamed as the microphone.
    pub input_wav: Option<PathBuf>,
    /// Agent speech is rendered into this WAV file.
    pub output_wav: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// `projects/.../locations/.../(agents|apps)/...` or a `ws(s)://` runtime.
    pub peer_id: String,
    pub deployment_id: Option<String>,
    /// Overrides the backend base URI. A `ws(s)://` value routes through a
    /// socket proxy.
    pub api_uri: Option<String>,
    pub environment: Environment,
    pub dev_webchannel_host: Option<String>,
    pub dev_http_host: Option<String>,
    pub access_token: Option<String>,

    pub audio_input_mode: InputMode,
    pub audio_output_mode: OutputMode,
    pub barge_in_sensitivity: Option<BargeInSensitivity>,

    pub language_code: String,
    pub voice: String,
    pub streaming_mode: String,
    pub streaming_tts: bool,
    pub current_playbook: Option<String>,
    /// JSON merged over the generated config message.
    pub custom_config_json: Option<String>,

    pub reconnect: ReconnectConfig,
    pub ui: UiBridgeConfig,
    pub audio: AudioFilesConfig,
    pub tools: Vec<ToolConfig>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            peer_id: String::new(),
            deployment_id: None,
            api_uri: None,
            environment: Environment::Prod,
            dev_webchannel_host: None,
            dev_http_host: None,
            access_token: None,
            audio_input_mode: InputMode::DefaultOff,
            audio_output_mode: OutputMode::DefaultOn,
            barge_in_sensitivity: None,
            language_code: "en-US".to_string(),
            voice: "en-US-Chirp3-HD-Aoede".to_string(),
            streaming_mode: "STREAMING_MODE_PROACTIVE".to_string(),
            streaming_tts: true,
            current_playbook: None,
            custom_config_json: None,
            reconnect: ReconnectConfig::default(),
            ui: UiBridgeConfig::default(),
            audio: AudioFilesConfig::default(),
            tools: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// 加载配置：config.toml（可选）+ BIDI_AGENT__* 环境变量
    pub fn load(path: Option<&str>) -> Result<Self, ConstructionError> {
        let file = match path {
            Some(p) => config::File::with_name(p).required(true),
            None => config::File::with_name("config").required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix("BIDI_AGENT")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;
        let config: AgentConfig = settings.try_deserialize()?;
        config.normalize()
    }

    /// Resolve derived settings: deployment paths, dev environment detection.
    pub fn normalize(mut self) -> Result<Self, ConstructionError> {
        self.peer_id = self.peer_id.trim().to_string();

        if self.peer_id.contains("console-dev")
            || self
                .deployment_id
                .as_deref()
                .is_some_and(|d| d.contains("console-dev"))
        {
            self.environment = Environment::Dev;
        }

        if let Some(deployment) = self.deployment_id.as_deref().filter(|d| !d.is_empty()) {
            let (peer_id, deployment) = peer::resolve_deployment(&self.peer_id, deployment)?;
            self.peer_id = peer_id;
            self.deployment_id = Some(deployment);
        } else {
            self.deployment_id = None;
        }

        if self.api_uri.as_deref().is_some_and(|u| u.trim().is_empty()) {
            self.api_uri = None;
        }

        Ok(self)
    }

    /// Proxy socket URI when the API override is a websocket address.
    pub fn websocket_uri(&self) -> Option<&str> {
        self.api_uri.as_deref().filter(|u| peer::is_socket_uri(u))
    }

    pub fn barge_in_policy(&self) -> BargeInPolicy {
        self.barge_in_sensitivity.unwrap_or_default().policy()
    }

    pub fn webchannel_host(&self) -> &str {
        match self.environment {
            Environment::Dev => self
                .dev_webchannel_host
                .as_deref()
                .unwrap_or(PROD_WEBCHANNEL_HOST),
            Environment::Prod => PROD_WEBCHANNEL_HOST,
        }
    }

    pub fn http_host(&self) -> &str {
        match self.environment {
            Environment::Dev => self.dev_http_host.as_deref().unwrap_or(PROD_HTTP_HOST),
            Environment::Prod => PROD_HTTP_HOST,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn input_mode_accepts_legacy_names() {
        assert_eq!("open_mic".parse::<InputMode>().unwrap(), InputMode::DefaultOn);
        assert_eq!(
            "PUSH_TO_TALK_BUTTON".parse::<InputMode>().unwrap(),
            InputMode::DefaultOff
        );
        assert_eq!(
            "PUSH_TO_TALK_DISCREET".parse::<InputMode>().unwrap(),
            InputMode::SpaceBarToTalk
        );
        assert!("SHOUT".parse::<InputMode>().is_err());
    }

    #[test]
    fn hold_to_talk_modes() {
        assert!(!InputMode::DefaultOn.is_hold_to_talk());
        assert!(!InputMode::None.is_hold_to_talk());
        assert!(InputMode::DefaultOff.is_hold_to_talk());
        assert!(InputMode::SpaceBarToTalk.is_hold_to_talk());
    }

    #[test]
    fn sensitivity_presets() {
        assert_eq!(
            BargeInSensitivity::Low.policy(),
            BargeInPolicy::After {
                transcripts: 5,
                max_gap: Duration::from_millis(300)
            }
        );
        assert_eq!(
            AgentConfig::default().barge_in_policy(),
            BargeInPolicy::After {
                transcripts: 3,
                max_gap: Duration::from_millis(500)
            }
        );
        assert_eq!(
            BargeInSensitivity::Disabled.policy(),
            BargeInPolicy::Disabled
        );
    }

    #[test]
    fn reconnect_backoff_doubles() {
        let r = ReconnectConfig::default();
        assert_eq!(r.delay(1), Duration::from_millis(500));
        assert_eq!(r.delay(2), Duration::from_millis(1000));
        assert_eq!(r.delay(5), Duration::from_millis(8000));
    }

    #[test]
    fn normalize_resolves_deployment_and_dev() {
        let config = AgentConfig {
            peer_id: "projects/p/locations/l/apps/console-dev-app".into(),
            deployment_id: Some("d1".into()),
            ..Default::default()
        }
        .normalize()
        .unwrap();
        assert_eq!(
            config.peer_id,
            "projects/p/locations/l/apps/console-dev-app/deployments/d1"
        );
        assert_eq!(config.deployment_id.as_deref(), Some(config.peer_id.as_str()));
        assert_eq!(config.environment, Environment::Dev);

        let err = AgentConfig {
            peer_id: "projects/p/locations/l/agents/a".into(),
            deployment_id: Some("d1".into()),
            ..Default::default()
        }
        .normalize();
        assert!(matches!(err, Err(ConstructionError::InvalidDeploymentId(_))));
    }

    #[test]
    fn websocket_uri_only_for_socket_overrides() {
        let mut config = AgentConfig::default();
        config.api_uri = Some("wss://proxy.local/ws".into());
        assert_eq!(config.websocket_uri(), Some("wss://proxy.local/ws"));
        config.api_uri = Some("https://api.local".into());
        assert_eq!(config.websocket_uri(), None);
    }

    #[test]
    fn load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            r#"
peer_id = "projects/p/locations/us/agents/a"
audio_input_mode = "open_mic"
barge_in_sensitivity = "HIGH"
language_code = "de-DE"

[reconnect]
max_attempts = 2

[[tools]]
name = "lookup"
type = "tcp"
address = "127.0.0.1:9000"
"#
        )
        .unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let config = AgentConfig::load(Some(&path)).unwrap();
        assert_eq!(config.audio_input_mode, InputMode::DefaultOn);
        assert_eq!(config.barge_in_sensitivity, Some(BargeInSensitivity::High));
        assert_eq!(config.language_code, "de-DE");
        assert_eq!(config.reconnect.max_attempts, 2);
        assert_eq!(config.reconnect.initial_delay_ms, 500);
        assert_eq!(config.tools.len(), 1);
        assert_eq!(config.voice, "en-US-Chirp3-HD-Aoede");
    }
}
