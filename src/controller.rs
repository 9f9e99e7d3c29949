use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::sleep_until;

use crate::adaptor::{AdaptorKind, ProtocolAdaptor};
use crate::audio::{
    AudioCaptureGate, AudioPlayer, AudioRecorder, PlaybackConfig, PlaybackEvent, SystemClock,
};
use crate::config::{AgentConfig, OutputMode};
use crate::error::{ConstructionError, TransportError, TransportStatus};
use crate::message::{AudioPayload, IncomingMessage, OutgoingMessage, SessionInput};
use crate::tools::ToolRegistry;
use crate::transport::{ConnectionState, Transport, TransportEvent, TransportListeners};
use crate::ui_bridge::{SessionStatus, UiBridge, UiCommand, status_message};

/// 会话控制器：把 transport、adaptor、音频、工具和 UI 串在一个事件循环里
pub struct SessionController {
    config: AgentConfig,
    adaptor: ProtocolAdaptor,
    transport: Transport,
    events: mpsc::UnboundedReceiver<TransportEvent>,

    player: AudioPlayer,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
    output_enabled: bool,

    recorder: Option<AudioRecorder>,
    frames: Option<mpsc::Receiver<Vec<u8>>>,
    gate: AudioCaptureGate,

    tools: ToolRegistry,
    tool_results_tx: mpsc::UnboundedSender<Value>,
    tool_results: mpsc::UnboundedReceiver<Value>,

    ui: Option<Arc<UiBridge>>,
    ui_commands: Option<mpsc::Receiver<UiCommand>>,

    reconnect_attempts: u32,
    reconnect_at: Option<tokio::time::Instant>,
    // 会话已结束（agent 断开或用户结束），关闭事件不再触发重连
    ended: bool,
    finished: bool,
}

impl SessionController {
    pub fn new(config: AgentConfig) -> Result<Self, ConstructionError> {
        let adaptor = ProtocolAdaptor::from_config(&config)?;
        let (tx, events) = mpsc::unbounded_channel();
        let transport = Transport::for_session(
            &config,
            &adaptor,
            Some(TransportListeners::channel_provider(tx)),
        )?;
        let (player, playback_events) = AudioPlayer::silent(Arc::new(SystemClock::new()));
        let (tool_results_tx, tool_results) = mpsc::unbounded_channel();
        let tools = ToolRegistry::from_configs(&config.tools);

        log::info!(
            "Session controller ready: adaptor={}, transport={:?}, session={}",
            adaptor.kind().as_str(),
            transport.kind(),
            adaptor.session_id()
        );

        Ok(Self {
            gate: AudioCaptureGate::new(config.audio_input_mode),
            output_enabled: config.audio_output_mode.starts_enabled(),
            config,
            adaptor,
            transport,
            events,
            player,
            playback_events,
            recorder: None,
            frames: None,
            tools,
            tool_results_tx,
            tool_results,
            ui: None,
            ui_commands: None,
            reconnect_attempts: 0,
            reconnect_at: None,
            ended: false,
            finished: false,
        })
    }

    pub fn with_player(
        mut self,
        player: AudioPlayer,
        events: mpsc::UnboundedReceiver<PlaybackEvent>,
    ) -> Self {
        self.player = player;
        self.playback_events = events;
        self
    }

    pub fn with_recorder(mut self, recorder: AudioRecorder, frames: mpsc::Receiver<Vec<u8>>) -> Self {
        self.recorder = Some(recorder);
        self.frames = Some(frames);
        self
    }

    pub fn with_ui(mut self, ui: Arc<UiBridge>, commands: mpsc::Receiver<UiCommand>) -> Self {
        self.ui = Some(ui);
        self.ui_commands = Some(commands);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = tools;
        self
    }

    pub fn adaptor(&self) -> &ProtocolAdaptor {
        &self.adaptor
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// 当前协议下播放器应使用的采样率和淡入设置
    pub fn playback_config(&self) -> PlaybackConfig {
        self.adaptor.playback_config(&self.config)
    }

    /// 输出模式为 DISABLED 时不需要真实播放器
    pub fn output_disabled(&self) -> bool {
        self.config.audio_output_mode == OutputMode::Disabled
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn start(&mut self) {
        self.notify_status(SessionStatus::Connecting).await;
        self.transport
            .connect(self.config.access_token.as_deref())
            .await;
    }

    /// 主循环，直到会话结束、重连放弃或 Ctrl+C
    pub async fn run(mut self) -> anyhow::Result<()> {
        self.start().await;

        while !self.finished {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.handle_transport_event(event).await;
                }
                frame = recv_opt(&mut self.frames) => match frame {
                    Some(frame) => self.handle_frame(frame),
                    None => self.frames = None,
                },
                command = recv_opt(&mut self.ui_commands) => match command {
                    Some(command) => self.handle_ui_command(command).await,
                    None => self.ui_commands = None,
                },
                Some(reply) = self.tool_results.recv() => {
                    self.send(OutgoingMessage::ToolResponse(reply));
                }
                Some(event) = self.playback_events.recv() => {
                    self.handle_playback_event(event).await;
                }
                _ = wait_until(self.reconnect_at) => {
                    self.reconnect_at = None;
                    self.reconnect().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    log::info!("Ctrl+C received, shutting down");
                    break;
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    pub async fn handle_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connecting => {
                log::debug!("Transport connecting");
            }
            TransportEvent::Open => {
                log::info!("Transport open, session {}", self.adaptor.session_id());
                self.reconnect_attempts = 0;
                // 无连接的 HTTP 每个请求自带配置
                if !self.transport.is_connectionless() {
                    let config = self
                        .adaptor
                        .config_message(&self.config, self.config.access_token.as_deref());
                    self.transport.send(config);
                }
                self.start_recording().await;
                self.notify_status(SessionStatus::Connected).await;
            }
            TransportEvent::Message(wire) => {
                let messages = self.adaptor.unmarshal(&wire);
                for message in messages {
                    self.handle_incoming(message).await;
                }
            }
            TransportEvent::MessageSent(payload) => {
                log::trace!("Sent: {}", payload);
            }
            TransportEvent::Close => self.handle_close().await,
            TransportEvent::Error(error) => self.handle_error(error).await,
        }
    }

    pub async fn handle_incoming(&mut self, message: IncomingMessage) {
        match &message {
            IncomingMessage::Text(text) => {
                log::info!("Agent: {}", text.text);
            }
            IncomingMessage::Transcript(transcript) => {
                log::info!("User (final={}): {}", transcript.is_final, transcript.text);
                if transcript.interruption_signal {
                    self.player.stop();
                }
            }
            IncomingMessage::Audio(audio) => {
                if self.output_enabled {
                    self.player.add_chunk(&audio.audio);
                    self.player.play().await;
                }
                // 音频不转发给 UI
                return;
            }
            IncomingMessage::ToolCall(call) => {
                log::info!("Tool call: {}", call.tool_id.label());
                let tools = self.tools.clone();
                let results = self.tool_results_tx.clone();
                let call = call.clone();
                tokio::spawn(async move {
                    let reply = tools.run(&call).await;
                    let _ = results.send(reply);
                });
            }
            IncomingMessage::ControlSignal(signal) => {
                if signal.interruption_signal {
                    log::info!("Interrupted, stopping playback");
                    self.player.stop();
                }
                if signal.turn_completed {
                    log::debug!("Turn completed");
                }
                if signal.go_away {
                    log::info!("Server going away, reconnecting with the same session");
                    self.transport.disconnect();
                    self.reconnect_at = Some(tokio::time::Instant::now());
                }
                if signal.agent_disconnect {
                    log::info!("Agent ended the session: {:?}", signal.disconnect_reason);
                    self.forward(&message).await;
                    self.end_session().await;
                    // 没有 UI 就没人能开新会话
                    if self.ui.is_none() {
                        self.finished = true;
                    }
                    return;
                }
            }
        }
        self.forward(&message).await;
    }

    pub fn handle_frame(&mut self, frame: Vec<u8>) {
        if !self.transport.is_connected() || self.adaptor.kind() == AdaptorKind::RunSession {
            return;
        }
        let gated = self.gate.process(frame, Instant::now());
        self.send(OutgoingMessage::Audio(AudioPayload::Bytes(gated)));
    }

    pub async fn handle_ui_command(&mut self, command: UiCommand) {
        log::debug!("UI command: {:?}", command);
        match command {
            UiCommand::Text { text, images } => {
                self.send(OutgoingMessage::SessionInput(SessionInput {
                    images,
                    ..SessionInput::text(text)
                }));
            }
            UiCommand::Vars { vars } => self.send(OutgoingMessage::Vars(vars)),
            UiCommand::Talk { active } => self.gate.set_talking(active),
            UiCommand::MuteAudio { muted } => {
                if self.config.audio_output_mode == OutputMode::AlwaysOn {
                    log::warn!("Audio output is always on, ignoring mute");
                    return;
                }
                self.output_enabled = !muted;
                if muted {
                    self.player.stop();
                }
            }
            UiCommand::EndSession => self.end_session().await,
            UiCommand::NewSession => self.new_session().await,
        }
    }

    async fn handle_playback_event(&mut self, event: PlaybackEvent) {
        match event {
            PlaybackEvent::Complete => {
                log::debug!("Agent audio finished playing");
                self.send_ui(&json!({ "type": "PLAYBACK_COMPLETE" })).await;
            }
        }
    }

    async fn handle_close(&mut self) {
        // 重连已经开始，旧连接的关闭事件忽略
        if matches!(
            self.transport.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            return;
        }
        if self.ended || self.reconnect_at.is_some() {
            self.notify_status(SessionStatus::Disconnected).await;
            return;
        }
        log::warn!("Connection closed unexpectedly");
        self.schedule_reconnect().await;
    }

    async fn handle_error(&mut self, error: TransportError) {
        self.send_ui(&json!({ "type": "ERROR", "status": error.status, "message": error.message }))
            .await;
        match error.status {
            TransportStatus::AuthError => {
                // 凭证问题重连也没用
                log::error!("Authentication failed, not reconnecting: {}", error.message);
                self.notify_status(SessionStatus::Disconnected).await;
                self.finished = true;
            }
            TransportStatus::CreateError if !self.ended => self.schedule_reconnect().await,
            _ => {}
        }
    }

    async fn schedule_reconnect(&mut self) {
        let policy = &self.config.reconnect;
        if self.reconnect_attempts >= policy.max_attempts {
            log::error!("Giving up after {} reconnect attempts", self.reconnect_attempts);
            self.notify_status(SessionStatus::Disconnected).await;
            self.finished = true;
            return;
        }
        self.reconnect_attempts += 1;
        let delay = policy.delay(self.reconnect_attempts);
        log::info!(
            "Reconnecting in {:?} (attempt {}/{})",
            delay,
            self.reconnect_attempts,
            policy.max_attempts
        );
        self.reconnect_at = Some(tokio::time::Instant::now() + delay);
        self.notify_status(SessionStatus::Reconnecting).await;
    }

    async fn reconnect(&mut self) {
        self.notify_status(SessionStatus::Connecting).await;
        self.transport
            .connect(self.config.access_token.as_deref())
            .await;
    }

    async fn end_session(&mut self) {
        if let Some(goodbye) = self.adaptor.end_session() {
            self.transport.send(goodbye);
        }
        let session_id = self.adaptor.session_id().to_string();
        self.transport.set_session_id(&session_id);
        self.ended = true;
        self.reconnect_at = None;
        self.player.stop();
        self.stop_recording().await;
        self.transport.disconnect();
        self.notify_status(SessionStatus::Ended).await;
    }

    async fn new_session(&mut self) {
        self.player.stop();
        self.transport.disconnect();
        self.adaptor.new_session();
        let session_id = self.adaptor.session_id().to_string();
        self.transport.set_session_id(&session_id);
        log::info!("Starting new session {}", session_id);
        self.ended = false;
        self.reconnect_attempts = 0;
        self.reconnect_at = None;
        self.start().await;
    }

    async fn start_recording(&self) {
        if self.adaptor.kind() == AdaptorKind::RunSession {
            return;
        }
        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.start().await {
                log::error!("Failed to start recording: {}", e);
            }
        }
    }

    async fn stop_recording(&self) {
        if let Some(recorder) = &self.recorder {
            recorder.stop().await;
        }
    }

    fn send(&self, message: OutgoingMessage) {
        for payload in self.adaptor.marshal(&message) {
            self.transport.send(payload);
        }
    }

    async fn forward(&self, message: &IncomingMessage) {
        if let Some(ui) = &self.ui {
            if let Err(e) = ui.send_json(message).await {
                log::warn!("Failed to send to UI: {}", e);
            }
        }
    }

    async fn send_ui(&self, value: &Value) {
        if let Some(ui) = &self.ui {
            if let Err(e) = ui.send_json(value).await {
                log::warn!("Failed to send to UI: {}", e);
            }
        }
    }

    async fn notify_status(&self, status: SessionStatus) {
        let message = status_message(status, self.adaptor.session_id());
        self.send_ui(&message).await;
    }

    async fn shutdown(&mut self) {
        self.player.stop();
        self.stop_recording().await;
        self.transport.disconnect();
        log::info!("Session controller stopped");
    }
}

async fn recv_opt<T>(rx: &mut Option<mpsc::Receiver<T>>) -> Option<T> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
