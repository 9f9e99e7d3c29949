use bidi_agent_client::audio::{
    AudioPlayer, AudioRecorder, PlaybackClock, SystemClock, WavFileSink, WavFileSource,
};
use bidi_agent_client::config::AgentConfig;
use bidi_agent_client::controller::SessionController;
use bidi_agent_client::ui_bridge::{UiBridge, UiCommand};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(name = "bidi-agent", about = "Bidirectional conversational agent session client")]
struct Args {
    /// 配置文件路径（默认读取当前目录下的 config.toml，可不存在）
    #[arg(short, long)]
    config: Option<String>,

    /// Agent / app 资源路径，或 ws(s):// 外部运行时地址
    #[arg(short, long, env = "BIDI_AGENT_PEER")]
    peer: Option<String>,

    /// OAuth access token
    #[arg(short, long, env = "BIDI_AGENT_TOKEN")]
    token: Option<String>,

    /// 用 WAV 文件代替麦克风
    #[arg(long)]
    input_wav: Option<PathBuf>,

    /// agent 语音写入 WAV 文件
    #[arg(long)]
    output_wav: Option<PathBuf>,

    /// 不启动 UI 桥
    #[arg(long)]
    no_ui: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    let args = Args::parse();

    // 加载配置，命令行参数覆盖配置文件
    let mut config = AgentConfig::load(args.config.as_deref())?;
    if let Some(peer) = args.peer {
        config.peer_id = peer;
        config = config.normalize()?;
    }
    if args.token.is_some() {
        config.access_token = args.token;
    }
    if args.input_wav.is_some() {
        config.audio.input_wav = args.input_wav;
    }
    if args.output_wav.is_some() {
        config.audio.output_wav = args.output_wav;
    }
    if args.no_ui {
        config.ui.enabled = false;
    }

    let audio_files = config.audio.clone();
    let input_mode = config.audio_input_mode;
    let ui_config = config.ui.clone();

    let mut controller = SessionController::new(config)?;

    // 播放器：有输出文件就写 WAV，否则静音
    let clock: Arc<dyn PlaybackClock> = Arc::new(SystemClock::new());
    match &audio_files.output_wav {
        Some(path) if !controller.output_disabled() => {
            let playback = controller.playback_config();
            let sink = WavFileSink::create(path, playback.sample_rate)?;
            log::info!("Writing agent audio to {}", path.display());
            let (player, events) = AudioPlayer::new(playback, clock, Box::new(sink));
            controller = controller.with_player(player, events);
        }
        _ => {
            let (player, events) = AudioPlayer::silent(clock);
            controller = controller.with_player(player, events);
        }
    }

    // 录音：WAV 文件模拟麦克风
    if let Some(path) = &audio_files.input_wav {
        if input_mode.is_voice() {
            let (recorder, frames) = AudioRecorder::new(Box::new(WavFileSource::new(path)));
            controller = controller.with_recorder(recorder, frames);
        } else {
            log::warn!("Audio input mode is NONE, ignoring {}", path.display());
        }
    }

    // 启动UI桥，与UI进程通信
    if ui_config.enabled {
        let (tx_ui, rx_ui) = mpsc::channel::<UiCommand>(100);
        let ui_bridge = Arc::new(UiBridge::new(&ui_config, tx_ui).await?);
        // clone一份，用于异步任务，控制器里还要用它发消息
        let ui_bridge_clone = ui_bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = ui_bridge_clone.run().await {
                log::error!("UiBridge error: {}", e);
            }
        });
        controller = controller.with_ui(ui_bridge, rx_ui);
    }

    controller.run().await
}
