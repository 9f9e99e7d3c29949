use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::config::UiBridgeConfig;

/// UI 进程发来的命令，JSON 中以 type 区分
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiCommand {
    Text {
        text: String,
        #[serde(default)]
        images: Vec<String>,
    },
    Vars {
        vars: Map<String, Value>,
    },
    /// 按住说话
    Talk {
        active: bool,
    },
    MuteAudio {
        muted: bool,
    },
    EndSession,
    NewSession,
}

/// 会话状态通知
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Connected,
    Disconnected,
    Reconnecting,
    Ended,
}

pub fn status_message(status: SessionStatus, session_id: &str) -> Value {
    json!({ "type": "STATUS", "status": status, "sessionId": session_id })
}

// UI进程和Core进程通过本地UDP通信，地址在配置中指定
pub struct UiBridge {
    socket: Arc<UdpSocket>,
    target_addr: String,
    buffer_size: usize,
    tx: mpsc::Sender<UiCommand>,
}

impl UiBridge {
    pub async fn new(config: &UiBridgeConfig, tx: mpsc::Sender<UiCommand>) -> anyhow::Result<Self> {
        let socket = UdpSocket::bind(&config.local_addr).await?;
        log::info!(
            "UI bridge listening on {}, sending to {}",
            socket.local_addr()?,
            config.remote_addr
        );
        Ok(Self {
            socket: Arc::new(socket),
            target_addr: config.remote_addr.clone(),
            buffer_size: config.buffer_size.max(512),
            tx,
        })
    }

    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub async fn run(&self) -> anyhow::Result<()> {
        let mut buf = vec![0u8; self.buffer_size];
        loop {
            let (len, from) = self.socket.recv_from(&mut buf).await?;
            if len == 0 {
                continue;
            }
            let command = match serde_json::from_slice::<UiCommand>(&buf[..len]) {
                Ok(command) => command,
                Err(e) => {
                    log::warn!("Ignoring UI datagram from {}: {}", from, e);
                    continue;
                }
            };
            if self.tx.send(command).await.is_err() {
                log::info!("UI command receiver dropped, bridge stopping");
                break;
            }
        }
        Ok(())
    }

    pub async fn send_message(&self, msg: &str) -> anyhow::Result<()> {
        self.socket
            .send_to(msg.as_bytes(), &self.target_addr)
            .await?;
        Ok(())
    }

    pub async fn send_json<T: Serialize>(&self, value: &T) -> anyhow::Result<()> {
        self.send_message(&serde_json::to_string(value)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::IncomingMessage;

    #[test]
    fn commands_parse() {
        let cmd: UiCommand = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(
            cmd,
            UiCommand::Text {
                text: "hi".into(),
                images: vec![]
            }
        );
        let cmd: UiCommand = serde_json::from_str(r#"{"type":"talk","active":true}"#).unwrap();
        assert_eq!(cmd, UiCommand::Talk { active: true });
        let cmd: UiCommand = serde_json::from_str(r#"{"type":"new_session"}"#).unwrap();
        assert_eq!(cmd, UiCommand::NewSession);
        assert!(serde_json::from_str::<UiCommand>(r#"{"type":"dance"}"#).is_err());
    }

    #[tokio::test]
    async fn datagrams_round_trip() {
        let ui = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let config = UiBridgeConfig {
            enabled: true,
            local_addr: "127.0.0.1:0".into(),
            remote_addr: ui.local_addr().unwrap().to_string(),
            buffer_size: 4096,
        };
        let (tx, mut rx) = mpsc::channel(8);
        let bridge = Arc::new(UiBridge::new(&config, tx).await.unwrap());
        let bridge_addr = bridge.local_addr().unwrap();
        let runner = bridge.clone();
        tokio::spawn(async move { runner.run().await });

        ui.send_to(b"not json", bridge_addr).await.unwrap();
        ui.send_to(br#"{"type":"mute_audio","muted":true}"#, bridge_addr)
            .await
            .unwrap();
        assert_eq!(rx.recv().await, Some(UiCommand::MuteAudio { muted: true }));

        bridge.send_json(&IncomingMessage::text("hello")).await.unwrap();
        let mut buf = [0u8; 1024];
        let (len, _) = ui.recv_from(&mut buf).await.unwrap();
        let value: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(value, json!({"type": "TEXT", "text": "hello"}));

        bridge
            .send_json(&status_message(SessionStatus::Connected, "s1"))
            .await
            .unwrap();
        let (len, _) = ui.recv_from(&mut buf).await.unwrap();
        let value: Value = serde_json::from_slice(&buf[..len]).unwrap();
        assert_eq!(
            value,
            json!({"type": "STATUS", "status": "connected", "sessionId": "s1"})
        );
    }
}
