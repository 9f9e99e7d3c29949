//! Socket plumbing shared by the persistent transports.
//!
//! One pump task per live channel moves frames between the socket and the
//! listeners. Every channel carries a generation number; a pump only touches
//! shared state while its generation is current, so a superseded channel can
//! never clobber the one that replaced it.

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::{self, Message, http::Request};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use super::listeners::{LazyListeners, ListenerProvider, TransportListeners};
use crate::error::{TransportError, TransportStatus};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Erroring,
}

/// Turns one text frame into the message delivered to `on_message`.
/// `Ok(None)` swallows the frame.
pub(crate) type FrameDecoder = fn(&str) -> Result<Option<Value>, String>;

struct Channel {
    generation: u64,
    state: ConnectionState,
    outbound: Option<mpsc::UnboundedSender<Value>>,
    task: Option<JoinHandle<()>>,
}

pub(crate) struct DuplexSocket {
    name: &'static str,
    listeners: Arc<LazyListeners>,
    channel: Arc<Mutex<Channel>>,
    decode: FrameDecoder,
}

impl DuplexSocket {
    pub(crate) fn new(name: &'static str, provider: ListenerProvider, decode: FrameDecoder) -> Self {
        Self {
            name,
            listeners: Arc::new(LazyListeners::new(provider)),
            channel: Arc::new(Mutex::new(Channel {
                generation: 0,
                state: ConnectionState::Disconnected,
                outbound: None,
                task: None,
            })),
            decode,
        }
    }

    pub(crate) fn listeners(&self) -> &TransportListeners {
        self.listeners.get()
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.channel.lock().state
    }

    pub(crate) fn is_connected(&self) -> bool {
        let channel = self.channel.lock();
        channel.state == ConnectionState::Connected && channel.outbound.is_some()
    }

    pub(crate) async fn connect(&self, request: Request<()>) {
        let listeners = self.listeners.get();
        let generation = {
            let mut channel = self.channel.lock();
            if channel.state == ConnectionState::Connected && channel.outbound.is_some() {
                drop(channel);
                log::warn!("{}: channel is already open", self.name);
                listeners.open();
                return;
            }
            if let Some(stale) = channel.task.take() {
                log::info!("{}: closing stale channel before reconnect", self.name);
                stale.abort();
            }
            channel.outbound = None;
            channel.generation += 1;
            channel.state = ConnectionState::Connecting;
            channel.generation
        };

        log::info!("{}: connecting to {}", self.name, request.uri());
        listeners.connecting();

        let socket = match connect_async(request).await {
            Ok((socket, _)) => socket,
            Err(e) => {
                let error = handshake_error(self.name, e);
                self.settle(generation, ConnectionState::Disconnected);
                listeners.error(error);
                return;
            }
        };

        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut channel = self.channel.lock();
            if channel.generation != generation {
                log::warn!("{}: connection superseded during handshake", self.name);
                return;
            }
            channel.state = ConnectionState::Connected;
            channel.outbound = Some(tx);
        }
        log::info!("{}: channel opened", self.name);
        listeners.open();

        let pump = tokio::spawn(pump(
            socket,
            rx,
            generation,
            self.channel.clone(),
            self.listeners.clone(),
            self.decode,
            self.name,
        ));
        let mut channel = self.channel.lock();
        if channel.generation == generation {
            channel.task = Some(pump);
        } else {
            pump.abort();
        }
    }

    /// Close the live channel, if any. `on_close` fires once the pump stops.
    pub(crate) fn disconnect(&self) {
        let mut channel = self.channel.lock();
        match channel.state {
            ConnectionState::Connecting => {
                log::info!("{}: abandoning connection attempt", self.name);
                channel.generation += 1;
                channel.state = ConnectionState::Disconnected;
            }
            _ if channel.outbound.is_some() => {
                log::info!("{}: closing channel", self.name);
                channel.outbound = None;
                channel.state = ConnectionState::Disconnected;
            }
            _ => log::warn!("{}: no active channel to disconnect", self.name),
        }
    }

    pub(crate) fn send(&self, payload: Value) {
        let listeners = self.listeners.get();
        let outbound = {
            let channel = self.channel.lock();
            match channel.state {
                ConnectionState::Connected => channel.outbound.clone(),
                _ => None,
            }
        };
        let Some(outbound) = outbound else {
            log::warn!("{}: cannot send, channel is not open", self.name);
            listeners.error(TransportError::not_connected());
            return;
        };
        if outbound.send(payload).is_err() {
            listeners.error(TransportError::new(
                TransportStatus::SendError,
                "Failed to send message",
            ));
        }
    }

    fn settle(&self, generation: u64, state: ConnectionState) {
        let mut channel = self.channel.lock();
        if channel.generation == generation {
            channel.state = state;
        }
    }
}

impl Drop for DuplexSocket {
    fn drop(&mut self) {
        if let Some(task) = self.channel.lock().task.take() {
            task.abort();
        }
    }
}

fn handshake_error(name: &str, error: tungstenite::Error) -> TransportError {
    if let tungstenite::Error::Http(response) = &error {
        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return TransportError::new(
                TransportStatus::AuthError,
                format!("{} handshake rejected with HTTP {}", name, status),
            );
        }
    }
    TransportError::new(
        TransportStatus::CreateError,
        format!("Failed to create or open {}: {}", name, error),
    )
}

async fn pump(
    socket: Socket,
    mut outbound: mpsc::UnboundedReceiver<Value>,
    generation: u64,
    channel: Arc<Mutex<Channel>>,
    listeners: Arc<LazyListeners>,
    decode: FrameDecoder,
    name: &'static str,
) {
    let listeners = listeners.get();
    let (mut write, mut read) = socket.split();
    let fail = |error: TransportError| {
        let mut ch = channel.lock();
        if ch.generation == generation {
            ch.state = ConnectionState::Erroring;
        }
        drop(ch);
        listeners.error(error);
    };

    loop {
        tokio::select! {
            frame = read.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(e) => {
                            fail(TransportError::new(TransportStatus::StreamError, format!("Binary frame is not UTF-8: {}", e)));
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        log::info!("{}: server closed channel: {:?}", name, frame);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        fail(TransportError::new(TransportStatus::StreamError, e.to_string()));
                        break;
                    }
                    None => break,
                };
                match decode(&text) {
                    Ok(Some(message)) => listeners.message(message),
                    Ok(None) => {}
                    Err(e) => fail(TransportError::new(TransportStatus::StreamError, e)),
                }
            }
            payload = outbound.recv() => match payload {
                Some(payload) => {
                    if let Err(e) = write.send(Message::Text(payload.to_string().into())).await {
                        fail(TransportError::new(TransportStatus::SendError, format!("Failed to send message: {}", e)));
                        break;
                    }
                    listeners.message_sent(&payload);
                }
                None => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }
    }

    let current = {
        let mut ch = channel.lock();
        if ch.generation == generation {
            ch.state = ConnectionState::Disconnected;
            ch.outbound = None;
            ch.task = None;
            true
        } else {
            false
        }
    };
    log::info!("{}: channel closed", name);
    if current {
        listeners.close();
    }
}
