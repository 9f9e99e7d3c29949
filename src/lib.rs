//! Client engine for bidirectional, streaming conversational-agent sessions.
//!
//! A [`controller::SessionController`] wires a [`transport::Transport`] to a
//! [`adaptor::ProtocolAdaptor`], plays agent audio through
//! [`audio::AudioPlayer`], gates microphone frames with
//! [`audio::AudioCaptureGate`] and answers tool calls from a
//! [`tools::ToolRegistry`].

pub mod adaptor;
pub mod audio;
pub mod codec;
pub mod config;
pub mod controller;
pub mod error;
pub mod message;
pub mod peer;
pub mod session;
pub mod tools;
pub mod transport;
pub mod ui_bridge;
