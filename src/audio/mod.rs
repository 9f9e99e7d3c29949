//! audio - Streamed playback and microphone capture
//!
//! Playback turns PCM16 chunks (raw or base64, optionally WAV wrapped) into a
//! gapless clip timeline. Capture gates microphone frames by voice activity
//! and hold-to-talk state.

pub mod capture;
pub mod clock;
pub mod header;
pub mod playback;
pub mod sink;
pub mod source;

pub use capture::{AudioCaptureGate, AudioRecorder};
pub use clock::{ManualClock, PlaybackClock, SystemClock};
pub use playback::{AudioPlaybackEngine, AudioPlayer, PlaybackConfig, PlaybackEvent};
pub use sink::{MemorySink, NullSink, PlaybackSink, WavFileSink};
pub use source::{CaptureSource, MemorySource, WavFileSource};
