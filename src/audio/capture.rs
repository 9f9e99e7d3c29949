//! Microphone side: voice-activity gate and the recorder feeding it.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::source::CaptureSource;
use crate::codec;
use crate::config::InputMode;

/// RMS energy above which a frame counts as voice.
pub const VAD_THRESHOLD: f32 = 0.01;
/// Voice stays active this long after the last loud frame.
pub const VAD_TIMEOUT: Duration = Duration::from_millis(200);
/// Capture sample rate.
pub const CAPTURE_SAMPLE_RATE: u32 = 16000;

/// Energy heuristic voice gate with hold-to-talk support.
#[derive(Debug, Clone)]
pub struct AudioCaptureGate {
    hold_to_talk: bool,
    talking: bool,
    voice_active: bool,
    last_voice_at: Option<Instant>,
}

impl AudioCaptureGate {
    pub fn new(mode: InputMode) -> Self {
        let hold_to_talk = mode.is_hold_to_talk();
        Self {
            hold_to_talk,
            talking: !hold_to_talk,
            voice_active: false,
            last_voice_at: None,
        }
    }

    pub fn is_hold_to_talk(&self) -> bool {
        self.hold_to_talk
    }

    pub fn is_talking(&self) -> bool {
        self.talking
    }

    pub fn set_talking(&mut self, talking: bool) {
        self.talking = talking;
    }

    pub fn voice_active(&self) -> bool {
        self.voice_active
    }

    /// Gate one PCM16 frame captured at `now`, returning what should be sent.
    pub fn process(&mut self, frame: Vec<u8>, now: Instant) -> Vec<u8> {
        if !self.talking {
            self.voice_active = false;
            return codec::silence_frame();
        }

        if codec::rms(&frame) > VAD_THRESHOLD {
            self.last_voice_at = Some(now);
            self.voice_active = true;
        } else if self
            .last_voice_at
            .is_some_and(|last| now.saturating_duration_since(last) > VAD_TIMEOUT)
        {
            self.voice_active = false;
        }
        frame
    }
}

#[derive(Default)]
struct StartGuard {
    starting: bool,
    stop_requested: bool,
}

/// Pulls frames from a [`CaptureSource`] and delivers them on a channel.
pub struct AudioRecorder {
    source: Arc<tokio::sync::Mutex<Box<dyn CaptureSource>>>,
    frames: mpsc::Sender<Vec<u8>>,
    muted: Arc<AtomicBool>,
    recording: Arc<AtomicBool>,
    guard: Mutex<StartGuard>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl AudioRecorder {
    pub fn new(source: Box<dyn CaptureSource>) -> (Self, mpsc::Receiver<Vec<u8>>) {
        let (tx, rx) = mpsc::channel(64);
        let recorder = Self {
            source: Arc::new(tokio::sync::Mutex::new(source)),
            frames: tx,
            muted: Arc::new(AtomicBool::new(false)),
            recording: Arc::new(AtomicBool::new(false)),
            guard: Mutex::new(StartGuard::default()),
            pump: Mutex::new(None),
        };
        (recorder, rx)
    }

    pub fn is_recording(&self) -> bool {
        self.recording.load(Ordering::SeqCst)
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::SeqCst)
    }

    /// Open the source and start streaming frames.
    pub async fn start(&self) -> anyhow::Result<()> {
        {
            let mut guard = self.guard.lock();
            if guard.starting || self.is_recording() {
                return Ok(());
            }
            guard.starting = true;
        }

        let opened = self.source.lock().await.open().await;

        let stop_requested = {
            let mut guard = self.guard.lock();
            guard.starting = false;
            std::mem::take(&mut guard.stop_requested)
        };
        opened?;
        if stop_requested {
            log::debug!("stop requested while opening capture source");
            self.source.lock().await.close();
            return Ok(());
        }

        self.recording.store(true, Ordering::SeqCst);
        let source = self.source.clone();
        let frames = self.frames.clone();
        let muted = self.muted.clone();
        let recording = self.recording.clone();
        let handle = tokio::spawn(async move {
            loop {
                let frame = source.lock().await.next_frame().await;
                let Some(frame) = frame else {
                    log::info!("capture source exhausted");
                    break;
                };
                if muted.load(Ordering::SeqCst) {
                    continue;
                }
                if frames.send(frame).await.is_err() {
                    break;
                }
            }
            recording.store(false, Ordering::SeqCst);
        });
        if let Some(previous) = self.pump.lock().replace(handle) {
            previous.abort();
        }
        log::info!("Recording started at {}Hz", CAPTURE_SAMPLE_RATE);
        Ok(())
    }

    /// Stop capturing. Deferred until an in-flight `start` completes.
    pub async fn stop(&self) {
        {
            let mut guard = self.guard.lock();
            if guard.starting {
                guard.stop_requested = true;
                return;
            }
        }
        if let Some(handle) = self.pump.lock().take() {
            handle.abort();
        }
        if self.recording.swap(false, Ordering::SeqCst) {
            self.source.lock().await.close();
            log::info!("Recording stopped");
        }
    }

    /// Frames are read but not delivered while muted.
    pub fn mute(&self) {
        self.muted.store(true, Ordering::SeqCst);
    }

    pub fn unmute(&self) {
        self.muted.store(false, Ordering::SeqCst);
    }
}
