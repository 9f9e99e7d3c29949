//! Capture sources standing in for a microphone device.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::Duration;
use tokio::time::Instant;

use super::capture::CAPTURE_SAMPLE_RATE;
use crate::codec;

/// Samples per delivered frame (128 ms at 16 kHz).
pub const FRAME_SAMPLES: usize = 2048;

#[async_trait]
pub trait CaptureSource: Send {
    async fn open(&mut self) -> Result<()>;

    /// Next PCM16 LE mono frame, `None` once the source is exhausted.
    async fn next_frame(&mut self) -> Option<Vec<u8>>;

    fn close(&mut self) {}
}

/// Streams a WAV file in real time.
pub struct WavFileSource {
    path: PathBuf,
    samples: VecDeque<i16>,
    frame_duration: Duration,
    next_due: Option<Instant>,
}

impl WavFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            samples: VecDeque::new(),
            frame_duration: Duration::from_secs_f64(
                FRAME_SAMPLES as f64 / CAPTURE_SAMPLE_RATE as f64,
            ),
            next_due: None,
        }
    }
}

#[async_trait]
impl CaptureSource for WavFileSource {
    async fn open(&mut self) -> Result<()> {
        let path = self.path.clone();
        let (spec, samples) = tokio::task::spawn_blocking(move || -> Result<_> {
            let mut reader = hound::WavReader::open(&path)
                .with_context(|| format!("Failed to open {}", path.display()))?;
            let spec = reader.spec();
            let samples = reader.samples::<i16>().collect::<Result<Vec<_>, _>>()?;
            Ok((spec, samples))
        })
        .await??;

        if spec.sample_rate != CAPTURE_SAMPLE_RATE {
            log::warn!(
                "{} is {}Hz, expected {}Hz; streaming unchanged",
                self.path.display(),
                spec.sample_rate,
                CAPTURE_SAMPLE_RATE
            );
        }
        // keep the first channel only
        let channels = spec.channels.max(1) as usize;
        self.samples = samples.into_iter().step_by(channels).collect();
        self.frame_duration =
            Duration::from_secs_f64(FRAME_SAMPLES as f64 / spec.sample_rate.max(1) as f64);
        self.next_due = None;
        log::info!(
            "Capture source {} opened: {} samples",
            self.path.display(),
            self.samples.len()
        );
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        if self.samples.is_empty() {
            return None;
        }
        let due = *self.next_due.get_or_insert_with(Instant::now);
        tokio::time::sleep_until(due).await;
        self.next_due = Some(due + self.frame_duration);

        let take = self.samples.len().min(FRAME_SAMPLES);
        let frame: Vec<i16> = self.samples.drain(..take).collect();
        Some(codec::i16_to_pcm16(&frame))
    }

    fn close(&mut self) {
        self.samples.clear();
        self.next_due = None;
    }
}

/// Replays a fixed list of frames without pacing.
pub struct MemorySource {
    frames: VecDeque<Vec<u8>>,
}

impl MemorySource {
    pub fn new(frames: Vec<Vec<u8>>) -> Self {
        Self {
            frames: frames.into(),
        }
    }
}

#[async_trait]
impl CaptureSource for MemorySource {
    async fn open(&mut self) -> Result<()> {
        Ok(())
    }

    async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.frames.pop_front()
    }

    fn close(&mut self) {
        self.frames.clear();
    }
}
