//! Destinations for scheduled audio clips.

use anyhow::Result;
use hound::{SampleFormat, WavSpec, WavWriter};
use parking_lot::Mutex;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::sync::Arc;

use crate::codec;

/// Gain the fade-in starts from.
pub const FADE_IN_FLOOR: f32 = 0.0001;
/// Length of the fade-in ramp in seconds.
pub const FADE_IN_SECONDS: f64 = 0.05;

/// One buffer placed on the playback timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledClip {
    pub start: f64,
    pub duration: f64,
    /// Number of queued chunks concatenated into this clip.
    pub chunks: usize,
    pub fade_in: bool,
    pub samples: Vec<f32>,
}

impl ScheduledClip {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }
}

pub trait PlaybackSink: Send {
    fn play(&mut self, clip: &ScheduledClip);

    /// Playback was cut or finished; drop anything not yet rendered.
    fn stop(&mut self) {}
}

/// Discards all audio.
pub struct NullSink;

impl PlaybackSink for NullSink {
    fn play(&mut self, _clip: &ScheduledClip) {}
}

/// Timing record of one scheduled clip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClipTiming {
    pub start: f64,
    pub duration: f64,
    pub chunks: usize,
    pub fade_in: bool,
}

/// Keeps the timing of every clip it receives. Cloning shares the log.
#[derive(Clone, Default)]
pub struct MemorySink {
    clips: Arc<Mutex<Vec<ClipTiming>>>,
    stops: Arc<Mutex<usize>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clips(&self) -> Vec<ClipTiming> {
        self.clips.lock().clone()
    }

    pub fn stop_count(&self) -> usize {
        *self.stops.lock()
    }
}

impl PlaybackSink for MemorySink {
    fn play(&mut self, clip: &ScheduledClip) {
        self.clips.lock().push(ClipTiming {
            start: clip.start,
            duration: clip.duration,
            chunks: clip.chunks,
            fade_in: clip.fade_in,
        });
    }

    fn stop(&mut self) {
        *self.stops.lock() += 1;
    }
}

/// Gain at `t` seconds into an exponential ramp from the floor to unity.
pub fn fade_in_gain(t: f64) -> f32 {
    if t >= FADE_IN_SECONDS {
        return 1.0;
    }
    let progress = (t.max(0.0) / FADE_IN_SECONDS) as f32;
    FADE_IN_FLOOR * (1.0 / FADE_IN_FLOOR).powf(progress)
}

/// Renders the playback timeline into a mono PCM16 WAV file.
///
/// Time between clips is written as silence, so the file has the same
/// timing a speaker would have produced.
pub struct WavFileSink {
    writer: Option<WavWriter<BufWriter<File>>>,
    sample_rate: u32,
    origin: Option<f64>,
    written: u64,
}

impl WavFileSink {
    pub fn create(path: impl AsRef<Path>, sample_rate: u32) -> Result<Self> {
        let spec = WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        };
        let writer = WavWriter::create(path.as_ref(), spec)?;
        log::info!(
            "Writing playback to {} at {}Hz",
            path.as_ref().display(),
            sample_rate
        );
        Ok(Self {
            writer: Some(writer),
            sample_rate,
            origin: None,
            written: 0,
        })
    }

    fn write_clip(&mut self, clip: &ScheduledClip) -> Result<()> {
        let Some(writer) = self.writer.as_mut() else {
            return Ok(());
        };
        let origin = *self.origin.get_or_insert(clip.start);
        let rate = self.sample_rate as f64;
        let target = ((clip.start - origin) * rate).round().max(0.0) as u64;

        while self.written < target {
            writer.write_sample(0i16)?;
            self.written += 1;
        }

        for (i, sample) in clip.samples.iter().enumerate() {
            let gain = if clip.fade_in {
                fade_in_gain(i as f64 / rate)
            } else {
                1.0
            };
            writer.write_sample(codec::f32_to_i16(sample * gain))?;
        }
        self.written += clip.samples.len() as u64;
        writer.flush()?;
        Ok(())
    }

    pub fn finalize(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.finalize()?;
        }
        Ok(())
    }
}

impl PlaybackSink for WavFileSink {
    fn play(&mut self, clip: &ScheduledClip) {
        if let Err(e) = self.write_clip(clip) {
            log::error!("Failed to write audio clip: {}", e);
        }
    }
}

impl Drop for WavFileSink {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            log::error!("Failed to finalize wav output: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clip(start: f64, samples: Vec<f32>, fade_in: bool) -> ScheduledClip {
        ScheduledClip {
            start,
            duration: samples.len() as f64 / 1000.0,
            chunks: 1,
            fade_in,
            samples,
        }
    }

    #[test]
    fn fade_ramp_endpoints() {
        assert!((fade_in_gain(0.0) - FADE_IN_FLOOR).abs() < 1e-7);
        assert_eq!(fade_in_gain(0.05), 1.0);
        assert_eq!(fade_in_gain(1.0), 1.0);
        let mid = fade_in_gain(0.025);
        assert!((mid - 0.01).abs() < 1e-4);
    }

    #[test]
    fn wav_sink_pads_gaps_with_silence() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.wav");
        {
            let mut sink = WavFileSink::create(&path, 1000).unwrap();
            sink.play(&clip(10.0, vec![0.5; 10], false));
            // 5 samples of silence between the clips
            sink.play(&clip(10.015, vec![-0.5; 10], false));
            sink.finalize().unwrap();
        }
        let mut reader = hound::WavReader::open(&path).unwrap();
        assert_eq!(reader.spec().sample_rate, 1000);
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert_eq!(samples.len(), 25);
        assert_eq!(samples[0], 16384);
        assert_eq!(&samples[10..15], &[0; 5]);
        assert_eq!(samples[15], -16384);
    }

    #[test]
    fn wav_sink_applies_fade() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fade.wav");
        let mut sink = WavFileSink::create(&path, 1000).unwrap();
        sink.play(&clip(0.0, vec![1.0; 100], true));
        sink.finalize().unwrap();
        let mut reader = hound::WavReader::open(&path).unwrap();
        let samples: Vec<i16> = reader.samples::<i16>().map(|s| s.unwrap()).collect();
        assert!(samples[0].abs() < 10);
        assert!(samples[10] < samples[40]);
        assert_eq!(samples[99], i16::MAX);
    }

    #[test]
    fn memory_sink_shares_log() {
        let sink = MemorySink::new();
        let mut handle = sink.clone();
        handle.play(&clip(1.0, vec![0.0; 4], true));
        handle.stop();
        assert_eq!(sink.clips().len(), 1);
        assert!(sink.clips()[0].fade_in);
        assert_eq!(sink.stop_count(), 1);
    }
}
