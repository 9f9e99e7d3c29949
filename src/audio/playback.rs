//! Gapless streamed playback.
//!
//! [`AudioPlaybackEngine`] is the synchronous core: it decodes chunks, queues
//! sample buffers and places them on the clock timeline back to back.
//! [`AudioPlayer`] drives it from a periodic tokio task and reports completion
//! on a channel.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::clock::PlaybackClock;
use super::header::{HeaderDetector, HeaderState};
use super::sink::{NullSink, PlaybackSink, ScheduledClip};
use crate::codec;
use crate::message::AudioPayload;

/// Inputs larger than this are split before decoding.
pub const MAX_CHUNK_LENGTH: usize = 10240;
/// How far ahead of the clock audio is scheduled, in seconds.
pub const SCHEDULE_AHEAD_SECONDS: f64 = 0.3;
/// Queued buffers concatenated into one clip at most.
pub const MAX_CHUNKS_PER_CLIP: usize = 10;
/// Delay between `play()` and the first clip, in seconds.
pub const START_DELAY_SECONDS: f64 = 0.2;
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlaybackConfig {
    pub sample_rate: u32,
    pub playback_rate: f64,
    pub fade_in: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16000,
            playback_rate: 1.0,
            fade_in: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// The last scheduled clip finished and nothing is queued.
    Complete,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickOutcome {
    pub scheduled: usize,
    pub completed: bool,
}

pub struct AudioPlaybackEngine {
    config: PlaybackConfig,
    sink: Box<dyn PlaybackSink>,
    header: HeaderDetector,
    queue: VecDeque<Vec<f32>>,
    /// `None` until playback starts.
    next_play_time: Option<f64>,
    /// (start, end) of clips handed to the sink and not yet finished.
    pending: VecDeque<(f64, f64)>,
    playing: bool,
    chunks_played: u64,
    clips_played: u64,
    chunk_counter: u64,
}

impl AudioPlaybackEngine {
    pub fn new(config: PlaybackConfig, sink: Box<dyn PlaybackSink>) -> Self {
        Self {
            config,
            sink,
            header: HeaderDetector::default(),
            queue: VecDeque::new(),
            next_play_time: None,
            pending: VecDeque::new(),
            playing: false,
            chunks_played: 0,
            clips_played: 0,
            chunk_counter: 0,
        }
    }

    pub fn config(&self) -> PlaybackConfig {
        self.config
    }

    pub fn set_fade_in(&mut self, fade_in: bool) {
        self.config.fade_in = fade_in;
    }

    pub fn next_play_time(&self) -> Option<f64> {
        self.next_play_time
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn clips_played(&self) -> u64 {
        self.clips_played
    }

    pub fn chunks_played(&self) -> u64 {
        self.chunks_played
    }

    pub fn header_state(&self) -> HeaderState {
        self.header.state()
    }

    /// Decode and enqueue a chunk. Returns the number of buffers queued.
    pub fn add_chunk(&mut self, payload: &AudioPayload) -> usize {
        let before = self.queue.len();
        match payload {
            AudioPayload::Bytes(bytes) => {
                for segment in bytes.chunks(MAX_CHUNK_LENGTH) {
                    self.push_segment(segment);
                }
            }
            AudioPayload::Base64(text) => {
                for segment in text.as_bytes().chunks(MAX_CHUNK_LENGTH) {
                    let decoded = std::str::from_utf8(segment)
                        .map_err(|e| e.to_string())
                        .and_then(|s| codec::decode_base64(s).map_err(|e| e.to_string()));
                    match decoded {
                        Ok(bytes) => self.push_segment(&bytes),
                        Err(e) => log::error!("Dropping undecodable audio chunk: {}", e),
                    }
                }
            }
        }
        self.queue.len() - before
    }

    fn push_segment(&mut self, bytes: &[u8]) {
        if let Some(samples) = self.decode_segment(bytes) {
            self.queue.push_back(samples);
        }
    }

    fn decode_segment(&mut self, bytes: &[u8]) -> Option<Vec<f32>> {
        let header = self.header.observe(bytes);
        let body = if header > 0 {
            if bytes.len() <= header {
                log::debug!("Chunk of {} bytes holds only a header, skipping", bytes.len());
                return None;
            }
            &bytes[header..]
        } else {
            bytes
        };

        let samples = codec::pcm16_to_f32(body);
        if samples.is_empty() {
            log::debug!("Chunk length is 0, skipping");
            return None;
        }
        self.chunk_counter += 1;
        Some(samples)
    }

    /// Begin playback at `now + START_DELAY_SECONDS` unless already started.
    pub fn start(&mut self, now: f64) {
        self.playing = true;
        if self.next_play_time.is_none() {
            self.next_play_time = Some(now + START_DELAY_SECONDS);
        }
    }

    /// Schedule queued audio inside the look-ahead window and detect completion.
    pub fn tick(&mut self, now: f64) -> TickOutcome {
        let mut outcome = TickOutcome::default();
        if !self.playing {
            return outcome;
        }

        while let Some(next) = self.next_play_time {
            if self.queue.is_empty() || next >= now + SCHEDULE_AHEAD_SECONDS {
                break;
            }
            let take = self.queue.len().min(MAX_CHUNKS_PER_CLIP);
            let chunks: Vec<Vec<f32>> = self.queue.drain(..take).collect();
            let samples: Vec<f32> = chunks.concat();
            if samples.is_empty() {
                continue;
            }
            self.chunks_played += chunks.len() as u64;
            self.clips_played += 1;

            let duration =
                samples.len() as f64 / self.config.sample_rate as f64 / self.config.playback_rate;
            // Non-streamed replies arrive one chunk per clip and fade every clip.
            let fade_in = self.config.fade_in
                && (self.pending.is_empty() || self.clips_played == self.chunks_played);

            let clip = ScheduledClip {
                start: next,
                duration,
                chunks: chunks.len(),
                fade_in,
                samples,
            };
            log::debug!(
                "[{:.3}] scheduling clip ({} chunks) at {:.3} for {:.3}s",
                now,
                clip.chunks,
                clip.start,
                clip.duration
            );
            self.sink.play(&clip);
            self.pending.push_back((clip.start, clip.end()));
            self.next_play_time = Some(clip.end());
            outcome.scheduled += 1;
        }

        while self.pending.front().is_some_and(|(_, end)| *end <= now) {
            self.pending.pop_front();
        }

        if self.clips_played > 0 && self.pending.is_empty() && self.queue.is_empty() {
            self.stop();
            outcome.completed = true;
        }
        outcome
    }

    /// Clear all playback state. Safe to call at any time.
    pub fn stop(&mut self) {
        if self.playing || !self.pending.is_empty() {
            self.sink.stop();
        }
        self.playing = false;
        self.queue.clear();
        self.pending.clear();
        self.next_play_time = None;
        self.chunks_played = 0;
        self.clips_played = 0;
    }
}

#[derive(Default)]
struct StartGuard {
    starting: bool,
    stop_requested: bool,
}

/// Streams agent audio through an [`AudioPlaybackEngine`].
pub struct AudioPlayer {
    engine: Arc<Mutex<AudioPlaybackEngine>>,
    clock: Arc<dyn PlaybackClock>,
    events: mpsc::UnboundedSender<PlaybackEvent>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    guard: Mutex<StartGuard>,
    silent: bool,
}

impl AudioPlayer {
    pub fn new(
        config: PlaybackConfig,
        clock: Arc<dyn PlaybackClock>,
        sink: Box<dyn PlaybackSink>,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        Self::build(config, clock, sink, false)
    }

    /// A player that discards everything, for disabled audio output.
    pub fn silent(clock: Arc<dyn PlaybackClock>) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        Self::build(PlaybackConfig::default(), clock, Box::new(NullSink), true)
    }

    fn build(
        config: PlaybackConfig,
        clock: Arc<dyn PlaybackClock>,
        sink: Box<dyn PlaybackSink>,
        silent: bool,
    ) -> (Self, mpsc::UnboundedReceiver<PlaybackEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let player = Self {
            engine: Arc::new(Mutex::new(AudioPlaybackEngine::new(config, sink))),
            clock,
            events: tx,
            ticker: Mutex::new(None),
            guard: Mutex::new(StartGuard::default()),
            silent,
        };
        (player, rx)
    }

    pub fn engine(&self) -> Arc<Mutex<AudioPlaybackEngine>> {
        self.engine.clone()
    }

    pub fn is_silent(&self) -> bool {
        self.silent
    }

    pub fn add_chunk(&self, payload: &AudioPayload) {
        if self.silent {
            return;
        }
        self.engine.lock().add_chunk(payload);
    }

    pub fn is_playing(&self) -> bool {
        self.engine.lock().is_playing()
    }

    /// Start the scheduling loop, resuming the clock first if needed.
    pub async fn play(&self) {
        if self.silent {
            return;
        }
        {
            let mut guard = self.guard.lock();
            if guard.starting || self.engine.lock().is_playing() {
                return;
            }
            guard.starting = true;
        }

        if self.clock.is_suspended() {
            self.clock.resume().await;
        }

        {
            let mut guard = self.guard.lock();
            guard.starting = false;
            if std::mem::take(&mut guard.stop_requested) {
                drop(guard);
                log::debug!("stop requested while starting playback");
                self.stop();
                return;
            }
            // a concurrent stop() waits on the guard until the engine has started
            let now = self.clock.now();
            self.engine.lock().start(now);
        }

        let engine = self.engine.clone();
        let clock = self.clock.clone();
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(TICK_INTERVAL);
            loop {
                interval.tick().await;
                let outcome = {
                    let mut engine = engine.lock();
                    if !engine.is_playing() {
                        break;
                    }
                    engine.tick(clock.now())
                };
                if outcome.completed {
                    log::debug!("playback complete");
                    let _ = events.send(PlaybackEvent::Complete);
                    break;
                }
            }
        });

        if let Some(previous) = self.ticker.lock().replace(handle) {
            previous.abort();
        }
    }

    /// Stop playback and drop queued audio. Deferred while a start is in flight.
    pub fn stop(&self) {
        {
            let mut guard = self.guard.lock();
            if guard.starting {
                guard.stop_requested = true;
                return;
            }
        }
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
        self.engine.lock().stop();
    }
}

impl Drop for AudioPlayer {
    fn drop(&mut self) {
        if let Some(handle) = self.ticker.lock().take() {
            handle.abort();
        }
    }
}
