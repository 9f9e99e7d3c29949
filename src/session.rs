//! Session identity and client-side barge-in detection.

use std::time::{Duration, Instant};

use log::debug;
use uuid::Uuid;

/// When the barge-in heuristic fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BargeInPolicy {
    Disabled,
    /// Fire once `transcripts` consecutive transcripts each arrived less than
    /// `max_gap` after the previous one.
    After { transcripts: u32, max_gap: Duration },
}

impl Default for BargeInPolicy {
    fn default() -> Self {
        BargeInPolicy::After {
            transcripts: 3,
            max_gap: Duration::from_millis(300),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BargeInDetector {
    policy: BargeInPolicy,
    last_transcript_at: Option<Instant>,
    streak: u32,
}

impl BargeInDetector {
    pub fn new(policy: BargeInPolicy) -> Self {
        Self {
            policy,
            last_transcript_at: None,
            streak: 0,
        }
    }

    pub fn policy(&self) -> BargeInPolicy {
        self.policy
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }

    /// Feed one transcript observed at `now`; returns whether the user barged in.
    ///
    /// A final transcript fires immediately and leaves the streak untouched.
    /// The streak survives a positive detection, so every further transcript
    /// inside the gap fires again.
    pub fn observe(&mut self, is_final: bool, now: Instant) -> bool {
        let BargeInPolicy::After {
            transcripts,
            max_gap,
        } = self.policy
        else {
            return false;
        };

        if is_final {
            return true;
        }

        let within_gap = self
            .last_transcript_at
            .is_some_and(|last| now.saturating_duration_since(last) < max_gap);
        self.last_transcript_at = Some(now);

        if within_gap {
            self.streak += 1;
        } else {
            self.streak = 0;
        }

        let detected = self.streak >= transcripts;
        debug!("barge-in detected: {}", detected);
        detected
    }
}

/// Conversation identity owned by a protocol adaptor.
#[derive(Debug, Clone)]
pub struct Session {
    id: String,
    pub barge_in: BargeInDetector,
}

impl Session {
    pub fn new(policy: BargeInPolicy) -> Self {
        Self {
            id: generate_session_id(),
            barge_in: BargeInDetector::new(policy),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Replace the session id, keeping the barge-in configuration.
    pub fn regenerate(&mut self) {
        self.id = generate_session_id();
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new(BargeInPolicy::default())
    }
}

pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}
