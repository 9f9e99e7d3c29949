//! Sticky WAV header detection.
//!
//! Streams either carry a RIFF/WAVE header on every chunk or on none. The
//! detector samples the first chunks and locks its decision so later chunks
//! are never rescanned.

use crate::codec;

/// Consistent samples needed before the header length is locked.
pub const LOCK_AFTER_SAMPLES: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderState {
    /// Still sampling.
    Unknown { searched: u32, length_sum: usize },
    /// Strip exactly this many bytes from every chunk.
    LockedPresent(usize),
    /// Samples disagreed; never strip again.
    LockedAbsent,
}

#[derive(Debug, Clone)]
pub struct HeaderDetector {
    state: HeaderState,
}

impl Default for HeaderDetector {
    fn default() -> Self {
        Self {
            state: HeaderState::Unknown {
                searched: 0,
                length_sum: 0,
            },
        }
    }
}

impl HeaderDetector {
    pub fn state(&self) -> HeaderState {
        self.state
    }

    /// Header length to strip from `chunk`, updating the sampling state.
    pub fn observe(&mut self, chunk: &[u8]) -> usize {
        let (searched, length_sum) = match self.state {
            HeaderState::LockedPresent(n) => return n,
            HeaderState::LockedAbsent => return 0,
            HeaderState::Unknown {
                searched,
                length_sum,
            } => (searched, length_sum),
        };

        let length = codec::wav_header_length(chunk);
        let searched = searched + 1;
        let length_sum = length_sum + length;

        // length == average  <=>  length * searched == sum
        if length * searched as usize != length_sum {
            log::debug!("wav header length changed to {}, disabling detection", length);
            self.state = HeaderState::LockedAbsent;
        } else if searched >= LOCK_AFTER_SAMPLES {
            log::debug!("wav header length locked at {}", length);
            self.state = HeaderState::LockedPresent(length);
        } else {
            self.state = HeaderState::Unknown {
                searched,
                length_sum,
            };
        }
        length
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wav_chunk(header: usize, body: usize) -> Vec<u8> {
        let mut v = vec![0u8; header - 8];
        v.extend_from_slice(b"data");
        v.extend_from_slice(&(body as u32).to_le_bytes());
        v.extend(std::iter::repeat(1u8).take(body));
        v
    }

    #[test]
    fn locks_after_five_consistent_headers() {
        let mut d = HeaderDetector::default();
        for i in 0..5 {
            assert_eq!(d.observe(&wav_chunk(44, 100)), 44);
            if i < 4 {
                assert!(matches!(d.state(), HeaderState::Unknown { .. }));
            }
        }
        assert_eq!(d.state(), HeaderState::LockedPresent(44));
        // no marker anywhere, still stripped
        assert_eq!(d.observe(&[7u8; 200]), 44);
    }

    #[test]
    fn mismatch_locks_absent_forever() {
        let mut d = HeaderDetector::default();
        assert_eq!(d.observe(&wav_chunk(44, 10)), 44);
        assert_eq!(d.observe(&wav_chunk(50, 10)), 50);
        assert_eq!(d.state(), HeaderState::LockedAbsent);
        for _ in 0..10 {
            assert_eq!(d.observe(&wav_chunk(44, 10)), 0);
        }
    }

    #[test]
    fn headerless_stream_locks_at_zero() {
        let mut d = HeaderDetector::default();
        for _ in 0..5 {
            assert_eq!(d.observe(&[1u8; 64]), 0);
        }
        assert_eq!(d.state(), HeaderState::LockedPresent(0));
        assert_eq!(d.observe(&wav_chunk(44, 4)), 0);
    }
}
