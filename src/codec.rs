//! Binary helpers shared by the adaptors and the audio engine.
//!
//! All PCM handled here is 16-bit signed little-endian mono.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

/// ASCII `data` marker that opens the PCM sub-chunk of a RIFF/WAVE file.
pub const DATA_MARKER: &[u8; 4] = b"data";

/// Size in bytes of the length field that follows the `data` marker.
const DATA_SIZE_FIELD: usize = 4;

/// Size of the zero-filled frame sent while hold-to-talk is released.
pub const SILENCE_FRAME_BYTES: usize = 4096;

pub fn decode_base64(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(text.trim())
}

pub fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Convert little-endian PCM16 bytes into floats in `[-1, 1)`.
///
/// A trailing odd byte is ignored.
pub fn pcm16_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Convert normalized floats back into little-endian PCM16 bytes, clamping.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&f32_to_i16(*s).to_le_bytes());
    }
    out
}

pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

pub fn i16_to_pcm16(samples: &[i16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

/// Byte offset of the first `data` marker, if any.
pub fn find_data_marker(bytes: &[u8]) -> Option<usize> {
    bytes.windows(DATA_MARKER.len()).position(|w| w == DATA_MARKER)
}

/// Length of the WAV header preceding the samples, or 0 when no marker exists.
///
/// The header ends after the marker and the 4-byte size field following it.
pub fn wav_header_length(bytes: &[u8]) -> usize {
    match find_data_marker(bytes) {
        Some(idx) => idx + DATA_MARKER.len() + DATA_SIZE_FIELD,
        None => 0,
    }
}

/// Root-mean-square energy of a PCM16 frame, on the normalized scale.
pub fn rms(bytes: &[u8]) -> f32 {
    let samples = pcm16_to_f32(bytes);
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

pub fn silence_frame() -> Vec<u8> {
    vec![0u8; SILENCE_FRAME_BYTES]
}

/// Split a `data:image/png;base64,AAAA` URL into `(mime_type, data)`.
pub fn split_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (meta, data) = rest.split_once(',')?;
    let mime = meta.split(';').next()?;
    Some((mime, data))
}
