//! Pure conversion between f32 sample buffers and the transport encoding.
//!
//! The wire form is 16-bit signed little-endian PCM, base64-armored for
//! the text-based transport. Negative samples scale by 32768 and
//! non-negative ones by 32767 so that the full i16 range is used and the
//! round trip stays within one quantization step.

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::audio::AudioFrame;
use crate::error::SessionError;

/// Base64 text of 16-bit LE PCM bytes — the transport form of a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireAudioChunk(pub String);

/// Encode a frame for transport. Samples are clamped to [-1.0, 1.0].
pub fn encode(frame: &AudioFrame) -> WireAudioChunk {
    let mut bytes = Vec::with_capacity(frame.samples.len() * 2);
    for &sample in &frame.samples {
        let clamped = sample.clamp(-1.0, 1.0);
        let value = if clamped < 0.0 {
            (clamped * 32768.0) as i16
        } else {
            (clamped * 32767.0) as i16
        };
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    WireAudioChunk(STANDARD.encode(bytes))
}

/// Decode a transport chunk back into f32 samples.
pub fn decode(chunk: &WireAudioChunk) -> Result<AudioFrame, SessionError> {
    let bytes = STANDARD
        .decode(&chunk.0)
        .map_err(|e| SessionError::Decode(format!("invalid base64: {e}")))?;
    if bytes.len() % 2 != 0 {
        return Err(SessionError::Decode(format!(
            "odd PCM byte count: {}",
            bytes.len()
        )));
    }
    let samples = bytes
        .chunks_exact(2)
        .map(|pair| {
            let value = i16::from_le_bytes([pair[0], pair[1]]);
            if value < 0 {
                value as f32 / 32768.0
            } else {
                value as f32 / 32767.0
            }
        })
        .collect();
    Ok(AudioFrame::new(samples))
}
