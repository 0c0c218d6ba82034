//! PCM encoder: `f32` samples → 16-bit little-endian PCM payload.
//!
//! The remote service accepts raw linear PCM tagged with its sample rate
//! (`audio/pcm;rate=48000`).  The rate is whatever the capture device
//! actually runs at; nothing here assumes a fixed input rate.

use base64::Engine as _;

use crate::transport::MediaChunk;

/// Mime type prefix for raw 16-bit linear PCM.
pub const PCM_MIME_PREFIX: &str = "audio/pcm";

// ---------------------------------------------------------------------------
// PcmPayload
// ---------------------------------------------------------------------------

/// Encoded 16-bit little-endian mono PCM plus the rate it was captured at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmPayload {
    /// Two bytes per sample, little-endian.
    pub data: Vec<u8>,
    /// Sample rate of `data` in Hz.
    pub sample_rate: u32,
}

impl PcmPayload {
    /// Number of samples carried by the payload.
    pub fn sample_count(&self) -> usize {
        self.data.len() / 2
    }

    /// Mime type with the rate tag, e.g. `audio/pcm;rate=16000`.
    pub fn mime_type(&self) -> String {
        format!("{PCM_MIME_PREFIX};rate={}", self.sample_rate)
    }

    /// Base64-encode the payload into a media chunk ready for the transport.
    pub fn into_media_chunk(self) -> MediaChunk {
        MediaChunk {
            mime_type: self.mime_type(),
            data: base64::engine::general_purpose::STANDARD.encode(&self.data),
        }
    }
}

// ---------------------------------------------------------------------------
// encode_pcm16
// ---------------------------------------------------------------------------

/// Convert `samples` in `[-1.0, 1.0]` to 16-bit little-endian PCM.
///
/// Out-of-range samples are clamped first.  Negative values scale by 32 768
/// and positive values by 32 767 so both ends of the range map exactly onto
/// `i16::MIN` / `i16::MAX`.
///
/// ```rust
/// use live_voice::audio::encode_pcm16;
///
/// let payload = encode_pcm16(&[0.0, 1.0, -1.0], 48_000);
/// assert_eq!(payload.data, vec![0x00, 0x00, 0xFF, 0x7F, 0x00, 0x80]);
/// assert_eq!(payload.mime_type(), "audio/pcm;rate=48000");
/// ```
pub fn encode_pcm16(samples: &[f32], sample_rate: u32) -> PcmPayload {
    let mut data = Vec::with_capacity(samples.len() * 2);
    for &sample in samples {
        data.extend_from_slice(&f32_to_i16(sample).to_le_bytes());
    }
    PcmPayload { data, sample_rate }
}

fn f32_to_i16(sample: f32) -> i16 {
    // NaN clamps to NaN; treat it as silence.
    let s = if sample.is_nan() { 0.0 } else { sample.clamp(-1.0, 1.0) };
    let scaled = if s < 0.0 { s * 32_768.0 } else { s * 32_767.0 };
    scaled.round() as i16
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_little_endian_pairs() {
        let payload = encode_pcm16(&[0.5], 16_000);
        // 0.5 * 32767 = 16383.5 → 16384 = 0x4000
        assert_eq!(payload.data, vec![0x00, 0x40]);
        assert_eq!(payload.sample_count(), 1);
    }

    #[test]
    fn out_of_range_samples_are_clamped() {
        let payload = encode_pcm16(&[3.0, -7.5], 16_000);
        let values: Vec<i16> = payload
            .data
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(values, vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn nan_encodes_as_silence() {
        let payload = encode_pcm16(&[f32::NAN], 16_000);
        assert_eq!(payload.data, vec![0, 0]);
    }

    #[test]
    fn carries_device_rate_in_mime_type() {
        let payload = encode_pcm16(&[0.0; 4], 44_100);
        assert_eq!(payload.sample_rate, 44_100);
        assert_eq!(payload.mime_type(), "audio/pcm;rate=44100");
    }

    #[test]
    fn media_chunk_is_base64() {
        let chunk = encode_pcm16(&[0.0, 1.0], 16_000).into_media_chunk();
        assert_eq!(chunk.mime_type, "audio/pcm;rate=16000");
        // [00 00 FF 7F] → "AAD/fw=="
        assert_eq!(chunk.data, "AAD/fw==");
    }

    #[test]
    fn empty_input_yields_empty_payload() {
        let payload = encode_pcm16(&[], 16_000);
        assert!(payload.data.is_empty());
        assert_eq!(payload.sample_count(), 0);
    }
}
