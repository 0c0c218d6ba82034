//! Audio decoder: base64 16-bit PCM from the service → `f32` sample buffer.
//!
//! The service answers with mono linear PCM at 24 kHz.  Payloads that fail to
//! decode are reported as [`DecodeError`]; the caller logs and drops them.

use base64::Engine as _;
use thiserror::Error;

use crate::transport::MediaChunk;

/// Rate of the synthesized voice audio returned by the service.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

// ---------------------------------------------------------------------------
// DecodeError
// ---------------------------------------------------------------------------

/// Reasons an inbound audio payload can be rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("payload is not valid base64: {0}")]
    Base64(String),

    /// 16-bit PCM must contain an even number of bytes.
    #[error("PCM payload has an odd byte length ({0})")]
    OddLength(usize),

    #[error("unsupported audio mime type: {0}")]
    UnsupportedMime(String),
}

// ---------------------------------------------------------------------------
// DecodedAudio
// ---------------------------------------------------------------------------

/// Mono `f32` samples ready to hand to the playback scheduler.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    /// Playback duration in seconds.
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode an inbound media chunk.
///
/// The sample rate comes from the `rate=` parameter of the mime type when
/// present, otherwise [`OUTPUT_SAMPLE_RATE`].
pub fn decode_media_chunk(chunk: &MediaChunk) -> Result<DecodedAudio, DecodeError> {
    if !chunk.mime_type.starts_with("audio/") {
        return Err(DecodeError::UnsupportedMime(chunk.mime_type.clone()));
    }
    let sample_rate = rate_from_mime(&chunk.mime_type).unwrap_or(OUTPUT_SAMPLE_RATE);
    decode_pcm16_base64(&chunk.data, sample_rate)
}

/// Decode base64 text carrying 16-bit little-endian mono PCM.
///
/// ```rust
/// use live_voice::audio::decode_pcm16_base64;
///
/// let audio = decode_pcm16_base64("AAD/fw==", 24_000).unwrap();
/// assert_eq!(audio.samples.len(), 2);
/// assert_eq!(audio.samples[0], 0.0);
/// assert_eq!(audio.samples[1], 1.0);
/// ```
pub fn decode_pcm16_base64(data: &str, sample_rate: u32) -> Result<DecodedAudio, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| DecodeError::Base64(e.to_string()))?;

    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }

    let samples = bytes
        .chunks_exact(2)
        .map(|pair| i16_to_f32(i16::from_le_bytes([pair[0], pair[1]])))
        .collect();

    Ok(DecodedAudio {
        samples,
        sample_rate,
    })
}

fn i16_to_f32(sample: i16) -> f32 {
    if sample < 0 {
        sample as f32 / 32_768.0
    } else {
        sample as f32 / 32_767.0
    }
}

/// Extract `N` from a mime type such as `audio/pcm;rate=24000`.
fn rate_from_mime(mime: &str) -> Option<u32> {
    mime.split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::encoder::encode_pcm16;

    fn chunk(mime: &str, data: &str) -> MediaChunk {
        MediaChunk {
            mime_type: mime.into(),
            data: data.into(),
        }
    }

    #[test]
    fn encode_then_decode_is_within_one_lsb() {
        let original: Vec<f32> = (0..480)
            .map(|i| (i as f32 * 0.05).sin() * 0.9)
            .chain([1.0, -1.0, 0.0, 0.000_01, -0.000_01])
            .collect();

        let media = encode_pcm16(&original, 24_000).into_media_chunk();
        let decoded = decode_media_chunk(&media).unwrap();

        assert_eq!(decoded.samples.len(), original.len());
        let lsb = 1.0 / 32_767.0;
        for (a, b) in original.iter().zip(decoded.samples.iter()) {
            assert!((a - b).abs() <= lsb, "{a} decoded as {b}");
        }
    }

    #[test]
    fn rate_is_taken_from_mime_type() {
        let audio = decode_media_chunk(&chunk("audio/pcm;rate=16000", "AAA=")).unwrap();
        assert_eq!(audio.sample_rate, 16_000);
    }

    #[test]
    fn missing_rate_defaults_to_output_rate() {
        let audio = decode_media_chunk(&chunk("audio/pcm", "AAA=")).unwrap();
        assert_eq!(audio.sample_rate, OUTPUT_SAMPLE_RATE);
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let err = decode_pcm16_base64("not base64!!", 24_000).unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn odd_byte_count_is_rejected() {
        // "AAAA" decodes to three bytes
        let err = decode_pcm16_base64("AAAA", 24_000).unwrap_err();
        assert_eq!(err, DecodeError::OddLength(3));
    }

    #[test]
    fn non_audio_mime_is_rejected() {
        let err = decode_media_chunk(&chunk("image/jpeg", "AAA=")).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedMime(_)));
    }

    #[test]
    fn duration_matches_sample_count() {
        let audio = DecodedAudio {
            samples: vec![0.0; 12_000],
            sample_rate: 24_000,
        };
        assert!((audio.duration_secs() - 0.5).abs() < 1e-9);
    }
}
