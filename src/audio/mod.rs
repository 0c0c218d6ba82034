//! Audio pipeline: microphone → windows → PCM upstream, decoded PCM → speaker.
//!
//! # Pipeline
//!
//! ```text
//! upstream:   AudioInput → InputStream (AudioChunk) → downmix
//!               → CaptureBuffer → encode_pcm16 → PcmPayload → MediaChunk
//!
//! downstream: MediaChunk → decode_media_chunk → DecodedAudio
//!               → PlaybackScheduler → MixerOutput (StreamResampler) → Mixer
//! ```
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use live_voice::audio::{AudioInput, CapturePipeline, CaptureRequest, CpalMicrophone};
//!
//! # async fn run() -> Result<(), live_voice::audio::HardwareError> {
//! let stream = CpalMicrophone::new().acquire(CaptureRequest::default()).await?;
//! let mut pipeline = CapturePipeline::new(stream, 4096);
//!
//! while let Some(payloads) = pipeline.next_payloads().await {
//!     for payload in payloads {
//!         println!("{} samples @ {}Hz", payload.sample_count(), payload.sample_rate);
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod capture;
pub mod decoder;
pub mod encoder;
pub mod microphone;
pub mod playback;
pub mod resample;
pub mod speaker;

pub use buffer::CaptureBuffer;
pub use capture::{
    AudioChunk, AudioInput, CapturePipeline, CaptureRequest, HardwareError, InputStream,
};
pub use decoder::{
    decode_media_chunk, decode_pcm16_base64, DecodeError, DecodedAudio, OUTPUT_SAMPLE_RATE,
};
pub use encoder::{encode_pcm16, PcmPayload, PCM_MIME_PREFIX};
pub use microphone::{AudioCapture, CaptureError, CpalMicrophone, StreamHandle};
pub use playback::{AudioOutput, PlaybackScheduler, ScheduledSource, SourceId, DEFAULT_LOOKAHEAD};
pub use resample::{downmix, ResampleError, StreamResampler, RESAMPLE_CHUNK};
pub use speaker::{CpalSpeaker, Mixer, MixerOutput, SpeakerError};

// test-only re-exports so the session tests can drive fake devices.
#[cfg(test)]
pub(crate) use capture::MockMicrophone;
#[cfg(test)]
pub(crate) use playback::ManualOutput;
