//! Capture pipeline: microphone handle → fixed windows → encoded PCM.
//!
//! [`AudioInput`] is the hardware seam: it acquires a microphone and returns
//! an [`InputStream`] that yields raw [`AudioChunk`]s at the device's native
//! rate.  [`CapturePipeline`] owns one stream, windows the samples with a
//! [`CaptureBuffer`] and encodes each full window with [`encode_pcm16`].
//!
//! The device is released exactly once per acquisition: either through
//! [`InputStream::release`] / [`CapturePipeline::stop`] or when the stream is
//! dropped.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::audio::buffer::CaptureBuffer;
use crate::audio::encoder::{encode_pcm16, PcmPayload};
use crate::audio::resample::downmix;

// ---------------------------------------------------------------------------
// AudioChunk
// ---------------------------------------------------------------------------

/// A single buffer of raw audio as delivered by the capture device.
///
/// Samples are interleaved `f32` in the range `[-1.0, 1.0]`.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Sample rate of this chunk in Hz (e.g. 44100, 48000).
    pub sample_rate: u32,
    /// Number of interleaved channels.
    pub channels: u16,
}

// ---------------------------------------------------------------------------
// HardwareError
// ---------------------------------------------------------------------------

/// Failures acquiring the microphone.  None of these are retried.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HardwareError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("no input device available")]
    NoDevice,

    #[error("input device error: {0}")]
    Device(String),
}

// ---------------------------------------------------------------------------
// AudioInput / InputStream
// ---------------------------------------------------------------------------

/// Constraints passed when acquiring the microphone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CaptureRequest {
    /// Device name; `None` selects the system default.
    pub device: Option<String>,
}

/// Hardware microphone provider.
#[async_trait]
pub trait AudioInput: Send + Sync {
    /// Open the microphone.  Resolves once the device is streaming.
    async fn acquire(&self, request: CaptureRequest) -> Result<InputStream, HardwareError>;
}

type ReleaseFn = Box<dyn FnOnce() + Send>;

/// An acquired microphone.
///
/// Holds the receiving end of the device's chunk channel plus the release
/// hook that stops the device.
pub struct InputStream {
    sample_rate: u32,
    channels: u16,
    chunks: mpsc::UnboundedReceiver<AudioChunk>,
    release: Option<ReleaseFn>,
}

impl InputStream {
    /// Wrap a device stream.  `release` runs exactly once.
    pub fn new(
        sample_rate: u32,
        channels: u16,
        chunks: mpsc::UnboundedReceiver<AudioChunk>,
        release: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            sample_rate,
            channels,
            chunks,
            release: Some(Box::new(release)),
        }
    }

    /// Native rate reported by the device when it was opened.
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    /// Next chunk from the device, or `None` once the device has stopped.
    pub async fn next_chunk(&mut self) -> Option<AudioChunk> {
        self.chunks.recv().await
    }

    /// Stop the device.
    pub fn release(mut self) {
        self.release_device();
    }

    fn release_device(&mut self) {
        if let Some(release) = self.release.take() {
            self.chunks.close();
            release();
        }
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.release_device();
    }
}

impl std::fmt::Debug for InputStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputStream")
            .field("sample_rate", &self.sample_rate)
            .field("channels", &self.channels)
            .field("released", &self.release.is_none())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CapturePipeline
// ---------------------------------------------------------------------------

/// Turns device chunks into encoded PCM windows.
pub struct CapturePipeline {
    stream: InputStream,
    buffer: CaptureBuffer,
}

impl CapturePipeline {
    /// Window the stream into `window`-sample buffers.
    pub fn new(stream: InputStream, window: usize) -> Self {
        Self {
            stream,
            buffer: CaptureBuffer::new(window),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.stream.sample_rate()
    }

    /// Wait for the next device chunk and return every window it completed.
    ///
    /// The returned vector is empty when the chunk only partially filled a
    /// window.  `None` means the device stopped delivering audio.
    pub async fn next_payloads(&mut self) -> Option<Vec<PcmPayload>> {
        let chunk = self.stream.next_chunk().await?;
        let mono = downmix(&chunk.samples, chunk.channels);
        let rate = self.stream.sample_rate();

        Some(
            self.buffer
                .push(&mono)
                .iter()
                .map(|window| encode_pcm16(window, rate))
                .collect(),
        )
    }

    /// Release the microphone and discard any partial window.
    pub fn stop(mut self) {
        self.buffer.clear();
        self.stream.release();
    }
}

// ---------------------------------------------------------------------------
// MockMicrophone (tests only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use mock::MockMicrophone;


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
