//! cpal-backed microphone.
//!
//! [`AudioCapture`] wraps the cpal host/device/stream lifecycle.
//! [`CpalMicrophone`] implements [`AudioInput`] on top of it: the cpal stream
//! lives on a dedicated thread (cpal streams are not `Send` on every
//! platform) and chunks are forwarded over a tokio channel.  Releasing the
//! returned [`InputStream`] signals the thread, which drops the stream and
//! frees the device.

use std::sync::mpsc as std_mpsc;

use async_trait::async_trait;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::audio::capture::{AudioChunk, AudioInput, CaptureRequest, HardwareError, InputStream};

// ---------------------------------------------------------------------------
// StreamHandle
// ---------------------------------------------------------------------------

/// Owns a running cpal input stream; the device stops when this drops.
pub struct StreamHandle {
    _stream: cpal::Stream,
}

// ---------------------------------------------------------------------------
// CaptureError
// ---------------------------------------------------------------------------

/// Why a microphone could not be opened or started.
#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("the audio host has no default microphone")]
    NoDevice,

    #[error("no microphone named '{0}'")]
    DeviceNotFound(String),

    #[error("listing microphones failed: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("microphone has no usable default format: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("building the capture stream failed: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("starting the capture stream failed: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),
}

impl CaptureError {
    /// Backends report a denied microphone permission as a backend-specific
    /// error; recognise it by its description.
    fn is_permission_denied(&self) -> bool {
        let text = self.to_string().to_lowercase();
        text.contains("permission") || text.contains("denied") || text.contains("not authorized")
    }
}

impl From<CaptureError> for HardwareError {
    fn from(err: CaptureError) -> Self {
        if err.is_permission_denied() {
            return HardwareError::PermissionDenied;
        }
        match err {
            CaptureError::NoDevice => HardwareError::NoDevice,
            other => HardwareError::Device(other.to_string()),
        }
    }
}

// ---------------------------------------------------------------------------
// AudioCapture
// ---------------------------------------------------------------------------

/// An opened (not yet running) cpal input device and its native format.
pub struct AudioCapture {
    device: cpal::Device,
    config: cpal::StreamConfig,
    sample_format: cpal::SampleFormat,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open `device_name`, or the system default input when `None`.
    ///
    /// Uses the device's preferred stream configuration; the resulting
    /// sample rate is whatever the device actually runs at.
    pub fn open(device_name: Option<&str>) -> Result<Self, CaptureError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .input_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| CaptureError::DeviceNotFound(name.to_string()))?,
            None => host.default_input_device().ok_or(CaptureError::NoDevice)?,
        };

        let supported = device.default_input_config()?;

        let sample_format = supported.sample_format();
        let channels = supported.channels();
        let sample_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        Ok(Self {
            device,
            config,
            sample_format,
            sample_rate,
            channels,
        })
    }

    /// Run the device, pushing every callback buffer into `tx` as an
    /// [`AudioChunk`].  A closed receiver is ignored inside the callback.
    pub fn start(
        &self,
        tx: mpsc::UnboundedSender<AudioChunk>,
    ) -> Result<StreamHandle, CaptureError> {
        let sample_rate = self.sample_rate;
        let channels = self.channels;
        let on_error = |err: cpal::StreamError| {
            log::error!("cpal input stream error: {err}");
        };

        let stream = match self.sample_format {
            cpal::SampleFormat::I16 => self.device.build_input_stream(
                &self.config,
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    let samples = data.iter().map(|&s| s as f32 / 32_768.0).collect();
                    let _ = tx.send(AudioChunk {
                        samples,
                        sample_rate,
                        channels,
                    });
                },
                on_error,
                None,
            )?,
            _ => self.device.build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    let _ = tx.send(AudioChunk {
                        samples: data.to_vec(),
                        sample_rate,
                        channels,
                    });
                },
                on_error,
                None,
            )?,
        };

        stream.play()?;
        Ok(StreamHandle { _stream: stream })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

// ---------------------------------------------------------------------------
// CpalMicrophone
// ---------------------------------------------------------------------------

/// [`AudioInput`] backed by the system audio host.
#[derive(Debug, Default, Clone)]
pub struct CpalMicrophone;

impl CpalMicrophone {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AudioInput for CpalMicrophone {
    async fn acquire(&self, request: CaptureRequest) -> Result<InputStream, HardwareError> {
        let (ready_tx, ready_rx) = oneshot::channel::<Result<(u32, u16), HardwareError>>();
        let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("mic-capture".into())
            .spawn(move || {
                let started = AudioCapture::open(request.device.as_deref())
                    .and_then(|capture| capture.start(chunk_tx).map(|handle| (capture, handle)));

                let (capture, handle) = match started {
                    Ok(pair) => pair,
                    Err(e) => {
                        log::warn!("microphone open failed: {e}");
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };

                log::info!(
                    "microphone started ({} Hz, {} ch)",
                    capture.sample_rate(),
                    capture.channels()
                );
                let _ = ready_tx.send(Ok((capture.sample_rate(), capture.channels())));

                // Blocks until release is signalled or the sender is dropped.
                let _ = stop_rx.recv();
                drop(handle);
                log::info!("microphone released");
            })
            .map_err(|e| HardwareError::Device(format!("failed to spawn capture thread: {e}")))?;

        let (sample_rate, channels) = ready_rx
            .await
            .map_err(|_| HardwareError::Device("capture thread exited".into()))??;

        Ok(InputStream::new(sample_rate, channels, chunk_rx, move || {
            let _ = stop_tx.send(());
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
