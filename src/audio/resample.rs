//! Sample-format conversions at the device edges.
//!
//! Capture devices may hand over interleaved multi-channel frames while the
//! service only accepts mono.  Synthesized voice arrives at 24 kHz while the
//! speaker runs at whatever rate it was opened with; [`StreamResampler`]
//! converts it with `rubato` (`SincFixedIn`, `BlackmanHarris2` window) and
//! carries the filter state across chunk boundaries.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use thiserror::Error;

/// Average each interleaved frame of `channels` samples into one mono sample.
///
/// A trailing partial frame is discarded.  `channels == 0` yields nothing.
///
/// ```rust
/// use live_voice::audio::downmix;
///
/// // two stereo frames: (0.5, -0.5) and (0.2, 0.4)
/// let mono = downmix(&[0.5, -0.5, 0.2, 0.4], 2);
/// assert_eq!(mono.len(), 2);
/// assert!((mono[1] - 0.3).abs() < 1e-6);
/// ```
pub fn downmix(interleaved: &[f32], channels: u16) -> Vec<f32> {
    let width = usize::from(channels);
    if width <= 1 {
        return if width == 1 { interleaved.to_vec() } else { Vec::new() };
    }
    let scale = 1.0 / width as f32;
    interleaved
        .chunks_exact(width)
        .map(|frame| frame.iter().copied().sum::<f32>() * scale)
        .collect()
}

/// Input frames handed to the sinc resampler per block.
pub const RESAMPLE_CHUNK: usize = 256;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("cannot build resampler: {0}")]
    Construction(#[from] rubato::ResamplerConstructionError),

    #[error("resampling failed: {0}")]
    Process(#[from] rubato::ResampleError),
}

/// Mono rate converter that keeps its filter state between calls.
///
/// Feeding a long signal in arbitrary pieces through [`process`] and then
/// calling [`finish`] yields the same frames as converting it in one go:
/// exactly `ceil(fed * to / from)` of them, aligned to the first input frame.
/// The resampler's own latency is trimmed from the front, and [`finish`]
/// drains the final partial block.
///
/// [`process`]: StreamResampler::process
/// [`finish`]: StreamResampler::finish
pub struct StreamResampler {
    /// `None` when both rates match.
    inner: Option<SincFixedIn<f32>>,
    ratio: f64,
    pending: Vec<f32>,
    /// Leading output frames still owed to the filter delay.
    skip: usize,
    fed: u64,
    produced: u64,
}

impl StreamResampler {
    pub fn new(from: u32, to: u32) -> Result<Self, ResampleError> {
        let ratio = f64::from(to) / f64::from(from.max(1));
        let inner = if from == to {
            None
        } else {
            let params = SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 128,
                window: WindowFunction::BlackmanHarris2,
            };
            Some(SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)?)
        };
        let skip = inner.as_ref().map_or(0, |r| r.output_delay());

        Ok(Self {
            inner,
            ratio,
            pending: Vec::with_capacity(RESAMPLE_CHUNK),
            skip,
            fed: 0,
            produced: 0,
        })
    }

    /// Accept more input and return every output frame that is ready.
    ///
    /// Up to one block of input may stay buffered until more arrives or
    /// [`finish`](Self::finish) is called.
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>, ResampleError> {
        self.fed += samples.len() as u64;
        let Some(inner) = self.inner.as_mut() else {
            self.produced += samples.len() as u64;
            return Ok(samples.to_vec());
        };

        self.pending.extend_from_slice(samples);
        let mut raw = Vec::new();
        loop {
            let need = inner.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let block: &[f32] = &self.pending[..need];
            raw.extend(first_channel(inner.process(std::slice::from_ref(&block), None)?));
            self.pending.drain(..need);
        }
        Ok(self.emit(raw, usize::MAX))
    }

    /// Flush buffered input and the filter tail, then start over.
    pub fn finish(&mut self) -> Result<Vec<f32>, ResampleError> {
        let target = (self.fed as f64 * self.ratio).ceil() as u64;
        let wanted = target.saturating_sub(self.produced) as usize;
        let mut raw = Vec::new();

        if let Some(inner) = self.inner.as_mut() {
            if !self.pending.is_empty() {
                let rest: &[f32] = &self.pending;
                raw.extend(first_channel(
                    inner.process_partial(Some(std::slice::from_ref(&rest)), None)?,
                ));
            }
            // Zero blocks push the delayed tail out of the filter.
            for _ in 0..8 {
                if raw.len() >= self.skip + wanted {
                    break;
                }
                raw.extend(first_channel(inner.process_partial::<Vec<f32>>(None, None)?));
            }
        }

        let out = self.emit(raw, wanted);
        self.pending.clear();
        self.fed = 0;
        self.produced = 0;
        if let Some(inner) = self.inner.as_mut() {
            inner.reset();
            self.skip = inner.output_delay();
        }
        Ok(out)
    }

    /// Input frames waiting for a full block.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    fn emit(&mut self, mut raw: Vec<f32>, limit: usize) -> Vec<f32> {
        let skip = self.skip.min(raw.len());
        raw.drain(..skip);
        self.skip -= skip;
        raw.truncate(limit);
        self.produced += raw.len() as u64;
        raw
    }
}

fn first_channel(mut channels: Vec<Vec<f32>>) -> Vec<f32> {
    if channels.is_empty() {
        Vec::new()
    } else {
        channels.swap_remove(0)
    }
}
