//! Speaker output via `cpal`, driven by a frame-counting mixer.
//!
//! The [`Mixer`] is the device clock: `current_time` is the number of frames
//! rendered so far divided by the device rate.  Sources are placed at an
//! absolute start frame and summed into the output while they overlap the
//! callback window.  Stopping a source removes it before the next callback.
//!
//! [`MixerOutput`] turns scheduled voice chunks into mixer sources.  Chunks
//! the scheduler laid back to back form one *run*: they share a
//! [`StreamResampler`] and each chunk's frames land exactly where the previous
//! chunk's frames ended, so rate conversion never opens a gap or an overlap.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use thiserror::Error;

use crate::audio::decoder::DecodedAudio;
use crate::audio::playback::{AudioOutput, SourceId};
use crate::audio::resample::StreamResampler;

// ---------------------------------------------------------------------------
// SpeakerError
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum SpeakerError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("output device '{0}' not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("playback thread failed: {0}")]
    Thread(String),
}

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct ActiveSource {
    id: SourceId,
    start_frame: u64,
    samples: Vec<f32>,
}

impl ActiveSource {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Sums scheduled sources into the device buffer and keeps the clock.
pub struct Mixer {
    sample_rate: u32,
    frames_played: AtomicU64,
    sources: Mutex<Vec<ActiveSource>>,
}

impl Mixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frames_played: AtomicU64::new(0),
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Seconds rendered so far.
    pub fn current_time(&self) -> f64 {
        self.frames_played() as f64 / self.sample_rate as f64
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::Acquire)
    }

    /// Nearest device frame to clock time `at`.
    pub fn frame_at(&self, at: f64) -> u64 {
        (at.max(0.0) * self.sample_rate as f64).round() as u64
    }

    /// Place mono `samples` (already at the device rate) at `start_frame`.
    pub fn add(&self, id: SourceId, samples: Vec<f32>, start_frame: u64) {
        self.lock_sources().push(ActiveSource {
            id,
            start_frame,
            samples,
        });
    }

    pub fn remove(&self, id: SourceId) {
        self.lock_sources().retain(|s| s.id != id);
    }

    /// Number of sources still queued or playing.
    pub fn source_count(&self) -> usize {
        self.lock_sources().len()
    }

    /// Fill `out` (interleaved, `channels` wide) and advance the clock.
    pub fn render(&self, out: &mut [f32], channels: usize) {
        out.fill(0.0);
        let channels = channels.max(1);
        let frames = (out.len() / channels) as u64;
        let window_start = self.frames_played.load(Ordering::Acquire);
        let window_end = window_start + frames;

        let mut sources = self.lock_sources();
        for source in sources.iter() {
            let from = source.start_frame.max(window_start);
            let to = source.end_frame().min(window_end);
            for frame in from..to {
                let sample = source.samples[(frame - source.start_frame) as usize];
                let base = (frame - window_start) as usize * channels;
                for slot in &mut out[base..base + channels] {
                    *slot += sample;
                }
            }
        }
        sources.retain(|s| s.end_frame() > window_end);
        drop(sources);

        for slot in out.iter_mut() {
            *slot = slot.clamp(-1.0, 1.0);
        }
        self.frames_played.store(window_end, Ordering::Release);
    }

    fn lock_sources(&self) -> MutexGuard<'_, Vec<ActiveSource>> {
        // A panic while holding the lock leaves the Vec intact; keep going.
        self.sources.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// MixerOutput
// ---------------------------------------------------------------------------

/// Start times closer than this continue the current run.
const CONTIGUOUS_EPSILON: f64 = 1e-6;

/// A run's buffered tail is flushed once its placed audio ends this close
/// to the playhead.
const DRAIN_MARGIN: Duration = Duration::from_millis(30);

struct VoiceRun {
    resampler: StreamResampler,
    source_rate: u32,
    /// Mixer frame where the next converted frame lands.
    next_frame: u64,
    /// Clock time at which the last accepted chunk ends.
    end_time: f64,
    last_id: SourceId,
}

#[derive(Default)]
struct VoiceState {
    run: Option<VoiceRun>,
    /// End of the last drained run, as (clock time, mixer frame).
    resume: Option<(f64, u64)>,
}

/// [`AudioOutput`] on top of a [`Mixer`], converting voice to the mixer rate.
pub struct MixerOutput {
    mixer: Arc<Mixer>,
    voice: Mutex<VoiceState>,
}

impl MixerOutput {
    pub fn new(mixer: Arc<Mixer>) -> Self {
        Self {
            mixer,
            voice: Mutex::new(VoiceState::default()),
        }
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        &self.mixer
    }

    /// Flush the current run if the playhead is about to catch up with it.
    ///
    /// Called periodically from the speaker thread so the last partial block
    /// of a model turn is heard on time.
    pub fn flush_if_draining(&self) {
        let margin = (DRAIN_MARGIN.as_secs_f64() * self.mixer.sample_rate() as f64) as u64;
        let mut voice = self.lock_voice();
        let draining = voice
            .run
            .as_ref()
            .is_some_and(|run| run.next_frame <= self.mixer.frames_played() + margin);
        if !draining {
            return;
        }
        if let Some(mut run) = voice.run.take() {
            self.finish_run(&mut run);
            voice.resume = Some((run.end_time, run.next_frame));
        }
    }

    fn finish_run(&self, run: &mut VoiceRun) {
        match run.resampler.finish() {
            Ok(tail) => self.place(run, run.last_id, tail),
            Err(e) => log::warn!("speaker: dropping resampler tail: {e}"),
        }
    }

    fn place(&self, run: &mut VoiceRun, id: SourceId, frames: Vec<f32>) {
        if frames.is_empty() {
            return;
        }
        let len = frames.len() as u64;
        self.mixer.add(id, frames, run.next_frame);
        run.next_frame += len;
    }

    fn lock_voice(&self) -> MutexGuard<'_, VoiceState> {
        self.voice.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl AudioOutput for MixerOutput {
    fn current_time(&self) -> f64 {
        self.mixer.current_time()
    }

    fn start(&self, id: SourceId, audio: DecodedAudio, at: f64) {
        let continues = |end: f64| (at - end).abs() < CONTIGUOUS_EPSILON;
        let mut voice = self.lock_voice();

        let same_run = voice
            .run
            .as_ref()
            .is_some_and(|run| run.source_rate == audio.sample_rate && continues(run.end_time));
        if !same_run {
            if let Some(mut run) = voice.run.take() {
                self.finish_run(&mut run);
                voice.resume = Some((run.end_time, run.next_frame));
            }
            let next_frame = match voice.resume.take() {
                Some((end, frame)) if continues(end) => frame,
                _ => self.mixer.frame_at(at),
            };
            let resampler = StreamResampler::new(audio.sample_rate, self.mixer.sample_rate());
            let resampler = match resampler {
                Ok(resampler) => resampler,
                Err(e) => {
                    log::warn!("speaker: cannot play {} Hz audio: {e}", audio.sample_rate);
                    return;
                }
            };
            voice.run = Some(VoiceRun {
                resampler,
                source_rate: audio.sample_rate,
                next_frame,
                end_time: at,
                last_id: id,
            });
        }

        let Some(run) = voice.run.as_mut() else {
            return;
        };
        run.end_time = at + audio.duration_secs();
        run.last_id = id;
        match run.resampler.process(&audio.samples) {
            Ok(frames) => self.place(run, id, frames),
            Err(e) => log::warn!("speaker: dropping chunk {}: {e}", id.0),
        }
    }

    fn stop(&self, id: SourceId) {
        self.mixer.remove(id);
        let mut voice = self.lock_voice();
        voice.run = None;
        voice.resume = None;
    }
}

// ---------------------------------------------------------------------------
// CpalSpeaker
// ---------------------------------------------------------------------------

/// How often the speaker thread checks for a run to drain.
const FLUSH_TICK: Duration = Duration::from_millis(5);

/// Default (or named) output device playing through a [`MixerOutput`].
///
/// The cpal stream lives on its own thread; dropping the speaker stops it.
pub struct CpalSpeaker {
    output: Arc<MixerOutput>,
    stop: Mutex<Option<std_mpsc::Sender<()>>>,
}

impl CpalSpeaker {
    /// Open the output device and start rendering silence.
    pub fn open(device_name: Option<&str>) -> Result<Self, SpeakerError> {
        let (ready_tx, ready_rx) = std_mpsc::channel::<Result<Arc<MixerOutput>, SpeakerError>>();
        let (stop_tx, stop_rx) = std_mpsc::channel::<()>();
        let device_name = device_name.map(str::to_string);

        std::thread::Builder::new()
            .name("speaker".into())
            .spawn(move || {
                let (stream, mixer) = match build_output(device_name.as_deref()) {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                let output = Arc::new(MixerOutput::new(mixer));
                let _ = ready_tx.send(Ok(Arc::clone(&output)));

                // Any message or a dropped sender means stop.
                loop {
                    match stop_rx.recv_timeout(FLUSH_TICK) {
                        Err(std_mpsc::RecvTimeoutError::Timeout) => output.flush_if_draining(),
                        _ => break,
                    }
                }
                drop(stream);
                log::info!("speaker released");
            })
            .map_err(|e| SpeakerError::Thread(e.to_string()))?;

        let output = ready_rx
            .recv()
            .map_err(|_| SpeakerError::Thread("speaker thread exited".into()))??;

        Ok(Self {
            output,
            stop: Mutex::new(Some(stop_tx)),
        })
    }

    pub fn mixer(&self) -> &Arc<Mixer> {
        self.output.mixer()
    }
}

fn build_output(device_name: Option<&str>) -> Result<(cpal::Stream, Arc<Mixer>), SpeakerError> {
    let host = cpal::default_host();
    let device = match device_name {
        Some(name) => host
            .output_devices()?
            .find(|d| d.name().map(|n| n == name).unwrap_or(false))
            .ok_or_else(|| SpeakerError::DeviceNotFound(name.to_string()))?,
        None => host.default_output_device().ok_or(SpeakerError::NoDevice)?,
    };

    let supported = device.default_output_config()?;
    let config: cpal::StreamConfig = supported.into();
    let channels = config.channels as usize;
    let mixer = Arc::new(Mixer::new(config.sample_rate.0));

    log::info!(
        "speaker: {} ({} Hz, {} ch)",
        device.name().unwrap_or_default(),
        config.sample_rate.0,
        channels
    );

    let render_mixer = Arc::clone(&mixer);
    let stream = device.build_output_stream(
        &config,
        move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
            render_mixer.render(data, channels);
        },
        |err| log::error!("cpal output stream error: {err}"),
        None,
    )?;
    stream.play()?;

    Ok((stream, mixer))
}

impl AudioOutput for CpalSpeaker {
    fn current_time(&self) -> f64 {
        self.output.current_time()
    }

    fn start(&self, id: SourceId, audio: DecodedAudio, at: f64) {
        self.output.start(id, audio, at);
    }

    fn stop(&self, id: SourceId) {
        self.output.stop(id);
    }
}

impl Drop for CpalSpeaker {
    fn drop(&mut self) {
        let stop = self.stop.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(stop) = stop {
            let _ = stop.send(());
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
