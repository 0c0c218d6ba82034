//! Playback scheduler: gapless, low-latency queuing of decoded voice audio.
//!
//! Buffers are laid end to end on the output device's own clock.  The
//! scheduler keeps a `next_start_time` cursor; each buffer starts at the
//! cursor and advances it by the buffer's duration.  If the device clock has
//! overtaken the cursor (a stall), scheduling restarts at `now + lookahead`
//! instead of replaying a backlog.
//!
//! ```text
//!   clock ─────────────▶
//!   [ buf 1 ][ buf 2 ][ buf 3 ]       normal: back to back
//!                 now
//!                  │  [ buf 4 ]       drift: cursor < now → restart at now+ε
//! ```
//!
//! On barge-in ([`PlaybackScheduler::interrupt`]) or teardown
//! ([`PlaybackScheduler::flush_all`]) every live source is stopped and the
//! cursor resets to zero.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::audio::decoder::DecodedAudio;

/// Default scheduling lookahead after a drift reset.
pub const DEFAULT_LOOKAHEAD: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// AudioOutput
// ---------------------------------------------------------------------------

/// Identifies one scheduled sound source on the output device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId(pub u64);

/// Speaker device as seen by the scheduler.
///
/// Times are seconds on the device's playback clock.
pub trait AudioOutput: Send + Sync {
    /// Current position of the playback clock.
    fn current_time(&self) -> f64;

    /// Start `audio` at absolute clock time `at`.
    fn start(&self, id: SourceId, audio: DecodedAudio, at: f64);

    /// Stop a source immediately.  Unknown ids are ignored.
    fn stop(&self, id: SourceId);
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

/// A source that has been handed to the device.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub start: f64,
    pub end: f64,
}

pub struct PlaybackScheduler {
    output: Arc<dyn AudioOutput>,
    lookahead: f64,
    next_start_time: f64,
    live: HashMap<SourceId, ScheduledSource>,
    next_id: u64,
}

impl PlaybackScheduler {
    pub fn new(output: Arc<dyn AudioOutput>, lookahead: Duration) -> Self {
        Self {
            output,
            lookahead: lookahead.as_secs_f64(),
            next_start_time: 0.0,
            live: HashMap::new(),
            next_id: 0,
        }
    }

    /// Queue `audio` right after everything already scheduled.
    ///
    /// Returns `None` for an empty buffer.
    pub fn schedule(&mut self, audio: DecodedAudio) -> Option<ScheduledSource> {
        if audio.is_empty() || audio.sample_rate == 0 {
            return None;
        }

        let now = self.output.current_time();
        self.reap_finished(now);

        if self.next_start_time < now {
            self.next_start_time = now + self.lookahead;
        }

        let start = self.next_start_time;
        let duration = audio.duration_secs();
        let id = SourceId(self.next_id);
        self.next_id += 1;

        self.output.start(id, audio, start);
        self.next_start_time = start + duration;

        let source = ScheduledSource {
            id,
            start,
            end: start + duration,
        };
        self.live.insert(id, source);
        log::trace!("playback: source {} at {start:.3}s for {duration:.3}s", id.0);
        Some(source)
    }

    /// Deregister sources that finished playing by clock time `now`.
    pub fn reap_finished(&mut self, now: f64) {
        self.live.retain(|_, source| source.end > now);
    }

    /// Barge-in: stop everything still playing and restart the cursor.
    ///
    /// Sources that already ran out are only deregistered.
    pub fn interrupt(&mut self) {
        self.reap_finished(self.output.current_time());
        if !self.live.is_empty() {
            log::debug!("playback: interrupt, stopping {} source(s)", self.live.len());
        }
        for id in self.live.keys() {
            self.output.stop(*id);
        }
        self.live.clear();
        self.next_start_time = 0.0;
    }

    /// Teardown.  Same effect as [`interrupt`](Self::interrupt).
    pub fn flush_all(&mut self) {
        self.interrupt();
    }

    /// Number of sources that have not finished by the device clock.
    pub fn live_sources(&self) -> usize {
        let now = self.output.current_time();
        self.live.values().filter(|source| source.end > now).count()
    }

    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }
}

// ---------------------------------------------------------------------------
// ManualOutput (tests only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use manual::ManualOutput;

#[cfg(test)]
mod manual {
    use std::sync::Mutex;

    use super::*;

    /// Output device whose clock is set by the test.
    #[derive(Default)]
    pub(crate) struct ManualOutput {
        now: Mutex<f64>,
        started: Mutex<Vec<(SourceId, f64)>>,
        stopped: Mutex<Vec<SourceId>>,
    }

    impl ManualOutput {
        pub(crate) fn new() -> Arc<Self> {
            Arc::new(Self::default())
        }

        pub(crate) fn set_time(&self, now: f64) {
            *self.now.lock().unwrap() = now;
        }

        pub(crate) fn started(&self) -> Vec<(SourceId, f64)> {
            self.started.lock().unwrap().clone()
        }

        pub(crate) fn stopped(&self) -> Vec<SourceId> {
            self.stopped.lock().unwrap().clone()
        }
    }

    impl AudioOutput for ManualOutput {
        fn current_time(&self) -> f64 {
            *self.now.lock().unwrap()
        }

        fn start(&self, id: SourceId, _audio: DecodedAudio, at: f64) {
            self.started.lock().unwrap().push((id, at));
        }

        fn stop(&self, id: SourceId) {
            self.stopped.lock().unwrap().push(id);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    /// `secs` of silence at 24 kHz.
    fn audio(secs: f64) -> DecodedAudio {
        DecodedAudio {
            samples: vec![0.0; (secs * 24_000.0) as usize],
            sample_rate: 24_000,
        }
    }

    fn scheduler() -> (PlaybackScheduler, Arc<ManualOutput>) {
        let output = ManualOutput::new();
        let sched = PlaybackScheduler::new(output.clone(), DEFAULT_LOOKAHEAD);
        (sched, output)
    }

    #[test]
    fn buffers_are_laid_back_to_back() {
        let (mut sched, output) = scheduler();
        output.set_time(1.0);

        let a = sched.schedule(audio(0.5)).unwrap();
        let b = sched.schedule(audio(0.25)).unwrap();

        assert!((a.start - 1.01).abs() < EPS);
        assert!((b.start - a.end).abs() < EPS);
        assert!((sched.next_start_time() - 1.76).abs() < EPS);
        assert_eq!(output.started().len(), 2);
    }

    #[test]
    fn start_times_never_in_past_and_non_decreasing() {
        let (mut sched, output) = scheduler();
        let mut last_start = f64::MIN;

        // Clock advances irregularly, sometimes faster than the audio.
        for (i, now) in [0.0, 0.05, 0.05, 0.9, 0.95, 3.0, 3.0, 3.1].iter().enumerate() {
            output.set_time(*now);
            let src = sched.schedule(audio(0.1 + i as f64 * 0.01)).unwrap();
            assert!(src.start >= *now, "start {} before clock {}", src.start, now);
            assert!(src.start >= last_start, "start went backwards");
            last_start = src.start;
        }
    }

    #[test]
    fn drift_restarts_at_now_plus_lookahead() {
        let (mut sched, output) = scheduler();
        output.set_time(0.0);
        sched.schedule(audio(0.2)).unwrap();

        // Device stalled well past the end of the queue.
        output.set_time(5.0);
        let src = sched.schedule(audio(0.2)).unwrap();
        assert!((src.start - 5.01).abs() < EPS);
    }

    #[test]
    fn interrupt_stops_every_live_source() {
        let (mut sched, output) = scheduler();
        output.set_time(2.0);
        let a = sched.schedule(audio(1.0)).unwrap();
        let b = sched.schedule(audio(1.0)).unwrap();

        sched.interrupt();

        assert_eq!(sched.live_sources(), 0);
        let mut stopped = output.stopped();
        stopped.sort();
        assert_eq!(stopped, vec![a.id, b.id]);
        assert_eq!(sched.next_start_time(), 0.0);
    }

    #[test]
    fn schedule_after_interrupt_starts_now_not_stale_future() {
        let (mut sched, output) = scheduler();
        output.set_time(1.0);
        for _ in 0..5 {
            sched.schedule(audio(1.0));
        }
        // Cursor is far in the future (≈ 6 s).
        sched.interrupt();

        output.set_time(1.5);
        let src = sched.schedule(audio(0.1)).unwrap();
        assert!(src.start >= 1.5);
        assert!(src.start <= 1.5 + DEFAULT_LOOKAHEAD.as_secs_f64() + EPS);
    }

    #[test]
    fn finished_sources_are_deregistered() {
        let (mut sched, output) = scheduler();
        output.set_time(0.0);
        sched.schedule(audio(0.1)).unwrap();
        sched.schedule(audio(0.1)).unwrap();
        assert_eq!(sched.live_sources(), 2);

        sched.reap_finished(0.15);
        assert_eq!(sched.live_sources(), 1);

        output.set_time(1.0);
        sched.schedule(audio(0.1)).unwrap();
        // Both earlier sources ended before 1.0 s.
        assert_eq!(sched.live_sources(), 1);
    }

    #[test]
    fn sources_that_ran_out_are_not_stopped_on_interrupt() {
        let (mut sched, output) = scheduler();
        output.set_time(0.0);
        let done = sched.schedule(audio(0.1)).unwrap();
        let playing = sched.schedule(audio(1.0)).unwrap();

        // End of a model turn: the first source finished on its own.
        output.set_time(0.5);
        assert_eq!(sched.live_sources(), 1);

        sched.interrupt();
        assert_eq!(output.stopped(), vec![playing.id]);
        assert!(!output.stopped().contains(&done.id));

        output.set_time(2.0);
        sched.interrupt();
        assert_eq!(output.stopped().len(), 1);
    }

    #[test]
    fn flush_all_on_idle_scheduler_is_harmless() {
        let (mut sched, output) = scheduler();
        sched.flush_all();
        sched.flush_all();
        assert!(output.stopped().is_empty());
        assert_eq!(sched.live_sources(), 0);
    }

    #[test]
    fn empty_buffer_is_not_scheduled() {
        let (mut sched, output) = scheduler();
        assert!(sched
            .schedule(DecodedAudio {
                samples: Vec::new(),
                sample_rate: 24_000,
            })
            .is_none());
        assert!(output.started().is_empty());
    }
}
