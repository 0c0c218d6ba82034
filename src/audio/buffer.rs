//! Fixed-size sampling window for microphone audio.
//!
//! Capture devices hand over whatever buffer size the driver picked.  The
//! service is fed fixed windows instead (4096 samples by default), so
//! [`CaptureBuffer`] accumulates device chunks and releases each window as
//! soon as it is full.  Partial windows wait for the next chunk.
//!
//! # Example
//!
//! ```rust
//! use live_voice::audio::CaptureBuffer;
//!
//! let mut buf = CaptureBuffer::new(4);
//! assert!(buf.push(&[1.0, 2.0, 3.0]).is_empty());
//! let windows = buf.push(&[4.0, 5.0]);
//! assert_eq!(windows, vec![vec![1.0, 2.0, 3.0, 4.0]]);
//! assert_eq!(buf.pending(), 1);
//! ```

// ---------------------------------------------------------------------------
// CaptureBuffer
// ---------------------------------------------------------------------------

/// Accumulates mono samples into windows of exactly `window` samples.
pub struct CaptureBuffer {
    window: usize,
    pending: Vec<f32>,
}

impl CaptureBuffer {
    /// Create a buffer emitting windows of `window` samples.
    ///
    /// # Panics
    ///
    /// Panics if `window == 0`.
    pub fn new(window: usize) -> Self {
        assert!(window > 0, "CaptureBuffer window must be > 0");
        Self {
            window,
            pending: Vec::with_capacity(window),
        }
    }

    /// Append `samples` and return every window that became full, oldest first.
    pub fn push(&mut self, samples: &[f32]) -> Vec<Vec<f32>> {
        let mut full = Vec::new();
        let mut rest = samples;

        while !rest.is_empty() {
            let take = (self.window - self.pending.len()).min(rest.len());
            self.pending.extend_from_slice(&rest[..take]);
            rest = &rest[take..];

            if self.pending.len() == self.window {
                let next = Vec::with_capacity(self.window);
                full.push(std::mem::replace(&mut self.pending, next));
            }
        }

        full
    }

    /// Samples waiting for the current window to fill.
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Window length in samples.
    pub fn window(&self) -> usize {
        self.window
    }

    /// Drop any partial window.
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
