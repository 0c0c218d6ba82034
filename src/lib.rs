//! Real-time voice session client for a live conversational AI service.
//!
//! Microphone audio is windowed, encoded to 16-bit PCM and streamed to the
//! service; synthesized voice coming back is decoded and scheduled gaplessly
//! on the speaker.  [`session::SessionManager`] owns the lifecycle: connect,
//! retry with backoff, mode switches and teardown.

pub mod audio;
pub mod config;
pub mod session;
pub mod transport;
