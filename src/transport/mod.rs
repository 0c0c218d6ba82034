//! Transport layer: the remote live session as seen by the session manager.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                 Transport (trait)                    │
//! │                                                      │
//! │  connect(LiveConfig, EventSender)                    │
//! │        │                                             │
//! │        ▼                                             │
//! │  Arc<dyn LiveSession> ── send(ClientMessage)         │
//! │        │              ── close()                     │
//! │        ▼                                             │
//! │  TransportEvent::{Opened, Message, Closed, Errored}   │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! [`GeminiTransport`] is the production implementation.

pub mod gemini;
pub mod live;
pub mod message;

// ── Public re-exports ──────────────────────────────────────────────────────

pub use gemini::GeminiTransport;
pub use live::{
    EventSender, LiveConfig, LiveSession, Modality, Transport, TransportError, TransportEvent,
};
pub use message::{ClientMessage, MediaChunk, Role, ServerMessage, Turn};

// test-only re-export so the session tests can script connect outcomes.
#[cfg(test)]
pub(crate) use live::{ConnectOutcome, MockTransport};
