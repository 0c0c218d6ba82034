//! Core `Transport` / `LiveSession` traits and the inbound event type.
//!
//! A transport opens one live session per `connect` call.  Inbound traffic
//! (open, messages, close, errors) is delivered asynchronously as
//! [`TransportEvent`]s on the sender handed to `connect`, so the session
//! manager can consume everything from a single dispatcher.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::config::Voice;
use crate::transport::message::{ClientMessage, ServerMessage};

// ---------------------------------------------------------------------------
// TransportError
// ---------------------------------------------------------------------------

/// Errors raised by a transport or one of its sessions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No API key configured.  Retrying cannot fix this.
    #[error("missing API credential")]
    MissingCredential,

    #[error("connection failed: {0}")]
    Connect(String),

    /// The service refused the session.
    #[error("session rejected: {0}")]
    Rejected(String),

    #[error("connection closed: {0}")]
    Closed(String),

    /// Send attempted on a session that is closed or not yet open.
    #[error("session is not open")]
    NotOpen,

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    /// Whether a fresh connect attempt might succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::MissingCredential)
    }
}

// ---------------------------------------------------------------------------
// TransportEvent
// ---------------------------------------------------------------------------

/// Inbound events for one live session, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(ServerMessage),
    /// Connection closed; carries the close reason when the peer sent one.
    Closed(Option<String>),
    Errored(String),
}

pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

// ---------------------------------------------------------------------------
// LiveConfig
// ---------------------------------------------------------------------------

/// Output the service should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Modality {
    #[default]
    Audio,
    Text,
}

impl Modality {
    pub fn as_wire(self) -> &'static str {
        match self {
            Modality::Audio => "AUDIO",
            Modality::Text => "TEXT",
        }
    }
}

/// Parameters bound at session-open time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveConfig {
    /// System instruction describing how the service should behave.
    pub behavior_profile: String,
    pub voice: Voice,
    pub output_modality: Modality,
}

// ---------------------------------------------------------------------------
// Transport / LiveSession
// ---------------------------------------------------------------------------

/// One open (or opening) session with the live service.
///
/// Implementors must be `Send + Sync`; the session manager keeps the handle
/// in an `Arc<dyn LiveSession>`.
#[async_trait]
pub trait LiveSession: Send + Sync {
    /// Queue `message` for delivery.  Never blocks.
    fn send(&self, message: ClientMessage) -> Result<(), TransportError>;

    /// Close the connection.  Calling it on a closed session is a no-op.
    async fn close(&self) -> Result<(), TransportError>;
}

/// Factory for live sessions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open a session configured by `config`.
    ///
    /// `events` receives [`TransportEvent::Opened`] once the session is ready
    /// for traffic, followed by inbound messages and finally a close or
    /// error event.
    async fn connect(
        &self,
        config: LiveConfig,
        events: EventSender,
    ) -> Result<Arc<dyn LiveSession>, TransportError>;
}

// ---------------------------------------------------------------------------
// MockTransport (tests only)
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) use mock::{ConnectOutcome, MockTransport};


// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
