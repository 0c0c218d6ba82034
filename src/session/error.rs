//! Session-level failures and their user-facing text.

use thiserror::Error;

use crate::audio::HardwareError;
use crate::transport::TransportError;

/// Failures that affect the session as a whole.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("microphone permission denied")]
    PermissionDenied,

    #[error("audio hardware error: {0}")]
    Hardware(HardwareError),

    #[error("API key is not configured")]
    MissingCredential,

    #[error("transport error: {0}")]
    Transport(TransportError),

    /// Retries exhausted.
    #[error("connection unstable after {attempts} reconnect attempt(s): {last}")]
    ConnectionUnstable { attempts: u32, last: String },
}

impl SessionError {
    /// Transient connectivity failures are retried; everything else is
    /// terminal straight away.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Transport(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Single human-readable line for the UI.
    pub fn user_message(&self) -> String {
        match self {
            SessionError::PermissionDenied => {
                "Microphone access was denied. Allow microphone access and connect again.".into()
            }
            SessionError::Hardware(e) => format!("Audio device problem: {e}."),
            SessionError::MissingCredential => {
                "No API key configured. Set session.api_key or GEMINI_API_KEY.".into()
            }
            SessionError::Transport(e) => format!("Connection problem: {e}."),
            SessionError::ConnectionUnstable { .. } => {
                "Connection unstable. Please check your network and try again.".into()
            }
        }
    }
}

impl From<HardwareError> for SessionError {
    fn from(err: HardwareError) -> Self {
        match err {
            HardwareError::PermissionDenied => SessionError::PermissionDenied,
            other => SessionError::Hardware(other),
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::MissingCredential => SessionError::MissingCredential,
            other => SessionError::Transport(other),
        }
    }
}
