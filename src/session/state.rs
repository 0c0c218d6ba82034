//! Session lifecycle state.

use std::fmt;

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// States of one logical session with the live service.
///
/// ```text
/// Idle ──connect──▶ Connecting ──open──▶ Active
///                        ▲                  │ close / error
///                        └──── retry ◀──────┤
///                                           └──▶ Error   (retries exhausted,
///                                                         permission, credential)
/// Connecting / Active ──disconnect──▶ Idle
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Nothing held, nothing pending.
    #[default]
    Idle,

    /// Microphone acquisition, transport open or a reconnect is in flight.
    Connecting,

    /// Session open; audio flows both ways.
    Active,

    /// Terminal failure.  Only an explicit connect leaves this state.
    Error,
}

impl SessionState {
    /// `true` while audio is being streamed to the service.
    ///
    /// ```
    /// use live_voice::session::SessionState;
    ///
    /// assert!(SessionState::Active.is_streaming());
    /// assert!(!SessionState::Connecting.is_streaming());
    /// ```
    pub fn is_streaming(&self) -> bool {
        matches!(self, SessionState::Active)
    }

    /// Connecting or active: there is something to tear down.
    pub fn is_live(&self) -> bool {
        matches!(self, SessionState::Connecting | SessionState::Active)
    }

    /// A short human-readable label suitable for a status line.
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "Idle",
            SessionState::Connecting => "Connecting",
            SessionState::Active => "Live",
            SessionState::Error => "Error",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn only_active_streams() {
        assert!(SessionState::Active.is_streaming());
        assert!(!SessionState::Idle.is_streaming());
        assert!(!SessionState::Connecting.is_streaming());
        assert!(!SessionState::Error.is_streaming());
    }

    #[test]
    fn live_states() {
        assert!(SessionState::Connecting.is_live());
        assert!(SessionState::Active.is_live());
        assert!(!SessionState::Idle.is_live());
        assert!(!SessionState::Error.is_live());
    }

    #[test]
    fn labels_are_non_empty() {
        for state in [
            SessionState::Idle,
            SessionState::Connecting,
            SessionState::Active,
            SessionState::Error,
        ] {
            assert!(!state.label().is_empty());
            assert_eq!(state.to_string(), state.label());
        }
    }
}
