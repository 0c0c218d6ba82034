//! Interaction modes and their behavior profiles.
//!
//! The profile is sent as the system instruction when a session opens and
//! cannot be changed mid-session, so switching modes means reconnecting.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Selects how the service behaves for the whole session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum InteractionMode {
    /// General voice assistant.
    #[default]
    Assistant,
    /// Language tutor that corrects the user gently.
    Tutor,
    /// Mock job interviewer.
    Interviewer,
    /// Describes what the camera sees.
    Describer,
}

impl InteractionMode {
    pub const ALL: [InteractionMode; 4] = [
        InteractionMode::Assistant,
        InteractionMode::Tutor,
        InteractionMode::Interviewer,
        InteractionMode::Describer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            InteractionMode::Assistant => "assistant",
            InteractionMode::Tutor => "tutor",
            InteractionMode::Interviewer => "interviewer",
            InteractionMode::Describer => "describer",
        }
    }

    /// System instruction bound at session-open time.
    pub fn behavior_profile(self) -> &'static str {
        match self {
            InteractionMode::Assistant => {
                "You are a friendly, helpful voice assistant. Keep answers short and \
                 conversational. Greet the user briefly when the conversation starts."
            }
            InteractionMode::Tutor => {
                "You are a patient language tutor. Speak slowly and clearly, correct the \
                 user's mistakes gently and suggest a better phrasing. Open by asking what \
                 the user would like to practise."
            }
            InteractionMode::Interviewer => {
                "You are a professional job interviewer. Ask one question at a time, \
                 listen to the full answer, and follow up on vague points. Start by \
                 introducing yourself and asking for the role being interviewed for."
            }
            InteractionMode::Describer => {
                "You describe what you see in the user's camera feed. Be concise and \
                 concrete, mention people, objects and text. Start by describing the \
                 current view."
            }
        }
    }
}

impl fmt::Display for InteractionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InteractionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        InteractionMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown mode '{s}'"))
    }
}
