//! Structured messages exchanged with the live service.
//!
//! These are protocol-neutral: a concrete transport maps them to and from
//! its own envelope format.

/// Opaque media payload, e.g. base64 PCM or a JPEG video frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaChunk {
    pub mime_type: String,
    /// Base64 text.
    pub data: String,
}

impl MediaChunk {
    pub fn new(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            mime_type: mime_type.into(),
            data: data.into(),
        }
    }
}

/// Who authored a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    User,
    Model,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Model => "model",
        }
    }
}

/// One text turn in a `Content` message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

/// Client → service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Realtime media (microphone audio or a video frame).
    Media(MediaChunk),
    /// Structured conversation content.
    Content { turns: Vec<Turn>, turn_complete: bool },
}

impl ClientMessage {
    /// Synthetic user turn that prompts the service to start speaking.
    pub fn greeting() -> Self {
        ClientMessage::Content {
            turns: vec![Turn {
                role: Role::User,
                text: "start".into(),
            }],
            turn_complete: true,
        }
    }

    pub fn is_media(&self) -> bool {
        matches!(self, ClientMessage::Media(_))
    }
}

/// Service → client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// Synthesized voice audio.
    Audio(MediaChunk),
    /// Text part of a model turn.
    Text(String),
    /// The user started speaking over the model (barge-in).
    Interrupted,
    TurnComplete,
}
