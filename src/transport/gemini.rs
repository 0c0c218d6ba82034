//! Gemini Live (`BidiGenerateContent`) websocket transport.
//!
//! Wire flow:
//!
//! ```text
//! connect ──▶ ws open ──▶ {"setup": …} ──▶ {"setupComplete": {}}   → Opened
//!             {"realtimeInput": {"mediaChunks": [..]}}  ◀── ClientMessage::Media
//!             {"clientContent": {"turns": [..]}}        ◀── ClientMessage::Content
//!             {"serverContent": {"modelTurn": ..}}      ──▶ Message(Audio | Text)
//!             {"serverContent": {"interrupted": true}}  ──▶ Message(Interrupted)
//! ```
//!
//! Outbound frames go through an unbounded queue drained by a writer task,
//! so `send` never waits on the socket.  A reader task turns inbound frames
//! into [`TransportEvent`]s.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message};

use crate::config::SessionConfig;
use crate::transport::live::{
    EventSender, LiveConfig, LiveSession, Transport, TransportError, TransportEvent,
};
use crate::transport::message::{ClientMessage, MediaChunk, ServerMessage, Turn};

// ---------------------------------------------------------------------------
// Outbound wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SetupFrame<'a> {
    setup: Setup<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Setup<'a> {
    model: &'a str,
    generation_config: GenerationConfig<'a>,
    system_instruction: WireContent<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig<'a> {
    response_modalities: [&'a str; 1],
    speech_config: SpeechConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SpeechConfig<'a> {
    voice_config: VoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VoiceConfig<'a> {
    prebuilt_voice_config: PrebuiltVoiceConfig<'a>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PrebuiltVoiceConfig<'a> {
    voice_name: &'a str,
}

#[derive(Debug, Serialize)]
struct WireContent<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<TextPart<'a>>,
}

#[derive(Debug, Serialize)]
struct TextPart<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum ClientFrame<'a> {
    RealtimeInput {
        #[serde(rename = "mediaChunks")]
        media_chunks: [WireBlob<'a>; 1],
    },
    ClientContent {
        turns: Vec<WireContent<'a>>,
        #[serde(rename = "turnComplete")]
        turn_complete: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WireBlob<'a> {
    mime_type: &'a str,
    data: &'a str,
}

fn setup_json(model: &str, config: &LiveConfig) -> Result<String, TransportError> {
    let frame = SetupFrame {
        setup: Setup {
            model,
            generation_config: GenerationConfig {
                response_modalities: [config.output_modality.as_wire()],
                speech_config: SpeechConfig {
                    voice_config: VoiceConfig {
                        prebuilt_voice_config: PrebuiltVoiceConfig {
                            voice_name: config.voice.as_str(),
                        },
                    },
                },
            },
            system_instruction: WireContent {
                role: None,
                parts: vec![TextPart {
                    text: &config.behavior_profile,
                }],
            },
        },
    };
    serde_json::to_string(&frame).map_err(|e| TransportError::Protocol(e.to_string()))
}

fn client_json(message: &ClientMessage) -> Result<String, TransportError> {
    let frame = match message {
        ClientMessage::Media(chunk) => ClientFrame::RealtimeInput {
            media_chunks: [WireBlob {
                mime_type: &chunk.mime_type,
                data: &chunk.data,
            }],
        },
        ClientMessage::Content {
            turns,
            turn_complete,
        } => ClientFrame::ClientContent {
            turns: turns.iter().map(wire_turn).collect(),
            turn_complete: *turn_complete,
        },
    };
    serde_json::to_string(&frame).map_err(|e| TransportError::Protocol(e.to_string()))
}

fn wire_turn(turn: &Turn) -> WireContent<'_> {
    WireContent {
        role: Some(turn.role.as_str()),
        parts: vec![TextPart { text: &turn.text }],
    }
}

// ---------------------------------------------------------------------------
// Inbound wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerFrame {
    setup_complete: Option<serde_json::Value>,
    server_content: Option<ServerContent>,
    go_away: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerContent {
    model_turn: Option<ModelTurn>,
    #[serde(default)]
    interrupted: bool,
    #[serde(default)]
    turn_complete: bool,
}

#[derive(Debug, Deserialize)]
struct ModelTurn {
    #[serde(default)]
    parts: Vec<ServerPart>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServerPart {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

/// Map one inbound JSON frame to events, barge-in first.
fn parse_server_frame(text: &str) -> Result<Vec<TransportEvent>, TransportError> {
    let frame: ServerFrame =
        serde_json::from_str(text).map_err(|e| TransportError::Protocol(e.to_string()))?;
    let mut events = Vec::new();

    if frame.setup_complete.is_some() {
        events.push(TransportEvent::Opened);
    }

    if let Some(content) = frame.server_content {
        if content.interrupted {
            events.push(TransportEvent::Message(ServerMessage::Interrupted));
        }
        for part in content.model_turn.into_iter().flat_map(|t| t.parts) {
            if let Some(blob) = part.inline_data {
                events.push(TransportEvent::Message(ServerMessage::Audio(MediaChunk {
                    mime_type: blob.mime_type,
                    data: blob.data,
                })));
            }
            if let Some(text) = part.text {
                events.push(TransportEvent::Message(ServerMessage::Text(text)));
            }
        }
        if content.turn_complete {
            events.push(TransportEvent::Message(ServerMessage::TurnComplete));
        }
    }

    if let Some(go_away) = frame.go_away {
        log::warn!("gemini: server going away: {go_away}");
    }

    Ok(events)
}

// ---------------------------------------------------------------------------
// GeminiTransport
// ---------------------------------------------------------------------------

/// Opens live sessions against the Gemini `BidiGenerateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiTransport {
    endpoint: String,
    model: String,
    api_key: Option<String>,
}

impl GeminiTransport {
    pub fn new(
        endpoint: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            model: model.into(),
            api_key,
        }
    }

    /// Build from config.  The key falls back to `GEMINI_API_KEY`.
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(&config.endpoint, &config.model, config.resolve_api_key())
    }

    fn url(&self) -> Result<String, TransportError> {
        let key = self
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or(TransportError::MissingCredential)?;
        Ok(format!("{}?key={}", self.endpoint, key))
    }
}

fn map_ws_error(err: tungstenite::Error) -> TransportError {
    match err {
        tungstenite::Error::Http(response) => {
            TransportError::Rejected(format!("HTTP {}", response.status()))
        }
        other => TransportError::Connect(other.to_string()),
    }
}

#[async_trait]
impl Transport for GeminiTransport {
    async fn connect(
        &self,
        config: LiveConfig,
        events: EventSender,
    ) -> Result<Arc<dyn LiveSession>, TransportError> {
        let url = self.url()?;
        let (ws, _response) = connect_async(url).await.map_err(map_ws_error)?;
        let (mut write, mut read) = ws.split();
        log::info!("gemini: websocket connected, sending setup for {}", self.model);

        write
            .send(Message::Text(setup_json(&self.model, &config)?))
            .await
            .map_err(map_ws_error)?;

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

        let writer = tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                let closing = matches!(message, Message::Close(_));
                if let Err(e) = write.send(message).await {
                    log::debug!("gemini: write failed: {e}");
                    break;
                }
                if closing {
                    break;
                }
            }
            let _ = write.close().await;
        });

        let reader = tokio::spawn(async move {
            loop {
                let text = match read.next().await {
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                        Ok(text) => text,
                        Err(_) => {
                            log::debug!("gemini: dropping non-UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame
                            .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                            .filter(|r| !r.trim().is_empty());
                        let _ = events.send(TransportEvent::Closed(reason));
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        let _ = events.send(TransportEvent::Errored(e.to_string()));
                        break;
                    }
                    None => {
                        let _ = events.send(TransportEvent::Closed(None));
                        break;
                    }
                };

                match parse_server_frame(&text) {
                    Ok(parsed) => {
                        for event in parsed {
                            if events.send(event).is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => log::debug!("gemini: dropping unparseable frame: {e}"),
                }
            }
        });

        Ok(Arc::new(GeminiSession {
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
            writer: Mutex::new(Some(writer)),
            reader,
        }))
    }
}

// ---------------------------------------------------------------------------
// GeminiSession
// ---------------------------------------------------------------------------

struct GeminiSession {
    outbound: mpsc::UnboundedSender<Message>,
    closed: AtomicBool,
    writer: Mutex<Option<JoinHandle<()>>>,
    reader: JoinHandle<()>,
}

#[async_trait]
impl LiveSession for GeminiSession {
    fn send(&self, message: ClientMessage) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::NotOpen);
        }
        let json = client_json(&message)?;
        self.outbound
            .send(Message::Text(json))
            .map_err(|_| TransportError::NotOpen)
    }

    async fn close(&self) -> Result<(), TransportError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let _ = self.outbound.send(Message::Close(None));

        let writer = self
            .writer
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take();
        if let Some(writer) = writer {
            writer
                .await
                .map_err(|e| TransportError::Closed(format!("writer task failed: {e}")))?;
        }
        self.reader.abort();
        Ok(())
    }
}

impl Drop for GeminiSession {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = self.writer.lock().unwrap_or_else(|p| p.into_inner()).take() {
            writer.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
