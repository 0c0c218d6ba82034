//! Session lifecycle manager: the orchestrator.
//!
//! [`SessionManager`] is a single tokio task that owns every piece of mutable
//! session state: lifecycle state, mode, retry counter, the live transport
//! handle, the capture pipeline and the playback scheduler.  Everything else
//! talks to it through channels:
//!
//! ```text
//! SessionController ──SessionCommand──▶ ┌────────────────┐ ──SessionUpdate──▶ UI
//!                                       │ SessionManager │
//! spawned work ──────Internal{epoch}──▶ │   (one task)   │ ──send──▶ LiveSession
//!  (mic acquire, transport connect,     └────────────────┘ ──schedule──▶ speaker
//!   transport events, timers)                  ▲
//!                                              └── CapturePipeline windows
//! ```
//!
//! Every asynchronous completion carries the *epoch* it was issued under.
//! Teardown bumps the epoch and aborts outstanding work, so a completion that
//! arrives afterwards is stale: it releases or closes whatever it carries
//! and changes nothing else.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::audio::{
    decode_media_chunk, AudioInput, AudioOutput, CapturePipeline, CaptureRequest, HardwareError,
    InputStream, PcmPayload, PlaybackScheduler,
};
use crate::config::{AppConfig, VoiceSettings};
use crate::transport::{
    ClientMessage, LiveConfig, LiveSession, MediaChunk, Modality, ServerMessage, Transport,
    TransportError, TransportEvent,
};

use super::error::SessionError;
use super::mode::InteractionMode;
use super::retry::{RetryPolicy, RetryState};
use super::state::SessionState;

// ---------------------------------------------------------------------------
// Commands and updates
// ---------------------------------------------------------------------------

/// Requests from the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Connect {
        mode: InteractionMode,
        settings: VoiceSettings,
    },
    Disconnect,
    SwitchMode(InteractionMode),
    SendVideoFrame(MediaChunk),
}

/// Notifications for the UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionUpdate {
    StateChanged(SessionState),
    /// A reconnect was scheduled after a transient failure.
    Reconnecting { attempt: u32, delay: Duration },
    /// Terminal failure, ready to display.
    Error(String),
}

// ---------------------------------------------------------------------------
// SessionOptions
// ---------------------------------------------------------------------------

/// Tunables resolved from [`AppConfig`].
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Samples per encoded capture window.
    pub capture_window: usize,
    pub capture: CaptureRequest,
    pub playback_lookahead: Duration,
    pub retry: RetryPolicy,
    pub greeting_delay: Duration,
    pub settle_delay: Duration,
    pub close_timeout: Duration,
}

impl SessionOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            capture_window: config.audio.capture_buffer_size.max(1),
            capture: CaptureRequest {
                device: config.audio.input_device.clone(),
            },
            playback_lookahead: config.audio.playback_lookahead(),
            retry: RetryPolicy::from(&config.retry),
            greeting_delay: Duration::from_millis(config.timing.greeting_delay_ms),
            settle_delay: Duration::from_millis(config.timing.mode_switch_settle_ms),
            close_timeout: Duration::from_millis(config.timing.close_timeout_ms),
        }
    }
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Internal completions
// ---------------------------------------------------------------------------

enum Internal {
    InputReady {
        epoch: u64,
        result: Result<InputStream, HardwareError>,
    },
    TransportReady {
        epoch: u64,
        result: Result<Arc<dyn LiveSession>, TransportError>,
    },
    Transport {
        epoch: u64,
        event: TransportEvent,
    },
    RetryDue {
        epoch: u64,
    },
    GreetingDue {
        epoch: u64,
    },
    SettleElapsed {
        epoch: u64,
    },
}

// ---------------------------------------------------------------------------
// SessionController
// ---------------------------------------------------------------------------

/// Cloneable UI-facing handle.
///
/// Dropping every controller shuts the manager down with a full teardown.
#[derive(Clone)]
pub struct SessionController {
    commands: mpsc::UnboundedSender<SessionCommand>,
    state: watch::Receiver<SessionState>,
}

impl SessionController {
    pub fn connect(&self, mode: InteractionMode, settings: VoiceSettings) {
        self.send(SessionCommand::Connect { mode, settings });
    }

    pub fn disconnect(&self) {
        self.send(SessionCommand::Disconnect);
    }

    pub fn switch_mode(&self, mode: InteractionMode) {
        self.send(SessionCommand::SwitchMode(mode));
    }

    /// Forward an already-encoded frame.  Dropped unless the session is live.
    pub fn send_video_frame(&self, frame: MediaChunk) {
        self.send(SessionCommand::SendVideoFrame(frame));
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn is_streaming(&self) -> bool {
        self.state().is_streaming()
    }

    /// Watch channel mirroring the lifecycle state.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    fn send(&self, command: SessionCommand) {
        if self.commands.send(command).is_err() {
            log::debug!("session manager stopped; command ignored");
        }
    }
}

// ---------------------------------------------------------------------------
// SessionManager
// ---------------------------------------------------------------------------

pub struct SessionManager {
    transport: Arc<dyn Transport>,
    input: Arc<dyn AudioInput>,
    playback: PlaybackScheduler,
    options: SessionOptions,

    commands: mpsc::UnboundedReceiver<SessionCommand>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
    state_tx: watch::Sender<SessionState>,

    state: SessionState,
    mode: InteractionMode,
    settings: VoiceSettings,
    /// Bumped on every teardown; completions from older epochs are stale.
    epoch: u64,
    user_disconnected: bool,
    retry: RetryState,

    session: Option<Arc<dyn LiveSession>>,
    capture: Option<CapturePipeline>,
    /// Outstanding acquire/connect/forward/timer tasks of the current epoch.
    tasks: Vec<JoinHandle<()>>,
}

impl SessionManager {
    /// Build a manager plus its controller and update stream.
    ///
    /// Call [`run`](Self::run) (or [`spawn`](Self::spawn)) to start it.
    pub fn new(
        transport: Arc<dyn Transport>,
        input: Arc<dyn AudioInput>,
        output: Arc<dyn AudioOutput>,
        options: SessionOptions,
    ) -> (Self, SessionController, mpsc::UnboundedReceiver<SessionUpdate>) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (updates, updates_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(SessionState::Idle);

        let manager = Self {
            transport,
            input,
            playback: PlaybackScheduler::new(output, options.playback_lookahead),
            retry: RetryState::new(options.retry),
            options,
            commands,
            internal_tx,
            internal_rx,
            updates,
            state_tx,
            state: SessionState::Idle,
            mode: InteractionMode::default(),
            settings: VoiceSettings::default(),
            epoch: 0,
            user_disconnected: false,
            session: None,
            capture: None,
            tasks: Vec::new(),
        };
        let controller = SessionController {
            commands: command_tx,
            state: state_rx,
        };
        (manager, controller, updates_rx)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Event loop.  Returns after every controller has been dropped.
    pub async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(internal) = self.internal_rx.recv() => self.handle_internal(internal).await,
                payloads = next_capture(&mut self.capture) => self.forward_capture(payloads),
            }
        }

        log::info!("session: all controllers dropped, shutting down");
        self.user_disconnected = true;
        self.teardown().await;
        self.set_state(SessionState::Idle);
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::Connect { mode, settings } => self.connect(mode, settings).await,
            SessionCommand::Disconnect => self.disconnect().await,
            SessionCommand::SwitchMode(mode) => self.switch_mode(mode).await,
            SessionCommand::SendVideoFrame(frame) => self.send_video_frame(frame),
        }
    }

    async fn handle_internal(&mut self, internal: Internal) {
        match internal {
            Internal::InputReady { epoch, result } => self.on_input_ready(epoch, result).await,
            Internal::TransportReady { epoch, result } => {
                self.on_transport_ready(epoch, result).await
            }
            Internal::Transport { epoch, event } => self.on_transport_event(epoch, event).await,
            Internal::RetryDue { epoch } => {
                if self.is_current(epoch) && self.state == SessionState::Connecting {
                    log::info!("session: retry timer fired, reconnecting");
                    self.begin_connect();
                }
            }
            Internal::GreetingDue { epoch } => self.send_greeting(epoch),
            Internal::SettleElapsed { epoch } => {
                if self.is_current(epoch) && self.state == SessionState::Idle {
                    self.begin_connect();
                }
            }
        }
    }

    // ---- commands ---------------------------------------------------------

    async fn connect(&mut self, mode: InteractionMode, settings: VoiceSettings) {
        self.user_disconnected = false;
        self.settings = settings;

        if self.state == SessionState::Active && mode != self.mode {
            self.switch_mode(mode).await;
            return;
        }

        self.mode = mode;
        self.retry.reset();
        self.teardown().await;
        self.begin_connect();
    }

    async fn disconnect(&mut self) {
        if !self.user_disconnected || self.state != SessionState::Idle {
            log::info!("session: disconnect requested");
        }
        self.user_disconnected = true;
        self.teardown().await;
        self.set_state(SessionState::Idle);
    }

    /// Behavior profiles are bound at open time, so a live session is torn
    /// down and reopened after a settle delay.
    async fn switch_mode(&mut self, mode: InteractionMode) {
        if mode == self.mode {
            return;
        }
        let previous = std::mem::replace(&mut self.mode, mode);

        if !self.state.is_live() {
            log::info!("session: mode set to {mode}");
            return;
        }

        log::info!("session: switching mode {previous} -> {mode}");
        self.retry.reset();
        self.teardown().await;
        self.set_state(SessionState::Idle);
        let epoch = self.epoch;
        self.schedule(self.options.settle_delay, Internal::SettleElapsed { epoch });
    }

    fn send_video_frame(&self, frame: MediaChunk) {
        if self.state != SessionState::Active || self.user_disconnected {
            return;
        }
        if let Some(session) = &self.session {
            if let Err(e) = session.send(ClientMessage::Media(frame)) {
                log::debug!("session: video frame dropped: {e}");
            }
        }
    }

    // ---- connect sequence -------------------------------------------------

    /// Acquire the microphone; the transport opens once it is ready.
    fn begin_connect(&mut self) {
        self.set_state(SessionState::Connecting);
        log::info!(
            "session: connecting ({} mode, voice {})",
            self.mode,
            self.settings.voice
        );

        let epoch = self.epoch;
        let input = Arc::clone(&self.input);
        let request = self.options.capture.clone();
        let internal = self.internal_tx.clone();
        self.track(tokio::spawn(async move {
            let result = input.acquire(request).await;
            let _ = internal.send(Internal::InputReady { epoch, result });
        }));
    }

    async fn on_input_ready(&mut self, epoch: u64, result: Result<InputStream, HardwareError>) {
        if !self.is_current(epoch) {
            if let Ok(stream) = result {
                log::debug!("session: releasing microphone from abandoned attempt");
                stream.release();
            }
            return;
        }

        match result {
            Ok(stream) => {
                log::info!(
                    "session: microphone ready ({} Hz, {} ch)",
                    stream.sample_rate(),
                    stream.channels()
                );
                self.capture = Some(CapturePipeline::new(stream, self.options.capture_window));
                self.open_transport();
            }
            Err(e) => self.fail_terminal(SessionError::from(e)).await,
        }
    }

    /// Connect in a task that reports the handle first and then forwards the
    /// session's events, so `TransportReady` always precedes `Opened`.
    fn open_transport(&mut self) {
        let epoch = self.epoch;
        let config = LiveConfig {
            behavior_profile: self.mode.behavior_profile().to_string(),
            voice: self.settings.voice,
            output_modality: Modality::Audio,
        };
        let transport = Arc::clone(&self.transport);
        let internal = self.internal_tx.clone();

        self.track(tokio::spawn(async move {
            let (events_tx, mut events_rx) = mpsc::unbounded_channel();
            let result = transport.connect(config, events_tx).await;
            let opened = result.is_ok();
            if internal
                .send(Internal::TransportReady { epoch, result })
                .is_err()
                || !opened
            {
                return;
            }
            while let Some(event) = events_rx.recv().await {
                if internal.send(Internal::Transport { epoch, event }).is_err() {
                    break;
                }
            }
        }));
    }

    async fn on_transport_ready(
        &mut self,
        epoch: u64,
        result: Result<Arc<dyn LiveSession>, TransportError>,
    ) {
        if !self.is_current(epoch) {
            if let Ok(session) = result {
                log::debug!("session: closing transport from abandoned attempt");
                close_session(session, self.options.close_timeout).await;
            }
            return;
        }

        match result {
            Ok(session) => self.session = Some(session),
            Err(e) => self.handle_failure(SessionError::from(e)).await,
        }
    }

    async fn on_transport_event(&mut self, epoch: u64, event: TransportEvent) {
        if !self.is_current(epoch) {
            return;
        }

        match event {
            TransportEvent::Opened => self.on_opened(),
            TransportEvent::Message(message) => self.on_server_message(message),
            TransportEvent::Closed(reason) => {
                let reason = reason.unwrap_or_else(|| "closed unexpectedly".into());
                self.handle_failure(TransportError::Closed(reason).into())
                    .await
            }
            TransportEvent::Errored(e) => {
                self.handle_failure(TransportError::Connect(e).into()).await
            }
        }
    }

    fn on_opened(&mut self) {
        if self.state != SessionState::Connecting {
            return;
        }
        self.retry.reset();
        self.set_state(SessionState::Active);

        let epoch = self.epoch;
        self.schedule(self.options.greeting_delay, Internal::GreetingDue { epoch });
    }

    fn send_greeting(&self, epoch: u64) {
        if !self.is_current(epoch) || self.state != SessionState::Active {
            return;
        }
        if let Some(session) = &self.session {
            match session.send(ClientMessage::greeting()) {
                Ok(()) => log::debug!("session: greeting sent"),
                Err(e) => log::warn!("session: greeting not sent: {e}"),
            }
        }
    }

    fn on_server_message(&mut self, message: ServerMessage) {
        match message {
            ServerMessage::Audio(chunk) => match decode_media_chunk(&chunk) {
                Ok(audio) => {
                    self.playback.schedule(audio);
                }
                Err(e) => log::debug!("session: dropping undecodable audio: {e}"),
            },
            ServerMessage::Interrupted => {
                log::debug!("session: barge-in, flushing playback");
                self.playback.interrupt();
            }
            ServerMessage::Text(text) => log::info!("model: {}", text.trim()),
            ServerMessage::TurnComplete => log::debug!("session: model turn complete"),
        }
    }

    // ---- capture ----------------------------------------------------------

    fn forward_capture(&mut self, payloads: Option<Vec<PcmPayload>>) {
        let Some(payloads) = payloads else {
            log::warn!("session: microphone stopped delivering audio");
            if let Some(capture) = self.capture.take() {
                capture.stop();
            }
            return;
        };

        if self.state != SessionState::Active || self.user_disconnected {
            return;
        }
        let Some(session) = &self.session else {
            return;
        };
        for payload in payloads {
            if let Err(e) = session.send(ClientMessage::Media(payload.into_media_chunk())) {
                log::debug!("session: audio chunk dropped: {e}");
            }
        }
    }

    // ---- failure handling -------------------------------------------------

    async fn handle_failure(&mut self, err: SessionError) {
        if self.user_disconnected {
            return;
        }
        if !err.is_retryable() {
            self.fail_terminal(err).await;
            return;
        }

        log::warn!("session: {err}");
        self.teardown().await;

        match self.retry.schedule_next() {
            Some((attempt, delay)) => {
                log::info!(
                    "session: reconnect {attempt}/{} in {delay:?}",
                    self.retry.policy().max_retries
                );
                self.set_state(SessionState::Connecting);
                self.notify(SessionUpdate::Reconnecting { attempt, delay });
                let epoch = self.epoch;
                self.schedule(delay, Internal::RetryDue { epoch });
            }
            None => {
                let unstable = SessionError::ConnectionUnstable {
                    attempts: self.retry.count(),
                    last: err.to_string(),
                };
                self.fail_terminal(unstable).await;
            }
        }
    }

    async fn fail_terminal(&mut self, err: SessionError) {
        log::error!("session failed: {err}");
        self.teardown().await;
        self.set_state(SessionState::Error);
        self.notify(SessionUpdate::Error(err.user_message()));
    }

    // ---- teardown ---------------------------------------------------------

    /// Release everything the current attempt holds.  Safe to repeat.
    async fn teardown(&mut self) {
        self.epoch += 1;
        for task in self.tasks.drain(..) {
            task.abort();
        }
        if let Some(capture) = self.capture.take() {
            capture.stop();
            log::debug!("session: microphone released");
        }
        self.playback.flush_all();
        if let Some(session) = self.session.take() {
            close_session(session, self.options.close_timeout).await;
        }
    }

    // ---- helpers ----------------------------------------------------------

    fn is_current(&self, epoch: u64) -> bool {
        epoch == self.epoch && !self.user_disconnected
    }

    fn schedule(&mut self, delay: Duration, event: Internal) {
        let internal = self.internal_tx.clone();
        self.track(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = internal.send(event);
        }));
    }

    fn track(&mut self, task: JoinHandle<()>) {
        self.tasks.retain(|t| !t.is_finished());
        self.tasks.push(task);
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        log::info!("session: {} -> {}", self.state, state);
        self.state = state;
        self.state_tx.send_replace(state);
        self.notify(SessionUpdate::StateChanged(state));
    }

    fn notify(&self, update: SessionUpdate) {
        let _ = self.updates.send(update);
    }
}

/// Best effort: failures and timeouts are logged and swallowed.
async fn close_session(session: Arc<dyn LiveSession>, timeout: Duration) {
    match tokio::time::timeout(timeout, session.close()).await {
        Ok(Ok(())) => log::debug!("session: transport closed"),
        Ok(Err(e)) => log::debug!("session: close failed: {e}"),
        Err(_) => log::warn!("session: transport close timed out"),
    }
}

async fn next_capture(capture: &mut Option<CapturePipeline>) -> Option<Vec<PcmPayload>> {
    match capture {
        Some(pipeline) => pipeline.next_payloads().await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{encode_pcm16, ManualOutput, MockMicrophone};
    use crate::config::Voice;
    use crate::transport::{ConnectOutcome, MockTransport};

    struct Harness {
        controller: SessionController,
        updates: mpsc::UnboundedReceiver<SessionUpdate>,
        transport: Arc<MockTransport>,
        mic: Arc<MockMicrophone>,
        output: Arc<ManualOutput>,
        task: JoinHandle<()>,
    }

    impl Harness {
        fn new(transport: Arc<MockTransport>, mic: Arc<MockMicrophone>) -> Self {
            let output = ManualOutput::new();
            let options = SessionOptions {
                capture_window: 4,
                ..SessionOptions::default()
            };
            let (manager, controller, updates) =
                SessionManager::new(transport.clone(), mic.clone(), output.clone(), options);
            Self {
                controller,
                updates,
                transport,
                mic,
                output,
                task: manager.spawn(),
            }
        }

        fn connect(&self, mode: InteractionMode) {
            self.controller.connect(mode, VoiceSettings::default());
        }

        fn drain(&mut self) -> Vec<SessionUpdate> {
            let mut out = Vec::new();
            while let Ok(update) = self.updates.try_recv() {
                out.push(update);
            }
            out
        }

        fn drain_states(&mut self) -> Vec<SessionState> {
            states(&self.drain())
        }
    }

    fn states(updates: &[SessionUpdate]) -> Vec<SessionState> {
        updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::StateChanged(s) => Some(*s),
                _ => None,
            })
            .collect()
    }

    /// Let every ready task run; the paused clock moves by 1 ms at most.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    fn open_harness() -> Harness {
        Harness::new(
            MockTransport::always(ConnectOutcome::Open),
            MockMicrophone::new(16_000),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn connect_opens_session_and_goes_active() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.controller.is_streaming());
        assert_eq!(
            h.drain_states(),
            vec![SessionState::Connecting, SessionState::Active]
        );
        assert_eq!(h.transport.connects(), 1);
        assert_eq!(h.mic.acquisitions(), 1);

        let config = &h.transport.configs()[0];
        assert_eq!(
            config.behavior_profile,
            InteractionMode::Assistant.behavior_profile()
        );
        assert_eq!(config.voice, Voice::Puck);
        assert_eq!(config.output_modality, Modality::Audio);
    }

    #[tokio::test(start_paused = true)]
    async fn five_capture_ticks_forward_five_payloads() {
        let h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;

        for _ in 0..5 {
            assert!(h.mic.emit(vec![0.25; 4]));
        }
        settle().await;

        let session = h.transport.last_session().unwrap();
        assert_eq!(session.media_sent(), 5);
        match &session.sent()[0] {
            ClientMessage::Media(chunk) => assert_eq!(chunk.mime_type, "audio/pcm;rate=16000"),
            other => panic!("expected media, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn greeting_follows_open_after_delay() {
        let h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;

        let session = h.transport.last_session().unwrap();
        assert!(session.sent().is_empty());

        advance(150).await;
        assert_eq!(session.sent(), vec![ClientMessage::greeting()]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_greeting_is_not_fatal() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.transport.last_session().unwrap().fail_sends();

        advance(150).await;
        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(!h
            .drain()
            .iter()
            .any(|u| matches!(u, SessionUpdate::Error(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn permission_denied_is_terminal_without_retry() {
        let mut h = Harness::new(
            MockTransport::always(ConnectOutcome::Open),
            MockMicrophone::denying(),
        );
        h.connect(InteractionMode::Assistant);
        advance(10_000).await;

        let updates = h.drain();
        assert_eq!(
            states(&updates),
            vec![SessionState::Connecting, SessionState::Error]
        );
        assert!(!updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Reconnecting { .. })));
        assert!(updates
            .iter()
            .any(|u| matches!(u, SessionUpdate::Error(msg) if msg.contains("Microphone"))));
        assert_eq!(h.transport.connects(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_credential_is_terminal_and_releases_mic() {
        let mut h = Harness::new(
            MockTransport::always(ConnectOutcome::MissingCredential),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        advance(10_000).await;

        assert_eq!(h.controller.state(), SessionState::Error);
        assert_eq!(h.transport.connects(), 1);
        assert_eq!(h.mic.releases(), h.mic.acquisitions());
        assert!(!h
            .drain()
            .iter()
            .any(|u| matches!(u, SessionUpdate::Reconnecting { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_after_three_attempts() {
        let mut h = Harness::new(
            MockTransport::always(ConnectOutcome::Reject("unavailable".into())),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        advance(20_000).await;

        let updates = h.drain();
        let reconnects: Vec<_> = updates
            .iter()
            .filter_map(|u| match u {
                SessionUpdate::Reconnecting { attempt, delay } => Some((*attempt, *delay)),
                _ => None,
            })
            .collect();
        assert_eq!(
            reconnects,
            vec![
                (1, Duration::from_secs(1)),
                (2, Duration::from_secs(2)),
                (3, Duration::from_secs(3)),
            ]
        );
        assert_eq!(h.transport.connects(), 4);
        assert_eq!(h.controller.state(), SessionState::Error);
        assert!(matches!(
            updates.last(),
            Some(SessionUpdate::Error(msg)) if msg.contains("unstable")
        ));
        assert_eq!(h.mic.releases(), h.mic.acquisitions());

        // Nothing further happens on its own.
        advance(60_000).await;
        assert_eq!(h.transport.connects(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_waits_before_each_reconnect() {
        let h = Harness::new(
            MockTransport::always(ConnectOutcome::Reject("unavailable".into())),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        settle().await;
        assert_eq!(h.transport.connects(), 1);

        advance(900).await;
        assert_eq!(h.transport.connects(), 1);
        advance(200).await;
        assert_eq!(h.transport.connects(), 2);

        // Second backoff is 2 s.
        advance(1_800).await;
        assert_eq!(h.transport.connects(), 2);
        advance(300).await;
        assert_eq!(h.transport.connects(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unexpected_close_reconnects_and_resets_counter() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.drain();

        let first = h.transport.last_session().unwrap();
        first.emit(TransportEvent::Closed(Some("1011 internal".into())));
        settle().await;

        assert!(first.is_closed());
        assert_eq!(h.controller.state(), SessionState::Connecting);
        assert_eq!(
            h.drain(),
            vec![
                SessionUpdate::StateChanged(SessionState::Connecting),
                SessionUpdate::Reconnecting {
                    attempt: 1,
                    delay: Duration::from_secs(1)
                },
            ]
        );

        advance(1_100).await;
        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.transport.connects(), 2);

        // Successful open reset the counter: next failure is attempt 1 again.
        h.drain();
        h.transport
            .last_session()
            .unwrap()
            .emit(TransportEvent::Errored("reset by peer".into()));
        settle().await;
        assert!(h.drain().contains(&SessionUpdate::Reconnecting {
            attempt: 1,
            delay: Duration::from_secs(1)
        }));
        assert_eq!(h.transport.max_open(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_reconnects_once_with_new_profile() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.drain();

        h.controller.switch_mode(InteractionMode::Tutor);
        advance(1_000).await;

        assert_eq!(
            h.drain_states(),
            vec![
                SessionState::Idle,
                SessionState::Connecting,
                SessionState::Active
            ]
        );
        assert_eq!(h.transport.closes(), 1);
        assert_eq!(h.transport.connects(), 2);
        assert_eq!(h.transport.max_open(), 1);
        assert_eq!(
            h.transport.configs()[1].behavior_profile,
            InteractionMode::Tutor.behavior_profile()
        );
        assert_eq!(h.mic.acquisitions(), 2);
        assert_eq!(h.mic.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn mode_switch_waits_for_settle_delay() {
        let h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;

        h.controller.switch_mode(InteractionMode::Interviewer);
        advance(400).await;
        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.transport.connects(), 1);

        advance(200).await;
        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.transport.connects(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_with_other_mode_while_active_switches() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.drain();

        h.connect(InteractionMode::Describer);
        advance(1_000).await;

        assert_eq!(
            h.drain_states(),
            vec![
                SessionState::Idle,
                SessionState::Connecting,
                SessionState::Active
            ]
        );
        assert_eq!(
            h.transport.configs()[1].behavior_profile,
            InteractionMode::Describer.behavior_profile()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn same_mode_switch_is_ignored() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.drain();

        h.controller.switch_mode(InteractionMode::Assistant);
        advance(1_000).await;
        assert!(h.drain_states().is_empty());
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_twice_releases_once() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;

        h.controller.disconnect();
        h.controller.disconnect();
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.mic.releases(), 1);
        assert_eq!(h.transport.closes(), 1);
        assert_eq!(
            h.drain_states(),
            vec![
                SessionState::Connecting,
                SessionState::Active,
                SessionState::Idle
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_when_idle_is_a_noop() {
        let mut h = open_harness();
        h.controller.disconnect();
        settle().await;
        assert!(h.drain().is_empty());
        assert_eq!(h.mic.releases(), 0);
        assert_eq!(h.transport.closes(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_cancels_pending_retry() {
        let h = Harness::new(
            MockTransport::always(ConnectOutcome::Reject("unavailable".into())),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.controller.disconnect();
        advance(10_000).await;

        assert_eq!(h.transport.connects(), 1);
        assert_eq!(h.controller.state(), SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_during_pending_open_abandons_it() {
        let h = Harness::new(
            MockTransport::always(ConnectOutcome::Delayed(Duration::from_secs(5))),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Connecting);

        h.controller.disconnect();
        advance(10_000).await;

        assert_eq!(h.controller.state(), SessionState::Idle);
        assert_eq!(h.transport.open_sessions(), 0);
        assert_eq!(h.mic.acquisitions(), 1);
        assert_eq!(h.mic.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_after_abandoned_open_keeps_one_handle() {
        let h = Harness::new(
            MockTransport::scripted(
                vec![ConnectOutcome::Delayed(Duration::from_secs(5))],
                ConnectOutcome::Open,
            ),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.controller.disconnect();
        h.connect(InteractionMode::Assistant);
        advance(10_000).await;

        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.transport.open_sessions(), 1);
        assert_eq!(h.transport.max_open(), 1);
        assert_eq!(h.mic.acquisitions(), 2);
        assert_eq!(h.mic.releases(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_disconnect_churn_never_overlaps_handles() {
        let h = open_harness();
        for i in 0..6 {
            h.connect(InteractionMode::Assistant);
            if i % 2 == 0 {
                settle().await;
            }
            h.controller.disconnect();
        }
        h.connect(InteractionMode::Tutor);
        advance(1_000).await;
        h.controller.disconnect();
        settle().await;

        assert!(h.transport.max_open() <= 1);
        assert_eq!(h.transport.open_sessions(), 0);
        assert_eq!(h.mic.acquisitions(), h.mic.releases());
    }

    #[tokio::test(start_paused = true)]
    async fn capture_before_open_is_dropped() {
        let h = Harness::new(
            MockTransport::always(ConnectOutcome::Delayed(Duration::from_secs(1))),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        settle().await;
        for _ in 0..3 {
            h.mic.emit(vec![0.5; 4]);
        }
        advance(2_000).await;

        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.transport.last_session().unwrap().media_sent(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_audio_is_scheduled_and_interrupt_flushes() {
        let h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        let session = h.transport.last_session().unwrap();

        let chunk = encode_pcm16(&[0.1; 2_400], 24_000).into_media_chunk();
        session.emit(TransportEvent::Message(ServerMessage::Audio(chunk.clone())));
        session.emit(TransportEvent::Message(ServerMessage::Audio(chunk)));
        settle().await;

        let started = h.output.started();
        assert_eq!(started.len(), 2);
        assert!(started[1].1 > started[0].1);

        session.emit(TransportEvent::Message(ServerMessage::Interrupted));
        settle().await;
        assert_eq!(h.output.stopped().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn malformed_audio_is_dropped_silently() {
        let mut h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;
        h.drain();

        let session = h.transport.last_session().unwrap();
        session.emit(TransportEvent::Message(ServerMessage::Audio(MediaChunk::new(
            "audio/pcm;rate=24000",
            "@@not base64@@",
        ))));
        settle().await;

        assert_eq!(h.controller.state(), SessionState::Active);
        assert!(h.output.started().is_empty());
        assert!(h.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn video_frames_only_flow_while_active() {
        let h = open_harness();
        let frame = MediaChunk::new("image/jpeg", "/9j/");
        h.controller.send_video_frame(frame.clone());
        settle().await;
        assert_eq!(h.transport.connects(), 0);

        h.connect(InteractionMode::Describer);
        settle().await;
        h.controller.send_video_frame(frame.clone());
        settle().await;
        let session = h.transport.last_session().unwrap();
        assert_eq!(session.sent(), vec![ClientMessage::Media(frame.clone())]);

        session.fail_sends();
        h.controller.send_video_frame(frame);
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_controller_tears_down() {
        let h = open_harness();
        h.connect(InteractionMode::Assistant);
        settle().await;

        let Harness {
            controller,
            transport,
            mic,
            task,
            ..
        } = h;
        drop(controller);
        task.await.unwrap();

        assert_eq!(mic.releases(), 1);
        assert_eq!(transport.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn explicit_connect_after_error_starts_fresh() {
        let h = Harness::new(
            MockTransport::scripted(
                vec![
                    ConnectOutcome::Reject("a".into()),
                    ConnectOutcome::Reject("b".into()),
                    ConnectOutcome::Reject("c".into()),
                    ConnectOutcome::Reject("d".into()),
                ],
                ConnectOutcome::Open,
            ),
            MockMicrophone::new(16_000),
        );
        h.connect(InteractionMode::Assistant);
        advance(20_000).await;
        assert_eq!(h.controller.state(), SessionState::Error);

        h.connect(InteractionMode::Assistant);
        settle().await;
        assert_eq!(h.controller.state(), SessionState::Active);
        assert_eq!(h.transport.connects(), 5);
    }
}
