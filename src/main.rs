//! Application entry point: console live voice client.
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Open the speaker (falls back to a silent clock when unavailable).
//! 4. Build the Gemini transport and cpal microphone.
//! 5. Spawn the [`SessionManager`] and print its updates.
//! 6. Connect in the configured default mode.
//! 7. Read commands from stdin until `quit`, EOF or Ctrl-C.

use std::sync::Arc;
use std::time::Instant;

use tokio::io::{AsyncBufReadExt, BufReader};

use live_voice::audio::{AudioOutput, CpalMicrophone, CpalSpeaker, DecodedAudio, SourceId};
use live_voice::config::{AppConfig, Voice};
use live_voice::session::{InteractionMode, SessionManager, SessionOptions, SessionUpdate};
use live_voice::transport::GeminiTransport;

// ---------------------------------------------------------------------------
// Console commands
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
enum ConsoleCommand {
    Connect,
    Disconnect,
    Mode(InteractionMode),
    Voice(Voice),
    Status,
    Help,
    Quit,
}

fn parse_command(line: &str) -> Result<ConsoleCommand, String> {
    let mut words = line.split_whitespace();
    let command = words.next().unwrap_or("").to_ascii_lowercase();
    let arg = words.next();

    match (command.as_str(), arg) {
        ("connect", _) => Ok(ConsoleCommand::Connect),
        ("disconnect", _) => Ok(ConsoleCommand::Disconnect),
        ("mode", Some(name)) => name.parse().map(ConsoleCommand::Mode),
        ("voice", Some(name)) => name.parse().map(ConsoleCommand::Voice),
        ("mode" | "voice", None) => Err(format!("usage: {command} <name>")),
        ("status", _) => Ok(ConsoleCommand::Status),
        ("help" | "?", _) => Ok(ConsoleCommand::Help),
        ("quit" | "exit", _) => Ok(ConsoleCommand::Quit),
        ("", _) => Err(String::new()),
        (other, _) => Err(format!("unknown command '{other}' (try 'help')")),
    }
}

fn print_help() {
    let modes: Vec<_> = InteractionMode::ALL.iter().map(|m| m.as_str()).collect();
    let voices: Vec<_> = Voice::ALL.iter().map(|v| v.as_str()).collect();
    println!("commands: connect | disconnect | mode <name> | voice <name> | status | quit");
    println!("  modes:  {}", modes.join(", "));
    println!("  voices: {}", voices.join(", "));
}

fn print_update(update: SessionUpdate) {
    match update {
        SessionUpdate::StateChanged(state) => println!("[{state}]"),
        SessionUpdate::Reconnecting { attempt, delay } => {
            println!("[reconnecting: attempt {attempt} in {:.1}s]", delay.as_secs_f32())
        }
        SessionUpdate::Error(message) => println!("[error] {message}"),
    }
}

// ---------------------------------------------------------------------------
// SilentOutput: fallback AudioOutput when no speaker can be opened
// ---------------------------------------------------------------------------

struct SilentOutput {
    started: Instant,
}

impl AudioOutput for SilentOutput {
    fn current_time(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }

    fn start(&self, _id: SourceId, _audio: DecodedAudio, _at: f64) {}

    fn stop(&self, _id: SourceId) {}
}

// ---------------------------------------------------------------------------
// main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("live-voice starting up");

    // 2. Configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    // 3. Speaker
    let speaker = CpalSpeaker::open(config.audio.output_device.as_deref());
    let output: Arc<dyn AudioOutput> = match speaker {
        Ok(speaker) => Arc::new(speaker),
        Err(e) => {
            log::warn!("Speaker unavailable ({e}); playback disabled");
            Arc::new(SilentOutput {
                started: Instant::now(),
            })
        }
    };

    // 4-5. Session manager
    let (manager, controller, mut updates) = SessionManager::new(
        Arc::new(GeminiTransport::from_config(&config.session)),
        Arc::new(CpalMicrophone::new()),
        output,
        SessionOptions::from_config(&config),
    );
    let manager_task = manager.spawn();

    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            print_update(update);
        }
    });

    // 6. Initial connect
    let mut mode = config.session.default_mode;
    controller.connect(mode, config.voice);
    print_help();

    // 7. Console loop
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match parse_command(&line) {
            Ok(ConsoleCommand::Connect) => controller.connect(mode, config.voice),
            Ok(ConsoleCommand::Disconnect) => controller.disconnect(),
            Ok(ConsoleCommand::Mode(next)) => {
                mode = next;
                controller.switch_mode(next);
            }
            Ok(ConsoleCommand::Voice(voice)) => {
                config.voice.voice = voice;
                if let Err(e) = config.save() {
                    log::warn!("Failed to save settings: {e}");
                }
                println!("voice set to {voice}; applies on next connect");
            }
            Ok(ConsoleCommand::Status) => println!("[{}]", controller.state()),
            Ok(ConsoleCommand::Help) => print_help(),
            Ok(ConsoleCommand::Quit) => break,
            Err(message) if message.is_empty() => {}
            Err(message) => eprintln!("{message}"),
        }
    }

    // Dropping the last controller tears the session down.
    drop(controller);
    manager_task.await?;
    log::info!("live-voice stopped");
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
