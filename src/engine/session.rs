//! The session event loop.
//!
//! One session owns one [`PlaybackEngine`] and one [`StateChannel`]. It runs
//! on a dedicated thread with a current-thread tokio runtime, so every engine
//! mutation happens on a single cooperative loop. The loop multiplexes:
//!
//! - Aura State changes published by the channel (diffed into engine actions)
//! - [`EngineCommand`]s from the UI layer
//! - track load completions
//! - the engine's next timer deadline (retry ladder, meter tick)
//!
//! After every event the current [`PlayerStatus`] is republished.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::config::PlayerConfig;
use super::driver;
use super::loader::{HttpTrackLoader, LoadOutcome, TrackLoader};
use super::playback::PlaybackEngine;
use super::status::PlayerStatus;
use crate::channel::{ChannelHandle, StateChannel};
use crate::io::{AudioBackend, CpalBackend};
use crate::state::{AuraState, EmotionVector};

#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Load(String),
    Start,
    ForcePlay,
    Pause,
    SetVolume(f64),
    SetBypass(bool),
    TestTone,
    Vote(String),
    Weights(BTreeMap<String, f64>),
    ManualOverride { active: bool, vector: EmotionVector },
    Control { kind: String, payload: Value },
    Shutdown,
}

/// Handle to a running session thread.
pub struct Session {
    commands: mpsc::UnboundedSender<EngineCommand>,
    status: watch::Receiver<PlayerStatus>,
    thread: std::thread::JoinHandle<Result<()>>,
}

impl Session {
    pub fn spawn(config: PlayerConfig) -> Result<Self> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status) = watch::channel(PlayerStatus::default());

        let thread = std::thread::Builder::new()
            .name("aura-session".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .context("Failed to build session runtime")?;
                runtime.block_on(async move {
                    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
                    let backend = CpalBackend::new(config.output_device_id.clone());
                    let loader = HttpTrackLoader::new(outcome_tx);
                    let (channel, handle, state_rx) = StateChannel::new(config.studio_url.clone());
                    tokio::spawn(channel.run());

                    let engine = PlaybackEngine::new(backend, loader, &config);
                    run_loop(
                        engine,
                        &config,
                        handle,
                        state_rx,
                        command_rx,
                        outcome_rx,
                        status_tx,
                    )
                    .await;
                });
                Ok(())
            })
            .context("Failed to spawn session thread")?;

        Ok(Self {
            commands,
            status,
            thread,
        })
    }

    pub fn send(&self, command: EngineCommand) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("Session has stopped"))
    }

    pub fn status(&self) -> PlayerStatus {
        self.status.borrow().clone()
    }

    /// Asks the session to shut down and waits for it.
    pub fn join(self) -> Result<()> {
        let _ = self.commands.send(EngineCommand::Shutdown);
        self.thread
            .join()
            .map_err(|_| anyhow::anyhow!("Session thread panicked"))?
    }
}

async fn run_loop<B: AudioBackend, L: TrackLoader>(
    mut engine: PlaybackEngine<B, L>,
    config: &PlayerConfig,
    channel: ChannelHandle,
    mut state_rx: watch::Receiver<AuraState>,
    mut commands: mpsc::UnboundedReceiver<EngineCommand>,
    mut outcomes: mpsc::UnboundedReceiver<LoadOutcome>,
    status_tx: watch::Sender<PlayerStatus>,
) {
    info!("Session started");
    let mut aura = AuraState::default();
    let mut feed_open = true;

    loop {
        let deadline = engine.next_deadline();

        tokio::select! {
            changed = state_rx.changed(), if feed_open => {
                if changed.is_err() {
                    debug!("State feed ended");
                    feed_open = false;
                } else {
                    let next = state_rx.borrow_and_update().clone();
                    let now = Instant::now();
                    for action in driver::diff(&aura, &next, config.backend_url.as_ref()) {
                        debug!("Applying {:?}", action);
                        engine.apply(action, now);
                    }
                    aura = next;
                }
            }
            command = commands.recv() => match command {
                None | Some(EngineCommand::Shutdown) => break,
                Some(command) => handle_command(&mut engine, &channel, command),
            },
            Some(outcome) = outcomes.recv() => {
                engine.on_track_loaded(outcome, Instant::now());
            }
            _ = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                engine.on_deadline(Instant::now());
            }
        }

        status_tx.send_replace(engine.status(&aura, channel.is_connected()));
    }

    engine.shutdown();
    status_tx.send_replace(engine.status(&aura, channel.is_connected()));
    info!("Session ended");
}

fn handle_command<B: AudioBackend, L: TrackLoader>(
    engine: &mut PlaybackEngine<B, L>,
    channel: &ChannelHandle,
    command: EngineCommand,
) {
    let now = Instant::now();
    match command {
        EngineCommand::Load(url) => engine.load(&url, now),
        EngineCommand::Start => engine.start(now),
        EngineCommand::ForcePlay => {
            if let Err(e) = engine.force_play(now) {
                warn!("{}", e);
            }
        }
        EngineCommand::Pause => engine.pause(now),
        EngineCommand::SetVolume(level) => engine.set_volume(level),
        EngineCommand::SetBypass(on) => engine.set_bypass(on),
        EngineCommand::TestTone => {
            if let Err(e) = engine.play_tone() {
                warn!("Test tone failed: {}", e);
            }
        }
        EngineCommand::Vote(mood) => channel.send_vote(&mood),
        EngineCommand::Weights(weights) => channel.send_weights(&weights),
        EngineCommand::ManualOverride { active, vector } => {
            channel.send_manual_override(active, &vector)
        }
        EngineCommand::Control { kind, payload } => channel.send_control(&kind, payload),
        EngineCommand::Shutdown => {}
    }
}
