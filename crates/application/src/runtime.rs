//! The owning context: one tokio task that drives a [`VoiceInteraction`].
//!
//! Capture blocks, recognizer callbacks and host commands all arrive over
//! channels and are applied in order inside the task, so the pipeline state
//! is never shared across threads. Conversation replies come back the same
//! way and are published from the task, one request in flight at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use murmur_bus::{AudioBusReceiver, BusStatus, BusStatusSnapshot};
use murmur_conversation::{ChatReply, ConversationBackend, ConversationError};
use murmur_events::{
    emit_event, event_names, ConversationReplyEvent, EventBusRef, VoiceErrorEvent,
};
use murmur_stt::{CallbackReceiver, SynthesizedAudio};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::constants::TICK_INTERVAL;
use crate::error::{ErrorKind, Result, SpeechError};
use crate::interaction::VoiceInteraction;
use crate::session::SessionStats;
use crate::state_machine::SpeechPhase;

enum RuntimeCommand {
    StartListening(oneshot::Sender<Result<()>>),
    StopListening,
    SpeakText {
        text: String,
        voice: Option<String>,
        reply: oneshot::Sender<Result<u64>>,
    },
    PlaybackPercent {
        percent: f32,
        duration_secs: f32,
    },
    PlaybackFinished,
    TakeSynthesizedAudio(oneshot::Sender<Vec<SynthesizedAudio>>),
    Snapshot(oneshot::Sender<RuntimeSnapshot>),
}

/// Point-in-time view of the pipeline for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeSnapshot {
    pub phase: SpeechPhase,
    pub listening: bool,
    pub voice_active: bool,
    pub reconnecting: bool,
    pub visemes: Vec<f32>,
    pub laughter: f32,
    pub last_error: Option<String>,
    pub session: SessionStats,
    pub bus: Option<BusStatusSnapshot>,
}

pub struct VoiceRuntime {
    interaction: VoiceInteraction,
    audio: AudioBusReceiver,
    callbacks: CallbackReceiver,
    bus_status: Option<Arc<BusStatus>>,
    conversation: Option<Arc<dyn ConversationBackend>>,
}

impl VoiceRuntime {
    pub fn new(
        interaction: VoiceInteraction,
        audio: AudioBusReceiver,
        callbacks: CallbackReceiver,
    ) -> Self {
        Self {
            interaction,
            audio,
            callbacks,
            bus_status: None,
            conversation: None,
        }
    }

    /// Include capture-bus counters in snapshots.
    pub fn with_bus_status(mut self, status: Arc<BusStatus>) -> Self {
        self.bus_status = Some(status);
        self
    }

    /// Forward recognized text to a chat backend when the config enables it.
    pub fn with_conversation(mut self, backend: Arc<dyn ConversationBackend>) -> Self {
        self.conversation = Some(backend);
        self
    }

    /// Spawn the owning task on the current tokio runtime.
    pub fn spawn(self) -> VoiceRuntimeHandle {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run(self, command_rx, cancel.child_token()));
        VoiceRuntimeHandle {
            commands: command_tx,
            cancel,
            task: Some(task),
        }
    }
}

/// Host-side handle. Dropping it cancels the task.
pub struct VoiceRuntimeHandle {
    commands: mpsc::UnboundedSender<RuntimeCommand>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl VoiceRuntimeHandle {
    pub async fn start_listening(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.send(RuntimeCommand::StartListening(tx))?;
        rx.await.map_err(|_| stopped())?
    }

    pub fn stop_listening(&self) -> Result<()> {
        self.send(RuntimeCommand::StopListening)
    }

    pub async fn speak_text(&self, text: &str, voice: Option<&str>) -> Result<u64> {
        let (tx, rx) = oneshot::channel();
        self.send(RuntimeCommand::SpeakText {
            text: text.to_string(),
            voice: voice.map(str::to_string),
            reply: tx,
        })?;
        rx.await.map_err(|_| stopped())?
    }

    pub fn playback_percent(&self, percent: f32, duration_secs: f32) -> Result<()> {
        self.send(RuntimeCommand::PlaybackPercent {
            percent,
            duration_secs,
        })
    }

    pub fn playback_finished(&self) -> Result<()> {
        self.send(RuntimeCommand::PlaybackFinished)
    }

    pub async fn take_synthesized_audio(&self) -> Result<Vec<SynthesizedAudio>> {
        let (tx, rx) = oneshot::channel();
        self.send(RuntimeCommand::TakeSynthesizedAudio(tx))?;
        rx.await.map_err(|_| stopped())
    }

    pub async fn snapshot(&self) -> Result<RuntimeSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.send(RuntimeCommand::Snapshot(tx))?;
        rx.await.map_err(|_| stopped())
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Cancel the task and wait for it to tear the pipeline down.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::error!("Voice runtime task failed: {e}");
            }
        }
    }

    fn send(&self, command: RuntimeCommand) -> Result<()> {
        self.commands.send(command).map_err(|_| stopped())
    }
}

impl Drop for VoiceRuntimeHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn stopped() -> SpeechError {
    SpeechError::new(ErrorKind::InitializationFailed, "voice runtime is not running")
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
        None => std::future::pending().await,
    }
}

async fn run(
    runtime: VoiceRuntime,
    mut commands: mpsc::UnboundedReceiver<RuntimeCommand>,
    cancel: CancellationToken,
) {
    let VoiceRuntime {
        mut interaction,
        mut audio,
        mut callbacks,
        bus_status,
        conversation,
    } = runtime;
    let forward = interaction.config().forward_to_conversation;
    let conversation = conversation.filter(|_| forward);
    let events = interaction.event_bus();

    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    let mut outbox: VecDeque<String> = VecDeque::new();
    let mut in_flight: Option<JoinHandle<()>> = None;

    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut audio_open = true;
    let mut callbacks_open = true;
    let mut blocks = 0u64;

    tracing::info!("Voice runtime started");
    loop {
        let deadline = interaction.next_deadline();
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                tracing::info!("Voice runtime cancelled");
                break;
            }
            command = commands.recv() => match command {
                Some(command) => handle_command(&mut interaction, command, bus_status.as_deref()),
                None => {
                    tracing::info!("All runtime handles dropped");
                    break;
                }
            },
            callback = callbacks.recv(), if callbacks_open => match callback {
                Some(callback) => interaction.on_recognizer_callback(callback, now()),
                None => {
                    tracing::warn!("Recognizer callback channel closed");
                    callbacks_open = false;
                }
            },
            Some(outcome) = replies.recv() => {
                in_flight = None;
                publish_reply(&events, outcome);
            }
            block = audio.recv(), if audio_open => match block {
                Some(block) => {
                    interaction.process_block(block, now());
                    blocks += 1;
                    if blocks % 100 == 0 {
                        tracing::trace!(blocks, "Runtime progress");
                    }
                }
                None => {
                    tracing::info!("Audio bus closed");
                    audio_open = false;
                }
            },
            _ = sleep_until(deadline) => interaction.tick(now()),
            _ = ticker.tick() => interaction.tick(now()),
        }

        let texts = interaction.take_recognized_texts();
        if let Some(backend) = conversation.as_ref() {
            outbox.extend(texts);
            if in_flight.is_none() {
                if let Some(text) = outbox.pop_front() {
                    in_flight = Some(forward_to_conversation(
                        Arc::clone(backend),
                        reply_tx.clone(),
                        cancel.child_token(),
                        text,
                    ));
                }
            }
        }
    }

    if let Some(task) = in_flight.take() {
        task.abort();
        tracing::debug!(queued = outbox.len(), "Conversation request abandoned");
    }
    interaction.shutdown(now());
    tracing::info!(blocks, "Voice runtime stopped");
}

fn handle_command(
    interaction: &mut VoiceInteraction,
    command: RuntimeCommand,
    bus_status: Option<&BusStatus>,
) {
    match command {
        RuntimeCommand::StartListening(reply) => {
            let _ = reply.send(interaction.start_listening(now()));
        }
        RuntimeCommand::StopListening => interaction.stop_listening(now()),
        RuntimeCommand::SpeakText { text, voice, reply } => {
            let _ = reply.send(interaction.speak_text(&text, voice.as_deref()));
        }
        RuntimeCommand::PlaybackPercent {
            percent,
            duration_secs,
        } => interaction.on_playback_percent(percent, duration_secs),
        RuntimeCommand::PlaybackFinished => interaction.on_playback_finished(),
        RuntimeCommand::TakeSynthesizedAudio(reply) => {
            let _ = reply.send(interaction.take_synthesized_audio());
        }
        RuntimeCommand::Snapshot(reply) => {
            let (visemes, laughter) = interaction.current_visemes();
            let _ = reply.send(RuntimeSnapshot {
                phase: interaction.current_state(),
                listening: interaction.is_listening(),
                voice_active: interaction.current_voice_activity(),
                reconnecting: interaction.is_reconnecting(),
                visemes,
                laughter,
                last_error: interaction.last_error().map(ToString::to_string),
                session: interaction.stats(),
                bus: bus_status.map(BusStatus::snapshot),
            });
        }
    }
}

type ConversationOutcome = std::result::Result<ChatReply, ConversationError>;

/// Run one chat request off the owning task. The outcome is sent back over
/// `replies`; nothing is published from here.
fn forward_to_conversation(
    backend: Arc<dyn ConversationBackend>,
    replies: mpsc::UnboundedSender<ConversationOutcome>,
    cancel: CancellationToken,
    text: String,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = cancel.cancelled() => {}
            outcome = backend.send_message(&text, None) => {
                let _ = replies.send(outcome);
            }
        }
    })
}

fn publish_reply(events: &EventBusRef, outcome: ConversationOutcome) {
    match outcome {
        Ok(reply) => {
            tracing::info!(chars = reply.answer.chars().count(), "Conversation reply");
            emit_event(
                events.as_ref(),
                event_names::CONVERSATION_REPLY,
                &ConversationReplyEvent {
                    answer: reply.answer,
                    conversation_id: reply.conversation_id,
                },
            );
        }
        Err(e) => {
            let err = SpeechError::from(e);
            tracing::warn!(error = %err, "Conversation request failed");
            emit_event(
                events.as_ref(),
                event_names::VOICE_ERROR,
                &VoiceErrorEvent {
                    kind: err.kind.to_string(),
                    message: err.message,
                },
            );
        }
    }
}
