//! Public facade over the speech pipeline.
//!
//! `VoiceInteraction` is owned by one context (see [`crate::VoiceRuntime`]).
//! Everything that can run late, recognizer callbacks, timers, worker
//! results, is fed back in through its methods, so no state is touched from
//! another thread.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Instant;

use murmur_bus::AudioBlock;
use murmur_events::{
    emit_event, event_names, EventBus, EventBusRef, RecognizedTextEvent, SubscriberBus,
    SubscriptionId, SynthesisCompleteEvent, VoiceActivityEvent, VoiceErrorEvent,
};
use murmur_lipsync::{
    Acceleration, LipSyncEngine, PlaybackSynchronizer, SequenceJob, SequenceWorker,
};
use murmur_stt::{
    RecognizerCallback, SpeechSynthesizer, StreamingRecognizer, SynthesisOptions,
    SynthesisParams, SynthesizedAudio,
};
use murmur_vad::VoiceActivityDetector;
use serde::de::DeserializeOwned;

use crate::config::SpeechConfig;
use crate::error::{ErrorKind, Result, SpeechError};
use crate::recovery::{ErrorRecoveryManager, RecoveryStep};
use crate::session::{SessionOutput, SessionSettings, SessionStats, SpeechSessionController};
use crate::state_machine::{SpeechPhase, SpeechStateMachine};
use crate::synthesis::{SharedSynthesizer, SynthesisJob, SynthesisWorker};

/// Synthesized clips kept for the host before the oldest is dropped.
const MAX_PENDING_AUDIO: usize = 8;

pub struct VoiceInteractionBuilder {
    config: SpeechConfig,
    recognizer: Option<Box<dyn StreamingRecognizer>>,
    synthesizer: Option<Box<dyn SpeechSynthesizer>>,
    synthesis_options: SynthesisOptions,
    lipsync_engine: Option<Arc<dyn LipSyncEngine>>,
    bus: Option<Arc<SubscriberBus>>,
}

impl VoiceInteractionBuilder {
    pub fn recognizer(mut self, recognizer: Box<dyn StreamingRecognizer>) -> Self {
        self.recognizer = Some(recognizer);
        self
    }

    pub fn synthesizer(mut self, synthesizer: Box<dyn SpeechSynthesizer>) -> Self {
        self.synthesizer = Some(synthesizer);
        self
    }

    pub fn synthesis_options(mut self, options: SynthesisOptions) -> Self {
        self.synthesis_options = options;
        self
    }

    pub fn lipsync_engine(mut self, engine: Arc<dyn LipSyncEngine>) -> Self {
        self.lipsync_engine = Some(engine);
        self
    }

    pub fn event_bus(mut self, bus: Arc<SubscriberBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Initialize every subsystem and end in `Ready`.
    ///
    /// A missing lip-sync model only disables lip-sync; any other failure
    /// leaves the state machine in `Error` and is returned.
    pub fn build(self) -> Result<VoiceInteraction> {
        let bus = self.bus.unwrap_or_default();
        let bus_ref: EventBusRef = bus.clone();
        let mut state = SpeechStateMachine::new(bus_ref.clone());
        state.transition_to(SpeechPhase::Initializing, "initialize");

        match Self::init_core(self.config, self.recognizer, &bus_ref) {
            Ok((config, controller, recovery)) => {
                let synthesis = match self.synthesizer {
                    Some(synth) => {
                        let shared: SharedSynthesizer = Arc::new(Mutex::new(synth));
                        match SynthesisWorker::spawn(shared, self.synthesis_options) {
                            Ok(worker) => Some(worker),
                            Err(e) => {
                                state.set_error(e.kind, e.message.clone());
                                return Err(e);
                            }
                        }
                    }
                    None => None,
                };

                let lipsync = spawn_lipsync(&config, self.lipsync_engine, bus_ref.as_ref());
                let playback = PlaybackSynchronizer::new(bus_ref.clone());

                state.transition_to(SpeechPhase::Ready, "initialized");
                tracing::info!(
                    vad = config.vad_enabled,
                    synthesis = synthesis.is_some(),
                    lipsync = lipsync.is_some(),
                    "Voice interaction ready"
                );

                Ok(VoiceInteraction {
                    config,
                    bus,
                    bus_ref,
                    state,
                    recovery,
                    controller,
                    synthesis,
                    lipsync,
                    playback,
                    recognized: VecDeque::new(),
                    synthesized: VecDeque::new(),
                    recovering_kind: None,
                    next_job_id: 0,
                })
            }
            Err(e) => {
                state.set_error(e.kind, e.message.clone());
                Err(e)
            }
        }
    }

    fn init_core(
        mut config: SpeechConfig,
        recognizer: Option<Box<dyn StreamingRecognizer>>,
        bus: &EventBusRef,
    ) -> Result<(SpeechConfig, SpeechSessionController, ErrorRecoveryManager)> {
        config.validate()?;
        let recognizer = recognizer.ok_or_else(|| {
            SpeechError::new(ErrorKind::InitializationFailed, "no speech recognizer configured")
        })?;

        let detector = if config.vad_enabled {
            Some(VoiceActivityDetector::new(
                config.vad_settings(),
                config.sample_rate,
            )?)
        } else {
            None
        };

        let controller = SpeechSessionController::new(
            recognizer,
            detector,
            SessionSettings::from_config(&config),
        );
        let recovery = ErrorRecoveryManager::new(
            config.max_reconnect_attempts,
            config.reconnect_delay(),
            bus.clone(),
        );
        Ok((config, controller, recovery))
    }
}

fn spawn_lipsync(
    config: &SpeechConfig,
    engine: Option<Arc<dyn LipSyncEngine>>,
    bus: &dyn EventBus,
) -> Option<SequenceWorker> {
    let engine = engine?;
    let Some(model_path) = config.lipsync_model_path.clone() else {
        tracing::warn!("Lip-sync engine given without a model path, lip-sync disabled");
        return None;
    };
    match SequenceWorker::spawn(engine, model_path, Acceleration::Cpu) {
        Ok(worker) => Some(worker),
        Err(e) => {
            let err = SpeechError::from(e);
            tracing::error!(error = %err, "Lip-sync unavailable");
            emit_event(
                bus,
                event_names::VOICE_ERROR,
                &VoiceErrorEvent {
                    kind: err.kind.to_string(),
                    message: err.message,
                },
            );
            None
        }
    }
}

pub struct VoiceInteraction {
    config: SpeechConfig,
    bus: Arc<SubscriberBus>,
    bus_ref: EventBusRef,
    state: SpeechStateMachine,
    recovery: ErrorRecoveryManager,
    controller: SpeechSessionController,
    synthesis: Option<SynthesisWorker>,
    lipsync: Option<SequenceWorker>,
    playback: PlaybackSynchronizer,
    recognized: VecDeque<String>,
    synthesized: VecDeque<SynthesizedAudio>,
    /// Kind of the error the running reconnection sequence is handling.
    recovering_kind: Option<ErrorKind>,
    next_job_id: u64,
}

impl VoiceInteraction {
    pub fn builder(config: SpeechConfig) -> VoiceInteractionBuilder {
        VoiceInteractionBuilder {
            config,
            recognizer: None,
            synthesizer: None,
            synthesis_options: SynthesisOptions::default(),
            lipsync_engine: None,
            bus: None,
        }
    }

    pub fn start_listening(&mut self, now: Instant) -> Result<()> {
        match self.state.current() {
            SpeechPhase::Listening | SpeechPhase::Processing => return Ok(()),
            phase if !phase.allows(SpeechPhase::Listening) => {
                return Err(SpeechError::new(
                    ErrorKind::InvalidTransition,
                    format!("cannot start listening while {phase}"),
                ));
            }
            _ => {}
        }

        if let Err(e) = self.controller.start_listening() {
            self.handle_error(e.clone(), now);
            self.pump(now);
            return Err(e);
        }
        self.state.transition_to(SpeechPhase::Listening, "start listening");
        self.pump(now);
        Ok(())
    }

    pub fn stop_listening(&mut self, now: Instant) {
        self.controller.stop_listening();
        self.recovery.stop_reconnection();
        if matches!(
            self.state.current(),
            SpeechPhase::Listening | SpeechPhase::Processing | SpeechPhase::Reconnecting
        ) {
            self.state.transition_to(SpeechPhase::Ready, "stop listening");
        }
        self.pump(now);
    }

    pub fn process_block(&mut self, block: AudioBlock, now: Instant) {
        self.controller.process_block(block, now);
        self.pump(now);
    }

    pub fn on_recognizer_callback(&mut self, callback: RecognizerCallback, now: Instant) {
        self.controller.on_callback(callback, now);
        self.pump(now);
    }

    /// Queue `text` for synthesis. Returns the job id.
    pub fn speak_text(&mut self, text: &str, voice: Option<&str>) -> Result<u64> {
        if text.trim().is_empty() {
            return Err(SpeechError::new(
                ErrorKind::ConfigurationError,
                "text cannot be empty",
            ));
        }
        let Some(worker) = self.synthesis.as_ref() else {
            return Err(SpeechError::new(
                ErrorKind::InitializationFailed,
                "no speech synthesizer configured",
            ));
        };

        self.next_job_id += 1;
        let mut params = SynthesisParams::with_voice(voice.unwrap_or(&self.config.voice));
        params.sample_rate = self.config.sample_rate;
        worker.submit(SynthesisJob {
            id: self.next_job_id,
            text: text.to_string(),
            params,
        })?;
        tracing::info!(id = self.next_job_id, chars = text.chars().count(), "Speak text queued");
        Ok(self.next_job_id)
    }

    /// Run due timers, collect worker results and advance lip-sync playback.
    pub fn tick(&mut self, now: Instant) {
        self.controller.tick(now);
        self.recovery.tick(now);
        self.pump(now);
        self.poll_synthesis();
        self.poll_lipsync();
        self.playback.tick();
    }

    pub fn on_playback_percent(&mut self, percent: f32, duration_secs: f32) {
        self.playback.on_playback_percent(percent, duration_secs);
    }

    pub fn on_playback_finished(&mut self) {
        self.playback.on_playback_finished();
    }

    /// Earliest pending timer across the controller and the recovery manager.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.controller.next_deadline(), self.recovery.next_deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    pub fn current_voice_activity(&self) -> bool {
        self.controller.voice_active()
    }

    /// Viseme scores and laughter for the current playback frame.
    pub fn current_visemes(&self) -> (Vec<f32>, f32) {
        (
            self.playback.current_visemes().to_vec(),
            self.playback.laughter(),
        )
    }

    pub fn current_state(&self) -> SpeechPhase {
        self.state.current()
    }

    pub fn state_history(&self) -> Vec<SpeechPhase> {
        self.state.history()
    }

    pub fn last_error(&self) -> Option<&SpeechError> {
        self.state.last_error()
    }

    pub fn is_operational(&self) -> bool {
        self.state.is_operational()
    }

    pub fn is_listening(&self) -> bool {
        self.controller.is_listening()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.recovery.is_reconnecting()
    }

    pub fn stats(&self) -> SessionStats {
        self.controller.stats().clone()
    }

    pub fn config(&self) -> &SpeechConfig {
        &self.config
    }

    pub fn event_bus(&self) -> EventBusRef {
        self.bus_ref.clone()
    }

    pub fn subscribe<F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&serde_json::Value) + Send + Sync + 'static,
    {
        self.bus.subscribe(topic, handler)
    }

    pub fn subscribe_typed<T, F>(&self, topic: &str, handler: F) -> SubscriptionId
    where
        T: DeserializeOwned,
        F: Fn(T) + Send + Sync + 'static,
    {
        self.bus.subscribe_typed(topic, handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Recognized texts not yet collected, oldest first.
    pub fn take_recognized_texts(&mut self) -> Vec<String> {
        self.recognized.drain(..).collect()
    }

    pub fn take_synthesized_audio(&mut self) -> Vec<SynthesizedAudio> {
        self.synthesized.drain(..).collect()
    }

    /// Stop audio, cancel timers, close the session, stop workers.
    pub fn shutdown(&mut self, now: Instant) {
        self.stop_listening(now);
        if let Some(mut worker) = self.synthesis.take() {
            worker.stop();
        }
        if let Some(mut worker) = self.lipsync.take() {
            worker.stop();
        }
        self.playback.stop();
        tracing::info!("Voice interaction shut down");
    }

    /// Route controller outputs and recovery steps until both are quiet.
    fn pump(&mut self, now: Instant) {
        loop {
            let outputs = self.controller.drain_outputs();
            let steps = self.recovery.take_steps();
            if outputs.is_empty() && steps.is_empty() {
                break;
            }
            for output in outputs {
                self.handle_output(output, now);
            }
            for step in steps {
                self.handle_recovery_step(step);
            }
        }
    }

    fn handle_output(&mut self, output: SessionOutput, now: Instant) {
        match output {
            SessionOutput::VoiceActivity(active) => {
                self.emit(
                    event_names::VOICE_ACTIVITY,
                    &VoiceActivityEvent {
                        active,
                        ts_ms: now_ms(),
                    },
                );
                match (active, self.state.current()) {
                    (true, SpeechPhase::Listening) => {
                        self.state.transition_to(SpeechPhase::Processing, "voice detected");
                    }
                    (false, SpeechPhase::Processing) => {
                        self.state.transition_to(SpeechPhase::Listening, "voice ended");
                    }
                    _ => {}
                }
            }
            SessionOutput::Recognized(text) => {
                self.emit(
                    event_names::RECOGNIZED_TEXT,
                    &RecognizedTextEvent {
                        text: text.clone(),
                        ts_ms: now_ms(),
                    },
                );
                self.recognized.push_back(text);
            }
            SessionOutput::Error(e) => self.handle_error(e, now),
            SessionOutput::SessionOpened | SessionOutput::SessionClosed => {}
            SessionOutput::ListeningStopped => {
                if matches!(
                    self.state.current(),
                    SpeechPhase::Listening | SpeechPhase::Processing
                ) {
                    self.state.transition_to(SpeechPhase::Ready, "utterance complete");
                }
            }
        }
    }

    fn handle_error(&mut self, err: SpeechError, now: Instant) {
        if self.recovery.attempt_recovery(err.kind, &err.message, now) {
            // Recoverable: report it, the recovery steps drive the state.
            self.recovering_kind = Some(err.kind);
            self.emit(
                event_names::VOICE_ERROR,
                &VoiceErrorEvent {
                    kind: err.kind.to_string(),
                    message: err.message,
                },
            );
        } else {
            self.controller.stop_listening();
            self.state.set_error(err.kind, err.message);
        }
    }

    fn handle_recovery_step(&mut self, step: RecoveryStep) {
        match step {
            RecoveryStep::Attempt(attempt) => {
                if self.state.current() != SpeechPhase::Reconnecting {
                    self.state
                        .transition_to(SpeechPhase::Reconnecting, &format!("attempt {attempt}"));
                }
                match self.controller.reconnect() {
                    Ok(()) => {
                        self.recovery.notify_reconnected();
                        self.recovering_kind = None;
                        self.state.transition_to(SpeechPhase::Ready, "reconnected");
                        if self.controller.is_listening() {
                            self.state.transition_to(SpeechPhase::Listening, "resume listening");
                            if self.controller.voice_active() {
                                self.state
                                    .transition_to(SpeechPhase::Processing, "voice still active");
                            }
                        }
                    }
                    Err(e) => {
                        tracing::warn!(attempt, error = %e, "Reconnection attempt failed");
                        self.recovery.notify_attempt_failed();
                    }
                }
            }
            RecoveryStep::GaveUp(reason) => {
                let kind = self.recovering_kind.take().unwrap_or(ErrorKind::NetworkError);
                self.controller.stop_listening();
                self.state.set_error(kind, reason);
            }
        }
    }

    fn poll_synthesis(&mut self) {
        let mut finished = Vec::new();
        if let Some(worker) = self.synthesis.as_ref() {
            while let Some(result) = worker.try_recv() {
                finished.push(result);
            }
        }

        for result in finished {
            match result.audio {
                Ok(audio) => {
                    self.emit(
                        event_names::SYNTHESIS_COMPLETE,
                        &SynthesisCompleteEvent {
                            text: result.text,
                            wav_bytes: audio.wav.len(),
                            duration_ms: audio.duration_ms(),
                        },
                    );
                    if let Some(lipsync) = self.lipsync.as_ref() {
                        let job = SequenceJob {
                            id: result.id,
                            wav: audio.wav.clone(),
                        };
                        if let Err(e) = lipsync.submit(job) {
                            tracing::warn!("Lip-sync job not queued: {e}");
                        }
                    }
                    if self.synthesized.len() >= MAX_PENDING_AUDIO {
                        tracing::warn!("Synthesized audio not collected, dropping oldest");
                        self.synthesized.pop_front();
                    }
                    self.synthesized.push_back(audio);
                }
                Err(e) => {
                    let err = SpeechError::from(e);
                    self.emit(
                        event_names::VOICE_ERROR,
                        &VoiceErrorEvent {
                            kind: err.kind.to_string(),
                            message: format!("Speech synthesis failed: {}", err.message),
                        },
                    );
                }
            }
        }
    }

    fn poll_lipsync(&mut self) {
        let mut finished = Vec::new();
        if let Some(worker) = self.lipsync.as_ref() {
            while let Some(result) = worker.try_recv() {
                finished.push(result);
            }
        }

        for result in finished {
            match result.sequence {
                Ok(sequence) => self.playback.set_sequence(Arc::new(sequence)),
                Err(e) => {
                    let err = SpeechError::from(e);
                    self.emit(
                        event_names::VOICE_ERROR,
                        &VoiceErrorEvent {
                            kind: err.kind.to_string(),
                            message: err.message,
                        },
                    );
                }
            }
        }
    }

    fn emit<T: serde::Serialize>(&self, topic: &str, event: &T) {
        emit_event(self.bus_ref.as_ref(), topic, event);
    }
}

impl Drop for VoiceInteraction {
    fn drop(&mut self) {
        self.controller.stop_listening();
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
