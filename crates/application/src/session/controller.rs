use std::collections::VecDeque;
use std::time::{Duration, Instant};

use murmur_audio::f32_to_s16le;
use murmur_bus::AudioBlock;
use murmur_stt::{
    CloseHint, RecognitionParams, RecognizerCallback, SessionHandle, SttError,
    StreamingRecognizer,
};
use murmur_vad::{VadTransition, VoiceActivityDetector};
use serde::Serialize;

use super::buffers::{PreBuffer, SpeechBuffer};
use crate::config::SpeechConfig;
use crate::constants::{
    CLOSE_AFTER_RESULT, CLOSE_AFTER_VOICE_END, REOPEN_AFTER_SEGMENT, RESTART_AFTER_RESULT,
};
use crate::error::SpeechError;
use crate::timer::TimerQueue;

/// Log every Nth forwarded block at debug level.
const FORWARD_LOG_EVERY: u64 = 50;

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub recognition: RecognitionParams,
    pub continuous: bool,
    pub prebuffer_blocks: usize,
    pub max_buffer_chunks: usize,
    pub max_speech_duration: Duration,
    pub voice_end_grace: Duration,
}

impl SessionSettings {
    pub fn from_config(config: &SpeechConfig) -> Self {
        let mut recognition = RecognitionParams::with_language(&config.language);
        recognition.sample_rate = config.sample_rate;
        Self {
            recognition,
            continuous: config.continuous,
            prebuffer_blocks: config.prebuffer_blocks,
            max_buffer_chunks: config.max_buffer_chunks,
            max_speech_duration: config.max_speech_duration(),
            voice_end_grace: config.voice_end_grace(),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&SpeechConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionTimer {
    VoiceEndGrace,
    CloseAfterVoiceEnd,
    LongSpeechGuard,
    ReopenAfterSegment,
    CloseAfterResult,
    RestartAfterResult,
}

/// What the controller wants its host to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutput {
    VoiceActivity(bool),
    Recognized(String),
    Error(SpeechError),
    SessionOpened,
    SessionClosed,
    /// Non-continuous mode finished its single utterance.
    ListeningStopped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
    pub recognitions: u64,
    pub segmentations: u64,
    pub blocks_forwarded: u64,
    pub prebuffer_replayed: u64,
    pub write_failures: u64,
}

/// Bridges VAD decisions to a single recognizer session.
///
/// Owns the pre-roll ring, the speech buffer, the session handle and every
/// timer. Nothing here blocks: delayed work is scheduled in the timer queue
/// and runs from [`tick`](Self::tick).
pub struct SpeechSessionController {
    recognizer: Box<dyn StreamingRecognizer>,
    detector: Option<VoiceActivityDetector>,
    settings: SessionSettings,

    session: Option<SessionHandle>,
    listening: bool,
    buffering: bool,
    /// Set after a write or engine failure; writes stop until `reconnect`.
    faulted: bool,

    prebuffer: PreBuffer,
    speech: SpeechBuffer,
    partial_text: String,

    timers: TimerQueue<SessionTimer>,
    outputs: VecDeque<SessionOutput>,
    stats: SessionStats,
}

impl SpeechSessionController {
    /// `detector: None` runs the simplified continuous mode: one session is
    /// kept open and every block is forwarded.
    pub fn new(
        recognizer: Box<dyn StreamingRecognizer>,
        detector: Option<VoiceActivityDetector>,
        settings: SessionSettings,
    ) -> Self {
        Self {
            recognizer,
            detector,
            prebuffer: PreBuffer::new(settings.prebuffer_blocks),
            settings,
            session: None,
            listening: false,
            buffering: false,
            faulted: false,
            speech: SpeechBuffer::new(),
            partial_text: String::new(),
            timers: TimerQueue::new(),
            outputs: VecDeque::new(),
            stats: SessionStats::default(),
        }
    }

    pub fn start_listening(&mut self) -> Result<(), SpeechError> {
        if self.listening {
            tracing::debug!("Already listening");
            return Ok(());
        }
        self.listening = true;
        self.faulted = false;
        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
        self.prebuffer.clear();

        if self.detector.is_none() {
            if let Err(e) = self.open_session() {
                self.listening = false;
                return Err(e);
            }
        }
        tracing::info!(vad = self.detector.is_some(), "Listening started");
        Ok(())
    }

    /// Cancel timers, close the session and release buffers.
    pub fn stop_listening(&mut self) {
        if !self.listening && self.session.is_none() {
            return;
        }
        self.listening = false;
        self.timers.clear();
        self.close_session(CloseHint::Cancelled);
        self.end_buffering();
        self.prebuffer.clear();
        self.partial_text.clear();
        if let Some(detector) = self.detector.as_mut() {
            detector.reset();
        }
        tracing::info!("Listening stopped");
    }

    /// Feed one captured block. Blocks must arrive in capture order.
    pub fn process_block(&mut self, block: AudioBlock, now: Instant) {
        if !self.listening || block.samples.is_empty() {
            return;
        }

        let Some(detector) = self.detector.as_mut() else {
            // No detector: forward straight into the standing session.
            self.speech.push(block);
            self.forward_pending();
            self.speech.clear();
            return;
        };

        // Classify first so a voice start replays only blocks that precede
        // the live one.
        match detector.process(&block.samples) {
            Some(VadTransition::VoiceStarted) => self.on_voice_started(now),
            Some(VadTransition::VoiceEnded) => self.on_voice_ended(now),
            None => {}
        }

        self.prebuffer.push(block.clone());

        if self.buffering {
            // While a reopen is pending the tail is kept so the next segment
            // starts without a gap.
            let reopening = self.timers.is_pending(SessionTimer::ReopenAfterSegment);
            if self.speech.len() >= self.settings.max_buffer_chunks && !reopening {
                tracing::warn!(
                    chunks = self.speech.len(),
                    "Speech buffer full, forcing segmentation"
                );
                self.force_segmentation(now);
            }
            if self.buffering {
                self.speech.push(block);
                self.forward_pending();
            }
        }
    }

    /// Apply a recognizer callback marshaled into the owning context.
    pub fn on_callback(&mut self, callback: RecognizerCallback, now: Instant) {
        match callback {
            RecognizerCallback::Result { text, is_last } => {
                self.partial_text.push_str(&text);
                if is_last {
                    let text = std::mem::take(&mut self.partial_text);
                    let text = text.trim();
                    if text.is_empty() {
                        tracing::debug!("Final result was empty");
                    } else {
                        self.on_recognized(text.to_string(), now);
                    }
                }
            }
            RecognizerCallback::Status { code, detail } => {
                tracing::debug!(code, detail = %detail, "Recognizer status");
            }
            RecognizerCallback::Error { code, detail } => {
                self.on_engine_error(SttError::Engine { code, detail });
            }
        }
    }

    /// Run every timer that is due at `now`.
    pub fn tick(&mut self, now: Instant) {
        while let Some(timer) = self.timers.pop_due(now) {
            match timer {
                SessionTimer::VoiceEndGrace => self.on_voice_end_grace(now),
                SessionTimer::CloseAfterVoiceEnd => {
                    tracing::debug!("Closing session after voice inactivity");
                    self.close_session(CloseHint::Normal);
                }
                SessionTimer::LongSpeechGuard => {
                    if self.buffering && self.voice_active() {
                        tracing::warn!(
                            secs = self.settings.max_speech_duration.as_secs(),
                            "Long speech detected, forcing segmentation"
                        );
                        self.force_segmentation(now);
                    }
                }
                SessionTimer::ReopenAfterSegment => self.on_reopen_after_segment(now),
                SessionTimer::CloseAfterResult => self.on_close_after_result(now),
                SessionTimer::RestartAfterResult => {
                    if self.listening && self.session.is_none() {
                        tracing::info!("Restarting session for continuous listening");
                        if let Err(e) = self.open_session() {
                            self.outputs.push_back(SessionOutput::Error(e));
                        }
                    }
                }
            }
        }
    }

    /// Drop the current session and open a fresh one if one is wanted.
    pub fn reconnect(&mut self) -> Result<(), SpeechError> {
        self.close_session(CloseHint::Cancelled);
        self.faulted = false;
        if !self.listening {
            return Ok(());
        }
        if self.detector.is_none() || self.buffering {
            self.open_session()?;
            // A write failing straight away counts as a failed attempt.
            if let Err(e) = self.write_pending() {
                self.faulted = true;
                return Err(e.into());
            }
        }
        Ok(())
    }

    pub fn drain_outputs(&mut self) -> Vec<SessionOutput> {
        self.outputs.drain(..).collect()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    pub fn is_listening(&self) -> bool {
        self.listening
    }

    pub fn is_buffering(&self) -> bool {
        self.buffering
    }

    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn voice_active(&self) -> bool {
        self.detector.as_ref().is_some_and(|d| d.is_active())
    }

    pub fn vad_enabled(&self) -> bool {
        self.detector.is_some()
    }

    pub fn buffered_blocks(&self) -> usize {
        self.speech.len()
    }

    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn on_voice_started(&mut self, now: Instant) {
        self.outputs.push_back(SessionOutput::VoiceActivity(true));
        if self.buffering {
            // Resumed inside the grace window.
            if self.timers.cancel_kind(SessionTimer::VoiceEndGrace) > 0 {
                tracing::debug!("Voice resumed, pending closure cancelled");
            }
            return;
        }
        self.begin_utterance(now);
    }

    fn on_voice_ended(&mut self, now: Instant) {
        self.outputs.push_back(SessionOutput::VoiceActivity(false));
        if self.buffering {
            tracing::debug!("Voice ended, scheduling buffer processing");
            self.timers.cancel_kind(SessionTimer::VoiceEndGrace);
            self.timers
                .schedule_after(now, self.settings.voice_end_grace, SessionTimer::VoiceEndGrace);
        }
    }

    fn begin_utterance(&mut self, now: Instant) {
        // A session still winding down from the previous utterance would be
        // closed under us by its pending timer; finish it now.
        let winding_down = self.timers.cancel_kind(SessionTimer::CloseAfterResult)
            + self.timers.cancel_kind(SessionTimer::CloseAfterVoiceEnd);
        if winding_down > 0 {
            self.close_session(CloseHint::Normal);
        }
        self.timers.cancel_kind(SessionTimer::VoiceEndGrace);
        self.timers.cancel_kind(SessionTimer::ReopenAfterSegment);

        self.buffering = true;
        self.speech.clear();

        if self.session.is_none() && !self.faulted {
            if let Err(e) = self.open_session() {
                self.faulted = true;
                self.outputs.push_back(SessionOutput::Error(e));
            }
        }

        let preroll = self.prebuffer.drain();
        tracing::debug!(blocks = preroll.len(), "Replaying pre-roll");
        self.stats.prebuffer_replayed += preroll.len() as u64;
        for block in preroll {
            self.speech.push(block);
        }
        self.forward_pending();

        self.timers.cancel_kind(SessionTimer::LongSpeechGuard);
        self.timers.schedule_after(
            now,
            self.settings.max_speech_duration,
            SessionTimer::LongSpeechGuard,
        );
    }

    fn on_voice_end_grace(&mut self, now: Instant) {
        if self.voice_active() || !self.buffering {
            return;
        }
        if !self.speech.pending().is_empty() {
            tracing::debug!(
                chunks = self.speech.pending().len(),
                "Flushing remaining speech"
            );
            self.forward_pending();
        }
        self.end_buffering();
        self.timers.cancel_kind(SessionTimer::LongSpeechGuard);
        self.timers
            .schedule_after(now, CLOSE_AFTER_VOICE_END, SessionTimer::CloseAfterVoiceEnd);
    }

    fn force_segmentation(&mut self, now: Instant) {
        self.stats.segmentations += 1;
        self.forward_pending();
        self.close_session(CloseHint::Segmented);
        self.speech.clear();
        self.timers.cancel_kind(SessionTimer::LongSpeechGuard);
        self.timers.cancel_kind(SessionTimer::ReopenAfterSegment);

        if self.voice_active() {
            self.timers
                .schedule_after(now, REOPEN_AFTER_SEGMENT, SessionTimer::ReopenAfterSegment);
        } else {
            tracing::debug!("Voice ended during segmentation");
            self.end_buffering();
        }
    }

    fn on_reopen_after_segment(&mut self, now: Instant) {
        if !self.listening || !self.voice_active() {
            tracing::debug!("Voice ended before reopen, discarding segment tail");
            self.end_buffering();
            return;
        }
        tracing::info!("Voice still active, starting new segment");
        if self.session.is_none() && !self.faulted {
            if let Err(e) = self.open_session() {
                self.faulted = true;
                self.outputs.push_back(SessionOutput::Error(e));
            }
        }
        self.forward_pending();
        self.timers.schedule_after(
            now,
            self.settings.max_speech_duration,
            SessionTimer::LongSpeechGuard,
        );
    }

    fn on_recognized(&mut self, text: String, now: Instant) {
        tracing::info!(chars = text.chars().count(), "Recognition result");
        self.stats.recognitions += 1;
        self.outputs.push_back(SessionOutput::Recognized(text));

        self.end_buffering();
        self.timers.cancel_kind(SessionTimer::VoiceEndGrace);
        self.timers.cancel_kind(SessionTimer::LongSpeechGuard);
        self.timers.cancel_kind(SessionTimer::ReopenAfterSegment);
        self.timers.cancel_kind(SessionTimer::CloseAfterResult);
        self.timers
            .schedule_after(now, CLOSE_AFTER_RESULT, SessionTimer::CloseAfterResult);
    }

    fn on_close_after_result(&mut self, now: Instant) {
        self.close_session(CloseHint::Normal);
        if !self.listening {
            return;
        }

        if !self.settings.continuous {
            self.stop_listening();
            self.outputs.push_back(SessionOutput::ListeningStopped);
            return;
        }

        if self.detector.is_none() {
            self.timers
                .schedule_after(now, RESTART_AFTER_RESULT, SessionTimer::RestartAfterResult);
        } else if self.voice_active() {
            // Still talking: no new onset edge will come, so start the next
            // utterance from here.
            self.begin_utterance(now);
        }
    }

    fn on_engine_error(&mut self, err: SttError) {
        if err.is_bad_server_response() {
            tracing::error!(error = %err, "Bad server response, terminating session");
            self.timers.cancel_kind(SessionTimer::VoiceEndGrace);
            self.timers.cancel_kind(SessionTimer::LongSpeechGuard);
            self.timers.cancel_kind(SessionTimer::ReopenAfterSegment);
            self.close_session(CloseHint::ServerError);
            self.end_buffering();
        } else {
            tracing::warn!(error = %err, "Recognizer error");
        }
        self.faulted = true;
        self.outputs.push_back(SessionOutput::Error(err.into()));
    }

    fn forward_pending(&mut self) {
        if let Err(e) = self.write_pending() {
            self.on_engine_error(e);
        }
    }

    /// Write every pending speech block to the open session, stopping at
    /// the first failure.
    fn write_pending(&mut self) -> Result<(), SttError> {
        if self.faulted {
            return Ok(());
        }
        let Some(handle) = self.session.clone() else {
            return Ok(());
        };

        let mut written = 0;
        let mut failure = None;
        for block in self.speech.pending() {
            let pcm = f32_to_s16le(&block.samples);
            match self.recognizer.write_audio(&handle, &pcm) {
                Ok(_) => written += 1,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }
        self.speech.mark_forwarded(written);
        let before = self.stats.blocks_forwarded;
        self.stats.blocks_forwarded += written as u64;
        if before / FORWARD_LOG_EVERY != self.stats.blocks_forwarded / FORWARD_LOG_EVERY {
            tracing::debug!(total = self.stats.blocks_forwarded, "Forwarding audio");
        }

        match failure {
            Some(e) => {
                self.stats.write_failures += 1;
                Err(e)
            }
            None => Ok(()),
        }
    }

    fn open_session(&mut self) -> Result<(), SpeechError> {
        let handle = self
            .recognizer
            .open_session(&self.settings.recognition)
            .map_err(SpeechError::from)?;
        tracing::info!(session = %handle, "Recognition session opened");
        self.session = Some(handle);
        self.partial_text.clear();
        self.stats.sessions_opened += 1;
        self.outputs.push_back(SessionOutput::SessionOpened);
        Ok(())
    }

    fn close_session(&mut self, hint: CloseHint) {
        if let Some(handle) = self.session.take() {
            tracing::info!(session = %handle, hint = hint.as_str(), "Recognition session closed");
            self.recognizer.close_session(handle, hint);
            self.stats.sessions_closed += 1;
            self.outputs.push_back(SessionOutput::SessionClosed);
        }
    }

    fn end_buffering(&mut self) {
        self.buffering = false;
        self.speech.clear();
    }
}
