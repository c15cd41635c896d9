//! Hysteresis on top of the raw per-block classification.

use serde::{Deserialize, Serialize};

use crate::classifier::{Classifier, EnergyClassifier, VadMode};
use crate::{Result, VadError, SUPPORTED_SAMPLE_RATES};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadSettings {
    pub mode: VadMode,
    /// When false the raw classification drives the state directly.
    pub smoothing: bool,
    /// Consecutive voice blocks needed to enter Voice.
    pub start_threshold: u32,
    /// Consecutive silent blocks needed to leave Voice.
    pub end_threshold: u32,
}

impl Default for VadSettings {
    fn default() -> Self {
        Self {
            mode: VadMode::Aggressive,
            smoothing: true,
            start_threshold: 5,
            end_threshold: 30,
        }
    }
}

/// Edge notification, emitted once per state change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadTransition {
    VoiceStarted,
    VoiceEnded,
}

impl VadTransition {
    pub fn is_active(self) -> bool {
        matches!(self, VadTransition::VoiceStarted)
    }
}

/// Read-only view of the detector's internals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VoiceActivityState {
    pub mode: VadMode,
    pub smoothing: bool,
    pub start_threshold: u32,
    pub end_threshold: u32,
    pub voice_count: u32,
    pub silence_count: u32,
    pub active: bool,
    pub last_reported: bool,
}

pub struct VoiceActivityDetector<C = EnergyClassifier> {
    classifier: C,
    settings: VadSettings,
    sample_rate: u32,
    voice_count: u32,
    silence_count: u32,
    active: bool,
    last_reported: bool,
}

impl VoiceActivityDetector<EnergyClassifier> {
    pub fn new(settings: VadSettings, sample_rate: u32) -> Result<Self> {
        Self::with_classifier(EnergyClassifier::new(settings.mode), settings, sample_rate)
    }

    /// Change aggressiveness without touching counters.
    pub fn set_mode(&mut self, mode: VadMode) {
        self.settings.mode = mode;
        self.classifier.mode = mode;
    }
}

impl<C: Classifier> VoiceActivityDetector<C> {
    pub fn with_classifier(classifier: C, settings: VadSettings, sample_rate: u32) -> Result<Self> {
        if !SUPPORTED_SAMPLE_RATES.contains(&sample_rate) {
            return Err(VadError::UnsupportedSampleRate(sample_rate));
        }
        tracing::debug!(
            mode = ?settings.mode,
            smoothing = settings.smoothing,
            start = settings.start_threshold,
            end = settings.end_threshold,
            sample_rate,
            "Voice activity detector ready"
        );
        Ok(Self {
            classifier,
            settings,
            sample_rate,
            voice_count: 0,
            silence_count: 0,
            active: false,
            last_reported: false,
        })
    }

    /// Classify one block and advance the hysteresis state.
    pub fn process(&mut self, samples: &[f32]) -> Option<VadTransition> {
        let is_voice = self.classifier.classify(samples);
        self.apply(is_voice)
    }

    /// Advance with an already-made raw decision.
    pub fn apply(&mut self, is_voice: bool) -> Option<VadTransition> {
        if is_voice {
            self.voice_count = self.voice_count.saturating_add(1);
            self.silence_count = 0;
        } else {
            self.silence_count = self.silence_count.saturating_add(1);
            self.voice_count = 0;
        }

        if self.settings.smoothing {
            if !self.active && self.voice_count >= self.settings.start_threshold.max(1) {
                self.active = true;
            } else if self.active && self.silence_count >= self.settings.end_threshold.max(1) {
                self.active = false;
            }
        } else {
            self.active = is_voice;
        }

        if self.active == self.last_reported {
            return None;
        }
        self.last_reported = self.active;

        let transition = if self.active {
            VadTransition::VoiceStarted
        } else {
            VadTransition::VoiceEnded
        };
        tracing::trace!(?transition, "VAD state change");
        Some(transition)
    }

    /// Back to Silence with cleared counters. Never notifies.
    pub fn reset(&mut self) {
        self.voice_count = 0;
        self.silence_count = 0;
        self.active = false;
        self.last_reported = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn settings(&self) -> VadSettings {
        self.settings
    }

    /// Replace thresholds and smoothing; the classifier mode is left alone.
    pub fn set_thresholds(&mut self, smoothing: bool, start_threshold: u32, end_threshold: u32) {
        self.settings.smoothing = smoothing;
        self.settings.start_threshold = start_threshold;
        self.settings.end_threshold = end_threshold;
    }

    pub fn state(&self) -> VoiceActivityState {
        VoiceActivityState {
            mode: self.settings.mode,
            smoothing: self.settings.smoothing,
            start_threshold: self.settings.start_threshold,
            end_threshold: self.settings.end_threshold,
            voice_count: self.voice_count,
            silence_count: self.silence_count,
            active: self.active,
            last_reported: self.last_reported,
        }
    }
}
