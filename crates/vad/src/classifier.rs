use serde::{Deserialize, Serialize};

/// Detection aggressiveness. Lower thresholds are more sensitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VadMode {
    Quality,
    LowBitrate,
    #[default]
    Aggressive,
    VeryAggressive,
}

impl VadMode {
    /// RMS energy above which a block counts as voice.
    pub fn threshold(self) -> f32 {
        match self {
            VadMode::Quality => 0.015,
            VadMode::LowBitrate => 0.012,
            VadMode::Aggressive => 0.008,
            VadMode::VeryAggressive => 0.005,
        }
    }
}

/// Root-mean-square energy. Empty input has zero energy.
pub fn rms_energy(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum_sq / samples.len() as f64).sqrt() as f32
}

/// Raw per-block voice/silence decision.
pub trait Classifier: Send {
    fn classify(&self, samples: &[f32]) -> bool;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EnergyClassifier {
    pub mode: VadMode,
}

impl EnergyClassifier {
    pub fn new(mode: VadMode) -> Self {
        Self { mode }
    }
}

impl Classifier for EnergyClassifier {
    fn classify(&self, samples: &[f32]) -> bool {
        rms_energy(samples) > self.mode.threshold()
    }
}
