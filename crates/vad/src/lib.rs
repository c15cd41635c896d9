mod classifier;
mod detector;

pub use classifier::{rms_energy, Classifier, EnergyClassifier, VadMode};
pub use detector::{VadSettings, VadTransition, VoiceActivityDetector, VoiceActivityState};

/// Sample rates the detector accepts.
pub const SUPPORTED_SAMPLE_RATES: [u32; 4] = [8000, 16000, 32000, 48000];

#[derive(Debug, thiserror::Error)]
pub enum VadError {
    #[error("unsupported sample rate: {0} Hz")]
    UnsupportedSampleRate(u32),
}

pub type Result<T> = std::result::Result<T, VadError>;
