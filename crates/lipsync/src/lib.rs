//! Lip-sync frame pipeline.
//!
//! A complete utterance goes through [`LipSyncSequenceBuilder`] (one engine
//! call per 10ms chunk), then [`smooth_boundaries`], and is handed to a
//! [`PlaybackSynchronizer`] which follows audio playback position.

mod builder;
mod engine;
mod frame;
mod playback;
mod smoother;
mod worker;

pub use builder::LipSyncSequenceBuilder;
pub use engine::{Acceleration, ChannelLayout, EngineFrame, LipSyncContext, LipSyncEngine};
pub use frame::{FrameSequence, VisemeFrame, FRAME_RATE, VISEME_COUNT, VISEME_NAMES};
pub use playback::PlaybackSynchronizer;
pub use smoother::{closing_tail, lerp_scalar, smooth_boundaries, CLOSING_TAIL_FRAMES};
pub use worker::{SequenceJob, SequenceResult, SequenceWorker};

#[derive(Debug, thiserror::Error)]
pub enum LipSyncError {
    #[error("lip-sync model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to create lip-sync context: {0}")]
    ContextCreation(String),
    #[error("lip-sync engine failed: {0}")]
    Process(String),
    #[error("invalid audio: {0}")]
    InvalidAudio(String),
    #[error("lip-sync sequence is empty")]
    EmptySequence,
    #[error("lip-sync worker is not running")]
    WorkerStopped,
}

impl From<murmur_audio::AudioError> for LipSyncError {
    fn from(e: murmur_audio::AudioError) -> Self {
        LipSyncError::InvalidAudio(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, LipSyncError>;
