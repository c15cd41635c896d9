//! Speech pipeline orchestration.
//!
//! Audio blocks flow through the [`SpeechSessionController`], which gates a
//! streaming recognizer on voice activity. [`SpeechStateMachine`] tracks the
//! coarse lifecycle and [`ErrorRecoveryManager`] retries recoverable
//! failures. [`VoiceInteraction`] combines them with synthesis and lip-sync,
//! and [`VoiceRuntime`] drives it from a single tokio task.

mod config;
mod constants;
mod error;
mod interaction;
mod recovery;
mod runtime;
mod session;
mod state_machine;
mod synthesis;
mod timer;

pub use config::{
    ConfigError, SpeechConfig, ENV_API_KEY, ENV_APP_ID, ENV_CONVERSATION_KEY,
};
pub use constants::*;
pub use error::{ErrorKind, Result, SpeechError};
pub use interaction::{VoiceInteraction, VoiceInteractionBuilder};
pub use recovery::{ErrorRecoveryManager, RecoveryStep};
pub use runtime::{RuntimeSnapshot, VoiceRuntime, VoiceRuntimeHandle};
pub use session::{
    PreBuffer, SessionOutput, SessionSettings, SessionStats, SpeechBuffer,
    SpeechSessionController,
};
pub use state_machine::{SpeechPhase, SpeechStateMachine};
pub use synthesis::{SharedSynthesizer, SynthesisJob, SynthesisResult, SynthesisWorker};
pub use timer::{TimerId, TimerQueue};
