//! Shared event contracts for the voice pipeline.
//!
//! Producers and consumers agree on these DTOs instead of ad-hoc JSON so a
//! renamed field fails at compile time rather than at deserialization.
//!
//! Also provides the `EventBus` trait for decoupled event emission.

mod bus;

pub use bus::{
    emit_event, EmittedEvent, EventBus, EventBusRef, InMemoryEventBus, NullEventBus,
    SubscriberBus, SubscriptionId,
};

use serde::{Deserialize, Serialize};

/// Final text returned by the recognizer for one session.
///
/// Producers: session controller
/// Consumers: host application, conversation forwarding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognizedTextEvent {
    pub text: String,
    /// Timestamp in milliseconds since epoch.
    #[serde(default)]
    pub ts_ms: i64,
}

/// Synthesized audio is ready.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthesisCompleteEvent {
    pub text: String,
    /// Size of the WAV payload including its header.
    pub wav_bytes: usize,
    pub duration_ms: u64,
}

/// A user-visible error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceErrorEvent {
    /// Error taxonomy name, e.g. "network_error".
    pub kind: String,
    pub message: String,
}

/// Voice activity edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VoiceActivityEvent {
    pub active: bool,
    #[serde(default)]
    pub ts_ms: i64,
}

/// Coarse lifecycle change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateChangedEvent {
    pub from: String,
    pub to: String,
    #[serde(default)]
    pub reason: String,
}

/// One reconnection attempt has started.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RecoveryAttemptEvent {
    pub attempt: u32,
    pub max_attempts: u32,
}

/// Reconnection abandoned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoveryFailedEvent {
    pub reason: String,
}

/// Per-tick lip-sync output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisemeUpdateEvent {
    /// Index into the active sequence; `None` for the neutral pose and close tail.
    #[serde(default)]
    pub frame_index: Option<usize>,
    pub visemes: Vec<f32>,
    pub laughter: f32,
}

/// Reply from the conversational backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationReplyEvent {
    pub answer: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Event names as constants to prevent typos.
pub mod event_names {
    pub const RECOGNIZED_TEXT: &str = "voice:recognized";
    pub const SYNTHESIS_COMPLETE: &str = "voice:synthesized";
    pub const VOICE_ERROR: &str = "voice:error";
    pub const VOICE_ACTIVITY: &str = "voice:activity";
    pub const STATE_CHANGED: &str = "voice:state_changed";
    pub const RECOVERY_ATTEMPT: &str = "voice:recovery_attempt";
    pub const RECOVERY_FAILED: &str = "voice:recovery_failed";
    pub const VISEMES: &str = "lipsync:visemes";
    pub const CONVERSATION_REPLY: &str = "conversation:reply";
}
