//! Coarse lifecycle of the speech system.

use std::collections::VecDeque;
use std::fmt;

use murmur_events::{
    emit_event, event_names, EventBusRef, StateChangedEvent, VoiceErrorEvent,
};
use serde::{Deserialize, Serialize};

use crate::constants::STATE_HISTORY_LEN;
use crate::error::{ErrorKind, SpeechError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SpeechPhase {
    Uninitialized,
    Initializing,
    Ready,
    Listening,
    Processing,
    Reconnecting,
    Error,
}

impl SpeechPhase {
    pub const ALL: [SpeechPhase; 7] = [
        SpeechPhase::Uninitialized,
        SpeechPhase::Initializing,
        SpeechPhase::Ready,
        SpeechPhase::Listening,
        SpeechPhase::Processing,
        SpeechPhase::Reconnecting,
        SpeechPhase::Error,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            SpeechPhase::Uninitialized => "uninitialized",
            SpeechPhase::Initializing => "initializing",
            SpeechPhase::Ready => "ready",
            SpeechPhase::Listening => "listening",
            SpeechPhase::Processing => "processing",
            SpeechPhase::Reconnecting => "reconnecting",
            SpeechPhase::Error => "error",
        }
    }

    /// Adjacency table. `Error` may move anywhere.
    pub fn allows(self, to: SpeechPhase) -> bool {
        use SpeechPhase::*;
        match self {
            Uninitialized => matches!(to, Initializing | Error),
            Initializing => matches!(to, Ready | Error),
            Ready => matches!(to, Listening | Error | Reconnecting),
            Listening => matches!(to, Processing | Ready | Error | Reconnecting),
            Processing => matches!(to, Ready | Listening | Error | Reconnecting),
            Reconnecting => matches!(to, Ready | Error | Initializing),
            Error => true,
        }
    }
}

impl fmt::Display for SpeechPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub struct SpeechStateMachine {
    current: SpeechPhase,
    last_error: Option<SpeechError>,
    history: VecDeque<SpeechPhase>,
    bus: EventBusRef,
}

impl SpeechStateMachine {
    pub fn new(bus: EventBusRef) -> Self {
        let mut history = VecDeque::with_capacity(STATE_HISTORY_LEN);
        history.push_back(SpeechPhase::Uninitialized);
        Self {
            current: SpeechPhase::Uninitialized,
            last_error: None,
            history,
            bus,
        }
    }

    pub fn current(&self) -> SpeechPhase {
        self.current
    }

    pub fn can_transition_to(&self, to: SpeechPhase) -> bool {
        self.current.allows(to)
    }

    /// Move to `to` if the adjacency table allows it. Rejected moves are
    /// logged and leave the machine untouched.
    pub fn transition_to(&mut self, to: SpeechPhase, reason: &str) -> bool {
        let from = self.current;
        if !from.allows(to) {
            tracing::warn!(%from, %to, reason, "Invalid state transition");
            return false;
        }

        self.current = to;
        self.push_history(to);
        if to == SpeechPhase::Ready {
            self.last_error = None;
        }

        tracing::info!(%from, %to, reason, "State transition");
        emit_event(
            self.bus.as_ref(),
            event_names::STATE_CHANGED,
            &StateChangedEvent {
                from: from.to_string(),
                to: to.to_string(),
                reason: reason.to_string(),
            },
        );
        true
    }

    /// Record an error, enter `Error` unless already there, and broadcast it.
    pub fn set_error(&mut self, kind: ErrorKind, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(%kind, detail = %message, "Speech system error");

        self.last_error = Some(SpeechError::new(kind, message.clone()));
        if self.current != SpeechPhase::Error {
            self.transition_to(SpeechPhase::Error, &format!("Error: {message}"));
        }

        emit_event(
            self.bus.as_ref(),
            event_names::VOICE_ERROR,
            &VoiceErrorEvent {
                kind: kind.to_string(),
                message,
            },
        );
    }

    pub fn last_error(&self) -> Option<&SpeechError> {
        self.last_error.as_ref()
    }

    /// Oldest first, including the initial state.
    pub fn history(&self) -> Vec<SpeechPhase> {
        self.history.iter().copied().collect()
    }

    /// Ready, Listening or Processing.
    pub fn is_operational(&self) -> bool {
        matches!(
            self.current,
            SpeechPhase::Ready | SpeechPhase::Listening | SpeechPhase::Processing
        )
    }

    fn push_history(&mut self, phase: SpeechPhase) {
        self.history.push_back(phase);
        while self.history.len() > STATE_HISTORY_LEN {
            self.history.pop_front();
        }
    }
}
