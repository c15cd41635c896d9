//! VAD-gated recognition session management.

mod buffers;
mod controller;

pub use buffers::{PreBuffer, SpeechBuffer};
pub use controller::{SessionOutput, SessionSettings, SessionStats, SpeechSessionController};
