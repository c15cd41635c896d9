//! Contract for the external lip-sync inference library.
//!
//! The library handle is an explicit value: an engine is created by the host
//! at startup and passed to whoever needs a context. Dropping a context
//! releases it.

use std::path::Path;

use crate::frame::VisemeFrame;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Acceleration {
    #[default]
    Cpu,
    Gpu,
}

/// Layout of the s16 samples handed to the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLayout {
    Mono,
    Stereo,
}

impl ChannelLayout {
    pub fn from_channels(channels: u16) -> Option<Self> {
        match channels {
            1 => Some(ChannelLayout::Mono),
            2 => Some(ChannelLayout::Stereo),
            _ => None,
        }
    }

    pub fn channels(self) -> usize {
        match self {
            ChannelLayout::Mono => 1,
            ChannelLayout::Stereo => 2,
        }
    }
}

/// One engine output.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineFrame {
    pub frame: VisemeFrame,
    /// Engine lookahead in milliseconds.
    pub frame_delay_ms: u32,
}

/// An initialized analysis context bound to one sample rate.
pub trait LipSyncContext: Send {
    /// Analyse one chunk. `pcm.len()` is samples-per-channel times channels.
    fn process_frame(&mut self, pcm: &[i16], layout: ChannelLayout) -> Result<EngineFrame>;
}

/// The loaded library.
pub trait LipSyncEngine: Send + Sync {
    fn create_context(
        &self,
        model_path: &Path,
        sample_rate: u32,
        acceleration: Acceleration,
    ) -> Result<Box<dyn LipSyncContext>>;
}
