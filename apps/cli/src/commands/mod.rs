pub mod config;
pub mod vad;
