//! Speech settings, persisted as JSON under the user config directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use murmur_vad::{VadMode, VadSettings, SUPPORTED_SAMPLE_RATES};
use serde::{Deserialize, Serialize};

use crate::constants::{PREBUFFER_BLOCKS, VOICE_END_GRACE};

pub const ENV_APP_ID: &str = "MURMUR_APP_ID";
pub const ENV_API_KEY: &str = "MURMUR_API_KEY";
pub const ENV_CONVERSATION_KEY: &str = "MURMUR_CONVERSATION_KEY";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Parse error in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpeechConfig {
    pub app_id: String,
    pub api_key: String,
    pub language: String,
    pub voice: String,

    pub sample_rate: u32,
    pub channels: u16,
    /// Capture callback size in samples.
    pub buffer_size: u32,

    pub vad_enabled: bool,
    pub vad_mode: VadMode,
    pub vad_smoothing: bool,
    pub voice_start_threshold: u32,
    pub voice_end_threshold: u32,

    /// Keep listening after each result.
    pub continuous: bool,
    pub prebuffer_blocks: usize,
    pub voice_end_grace_ms: u64,
    pub max_speech_duration_secs: u64,
    pub max_buffer_chunks: usize,

    pub max_reconnect_attempts: u32,
    pub reconnect_delay_secs: u64,

    pub lipsync_model_path: Option<PathBuf>,

    pub conversation_base_url: String,
    pub conversation_api_key: String,
    pub conversation_user: String,
    /// Forward recognized text to the conversation backend.
    pub forward_to_conversation: bool,

    pub verbose_logging: bool,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            app_id: String::new(),
            api_key: String::new(),
            language: "zh_cn".to_string(),
            voice: "xiaoyan".to_string(),
            sample_rate: 16000,
            channels: 1,
            buffer_size: 960,
            vad_enabled: true,
            vad_mode: VadMode::Aggressive,
            vad_smoothing: true,
            voice_start_threshold: 5,
            voice_end_threshold: 30,
            continuous: true,
            prebuffer_blocks: PREBUFFER_BLOCKS,
            voice_end_grace_ms: VOICE_END_GRACE.as_millis() as u64,
            max_speech_duration_secs: 50,
            max_buffer_chunks: 3000,
            max_reconnect_attempts: 3,
            reconnect_delay_secs: 5,
            lipsync_model_path: None,
            conversation_base_url: "https://api.dify.ai/v1".to_string(),
            conversation_api_key: String::new(),
            conversation_user: "murmur".to_string(),
            forward_to_conversation: false,
            verbose_logging: false,
        }
    }
}

impl SpeechConfig {
    /// `<config_dir>/murmur/speech.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("murmur").join("speech.json"))
    }

    /// Load from the default location, falling back to defaults when the
    /// file does not exist. Environment overrides and validation are applied.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path)?,
            _ => Self::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Parse a config file. No overrides or validation.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        let io_err = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, json).map_err(io_err)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(v) = non_empty(ENV_APP_ID) {
            self.app_id = v;
        }
        if let Some(v) = non_empty(ENV_API_KEY) {
            self.api_key = v;
        }
        if let Some(v) = non_empty(ENV_CONVERSATION_KEY) {
            self.conversation_api_key = v;
        }
    }

    /// Clamp tunables into their supported ranges and reject settings that
    /// cannot work at all.
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if !SUPPORTED_SAMPLE_RATES.contains(&self.sample_rate) {
            return Err(ConfigError::Invalid(format!(
                "sample rate {} not in {:?}",
                self.sample_rate, SUPPORTED_SAMPLE_RATES
            )));
        }
        if !(1..=2).contains(&self.channels) {
            return Err(ConfigError::Invalid(format!("{} channels", self.channels)));
        }

        self.max_speech_duration_secs = self.max_speech_duration_secs.clamp(10, 120);
        self.max_buffer_chunks = self.max_buffer_chunks.clamp(100, 10_000);
        self.max_reconnect_attempts = self.max_reconnect_attempts.clamp(1, 10);
        self.reconnect_delay_secs = self.reconnect_delay_secs.clamp(1, 30);
        self.voice_start_threshold = self.voice_start_threshold.clamp(1, 20);
        self.voice_end_threshold = self.voice_end_threshold.clamp(5, 100);
        self.prebuffer_blocks = self.prebuffer_blocks.max(1);
        Ok(())
    }

    pub fn vad_settings(&self) -> VadSettings {
        VadSettings {
            mode: self.vad_mode,
            smoothing: self.vad_smoothing,
            start_threshold: self.voice_start_threshold,
            end_threshold: self.voice_end_threshold,
        }
    }

    pub fn max_speech_duration(&self) -> Duration {
        Duration::from_secs(self.max_speech_duration_secs)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }

    pub fn voice_end_grace(&self) -> Duration {
        Duration::from_millis(self.voice_end_grace_ms)
    }
}
