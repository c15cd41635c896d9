use tokio::sync::mpsc;

use crate::Result;

/// Opaque session id issued by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub String);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionParams {
    pub language: String,
    pub accent: String,
    pub sample_rate: u32,
}

impl Default for RecognitionParams {
    fn default() -> Self {
        Self {
            language: "zh_cn".to_string(),
            accent: "mandarin".to_string(),
            sample_rate: crate::STT_SAMPLE_RATE,
        }
    }
}

impl RecognitionParams {
    pub fn with_language(language: impl Into<String>) -> Self {
        Self {
            language: language.into(),
            ..Default::default()
        }
    }

    /// Engine parameter string in `key = value, ...` form.
    pub fn to_param_string(&self) -> String {
        format!(
            "sub = iat, domain = iat, language = {}, accent = {}, sample_rate = {}, result_type = plain, result_encoding = utf8",
            self.language, self.accent, self.sample_rate
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndpointStatus {
    #[default]
    LookingForSpeech,
    InSpeech,
    AfterSpeech,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecognitionStatus {
    #[default]
    Success,
    NoMatch,
    Incomplete,
    Complete,
}

/// Status returned with each successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteStatus {
    pub endpoint: EndpointStatus,
    pub recognition: RecognitionStatus,
}

/// Why a session is being closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseHint {
    Normal,
    Segmented,
    Cancelled,
    ServerError,
}

impl CloseHint {
    pub fn as_str(self) -> &'static str {
        match self {
            CloseHint::Normal => "Normal",
            CloseHint::Segmented => "Segmented",
            CloseHint::Cancelled => "Cancelled",
            CloseHint::ServerError => "ServerError",
        }
    }
}

/// Streaming recognizer session API.
///
/// Calls are made only from the owning pipeline context. Results arrive
/// asynchronously as [`RecognizerCallback`]s on the channel the
/// implementation was constructed with.
pub trait StreamingRecognizer: Send {
    fn open_session(&mut self, params: &RecognitionParams) -> Result<SessionHandle>;

    /// Write s16le PCM to an open session.
    fn write_audio(&mut self, handle: &SessionHandle, pcm: &[u8]) -> Result<WriteStatus>;

    fn close_session(&mut self, handle: SessionHandle, hint: CloseHint);
}

/// Asynchronous notifications from the recognizer, possibly from a vendor thread.
#[derive(Debug, Clone, PartialEq)]
pub enum RecognizerCallback {
    Result { text: String, is_last: bool },
    Status { code: i32, detail: String },
    Error { code: i32, detail: String },
}

pub type CallbackSender = mpsc::UnboundedSender<RecognizerCallback>;
pub type CallbackReceiver = mpsc::UnboundedReceiver<RecognizerCallback>;

/// Channel used to marshal callbacks into the owning context.
pub fn callback_channel() -> (CallbackSender, CallbackReceiver) {
    mpsc::unbounded_channel()
}
