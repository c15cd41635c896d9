use std::fmt;

use murmur_stt::{codes, SttError};
use serde::{Deserialize, Serialize};

/// Error taxonomy used for routing and user-visible reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InitializationFailed,
    NetworkError,
    AudioCaptureError,
    RecognitionTimeout,
    SdkError,
    ConfigurationError,
    /// Lip-sync sequence produced zero frames or could not be built.
    BuildFailure,
    InvalidTransition,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InitializationFailed => "initialization_failed",
            ErrorKind::NetworkError => "network_error",
            ErrorKind::AudioCaptureError => "audio_capture_error",
            ErrorKind::RecognitionTimeout => "recognition_timeout",
            ErrorKind::SdkError => "sdk_error",
            ErrorKind::ConfigurationError => "configuration_error",
            ErrorKind::BuildFailure => "build_failure",
            ErrorKind::InvalidTransition => "invalid_transition",
        }
    }

    /// Whether the recovery manager retries this kind on its own.
    pub fn is_auto_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::NetworkError | ErrorKind::SdkError | ErrorKind::RecognitionTimeout
        )
    }

    /// Classify a vendor recognizer code.
    pub fn from_vendor_code(code: i32) -> Self {
        if codes::is_network(code) {
            ErrorKind::NetworkError
        } else if codes::is_timeout(code) {
            ErrorKind::RecognitionTimeout
        } else {
            ErrorKind::SdkError
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct SpeechError {
    pub kind: ErrorKind,
    pub message: String,
}

impl SpeechError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }
}

impl From<SttError> for SpeechError {
    fn from(e: SttError) -> Self {
        let kind = match &e {
            SttError::Timeout(_) => ErrorKind::RecognitionTimeout,
            other => other
                .code()
                .map(ErrorKind::from_vendor_code)
                .unwrap_or(ErrorKind::SdkError),
        };
        SpeechError::new(kind, e.to_string())
    }
}

impl From<murmur_vad::VadError> for SpeechError {
    fn from(e: murmur_vad::VadError) -> Self {
        SpeechError::new(ErrorKind::ConfigurationError, e.to_string())
    }
}

impl From<murmur_lipsync::LipSyncError> for SpeechError {
    fn from(e: murmur_lipsync::LipSyncError) -> Self {
        use murmur_lipsync::LipSyncError;
        let kind = match &e {
            LipSyncError::ModelNotFound(_) | LipSyncError::ContextCreation(_) => {
                ErrorKind::InitializationFailed
            }
            _ => ErrorKind::BuildFailure,
        };
        SpeechError::new(kind, e.to_string())
    }
}

impl From<murmur_conversation::ConversationError> for SpeechError {
    fn from(e: murmur_conversation::ConversationError) -> Self {
        use murmur_conversation::ConversationError;
        let kind = match &e {
            ConversationError::MissingApiKey | ConversationError::EmptyQuery => {
                ErrorKind::ConfigurationError
            }
            _ => ErrorKind::NetworkError,
        };
        SpeechError::new(kind, e.to_string())
    }
}

impl From<crate::config::ConfigError> for SpeechError {
    fn from(e: crate::config::ConfigError) -> Self {
        SpeechError::new(ErrorKind::ConfigurationError, e.to_string())
    }
}

impl From<murmur_audio::AudioError> for SpeechError {
    fn from(e: murmur_audio::AudioError) -> Self {
        SpeechError::new(ErrorKind::AudioCaptureError, e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SpeechError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vendor_code_classification() {
        assert_eq!(ErrorKind::from_vendor_code(10205), ErrorKind::NetworkError);
        assert_eq!(ErrorKind::from_vendor_code(10114), ErrorKind::RecognitionTimeout);
        assert_eq!(ErrorKind::from_vendor_code(10008), ErrorKind::SdkError);
    }

    #[test]
    fn test_auto_recoverable_kinds() {
        assert!(ErrorKind::NetworkError.is_auto_recoverable());
        assert!(ErrorKind::SdkError.is_auto_recoverable());
        assert!(ErrorKind::RecognitionTimeout.is_auto_recoverable());
        assert!(!ErrorKind::AudioCaptureError.is_auto_recoverable());
        assert!(!ErrorKind::InitializationFailed.is_auto_recoverable());
        assert!(!ErrorKind::ConfigurationError.is_auto_recoverable());
    }

    #[test]
    fn test_from_stt_error() {
        let err: SpeechError = SttError::Write {
            code: 10202,
            detail: "socket".into(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NetworkError);
        assert!(err.to_string().starts_with("network_error: "));

        let timeout: SpeechError = SttError::Timeout(100).into();
        assert_eq!(timeout.kind(), ErrorKind::RecognitionTimeout);
    }

    #[test]
    fn test_from_lipsync_error() {
        let err: SpeechError = murmur_lipsync::LipSyncError::EmptySequence.into();
        assert_eq!(err.kind(), ErrorKind::BuildFailure);
        let err: SpeechError = murmur_lipsync::LipSyncError::ModelNotFound("x".into()).into();
        assert_eq!(err.kind(), ErrorKind::InitializationFailed);
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::RecognitionTimeout).unwrap();
        assert_eq!(json, "\"recognition_timeout\"");
    }
}
