//! Black-box contracts for the vendor speech engines.
//!
//! The pipeline never talks to a vendor SDK directly; it drives these
//! traits. Implementations live with the host application.

mod error;
mod recognizer;
mod synthesizer;

pub use error::{codes, SttError};
pub use recognizer::{
    callback_channel, CallbackReceiver, CallbackSender, CloseHint, EndpointStatus,
    RecognitionParams, RecognitionStatus, RecognizerCallback, SessionHandle, StreamingRecognizer,
    WriteStatus,
};
pub use synthesizer::{
    synthesize_to_wav, AudioPoll, SpeechSynthesizer, SynthesisOptions, SynthesisParams,
    SynthesizedAudio,
};

/// Recognizer input rate.
pub const STT_SAMPLE_RATE: u32 = 16000;

pub type Result<T> = std::result::Result<T, SttError>;
