mod convert;
mod pcm;
mod wav;

pub use convert::{downmix_to_mono, resample_linear, CaptureConverter};
pub use pcm::{f32_to_i16, f32_to_s16le, i16_to_f32, s16le_to_f32, s16le_to_i16};
pub use wav::{
    read_wav_bytes, read_wav_file, wav_header, wrap_pcm_in_wav, write_wav_file, WavAudio,
    WAV_HEADER_LEN,
};

pub const SAMPLE_RATE: u32 = 16000;

#[derive(Debug, thiserror::Error)]
pub enum AudioError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("unsupported wav format: {0}")]
    UnsupportedFormat(String),
    #[error("resampler error: {0}")]
    Resampler(String),
}

pub type Result<T> = std::result::Result<T, AudioError>;
