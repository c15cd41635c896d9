use std::time::{Duration, Instant};

use crate::{Result, SessionHandle, SttError};

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisParams {
    pub voice: String,
    pub sample_rate: u32,
    pub speed: u8,
    pub volume: u8,
    pub pitch: u8,
}

impl Default for SynthesisParams {
    fn default() -> Self {
        Self {
            voice: "xiaoyan".to_string(),
            sample_rate: 16000,
            speed: 50,
            volume: 50,
            pitch: 50,
        }
    }
}

impl SynthesisParams {
    pub fn with_voice(voice: impl Into<String>) -> Self {
        Self {
            voice: voice.into(),
            ..Default::default()
        }
    }

    pub fn to_param_string(&self) -> String {
        format!(
            "voice_name = {}, text_encoding = utf8, sample_rate = {}, speed = {}, volume = {}, pitch = {}, rdn = 2",
            self.voice, self.sample_rate, self.speed, self.volume, self.pitch
        )
    }
}

/// One poll result. `chunk` may be empty while the engine is still working.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioPoll {
    pub chunk: Vec<u8>,
    pub done: bool,
}

/// Text-to-speech session API. Produces mono s16le PCM.
pub trait SpeechSynthesizer: Send {
    fn open_session(&mut self, params: &SynthesisParams) -> Result<SessionHandle>;
    fn submit_text(&mut self, handle: &SessionHandle, text: &str) -> Result<()>;
    fn poll_audio(&mut self, handle: &SessionHandle) -> Result<AudioPoll>;
    fn close_session(&mut self, handle: SessionHandle);
}

#[derive(Debug, Clone)]
pub struct SynthesisOptions {
    pub poll_interval: Duration,
    /// Give up if the engine has not finished by then.
    pub timeout: Duration,
}

impl Default for SynthesisOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(50),
            timeout: Duration::from_secs(30),
        }
    }
}

/// A finished utterance, WAV-wrapped.
#[derive(Debug, Clone)]
pub struct SynthesizedAudio {
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub pcm_len: usize,
}

impl SynthesizedAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.pcm_len as u64 / 2) * 1000 / self.sample_rate as u64
    }
}

/// Run one synthesis to completion on the calling thread.
///
/// Blocks while polling, so callers run it on a worker thread. The session is
/// closed on every path.
pub fn synthesize_to_wav(
    synth: &mut dyn SpeechSynthesizer,
    text: &str,
    params: &SynthesisParams,
    options: &SynthesisOptions,
) -> Result<SynthesizedAudio> {
    if text.trim().is_empty() {
        return Err(SttError::EmptyText);
    }

    let handle = synth.open_session(params)?;
    let result = drive_session(synth, &handle, text, options);
    synth.close_session(handle);

    let pcm = result?;
    if pcm.is_empty() {
        return Err(SttError::NoAudio);
    }

    tracing::debug!(bytes = pcm.len(), "Synthesis finished");
    Ok(SynthesizedAudio {
        wav: murmur_audio::wrap_pcm_in_wav(&pcm, params.sample_rate, 1),
        sample_rate: params.sample_rate,
        pcm_len: pcm.len(),
    })
}

fn drive_session(
    synth: &mut dyn SpeechSynthesizer,
    handle: &SessionHandle,
    text: &str,
    options: &SynthesisOptions,
) -> Result<Vec<u8>> {
    synth.submit_text(handle, text)?;

    let started = Instant::now();
    let mut pcm = Vec::new();
    loop {
        let poll = synth.poll_audio(handle)?;
        pcm.extend_from_slice(&poll.chunk);
        if poll.done {
            return Ok(pcm);
        }
        if started.elapsed() >= options.timeout {
            return Err(SttError::Timeout(options.timeout.as_millis() as u64));
        }
        std::thread::sleep(options.poll_interval);
    }
}
