//! Deterministic collaborators shared by the integration tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use murmur_bus::AudioBlock;
use murmur_stt::{
    AudioPoll, CloseHint, RecognitionParams, SessionHandle, SpeechSynthesizer, SttError,
    StreamingRecognizer, SynthesisParams, WriteStatus,
};

pub const BLOCK_SAMPLES: usize = 160;

#[derive(Debug, Clone)]
pub struct RecordedSession {
    pub handle: String,
    pub writes: Vec<Vec<u8>>,
    pub closed: Option<CloseHint>,
}

#[derive(Debug, Default)]
pub struct RecognizerLog {
    pub sessions: Vec<RecordedSession>,
    pub fail_open: Option<(i32, String)>,
    pub fail_write: Option<(i32, String)>,
}

/// Records every session call. Clones share the same log.
#[derive(Clone, Default)]
pub struct StubRecognizer {
    pub log: Arc<Mutex<RecognizerLog>>,
}

impl StubRecognizer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn session_count(&self) -> usize {
        self.log.lock().unwrap().sessions.len()
    }

    pub fn session(&self, index: usize) -> RecordedSession {
        self.log.lock().unwrap().sessions[index].clone()
    }

    pub fn writes(&self, index: usize) -> Vec<Vec<u8>> {
        self.session(index).writes
    }

    pub fn closed(&self, index: usize) -> Option<CloseHint> {
        self.session(index).closed
    }

    /// Every write across all sessions, in order.
    pub fn all_writes(&self) -> Vec<Vec<u8>> {
        self.log
            .lock()
            .unwrap()
            .sessions
            .iter()
            .flat_map(|s| s.writes.clone())
            .collect()
    }

    pub fn fail_open(&self, failure: Option<(i32, &str)>) {
        self.log.lock().unwrap().fail_open = failure.map(|(c, d)| (c, d.to_string()));
    }

    pub fn fail_write(&self, failure: Option<(i32, &str)>) {
        self.log.lock().unwrap().fail_write = failure.map(|(c, d)| (c, d.to_string()));
    }
}

impl StreamingRecognizer for StubRecognizer {
    fn open_session(&mut self, _params: &RecognitionParams) -> murmur_stt::Result<SessionHandle> {
        let mut log = self.log.lock().unwrap();
        if let Some((code, detail)) = log.fail_open.clone() {
            return Err(SttError::SessionOpen { code, detail });
        }
        let handle = format!("sid-{}", log.sessions.len() + 1);
        log.sessions.push(RecordedSession {
            handle: handle.clone(),
            writes: Vec::new(),
            closed: None,
        });
        Ok(SessionHandle(handle))
    }

    fn write_audio(&mut self, handle: &SessionHandle, pcm: &[u8]) -> murmur_stt::Result<WriteStatus> {
        let mut log = self.log.lock().unwrap();
        if let Some((code, detail)) = log.fail_write.clone() {
            return Err(SttError::Write { code, detail });
        }
        let session = log
            .sessions
            .iter_mut()
            .find(|s| s.handle == handle.0)
            .expect("write to unknown session");
        assert!(session.closed.is_none(), "write to closed session {}", handle.0);
        session.writes.push(pcm.to_vec());
        Ok(WriteStatus::default())
    }

    fn close_session(&mut self, handle: SessionHandle, hint: CloseHint) {
        let mut log = self.log.lock().unwrap();
        if let Some(session) = log.sessions.iter_mut().find(|s| s.handle == handle.0) {
            assert!(session.closed.is_none(), "double close of {}", handle.0);
            session.closed = Some(hint);
        }
    }
}

/// Emits `chunks` chunks of 320 bytes of PCM, then finishes.
pub struct StubSynthesizer {
    pub chunks: usize,
    polls: usize,
}

impl StubSynthesizer {
    pub fn new(chunks: usize) -> Self {
        Self { chunks, polls: 0 }
    }
}

impl SpeechSynthesizer for StubSynthesizer {
    fn open_session(&mut self, _params: &SynthesisParams) -> murmur_stt::Result<SessionHandle> {
        self.polls = 0;
        Ok(SessionHandle("tts".into()))
    }

    fn submit_text(&mut self, _handle: &SessionHandle, _text: &str) -> murmur_stt::Result<()> {
        Ok(())
    }

    fn poll_audio(&mut self, _handle: &SessionHandle) -> murmur_stt::Result<AudioPoll> {
        self.polls += 1;
        let done = self.polls >= self.chunks;
        let chunk = if self.polls <= self.chunks {
            vec![0x10u8; 320]
        } else {
            Vec::new()
        };
        Ok(AudioPoll { chunk, done })
    }

    fn close_session(&mut self, _handle: SessionHandle) {}
}

/// Quiet block whose level still identifies its sequence number.
pub fn silence_block(seq: u64) -> AudioBlock {
    let level = 0.0001 * ((seq % 40) + 1) as f32;
    AudioBlock::mono(seq, vec![level; BLOCK_SAMPLES])
}

/// Loud block whose level identifies its sequence number.
pub fn voice_block(seq: u64) -> AudioBlock {
    let level = 0.1 + 0.001 * (seq % 100) as f32;
    AudioBlock::mono(seq, vec![level; BLOCK_SAMPLES])
}

pub fn pcm(block: &AudioBlock) -> Vec<u8> {
    murmur_audio::f32_to_s16le(&block.samples)
}

/// Expected recognizer payloads for blocks `seqs`, given how each was built.
pub fn expected(blocks: &[AudioBlock], seqs: std::ops::RangeInclusive<u64>) -> Vec<Vec<u8>> {
    seqs.map(|seq| {
        let block = blocks
            .iter()
            .find(|b| b.seq == seq)
            .unwrap_or_else(|| panic!("block {seq} was never fed"));
        pcm(block)
    })
    .collect()
}

pub fn after(t0: Instant, ms: u64) -> Instant {
    t0 + Duration::from_millis(ms)
}
