//! Text-to-speech off the owning context.
//!
//! Polling the synthesizer sleeps between polls, so it runs on its own thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use murmur_stt::{
    synthesize_to_wav, SpeechSynthesizer, SynthesisOptions, SynthesisParams, SynthesizedAudio,
    SttError,
};

use crate::error::{ErrorKind, SpeechError};

const IDLE_WAIT: Duration = Duration::from_millis(50);

pub type SharedSynthesizer = Arc<Mutex<Box<dyn SpeechSynthesizer>>>;

#[derive(Debug, Clone)]
pub struct SynthesisJob {
    pub id: u64,
    pub text: String,
    pub params: SynthesisParams,
}

#[derive(Debug)]
pub struct SynthesisResult {
    pub id: u64,
    pub text: String,
    pub audio: Result<SynthesizedAudio, SttError>,
}

pub struct SynthesisWorker {
    job_tx: Sender<SynthesisJob>,
    result_rx: Receiver<SynthesisResult>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SynthesisWorker {
    pub fn spawn(
        synthesizer: SharedSynthesizer,
        options: SynthesisOptions,
    ) -> Result<Self, SpeechError> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<SynthesisJob>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<SynthesisResult>();
        let running = Arc::new(AtomicBool::new(true));

        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("synthesis-worker".into())
            .spawn(move || worker_loop(synthesizer, options, job_rx, result_tx, flag))
            .map_err(|e| {
                SpeechError::new(
                    ErrorKind::InitializationFailed,
                    format!("failed to spawn synthesis worker: {e}"),
                )
            })?;

        tracing::info!("Synthesis worker started");
        Ok(Self {
            job_tx,
            result_rx,
            running,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, job: SynthesisJob) -> Result<(), SpeechError> {
        let stopped = || SpeechError::new(ErrorKind::SdkError, "synthesis worker is not running");
        if !self.is_running() {
            return Err(stopped());
        }
        self.job_tx.send(job).map_err(|_| stopped())
    }

    pub fn try_recv(&self) -> Option<SynthesisResult> {
        self.result_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SynthesisResult> {
        self.result_rx.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("Synthesis worker stopped");
        }
    }
}

impl Drop for SynthesisWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn worker_loop(
    synthesizer: SharedSynthesizer,
    options: SynthesisOptions,
    jobs: Receiver<SynthesisJob>,
    results: Sender<SynthesisResult>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        let job = match jobs.recv_timeout(IDLE_WAIT) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let audio = {
            let mut synth = synthesizer.lock().unwrap_or_else(PoisonError::into_inner);
            synthesize_to_wav(synth.as_mut(), &job.text, &job.params, &options)
        };
        match &audio {
            Ok(a) => tracing::info!(id = job.id, duration_ms = a.duration_ms(), "Synthesis complete"),
            Err(e) => tracing::error!(id = job.id, "Synthesis failed: {e}"),
        }
        let result = SynthesisResult {
            id: job.id,
            text: job.text,
            audio,
        };
        if results.send(result).is_err() {
            break;
        }
    }
    running.store(false, Ordering::Release);
}
