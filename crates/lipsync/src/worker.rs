//! Dedicated thread that turns WAV payloads into smoothed frame sequences.
//!
//! Building is CPU-bound and can take longer than a UI tick, so it never runs
//! on the owning context. Jobs and results travel over crossbeam channels.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};

use crate::builder::LipSyncSequenceBuilder;
use crate::engine::{Acceleration, LipSyncContext, LipSyncEngine};
use crate::frame::FrameSequence;
use crate::smoother::smooth_boundaries;
use crate::{LipSyncError, Result};

/// How long the worker waits for a job before re-checking its running flag.
const IDLE_WAIT: Duration = Duration::from_millis(50);

/// A complete WAV file to convert.
#[derive(Debug, Clone)]
pub struct SequenceJob {
    pub id: u64,
    pub wav: Vec<u8>,
}

#[derive(Debug)]
pub struct SequenceResult {
    pub id: u64,
    pub sequence: Result<FrameSequence>,
}

pub struct SequenceWorker {
    job_tx: Sender<SequenceJob>,
    result_rx: Receiver<SequenceResult>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SequenceWorker {
    /// Start the worker. Fails if the model file does not exist; the context
    /// itself is created lazily from the first job's sample rate.
    pub fn spawn(
        engine: Arc<dyn LipSyncEngine>,
        model_path: impl Into<PathBuf>,
        acceleration: Acceleration,
    ) -> Result<Self> {
        let model_path = model_path.into();
        if !model_path.is_file() {
            return Err(LipSyncError::ModelNotFound(model_path.display().to_string()));
        }

        let (job_tx, job_rx) = crossbeam_channel::unbounded::<SequenceJob>();
        let (result_tx, result_rx) = crossbeam_channel::unbounded::<SequenceResult>();
        let running = Arc::new(AtomicBool::new(true));

        let state = WorkerState {
            engine,
            model_path,
            acceleration,
            context: None,
        };
        let flag = Arc::clone(&running);
        let handle = thread::Builder::new()
            .name("lipsync-worker".into())
            .spawn(move || worker_loop(state, job_rx, result_tx, flag))
            .map_err(|e| LipSyncError::ContextCreation(format!("failed to spawn worker: {e}")))?;

        tracing::info!("Lip-sync worker started");
        Ok(Self {
            job_tx,
            result_rx,
            running,
            handle: Some(handle),
        })
    }

    pub fn submit(&self, job: SequenceJob) -> Result<()> {
        if !self.is_running() {
            return Err(LipSyncError::WorkerStopped);
        }
        self.job_tx.send(job).map_err(|_| LipSyncError::WorkerStopped)
    }

    /// Next finished result, if any.
    pub fn try_recv(&self) -> Option<SequenceResult> {
        self.result_rx.try_recv().ok()
    }

    pub fn recv_timeout(&self, timeout: Duration) -> Option<SequenceResult> {
        self.result_rx.recv_timeout(timeout).ok()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            tracing::info!("Lip-sync worker stopped");
        }
    }
}

impl Drop for SequenceWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

struct WorkerState {
    engine: Arc<dyn LipSyncEngine>,
    model_path: PathBuf,
    acceleration: Acceleration,
    /// Context and the sample rate it was created for.
    context: Option<(u32, Box<dyn LipSyncContext>)>,
}

impl WorkerState {
    fn context_for(&mut self, sample_rate: u32) -> Result<&mut dyn LipSyncContext> {
        let stale = !matches!(&self.context, Some((rate, _)) if *rate == sample_rate);
        if stale {
            let ctx = create_context(&*self.engine, &self.model_path, sample_rate, self.acceleration)?;
            self.context = Some((sample_rate, ctx));
        }
        match self.context.as_mut() {
            Some((_, ctx)) => Ok(ctx.as_mut()),
            None => Err(LipSyncError::ContextCreation("context missing".into())),
        }
    }

    fn convert(&mut self, wav: &[u8]) -> Result<FrameSequence> {
        let audio = murmur_audio::read_wav_bytes(wav)?;
        if audio.is_empty() {
            return Err(LipSyncError::EmptySequence);
        }
        let ctx = self.context_for(audio.sample_rate)?;
        let mut sequence =
            LipSyncSequenceBuilder::new(ctx).build(&audio.samples, audio.sample_rate, audio.channels)?;
        smooth_boundaries(&mut sequence);
        Ok(sequence)
    }
}

fn create_context(
    engine: &dyn LipSyncEngine,
    model_path: &Path,
    sample_rate: u32,
    acceleration: Acceleration,
) -> Result<Box<dyn LipSyncContext>> {
    tracing::debug!(sample_rate, ?acceleration, "Creating lip-sync context");
    engine.create_context(model_path, sample_rate, acceleration)
}

fn worker_loop(
    mut state: WorkerState,
    jobs: Receiver<SequenceJob>,
    results: Sender<SequenceResult>,
    running: Arc<AtomicBool>,
) {
    while running.load(Ordering::Acquire) {
        let job = match jobs.recv_timeout(IDLE_WAIT) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let sequence = state.convert(&job.wav);
        match &sequence {
            Ok(seq) => tracing::debug!(id = job.id, frames = seq.len(), "Sequence ready"),
            Err(e) => tracing::error!(id = job.id, "Sequence build failed: {e}"),
        }
        if results.send(SequenceResult { id: job.id, sequence }).is_err() {
            break;
        }
    }
    running.store(false, Ordering::Release);
}
