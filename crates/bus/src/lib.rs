//! Ordered hand-off of captured audio blocks to the owning pipeline context.
//!
//! The capture callback must never block, so the sender uses `try_send`.
//! A full channel drops the newest block, but every drop is counted and
//! reported; the receiver additionally detects sequence gaps.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default pipeline sample rate.
pub const SAMPLE_RATE: u32 = 16000;

/// Nominal capture cadence in milliseconds.
pub const BLOCK_DURATION_MS: u32 = 60;

/// Default channel capacity in milliseconds of audio.
pub const DEFAULT_BUFFER_CAPACITY_MS: u32 = 3000;

/// A captured block of normalized samples. Immutable once built.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    /// Monotonic sequence number assigned at capture.
    pub seq: u64,
    /// Wall-clock capture time in milliseconds.
    pub ts_ms: i64,
    pub sample_rate: u32,
    pub channels: u16,
    /// Interleaved samples in [-1, 1].
    pub samples: Arc<[f32]>,
}

impl AudioBlock {
    pub fn new(
        seq: u64,
        ts_ms: i64,
        sample_rate: u32,
        channels: u16,
        samples: impl Into<Arc<[f32]>>,
    ) -> Self {
        Self {
            seq,
            ts_ms,
            sample_rate,
            channels: channels.max(1),
            samples: samples.into(),
        }
    }

    /// Mono 16kHz convenience constructor, mostly for tests and offline tools.
    pub fn mono(seq: u64, samples: impl Into<Arc<[f32]>>) -> Self {
        Self::new(seq, 0, SAMPLE_RATE, 1, samples)
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / self.channels.max(1) as usize
    }

    /// Duration of this block in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        (self.frames() as u64 * 1000) / self.sample_rate as u64
    }
}

/// Configuration for the audio bus.
#[derive(Debug, Clone)]
pub struct AudioBusConfig {
    /// Target buffer capacity in milliseconds.
    pub capacity_ms: u32,
    /// Expected block size in milliseconds.
    pub block_size_ms: u32,
}

impl Default for AudioBusConfig {
    fn default() -> Self {
        Self {
            capacity_ms: DEFAULT_BUFFER_CAPACITY_MS,
            block_size_ms: BLOCK_DURATION_MS,
        }
    }
}

impl AudioBusConfig {
    /// Channel capacity in blocks.
    fn channel_capacity(&self) -> usize {
        if self.block_size_ms == 0 {
            return 32;
        }
        ((self.capacity_ms / self.block_size_ms) as usize).max(8)
    }
}

/// Sender half, owned by the capture thread.
#[derive(Clone)]
pub struct AudioBusSender {
    tx: mpsc::Sender<AudioBlock>,
    seq_counter: Arc<AtomicU64>,
    status: Arc<BusStatus>,
}

impl AudioBusSender {
    /// Hand a block to the pipeline without blocking.
    ///
    /// Returns false if the block was dropped; the drop is counted.
    pub fn send(
        &self,
        sample_rate: u32,
        channels: u16,
        samples: impl Into<Arc<[f32]>>,
    ) -> bool {
        let seq = self.seq_counter.fetch_add(1, Ordering::Relaxed);
        let ts_ms = chrono::Utc::now().timestamp_millis();
        let block = AudioBlock::new(seq, ts_ms, sample_rate, channels, samples);

        match self.tx.try_send(block) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let dropped = self.status.dropped_blocks.fetch_add(1, Ordering::Relaxed) + 1;
                if dropped % 10 == 1 {
                    tracing::warn!(dropped, seq, "Audio bus full, dropping blocks");
                }
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!("Audio bus closed");
                false
            }
        }
    }

    /// Number of blocks dropped because the pipeline fell behind.
    pub fn dropped_blocks(&self) -> u64 {
        self.status.dropped_blocks()
    }

    pub fn current_seq(&self) -> u64 {
        self.seq_counter.load(Ordering::Relaxed)
    }
}

/// Receiver half, owned by the pipeline context.
pub struct AudioBusReceiver {
    rx: mpsc::Receiver<AudioBlock>,
    next_seq: u64,
    status: Arc<BusStatus>,
}

impl AudioBusReceiver {
    /// Receive the next block in capture order.
    pub async fn recv(&mut self) -> Option<AudioBlock> {
        let block = self.rx.recv().await?;
        self.observe(&block);
        Some(block)
    }

    /// Receive without waiting.
    pub fn try_recv(&mut self) -> Option<AudioBlock> {
        let block = self.rx.try_recv().ok()?;
        self.observe(&block);
        Some(block)
    }

    fn observe(&mut self, block: &AudioBlock) {
        if block.seq > self.next_seq {
            let gap = block.seq - self.next_seq;
            self.status.gaps_detected.fetch_add(gap, Ordering::Relaxed);
            tracing::debug!(
                "Audio bus gap detected: {} blocks missing (seq {} -> {})",
                gap,
                self.next_seq,
                block.seq
            );
        }
        self.next_seq = block.seq + 1;
        self.status.blocks_received.fetch_add(1, Ordering::Relaxed);
        self.status
            .audio_received_ms
            .fetch_add(block.duration_ms(), Ordering::Relaxed);
        self.status.update_lag(block.ts_ms);
    }

    pub fn gaps_detected(&self) -> u64 {
        self.status.gaps_detected()
    }
}

/// Bounded audio bus connecting the capture thread to the pipeline.
pub struct AudioBus {
    sender: AudioBusSender,
    receiver: Option<AudioBusReceiver>,
    status: Arc<BusStatus>,
}

impl AudioBus {
    pub fn new() -> Self {
        Self::with_config(AudioBusConfig::default())
    }

    pub fn with_config(config: AudioBusConfig) -> Self {
        let capacity = config.channel_capacity();
        let (tx, rx) = mpsc::channel(capacity);
        let status = Arc::new(BusStatus::default());

        tracing::debug!(
            "Created audio bus: capacity={}ms (~{} blocks of {}ms)",
            config.capacity_ms,
            capacity,
            config.block_size_ms
        );

        Self {
            sender: AudioBusSender {
                tx,
                seq_counter: Arc::new(AtomicU64::new(0)),
                status: Arc::clone(&status),
            },
            receiver: Some(AudioBusReceiver {
                rx,
                next_seq: 0,
                status: Arc::clone(&status),
            }),
            status,
        }
    }

    pub fn sender(&self) -> AudioBusSender {
        self.sender.clone()
    }

    /// Take the receiver (can only be called once).
    pub fn take_receiver(&mut self) -> Option<AudioBusReceiver> {
        self.receiver.take()
    }

    pub fn status(&self) -> Arc<BusStatus> {
        Arc::clone(&self.status)
    }
}

impl Default for AudioBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-free bus counters shared between both halves.
#[derive(Debug, Default)]
pub struct BusStatus {
    dropped_blocks: AtomicU64,
    gaps_detected: AtomicU64,
    blocks_received: AtomicU64,
    audio_received_ms: AtomicU64,
    /// Now minus the capture timestamp of the last received block.
    audio_lag_ms: AtomicI64,
}

impl BusStatus {
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks.load(Ordering::Relaxed)
    }

    pub fn gaps_detected(&self) -> u64 {
        self.gaps_detected.load(Ordering::Relaxed)
    }

    pub fn blocks_received(&self) -> u64 {
        self.blocks_received.load(Ordering::Relaxed)
    }

    pub fn audio_received_ms(&self) -> u64 {
        self.audio_received_ms.load(Ordering::Relaxed)
    }

    pub fn audio_lag_ms(&self) -> i64 {
        self.audio_lag_ms.load(Ordering::Relaxed)
    }

    fn update_lag(&self, block_ts_ms: i64) {
        let now_ms = chrono::Utc::now().timestamp_millis();
        self.audio_lag_ms
            .store(now_ms - block_ts_ms, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStatusSnapshot {
        BusStatusSnapshot {
            dropped_blocks: self.dropped_blocks(),
            gaps_detected: self.gaps_detected(),
            blocks_received: self.blocks_received(),
            audio_received_ms: self.audio_received_ms(),
            audio_lag_ms: self.audio_lag_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct BusStatusSnapshot {
    pub dropped_blocks: u64,
    pub gaps_detected: u64,
    pub blocks_received: u64,
    pub audio_received_ms: u64,
    pub audio_lag_ms: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_duration_accounts_for_channels() {
        let mono = AudioBlock::new(0, 0, 16000, 1, vec![0.0; 1600]);
        assert_eq!(mono.duration_ms(), 100);

        let stereo = AudioBlock::new(0, 0, 16000, 2, vec![0.0; 1600]);
        assert_eq!(stereo.frames(), 800);
        assert_eq!(stereo.duration_ms(), 50);
    }

    #[test]
    fn test_zero_channels_treated_as_mono() {
        let block = AudioBlock::new(0, 0, 16000, 0, vec![0.0; 160]);
        assert_eq!(block.channels, 1);
        assert_eq!(block.duration_ms(), 10);
    }

    #[test]
    fn test_bus_config_capacity() {
        let config = AudioBusConfig {
            capacity_ms: 1200,
            block_size_ms: 60,
        };
        assert_eq!(config.channel_capacity(), 20);

        let tiny = AudioBusConfig {
            capacity_ms: 60,
            block_size_ms: 60,
        };
        assert_eq!(tiny.channel_capacity(), 8);
    }

    #[tokio::test]
    async fn test_send_recv_preserves_order() {
        let mut bus = AudioBus::new();
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        for i in 0..10 {
            assert!(sender.send(16000, 1, vec![i as f32; 960]));
        }

        for expected in 0..10u64 {
            let block = receiver.recv().await.unwrap();
            assert_eq!(block.seq, expected);
            assert_eq!(block.samples[0], expected as f32);
        }
        assert_eq!(receiver.gaps_detected(), 0);
        assert_eq!(bus.status().blocks_received(), 10);
    }

    #[test]
    fn test_overflow_is_counted_not_silent() {
        let mut bus = AudioBus::with_config(AudioBusConfig {
            capacity_ms: 60,
            block_size_ms: 60,
        });
        let sender = bus.sender();
        let _receiver = bus.take_receiver().unwrap();

        let mut accepted = 0;
        for _ in 0..20 {
            if sender.send(16000, 1, vec![0.0; 960]) {
                accepted += 1;
            }
        }

        assert_eq!(accepted, 8);
        assert_eq!(sender.dropped_blocks(), 12);
        assert_eq!(bus.status().snapshot().dropped_blocks, 12);
    }

    #[test]
    fn test_gap_detected_after_drop() {
        let mut bus = AudioBus::with_config(AudioBusConfig {
            capacity_ms: 60,
            block_size_ms: 60,
        });
        let sender = bus.sender();
        let mut receiver = bus.take_receiver().unwrap();

        // Fill the channel, drop two, then drain and send one more.
        for _ in 0..10 {
            sender.send(16000, 1, vec![0.0; 960]);
        }
        while receiver.try_recv().is_some() {}
        assert_eq!(receiver.gaps_detected(), 0);

        sender.send(16000, 1, vec![0.0; 960]);
        let block = receiver.try_recv().unwrap();
        assert_eq!(block.seq, 10);
        assert_eq!(receiver.gaps_detected(), 2);
    }

    #[tokio::test]
    async fn test_recv_returns_none_when_senders_dropped() {
        let mut bus = AudioBus::new();
        let mut receiver = bus.take_receiver().unwrap();
        drop(bus);
        assert!(receiver.recv().await.is_none());
    }
}
