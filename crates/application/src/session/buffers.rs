//! Pre-roll ring and active-speech buffer.

use murmur_bus::AudioBlock;
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;

/// The last N blocks, overwritten continuously regardless of voice state.
pub struct PreBuffer {
    ring: HeapRb<AudioBlock>,
}

impl PreBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: HeapRb::new(capacity.max(1)),
        }
    }

    /// Push a block, evicting the oldest when full.
    pub fn push(&mut self, block: AudioBlock) {
        let _ = self.ring.push_overwrite(block);
    }

    /// Take every buffered block, oldest first, leaving the ring empty.
    pub fn drain(&mut self) -> Vec<AudioBlock> {
        self.ring.pop_iter().collect()
    }

    pub fn clear(&mut self) {
        let _ = self.ring.pop_iter().count();
    }

    pub fn len(&self) -> usize {
        self.ring.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity().get()
    }
}

/// Blocks of the current utterance segment.
///
/// `forwarded` is a cursor: blocks before it have been written to a
/// recognition session, blocks after it have not (they arrived while no
/// session was open).
#[derive(Debug, Default)]
pub struct SpeechBuffer {
    blocks: Vec<AudioBlock>,
    forwarded: usize,
}

impl SpeechBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, block: AudioBlock) {
        self.blocks.push(block);
    }

    /// Blocks not yet written to any session.
    pub fn pending(&self) -> &[AudioBlock] {
        &self.blocks[self.forwarded..]
    }

    /// Advance the cursor by `count` blocks.
    pub fn mark_forwarded(&mut self, count: usize) {
        self.forwarded = (self.forwarded + count).min(self.blocks.len());
    }

    pub fn clear(&mut self) {
        self.blocks.clear();
        self.forwarded = 0;
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total audio held, in milliseconds.
    pub fn duration_ms(&self) -> u64 {
        self.blocks.iter().map(AudioBlock::duration_ms).sum()
    }
}
