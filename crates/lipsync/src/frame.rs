use std::ops::Index;

use serde::{Deserialize, Serialize};

/// Frames per second produced by the builder (one per 10ms chunk).
pub const FRAME_RATE: u32 = 100;

pub const VISEME_COUNT: usize = 15;

/// Category names; index 0 is silence.
pub const VISEME_NAMES: [&str; VISEME_COUNT] = [
    "sil", "PP", "FF", "TH", "DD", "kk", "CH", "SS", "nn", "RR", "aa", "E", "ih", "oh", "ou",
];

/// Per-category activation scores in [0, 1] plus a laughter score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VisemeFrame {
    pub scores: [f32; VISEME_COUNT],
    pub laughter: f32,
}

impl Default for VisemeFrame {
    fn default() -> Self {
        Self::neutral()
    }
}

impl VisemeFrame {
    /// Closed mouth: silence at 1, everything else 0.
    pub fn neutral() -> Self {
        let mut scores = [0.0; VISEME_COUNT];
        scores[0] = 1.0;
        Self {
            scores,
            laughter: 0.0,
        }
    }

    /// Build from engine output, clamping into [0, 1]. Missing categories are 0.
    pub fn from_scores(scores: &[f32], laughter: f32) -> Self {
        let mut out = [0.0; VISEME_COUNT];
        for (dst, &src) in out.iter_mut().zip(scores) {
            *dst = src.clamp(0.0, 1.0);
        }
        Self {
            scores: out,
            laughter: laughter.clamp(0.0, 1.0),
        }
    }

    pub fn silence(&self) -> f32 {
        self.scores[0]
    }

    /// True when the silence category is exactly 1.
    pub fn is_silent(&self) -> bool {
        self.scores[0] == 1.0
    }

    pub fn is_neutral(&self) -> bool {
        *self == Self::neutral()
    }

    /// Dominant category name.
    pub fn dominant(&self) -> &'static str {
        let mut best = 0;
        for (i, &s) in self.scores.iter().enumerate() {
            if s > self.scores[best] {
                best = i;
            }
        }
        VISEME_NAMES[best]
    }
}

/// Ordered frames for one utterance at [`FRAME_RATE`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameSequence {
    frames: Vec<VisemeFrame>,
}

impl FrameSequence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            frames: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, frame: VisemeFrame) {
        self.frames.push(frame);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&VisemeFrame> {
        self.frames.get(index)
    }

    pub fn last(&self) -> Option<&VisemeFrame> {
        self.frames.last()
    }

    pub fn frames(&self) -> &[VisemeFrame] {
        &self.frames
    }

    pub(crate) fn frames_mut(&mut self) -> &mut [VisemeFrame] {
        &mut self.frames
    }

    pub fn duration_ms(&self) -> u64 {
        self.frames.len() as u64 * 1000 / FRAME_RATE as u64
    }
}

impl From<Vec<VisemeFrame>> for FrameSequence {
    fn from(frames: Vec<VisemeFrame>) -> Self {
        Self { frames }
    }
}

impl Index<usize> for FrameSequence {
    type Output = VisemeFrame;

    fn index(&self, index: usize) -> &VisemeFrame {
        &self.frames[index]
    }
}
