//! Boundary smoothing for frame sequences.
//!
//! Engines tend to emit a run of pure-silence frames before articulation
//! starts and after it ends, which reads as a snap open/shut. Those runs are
//! replaced by linear blends. Only viseme scores are blended; laughter is
//! left as produced.

use crate::frame::{FrameSequence, VisemeFrame, VISEME_COUNT};

/// Frames in the synthesized mouth-closing tail.
pub const CLOSING_TAIL_FRAMES: usize = 10;

#[inline]
pub fn lerp_scalar(a: f32, b: f32, t: f32) -> f32 {
    a + t * (b - a)
}

fn blend_scores(a: &[f32; VISEME_COUNT], b: &[f32; VISEME_COUNT], t: f32) -> [f32; VISEME_COUNT] {
    let mut out = [0.0; VISEME_COUNT];
    for (i, v) in out.iter_mut().enumerate() {
        *v = lerp_scalar(a[i], b[i], t);
    }
    out
}

/// Interpolate leading and trailing silence runs in place.
///
/// Leading: with `e` the first index >= 1 whose silence score is not 1, each
/// frame `i` in `1..e` becomes `frame[1] + (i / e) * (frame[e] - frame[1])`.
/// Trailing: with `s` the last non-silent index and `l` the last index, each
/// frame in `s+1..l` is blended from `frame[s]` to `frame[l]`. A sequence with
/// no non-silent frame is left untouched.
pub fn smooth_boundaries(sequence: &mut FrameSequence) {
    let frames = sequence.frames_mut();
    if frames.len() < 3 {
        return;
    }

    let Some(first_voiced) = (1..frames.len()).find(|&i| !frames[i].is_silent()) else {
        return;
    };

    if first_voiced > 1 {
        let a = frames[1].scores;
        let b = frames[first_voiced].scores;
        let k = first_voiced as f32;
        for i in 1..first_voiced {
            frames[i].scores = blend_scores(&a, &b, i as f32 / k);
        }
    }

    let last = frames.len() - 1;
    let last_voiced = (1..=last)
        .rev()
        .find(|&i| !frames[i].is_silent())
        .unwrap_or(first_voiced);

    if last - last_voiced > 1 {
        let a = frames[last_voiced].scores;
        let b = frames[last].scores;
        let k = (last - last_voiced) as f32;
        for i in last_voiced + 1..last {
            frames[i].scores = blend_scores(&a, &b, (i - last_voiced) as f32 / k);
        }
    }
}

/// Mouth-closing tail starting at `from`: first frame equals `from`, last is
/// neutral, evenly blended in between.
pub fn closing_tail(from: &VisemeFrame) -> Vec<VisemeFrame> {
    let neutral = VisemeFrame::neutral();
    let steps = (CLOSING_TAIL_FRAMES - 1) as f32;
    let mut tail: Vec<VisemeFrame> = (0..CLOSING_TAIL_FRAMES - 1)
        .map(|k| {
            let t = k as f32 / steps;
            VisemeFrame {
                scores: blend_scores(&from.scores, &neutral.scores, t),
                laughter: lerp_scalar(from.laughter, 0.0, t),
            }
        })
        .collect();
    tail.push(neutral);
    tail
}
