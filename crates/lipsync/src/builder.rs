use crate::engine::{ChannelLayout, LipSyncContext};
use crate::frame::{FrameSequence, FRAME_RATE};
use crate::{LipSyncError, Result};

/// Turns a complete PCM buffer into a delay-compensated frame sequence.
pub struct LipSyncSequenceBuilder<'a> {
    context: &'a mut dyn LipSyncContext,
}

impl<'a> LipSyncSequenceBuilder<'a> {
    pub fn new(context: &'a mut dyn LipSyncContext) -> Self {
        Self { context }
    }

    /// Build one frame per 10ms of interleaved s16 `samples`.
    ///
    /// The engine is primed with a zero chunk to learn its lookahead, and
    /// frames produced before the lookahead has been consumed are discarded.
    /// Never returns an empty sequence.
    pub fn build(&mut self, samples: &[i16], sample_rate: u32, channels: u16) -> Result<FrameSequence> {
        let layout = ChannelLayout::from_channels(channels)
            .ok_or_else(|| LipSyncError::InvalidAudio(format!("{channels} channels")))?;
        let chunk_frames = (sample_rate / FRAME_RATE) as usize;
        if chunk_frames == 0 {
            return Err(LipSyncError::InvalidAudio(format!("sample rate {sample_rate}")));
        }
        if samples.is_empty() {
            return Err(LipSyncError::EmptySequence);
        }

        let chunk_size = chunk_frames * layout.channels();
        let mut chunk = vec![0i16; chunk_size];

        let warmup = self.context.process_frame(&chunk, layout)?;
        let frame_offset = warmup.frame_delay_ms as usize * sample_rate as usize / 1000
            * layout.channels();

        let total = samples.len() + frame_offset;
        let mut sequence = FrameSequence::with_capacity(total / chunk_size + 1);
        let mut offs = 0;
        while offs < total {
            chunk.fill(0);
            if offs < samples.len() {
                let end = (offs + chunk_size).min(samples.len());
                chunk[..end - offs].copy_from_slice(&samples[offs..end]);
            }

            let out = self.context.process_frame(&chunk, layout)?;
            if offs >= frame_offset {
                sequence.push(out.frame);
            }
            offs += chunk_size;
        }

        if sequence.is_empty() {
            return Err(LipSyncError::EmptySequence);
        }

        tracing::debug!(
            frames = sequence.len(),
            delay_ms = warmup.frame_delay_ms,
            sample_rate,
            channels,
            "Built lip-sync sequence"
        );
        Ok(sequence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineFrame;
    use crate::frame::VisemeFrame;

    /// Reports a fixed delay and encodes the chunk's first sample as the PP score.
    struct StubContext {
        delay_ms: u32,
        calls: usize,
        chunk_lens: Vec<usize>,
    }

    impl StubContext {
        fn new(delay_ms: u32) -> Self {
            Self {
                delay_ms,
                calls: 0,
                chunk_lens: Vec::new(),
            }
        }
    }

    impl LipSyncContext for StubContext {
        fn process_frame(&mut self, pcm: &[i16], _: ChannelLayout) -> Result<EngineFrame> {
            self.calls += 1;
            self.chunk_lens.push(pcm.len());
            let frame = if pcm[0] == 0 {
                VisemeFrame::neutral()
            } else {
                VisemeFrame::from_scores(&[0.0, pcm[0] as f32 / 100.0], 0.0)
            };
            Ok(EngineFrame {
                frame,
                frame_delay_ms: self.delay_ms,
            })
        }
    }

    #[test]
    fn test_one_second_of_silence_gives_100_neutral_frames() {
        let mut ctx = StubContext::new(0);
        let seq = LipSyncSequenceBuilder::new(&mut ctx)
            .build(&vec![0i16; 16000], 16000, 1)
            .unwrap();

        assert_eq!(seq.len(), 100);
        assert!(seq.frames().iter().all(VisemeFrame::is_neutral));
        // Warm-up plus one call per chunk.
        assert_eq!(ctx.calls, 101);
        assert!(ctx.chunk_lens.iter().all(|&n| n == 160));
    }

    #[test]
    fn test_partial_chunk_is_zero_padded() {
        let mut ctx = StubContext::new(0);
        let seq = LipSyncSequenceBuilder::new(&mut ctx)
            .build(&vec![0i16; 250], 16000, 1)
            .unwrap();
        assert_eq!(seq.len(), 2);
        assert!(ctx.chunk_lens.iter().all(|&n| n == 160));
    }

    #[test]
    fn test_delay_compensation_aligns_frames() {
        // 20ms delay at 16kHz mono = 320 samples = two chunks.
        let mut samples = vec![0i16; 1600];
        for (i, chunk) in samples.chunks_mut(160).enumerate() {
            chunk[0] = (i + 1) as i16;
        }

        let mut ctx = StubContext::new(20);
        let seq = LipSyncSequenceBuilder::new(&mut ctx)
            .build(&samples, 16000, 1)
            .unwrap();

        // Same count as without delay; extra zero chunks flush the lookahead.
        assert_eq!(seq.len(), 10);
        assert_eq!(ctx.calls, 1 + 12);
        // The first kept frame came from the third input chunk.
        assert!((seq[0].scores[1] - 0.03).abs() < 1e-6);
        assert!(seq[8].is_neutral());
    }

    #[test]
    fn test_stereo_chunk_size() {
        let mut ctx = StubContext::new(0);
        let seq = LipSyncSequenceBuilder::new(&mut ctx)
            .build(&vec![0i16; 48000 * 2 / 10], 48000, 2)
            .unwrap();
        assert_eq!(seq.len(), 10);
        assert!(ctx.chunk_lens.iter().all(|&n| n == 960));
    }

    #[test]
    fn test_empty_input_is_build_failure() {
        let mut ctx = StubContext::new(0);
        let err = LipSyncSequenceBuilder::new(&mut ctx).build(&[], 16000, 1);
        assert!(matches!(err, Err(LipSyncError::EmptySequence)));
    }

    #[test]
    fn test_rejects_unsupported_layout() {
        let mut ctx = StubContext::new(0);
        let err = LipSyncSequenceBuilder::new(&mut ctx).build(&[1, 2, 3], 16000, 6);
        assert!(matches!(err, Err(LipSyncError::InvalidAudio(_))));
    }

    #[test]
    fn test_engine_error_propagates() {
        struct Failing;
        impl LipSyncContext for Failing {
            fn process_frame(&mut self, _: &[i16], _: ChannelLayout) -> Result<EngineFrame> {
                Err(LipSyncError::Process("boom".into()))
            }
        }
        let mut ctx = Failing;
        let err = LipSyncSequenceBuilder::new(&mut ctx).build(&[0; 320], 16000, 1);
        assert!(matches!(err, Err(LipSyncError::Process(_))));
    }
}
