//! Capture-side conversion: downmix to mono and resample to the pipeline rate.

use rubato::{FftFixedIn, Resampler};

/// Requested input frames per FFT pass; rubato may round this up.
const FFT_CHUNK_FRAMES: usize = 256;

pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let inv = 1.0 / channels as f32;
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() * inv)
        .collect()
}

/// Stateless linear interpolation. Used when the FFT resampler cannot be built.
pub fn resample_linear(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || from_rate == 0 || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let out_len = (samples.len() as f64 * ratio) as usize;
    (0..out_len)
        .map(|i| {
            let pos = i as f64 / ratio;
            let idx = pos.floor() as usize;
            let frac = pos.fract() as f32;
            match (samples.get(idx), samples.get(idx + 1)) {
                (Some(&a), Some(&b)) => a + (b - a) * frac,
                (Some(&a), None) => a,
                _ => 0.0,
            }
        })
        .collect()
}

/// Stateful converter owned by the capture thread.
///
/// Variable-sized capture callbacks are accumulated until a full FFT chunk
/// is available, so output blocks may lag input by up to one chunk.
pub struct CaptureConverter {
    channels: usize,
    from_rate: u32,
    to_rate: u32,
    fft: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl CaptureConverter {
    pub fn new(from_rate: u32, channels: u16, to_rate: u32) -> Self {
        let fft = if from_rate != to_rate {
            match FftFixedIn::<f32>::new(
                from_rate as usize,
                to_rate as usize,
                FFT_CHUNK_FRAMES,
                2,
                1,
            ) {
                Ok(r) => Some(r),
                Err(e) => {
                    tracing::warn!(from_rate, to_rate, "FFT resampler unavailable, using linear: {e}");
                    None
                }
            }
        } else {
            None
        };

        Self {
            channels: channels.max(1) as usize,
            from_rate,
            to_rate,
            fft,
            pending: Vec::with_capacity(FFT_CHUNK_FRAMES * 2),
        }
    }

    pub fn output_rate(&self) -> u32 {
        self.to_rate
    }

    pub fn is_passthrough(&self) -> bool {
        self.channels == 1 && self.from_rate == self.to_rate
    }

    /// Convert one capture callback's interleaved samples.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let mono = downmix_to_mono(samples, self.channels);
        if self.from_rate == self.to_rate {
            return mono;
        }

        let Some(fft) = self.fft.as_mut() else {
            return resample_linear(&mono, self.from_rate, self.to_rate);
        };

        self.pending.extend_from_slice(&mono);
        let mut out = Vec::new();
        loop {
            let need = fft.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let chunk: Vec<f32> = self.pending.drain(..need).collect();
            match fft.process(&[chunk], None) {
                Ok(resampled) => {
                    if let Some(channel) = resampled.first() {
                        out.extend_from_slice(channel);
                    }
                }
                Err(e) => tracing::debug!("resampler chunk failed: {e}"),
            }
        }
        out
    }
}
