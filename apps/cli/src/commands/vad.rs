use std::path::Path;

use anyhow::Context;
use murmur_application::SpeechConfig;
use murmur_audio::{i16_to_f32, read_wav_file, CaptureConverter};
use murmur_vad::{VadMode, VadSettings, VadTransition, VoiceActivityDetector};
use serde::Serialize;

pub struct VadOptions {
    pub mode: Option<VadMode>,
    pub start_threshold: Option<u32>,
    pub end_threshold: Option<u32>,
    pub block_ms: u32,
}

/// One detected stretch of speech, backdated to the first block of the
/// run that triggered each edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Segment {
    pub start_ms: u64,
    pub end_ms: u64,
}

pub fn run(file: &Path, options: VadOptions, json: bool) -> anyhow::Result<()> {
    let base = SpeechConfig::load().unwrap_or_else(|e| {
        tracing::warn!("Ignoring configuration: {e}");
        SpeechConfig::default()
    });
    let mut settings = base.vad_settings();
    if let Some(mode) = options.mode {
        settings.mode = mode;
    }
    if let Some(start) = options.start_threshold {
        settings.start_threshold = start;
    }
    if let Some(end) = options.end_threshold {
        settings.end_threshold = end;
    }

    let wav = read_wav_file(file).with_context(|| format!("reading {}", file.display()))?;
    if wav.is_empty() {
        anyhow::bail!("{} contains no audio", file.display());
    }
    tracing::info!(
        rate = wav.sample_rate,
        channels = wav.channels,
        secs = wav.duration_secs(),
        "Loaded WAV"
    );

    let mut converter = CaptureConverter::new(wav.sample_rate, wav.channels, base.sample_rate);
    let samples = converter.process(&i16_to_f32(&wav.samples));
    let segments = detect_segments(&samples, base.sample_rate, settings, options.block_ms)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&segments)?);
    } else if segments.is_empty() {
        println!("no speech detected");
    } else {
        for (i, seg) in segments.iter().enumerate() {
            println!(
                "{:>3}  {:>9.2}s - {:>9.2}s  ({:.2}s)",
                i + 1,
                seg.start_ms as f64 / 1000.0,
                seg.end_ms as f64 / 1000.0,
                (seg.end_ms - seg.start_ms) as f64 / 1000.0
            );
        }
    }
    Ok(())
}

/// Run the detector over mono `samples` in fixed blocks.
pub fn detect_segments(
    samples: &[f32],
    sample_rate: u32,
    settings: VadSettings,
    block_ms: u32,
) -> anyhow::Result<Vec<Segment>> {
    let mut detector = VoiceActivityDetector::new(settings, sample_rate)?;
    let block_len = (sample_rate as usize * block_ms.max(1) as usize / 1000).max(1);
    let block_ms = block_ms.max(1) as u64;

    // Without smoothing every edge is decided by a single block.
    let (start_run, end_run) = if settings.smoothing {
        (
            settings.start_threshold.max(1) as u64,
            settings.end_threshold.max(1) as u64,
        )
    } else {
        (1, 1)
    };

    let mut segments = Vec::new();
    let mut open: Option<u64> = None;
    for (i, block) in samples.chunks(block_len).enumerate() {
        let next = (i as u64 + 1) * block_ms;
        match detector.process(block) {
            Some(VadTransition::VoiceStarted) => {
                open = Some(next.saturating_sub(start_run * block_ms));
            }
            Some(VadTransition::VoiceEnded) => {
                if let Some(start_ms) = open.take() {
                    let end_ms = next.saturating_sub(end_run * block_ms).max(start_ms);
                    segments.push(Segment { start_ms, end_ms });
                }
            }
            None => {}
        }
    }

    if let Some(start_ms) = open {
        let total_ms = samples.len() as u64 * 1000 / sample_rate as u64;
        segments.push(Segment {
            start_ms,
            end_ms: total_ms,
        });
    }
    Ok(segments)
}
