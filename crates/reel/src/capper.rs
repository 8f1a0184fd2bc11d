use std::path::Path;
use log::{debug, info};
use crate::error::PipelineError;
use crate::synth::AudioChunk;

/// Narration after capping: mono samples at one rate
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// Chunks accepted from the source, the last possibly truncated
    pub chunks_used: usize,
    pub truncated: bool,
}

impl NarrationAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }

    /// Write as 16-bit PCM mono WAV
    pub fn write_wav(&self, path: &Path) -> Result<(), PipelineError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let io_err = |e: hound::Error| {
            PipelineError::Synthesis(format!("failed to write {}: {}", path.display(), e))
        };

        let mut writer = hound::WavWriter::create(path, spec).map_err(io_err)?;
        for sample in &self.samples {
            let pcm = (sample.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
            writer.write_sample(pcm).map_err(io_err)?;
        }
        writer.finalize().map_err(io_err)
    }
}

/// Drain `chunks` until `target_secs` of audio has been collected.
///
/// The chunk that would cross the limit is cut to fill the remaining
/// sample budget exactly and nothing more is pulled from the source.
/// Earlier chunks are kept whole. A short source is returned as is.
pub fn cap_narration<I>(chunks: I, target_secs: f64) -> Result<NarrationAudio, PipelineError>
where
    I: IntoIterator<Item = Result<AudioChunk, PipelineError>>,
{
    let mut samples: Vec<f32> = Vec::new();
    let mut sample_rate: Option<u32> = None;
    let mut budget: usize = 0;
    let mut chunks_used = 0;
    let mut truncated = false;

    for chunk in chunks {
        let chunk = chunk?;
        if chunk.samples.is_empty() {
            continue;
        }

        let rate = match sample_rate {
            None => {
                if chunk.sample_rate == 0 {
                    return Err(PipelineError::Synthesis("chunk has a sample rate of 0".to_string()));
                }
                budget = (target_secs * chunk.sample_rate as f64).round() as usize;
                sample_rate = Some(chunk.sample_rate);
                chunk.sample_rate
            }
            Some(rate) if rate != chunk.sample_rate => {
                return Err(PipelineError::Synthesis(format!(
                    "sample rate changed mid-narration ({} Hz then {} Hz)",
                    rate, chunk.sample_rate
                )));
            }
            Some(rate) => rate,
        };

        let remaining = budget - samples.len();
        chunks_used += 1;
        if chunk.samples.len() >= remaining {
            truncated = chunk.samples.len() > remaining;
            samples.extend_from_slice(&chunk.samples[..remaining]);
            debug!(
                "Narration cap reached at chunk {} ({:.2}s kept of {:.2}s)",
                chunks_used,
                remaining as f64 / rate as f64,
                chunk.duration_secs()
            );
            break;
        }
        samples.extend_from_slice(&chunk.samples);
    }

    let sample_rate = match sample_rate {
        Some(rate) if !samples.is_empty() => rate,
        _ => return Err(PipelineError::Synthesis("synthesizer produced no audio".to_string())),
    };

    let audio = NarrationAudio { samples, sample_rate, chunks_used, truncated };
    info!(
        "🔊 Narration capped at {:.2}s from {} chunks{}",
        audio.duration_secs(),
        audio.chunks_used,
        if audio.truncated { " (last chunk truncated)" } else { "" }
    );
    Ok(audio)
}
