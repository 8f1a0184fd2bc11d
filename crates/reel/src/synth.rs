use std::path::{Path, PathBuf};
use anyhow::{anyhow, bail, Context, Result};
use log::{debug, info};
use tokio::process::Command;
use crate::cancel::{run_command, Cancellation};
use crate::config::NarrationConfig;
use crate::error::{self, PipelineError};
use crate::narration::split_sentences;

/// One unit of synthesized speech, mono
#[derive(Debug, Clone, PartialEq)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Lazy, finite, single-pass chunk source
pub type ChunkStream = Box<dyn Iterator<Item = Result<AudioChunk, PipelineError>> + Send>;

/// Turns narration text into audio chunks on demand.
///
/// Chunks must be produced as the stream is pulled so that a consumer that
/// stops early does not pay for speech it will discard. Once `cancel` fires
/// no further files may be written under `scratch`.
pub trait NarrationSynthesizer: Send + Sync {
    /// `scratch` is a job-private directory for intermediate files
    fn synthesize(&self, text: &str, scratch: &Path, cancel: &Cancellation) -> Result<ChunkStream, PipelineError>;
}

/// Read a WAV file into a mono chunk, averaging channels
pub fn read_wav(path: &Path) -> Result<AudioChunk> {
    let mut reader = hound::WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file: {}", path.display()))?;
    let spec = reader.spec();

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|sample| sample as f32 / max_val))
                .collect::<std::result::Result<_, _>>()
                .with_context(|| format!("Failed to read samples from {}", path.display()))?
        }
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .with_context(|| format!("Failed to read samples from {}", path.display()))?,
    };

    let channels = spec.channels.max(1) as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
            .collect()
    };

    Ok(AudioChunk { samples, sample_rate: spec.sample_rate })
}

/// External TTS program run once per sentence, text on stdin
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    pub command: Vec<String>,
    pub voice: String,
    pub speed: f32,
}

impl CommandSynthesizer {
    pub fn from_config(cfg: &NarrationConfig) -> Self {
        Self {
            command: cfg.tts_command.clone(),
            voice: cfg.voice.clone(),
            speed: cfg.speed,
        }
    }

    fn speak(&self, sentence: &str, output: &Path, cancel: &Cancellation) -> Result<AudioChunk> {
        let (program, rest) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("TTS command is empty"))?;
        let out = output.to_string_lossy();
        let speed = self.speed.to_string();
        let args: Vec<String> = rest
            .iter()
            .map(|a| {
                a.replace("{output}", &out)
                    .replace("{voice}", &self.voice)
                    .replace("{speed}", &speed)
            })
            .collect();

        debug!("TTS: {} {} <<< {}", program, args.join(" "), sentence);
        let mut cmd = Command::new(program);
        cmd.args(&args);
        let result = run_command(cmd, Some(sentence.as_bytes()), cancel)
            .with_context(|| format!("TTS process {} did not finish", program))?;
        if !result.status.success() {
            bail!(
                "TTS exited with code {}: {}",
                result.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }

        let chunk = read_wav(output)?;
        let _ = std::fs::remove_file(output);
        Ok(chunk)
    }
}

struct SentenceChunks {
    synth: CommandSynthesizer,
    sentences: std::vec::IntoIter<String>,
    scratch: PathBuf,
    index: usize,
    cancel: Cancellation,
}

impl Iterator for SentenceChunks {
    type Item = Result<AudioChunk, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        let sentence = self.sentences.next()?;
        if let Err(e) = self.cancel.check() {
            return Some(Err(e));
        }
        let output = self.scratch.join(format!("chunk_{:04}.wav", self.index));
        self.index += 1;

        Some(
            self.synth
                .speak(&sentence, &output, &self.cancel)
                .map_err(|e| PipelineError::Synthesis(error::chain(&e))),
        )
    }
}

impl NarrationSynthesizer for CommandSynthesizer {
    fn synthesize(&self, text: &str, scratch: &Path, cancel: &Cancellation) -> Result<ChunkStream, PipelineError> {
        let sentences = split_sentences(text).map_err(|e| PipelineError::Synthesis(error::chain(&e)))?;
        if sentences.is_empty() {
            return Err(PipelineError::Synthesis("narration text is empty".to_string()));
        }
        cancel.check()?;
        std::fs::create_dir_all(scratch).map_err(|e| {
            PipelineError::Synthesis(format!("failed to create {}: {}", scratch.display(), e))
        })?;

        info!("🔊 Synthesizing narration, {} sentences", sentences.len());
        Ok(Box::new(SentenceChunks {
            synth: self.clone(),
            sentences: sentences.into_iter(),
            scratch: scratch.to_path_buf(),
            index: 0,
            cancel: cancel.clone(),
        }))
    }
}
