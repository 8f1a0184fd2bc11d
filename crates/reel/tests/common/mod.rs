#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use reel::{AudioChunk, Cancellation, ChunkStream, NarrationSynthesizer, NarrationWriter, PipelineError, ReelConfig, Topic};

pub const RATE: u32 = 24_000;

/// Yields `count` tone chunks of `secs` seconds each, counting pulls
pub struct ToneSynthesizer {
    pub secs: f64,
    pub count: usize,
    pub pulled: Arc<AtomicUsize>,
}

impl ToneSynthesizer {
    pub fn new(secs: f64, count: usize) -> Self {
        Self { secs, count, pulled: Arc::new(AtomicUsize::new(0)) }
    }
}

impl NarrationSynthesizer for ToneSynthesizer {
    fn synthesize(&self, _text: &str, _scratch: &Path, _cancel: &Cancellation) -> Result<ChunkStream, PipelineError> {
        let frames = (self.secs * RATE as f64).round() as usize;
        let pulled = Arc::clone(&self.pulled);
        Ok(Box::new((0..self.count).map(move |_| {
            pulled.fetch_add(1, Ordering::SeqCst);
            let samples = (0..frames)
                .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / RATE as f32).sin() * 0.3)
                .collect();
            Ok(AudioChunk { samples, sample_rate: RATE })
        })))
    }
}

pub struct FixedText(pub String);

impl NarrationWriter for FixedText {
    fn write_narration(&self, _topic: Topic, _cancel: &Cancellation) -> anyhow::Result<String> {
        Ok(self.0.clone())
    }
}

/// Writer that blocks for a while and ignores cancellation
pub struct SlowText {
    pub delay: std::time::Duration,
    pub text: String,
}

impl NarrationWriter for SlowText {
    fn write_narration(&self, _topic: Topic, _cancel: &Cancellation) -> anyhow::Result<String> {
        std::thread::sleep(self.delay);
        Ok(self.text.clone())
    }
}

pub fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"asset").unwrap();
}

/// graphs content with two photos, two clips and one clip in each shared pool
pub fn build_content(root: &Path) {
    let graphs = root.join("graphs");
    touch(&graphs.join("intro").join("intro.png"));
    touch(&graphs.join("photos").join("p1.jpg"));
    touch(&graphs.join("photos").join("p2.jpg"));
    touch(&graphs.join("clips").join("c1.mp4"));
    touch(&graphs.join("clips").join("c2.mp4"));
    touch(&root.join("random_clips").join("r1.mp4"));
    touch(&root.join("other_clips").join("o1.mp4"));
}

pub fn config_in(dir: &Path) -> ReelConfig {
    ReelConfig {
        content_root: dir.join("content"),
        workspace_root: dir.join("work"),
        output_dir: dir.join("uploads"),
        job_state_dir: dir.join("jobs"),
        seed: Some(7),
        ..Default::default()
    }
}

/// Files anywhere under `root` that look like pipeline leftovers
/// Mono 16-bit tone WAV of `secs` seconds at [`RATE`]
pub fn write_tone_wav(path: &Path, secs: f64) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: RATE,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..(secs * RATE as f64) as usize {
        let s = (i as f32 * 330.0 * std::f32::consts::TAU / RATE as f32).sin();
        writer.write_sample((s * 8000.0) as i16).unwrap();
    }
    writer.finalize().unwrap();
}

/// Every path under `dir`, empty when it does not exist
pub fn entries_under(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    walkdir::WalkDir::new(dir)
        .min_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .collect()
}

pub fn temp_artifacts(root: &Path) -> Vec<PathBuf> {
    walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file() && reel::pool::is_temp_artifact(e.path()))
        .map(|e| e.path().to_path_buf())
        .collect()
}
