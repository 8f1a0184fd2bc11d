use std::path::{Path, PathBuf};
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

/// Configuration for the reel composer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReelConfig {
    /// Root of the asset library (`<root>/<topic>/{intro,photos,clips}`, `<root>/random_clips`, `<root>/other_clips`)
    pub content_root: PathBuf,
    /// Directory under which each job gets its own transient workspace
    pub workspace_root: PathBuf,
    /// Where finished videos land when the caller gives no output path
    pub output_dir: PathBuf,
    /// Directory where job state JSON files are stored
    pub job_state_dir: PathBuf,
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Output frame width (must be even for yuv420p)
    pub width: u32,
    /// Output frame height (must be even for yuv420p)
    pub height: u32,
    pub fps: u32,
    /// Nominal duration of every segment in seconds
    pub segment_secs: f64,
    /// Trim applied to assets drawn from the `other_clips` pool
    pub other_clips_trim_secs: f64,
    /// Narration cap in seconds
    pub narration_secs: f64,
    /// Wall-clock limit for one whole job
    pub job_timeout_secs: u64,
    /// Optional limit for a single ffmpeg invocation; the process is killed when it expires
    pub step_timeout_secs: Option<u64>,
    /// Jobs allowed to run at once in `serve` mode
    pub max_concurrent_jobs: usize,
    /// Interval in seconds between request directory polls
    pub poll_interval_secs: u64,
    /// Normalize the six segments concurrently
    pub parallel_normalize: bool,
    /// Fixed selection seed, mostly for reproducing a job
    pub seed: Option<u64>,
    pub narration: NarrationConfig,
}

/// How narration text and speech are produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NarrationConfig {
    /// Command that prints narration prose for `{topic}` on stdout.
    /// When empty, `<content_root>/<topic>/narration.txt` is read instead.
    pub writer_command: Vec<String>,
    /// TTS command run once per sentence, sentence on stdin.
    /// Placeholders: `{output}` (WAV path to write), `{voice}`, `{speed}`.
    pub tts_command: Vec<String>,
    pub voice: String,
    pub speed: f32,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            writer_command: Vec::new(),
            tts_command: vec![
                "piper".to_string(),
                "--model".to_string(),
                "{voice}".to_string(),
                "--length_scale".to_string(),
                "{speed}".to_string(),
                "--output_file".to_string(),
                "{output}".to_string(),
            ],
            voice: "en_US-ryan-medium.onnx".to_string(),
            speed: 1.0,
        }
    }
}

impl Default for ReelConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ReelConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            content_root: PathBuf::from("content"),
            workspace_root: std::env::temp_dir().join("reel-work"),
            output_dir: PathBuf::from("uploads"),
            job_state_dir: PathBuf::from("/tmp/reel-jobs"),
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            width: 960,
            height: 540,
            fps: 30,
            segment_secs: 5.0,
            other_clips_trim_secs: 7.0,
            narration_secs: 30.0,
            job_timeout_secs: 600,
            step_timeout_secs: None,
            max_concurrent_jobs: 2,
            poll_interval_secs: 2,
            parallel_normalize: false,
            seed: None,
            narration: NarrationConfig::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // JSON unless the file says otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would produce segments the concat step cannot stream-copy
    pub fn validate(&self) -> Result<()> {
        if self.width == 0 || self.height == 0 {
            bail!("width and height must be positive (got {}x{})", self.width, self.height);
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            bail!("width and height must be even for yuv420p (got {}x{})", self.width, self.height);
        }
        if self.fps == 0 {
            bail!("fps must be positive");
        }
        if !is_positive(self.segment_secs) {
            bail!("segment_secs must be positive (got {})", self.segment_secs);
        }
        if !is_positive(self.other_clips_trim_secs) {
            bail!("other_clips_trim_secs must be positive (got {})", self.other_clips_trim_secs);
        }
        if !is_positive(self.narration_secs) {
            bail!("narration_secs must be positive (got {})", self.narration_secs);
        }
        if self.job_timeout_secs == 0 {
            bail!("job_timeout_secs must be positive");
        }
        if self.max_concurrent_jobs == 0 {
            bail!("max_concurrent_jobs must be at least 1");
        }
        if self.narration.tts_command.is_empty() {
            bail!("narration.tts_command must name a program");
        }
        // Pool cleanup removes every temp artifact under content_root
        for (name, dir) in [("workspace_root", &self.workspace_root), ("output_dir", &self.output_dir)] {
            if dir.starts_with(&self.content_root) {
                bail!(
                    "{} ({}) must not be inside content_root ({})",
                    name,
                    dir.display(),
                    self.content_root.display()
                );
            }
        }
        Ok(())
    }

    /// Directory polled by `serve` for request files
    pub fn request_dir(&self) -> PathBuf {
        self.job_state_dir.join("requests")
    }
}

fn is_positive(secs: f64) -> bool {
    secs.is_finite() && secs > 0.0
}
