use std::path::{Path, PathBuf};
use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::time::{timeout, Duration};
use crate::config::ReelConfig;
use crate::ffprobe::FFProbeData;

/// Encoder every segment is produced with
pub const VIDEO_ENCODER: &str = "libx264";

/// FFmpeg version information
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FFmpegVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl FFmpegVersion {
    /// Check if this version meets the minimum requirement (4.0)
    pub fn meets_requirement(&self) -> bool {
        self.major >= 4
    }

    /// Parse version from the first line of `ffmpeg -version`.
    /// Example: "ffmpeg version 6.1.1-3ubuntu5" -> 6.1.1
    pub fn parse(version_str: &str) -> Result<Self> {
        let version_part = version_str
            .split_whitespace()
            .map(|s| s.trim_start_matches('n'))
            .find(|s| s.chars().next().map(|c| c.is_ascii_digit()).unwrap_or(false))
            .ok_or_else(|| anyhow!("No version number found in: {}", version_str))?;

        let mut numbers = version_part.split('.').map(|part| {
            let digits: String = part.chars().take_while(|c| c.is_ascii_digit()).collect();
            digits.parse::<u32>().ok()
        });

        let major = numbers
            .next()
            .flatten()
            .ok_or_else(|| anyhow!("Invalid version format: {}", version_str))?;
        let minor = numbers.next().flatten().unwrap_or(0);
        let patch = numbers.next().flatten().unwrap_or(0);

        Ok(FFmpegVersion { major, minor, patch })
    }
}

impl std::fmt::Display for FFmpegVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Result from FFmpeg execution
#[derive(Debug, Clone)]
pub struct FFmpegResult {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Handle on the configured ffmpeg/ffprobe binaries
#[derive(Debug, Clone)]
pub struct FFmpegManager {
    pub ffmpeg_bin: PathBuf,
    pub ffprobe_bin: PathBuf,
    /// Per-invocation limit applied by the pipeline stages
    pub step_timeout_secs: Option<u64>,
}

impl FFmpegManager {
    /// Use the configured binaries without probing them
    pub fn from_config(config: &ReelConfig) -> Self {
        FFmpegManager {
            ffmpeg_bin: config.ffmpeg_bin.clone(),
            ffprobe_bin: config.ffprobe_bin.clone(),
            step_timeout_secs: config.step_timeout_secs,
        }
    }

    /// Initialize with version validation and encoder detection
    pub async fn new(config: &ReelConfig) -> Result<Self> {
        let manager = Self::from_config(config);

        let version = Self::detect_version(&manager.ffmpeg_bin).await?;
        if !version.meets_requirement() {
            return Err(anyhow!(
                "FFmpeg version {} does not meet requirement (>= 4.0). \
                 Please install FFmpeg 4.0 or later.",
                version
            ));
        }

        if !Self::has_encoder(&manager.ffmpeg_bin, VIDEO_ENCODER).await? {
            return Err(anyhow!(
                "FFmpeg at {} was built without the {} encoder",
                manager.ffmpeg_bin.display(),
                VIDEO_ENCODER
            ));
        }

        info!("🎬 Using FFmpeg {} at {}", version, manager.ffmpeg_bin.display());
        Ok(manager)
    }

    /// Detect FFmpeg version
    pub async fn detect_version(ffmpeg_bin: &Path) -> Result<FFmpegVersion> {
        let output = Command::new(ffmpeg_bin)
            .arg("-version")
            .output()
            .await
            .with_context(|| format!("Failed to execute FFmpeg at: {}", ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg version check failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let first_line = stdout.lines().next()
            .ok_or_else(|| anyhow!("Empty output from FFmpeg -version"))?;

        FFmpegVersion::parse(first_line)
    }

    async fn has_encoder(ffmpeg_bin: &Path, encoder: &str) -> Result<bool> {
        let output = Command::new(ffmpeg_bin)
            .arg("-hide_banner")
            .arg("-encoders")
            .output()
            .await
            .with_context(|| format!("Failed to query FFmpeg encoders at: {}", ffmpeg_bin.display()))?;

        if !output.status.success() {
            return Err(anyhow!("FFmpeg encoder query failed"));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.split_whitespace().any(|token| token == encoder))
    }

    /// Run ffmpeg with `args`, capturing output and killing it on timeout.
    ///
    /// A non-zero exit is an error carrying the command line and stderr.
    pub async fn execute_ffmpeg(
        &self,
        args: Vec<String>,
        timeout_secs: Option<u64>,
    ) -> Result<FFmpegResult> {
        let cmd_str = format!("{} {}", self.ffmpeg_bin.display(), args.join(" "));
        debug!("Executing FFmpeg: {}", cmd_str);

        let mut cmd = Command::new(&self.ffmpeg_bin);
        cmd.args(&args);
        cmd.stdin(std::process::Stdio::null());
        cmd.stdout(std::process::Stdio::piped());
        cmd.stderr(std::process::Stdio::piped());
        cmd.kill_on_drop(true);

        let mut child = cmd.spawn()
            .with_context(|| format!(
                "Failed to spawn FFmpeg process at: {}. Ensure FFmpeg is installed and accessible.",
                self.ffmpeg_bin.display()
            ))?;

        let stdout = child.stdout.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stdout"))?;
        let stderr = child.stderr.take()
            .ok_or_else(|| anyhow!("Failed to capture FFmpeg stderr"))?;

        let stdout_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut line_stream = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = line_stream.next_line().await {
                lines.push(line);
            }
            lines.join("\n")
        });

        let stderr_handle = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut line_stream = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = line_stream.next_line().await {
                lines.push(line);
            }
            lines.join("\n")
        });

        let status = if let Some(timeout_secs) = timeout_secs {
            match timeout(Duration::from_secs(timeout_secs), child.wait()).await {
                Ok(result) => result.context("Failed to wait for FFmpeg process")?,
                Err(_) => {
                    child.kill().await.context("Failed to kill stuck FFmpeg process")?;
                    return Err(anyhow!(
                        "FFmpeg process timed out after {} seconds. Process was killed.",
                        timeout_secs
                    ));
                }
            }
        } else {
            child.wait().await.context("Failed to wait for FFmpeg process")?
        };

        let stdout = stdout_handle.await.context("Failed to read FFmpeg stdout")?;
        let stderr = stderr_handle.await.context("Failed to read FFmpeg stderr")?;
        let exit_code = status.code();

        if !status.success() {
            return Err(anyhow!(
                "FFmpeg failed (exit code: {})\nCommand: {}\nSTDERR:\n{}",
                exit_code.unwrap_or(-1),
                cmd_str,
                stderr
            ));
        }

        Ok(FFmpegResult { exit_code, stdout, stderr })
    }

    /// Run ffprobe on a file and return its JSON output
    pub async fn execute_ffprobe(&self, file_path: &Path) -> Result<String> {
        if !file_path.exists() {
            return Err(anyhow!("File does not exist: {}", file_path.display()));
        }

        debug!("Executing FFprobe for: {}", file_path.display());

        let output = Command::new(&self.ffprobe_bin)
            .arg("-v")
            .arg("error")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(file_path)
            .output()
            .await
            .with_context(|| format!(
                "Failed to execute FFprobe for: {}. Ensure FFprobe is installed and accessible at: {}",
                file_path.display(),
                self.ffprobe_bin.display()
            ))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "FFprobe failed (exit code {}) for {}:\nSTDERR: {}",
                output.status.code().unwrap_or(-1),
                file_path.display(),
                stderr
            ));
        }

        String::from_utf8(output.stdout).context("FFprobe output is not valid UTF-8")
    }

    pub async fn probe_file(&self, file_path: &Path) -> Result<FFProbeData> {
        let json = self.execute_ffprobe(file_path).await?;
        FFProbeData::from_json(&json)
            .with_context(|| format!("Failed to parse ffprobe output for: {}", file_path.display()))
    }

    /// Duration of a media file in seconds
    pub async fn probe_duration(&self, file_path: &Path) -> Result<f64> {
        self.probe_file(file_path)
            .await?
            .duration_secs()
            .ok_or_else(|| anyhow!("No duration reported for: {}", file_path.display()))
    }
}

/// The one encoding every segment shares, so segments concat by stream copy
#[derive(Debug, Clone, PartialEq)]
pub struct EncodingProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_codec: String,
    pub pixel_format: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
}

impl EncodingProfile {
    pub fn from_config(config: &ReelConfig) -> Self {
        EncodingProfile {
            width: config.width,
            height: config.height,
            fps: config.fps,
            video_codec: VIDEO_ENCODER.to_string(),
            pixel_format: "yuv420p".to_string(),
            preset: "veryfast".to_string(),
            crf: 23,
            audio_codec: "aac".to_string(),
        }
    }

    /// Scale, square pixels, constant frame rate, then pixel format
    pub fn video_filter(&self) -> String {
        format!(
            "scale={}:{},setsar=1,fps={},format={}",
            self.width, self.height, self.fps, self.pixel_format
        )
    }
}

fn secs_arg(secs: f64) -> String {
    format!("{:.3}", secs)
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

/// Command builder for generating FFmpeg command lines
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    profile: EncodingProfile,
}

impl CommandBuilder {
    pub fn new(profile: EncodingProfile) -> Self {
        CommandBuilder { profile }
    }

    pub fn profile(&self) -> &EncodingProfile {
        &self.profile
    }

    fn common_prefix() -> Vec<String> {
        vec!["-y".to_string(), "-hide_banner".to_string(), "-loglevel".to_string(), "error".to_string()]
    }

    /// Video codec, pixel format and container flags shared by both segment kinds
    fn push_encode_args(&self, args: &mut Vec<String>, output: &Path) {
        args.push("-vf".to_string());
        args.push(self.profile.video_filter());

        args.push("-r".to_string());
        args.push(self.profile.fps.to_string());

        args.push("-c:v".to_string());
        args.push(self.profile.video_codec.clone());
        args.push("-preset".to_string());
        args.push(self.profile.preset.clone());
        args.push("-crf".to_string());
        args.push(self.profile.crf.to_string());
        args.push("-pix_fmt".to_string());
        args.push(self.profile.pixel_format.clone());

        // Segments carry no audio; narration is added after concat
        args.push("-an".to_string());

        args.push("-movflags".to_string());
        args.push("+faststart".to_string());

        args.push(path_arg(output));
    }

    /// Hold a still image for `duration` seconds
    pub fn build_still_command(&self, image: &Path, output: &Path, duration: f64) -> Vec<String> {
        let mut args = Self::common_prefix();

        args.push("-loop".to_string());
        args.push("1".to_string());
        args.push("-framerate".to_string());
        args.push(self.profile.fps.to_string());
        args.push("-i".to_string());
        args.push(path_arg(image));

        args.push("-t".to_string());
        args.push(secs_arg(duration));

        self.push_encode_args(&mut args, output);
        args
    }

    /// Re-encode the first `duration` seconds of a clip
    pub fn build_clip_command(&self, clip: &Path, output: &Path, duration: f64) -> Vec<String> {
        let mut args = Self::common_prefix();

        args.push("-i".to_string());
        args.push(path_arg(clip));

        args.push("-t".to_string());
        args.push(secs_arg(duration));

        args.push("-map".to_string());
        args.push("0:v:0".to_string());

        self.push_encode_args(&mut args, output);
        args
    }

    /// Stream-copy concatenation of the segments listed in `list_file`
    pub fn build_concat_command(&self, list_file: &Path, output: &Path) -> Vec<String> {
        let mut args = Self::common_prefix();

        args.push("-f".to_string());
        args.push("concat".to_string());
        args.push("-safe".to_string());
        args.push("0".to_string());
        args.push("-i".to_string());
        args.push(path_arg(list_file));

        args.push("-c".to_string());
        args.push("copy".to_string());

        args.push(path_arg(output));
        args
    }

    /// Copy the video stream and replace its audio with `audio`
    pub fn build_mux_command(
        &self,
        video: &Path,
        audio: &Path,
        output: &Path,
        duration: Option<f64>,
    ) -> Vec<String> {
        let mut args = Self::common_prefix();

        args.push("-i".to_string());
        args.push(path_arg(video));
        args.push("-i".to_string());
        args.push(path_arg(audio));

        args.push("-map".to_string());
        args.push("0:v:0".to_string());
        args.push("-map".to_string());
        args.push("1:a:0".to_string());

        args.push("-c:v".to_string());
        args.push("copy".to_string());
        args.push("-c:a".to_string());
        args.push(self.profile.audio_codec.clone());

        if let Some(duration) = duration {
            args.push("-t".to_string());
            args.push(secs_arg(duration));
        }
        args.push("-shortest".to_string());

        args.push("-movflags".to_string());
        args.push("+faststart".to_string());

        args.push(path_arg(output));
        args
    }
}
