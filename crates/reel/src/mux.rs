use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use crate::error::{self, PipelineError};
use crate::ffmpeg::{CommandBuilder, FFmpegManager};

/// Replaces a video's audio with the narration
#[derive(Debug, Clone)]
pub struct Muxer {
    ffmpeg: FFmpegManager,
    builder: CommandBuilder,
}

/// Shortest of the durations that could be probed
pub fn output_bound(video: Option<f64>, audio: Option<f64>) -> Option<f64> {
    match (video, audio) {
        (Some(v), Some(a)) => Some(v.min(a)),
        (v, a) => v.or(a),
    }
}

impl Muxer {
    pub fn new(ffmpeg: FFmpegManager, builder: CommandBuilder) -> Self {
        Self { ffmpeg, builder }
    }

    async fn probe(&self, path: &Path) -> Option<f64> {
        match self.ffmpeg.probe_duration(path).await {
            Ok(d) => Some(d),
            Err(e) => {
                warn!("Could not probe {}: {}", path.display(), e);
                None
            }
        }
    }

    /// Write `video` with `audio` as its only audio track to `output`
    pub async fn merge(&self, video: &Path, audio: &Path, output: &Path) -> Result<PathBuf, PipelineError> {
        for input in [video, audio] {
            if !input.is_file() {
                return Err(PipelineError::Mux(format!("input missing: {}", input.display())));
            }
        }

        let video_secs = self.probe(video).await;
        let audio_secs = self.probe(audio).await;
        let bound = output_bound(video_secs, audio_secs);
        debug!("Mux durations: video={:?} audio={:?} -> {:?}", video_secs, audio_secs, bound);

        let args = self.builder.build_mux_command(video, audio, output, bound);
        self.ffmpeg
            .execute_ffmpeg(args, self.ffmpeg.step_timeout_secs)
            .await
            .map_err(|e| PipelineError::Mux(error::chain(&e)))?;

        if !output.is_file() {
            return Err(PipelineError::Mux(format!("merge produced no file at {}", output.display())));
        }

        info!("✅ Merged narration into {}", output.display());
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReelConfig;
    use crate::ffmpeg::EncodingProfile;

    #[test]
    fn test_output_bound() {
        assert_eq!(output_bound(Some(30.2), Some(29.4)), Some(29.4));
        assert_eq!(output_bound(Some(30.0), None), Some(30.0));
        assert_eq!(output_bound(None, Some(12.5)), Some(12.5));
        assert_eq!(output_bound(None, None), None);
    }

    #[tokio::test]
    async fn test_missing_input_is_mux_error() {
        let cfg = ReelConfig::default();
        let muxer = Muxer::new(
            FFmpegManager::from_config(&cfg),
            CommandBuilder::new(EncodingProfile::from_config(&cfg)),
        );
        let dir = tempfile::tempdir().unwrap();
        let video = dir.path().join("v.mp4");
        std::fs::write(&video, b"x").unwrap();

        let err = muxer
            .merge(&video, &dir.path().join("a.wav"), &dir.path().join("o.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "MuxError");
        assert!(err.to_string().contains("a.wav"));
    }
}
