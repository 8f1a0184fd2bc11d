use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use tokio::task::JoinSet;
use crate::assets::{Asset, AssetKind, Selection};
use crate::compose::Slot;
use crate::error::PipelineError;
use crate::ffmpeg::{CommandBuilder, FFmpegManager};
use crate::workspace::Workspace;

/// One asset re-encoded to the shared profile, ready for stream-copy concat
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub slot: Slot,
    pub path: PathBuf,
    /// Duration requested from the encoder
    pub duration: f64,
    pub source: PathBuf,
}

/// Turns assets into uniform segments
#[derive(Debug, Clone)]
pub struct ClipNormalizer {
    ffmpeg: FFmpegManager,
    builder: CommandBuilder,
}

/// Seconds of a video source to keep
pub fn effective_duration(target: f64, trim: Option<f64>, probed: Option<f64>) -> f64 {
    let mut duration = target;
    if let Some(trim) = trim.filter(|t| *t > 0.0) {
        duration = duration.min(trim);
    }
    if let Some(probed) = probed.filter(|p| *p > 0.0) {
        duration = duration.min(probed);
    }
    duration
}

impl ClipNormalizer {
    pub fn new(ffmpeg: FFmpegManager, builder: CommandBuilder) -> Self {
        Self { ffmpeg, builder }
    }

    /// Encode `asset` into `output` as a `target`-second segment
    pub async fn normalize(
        &self,
        slot: Slot,
        asset: &Asset,
        target: f64,
        output: &Path,
    ) -> Result<Segment, PipelineError> {
        std::fs::File::open(&asset.path)
            .map_err(|e| PipelineError::normalization(&asset.path, format!("unreadable source: {}", e)))?;

        let (args, duration) = match asset.kind {
            AssetKind::Image => (self.builder.build_still_command(&asset.path, output, target), target),
            AssetKind::Video => {
                let probed = match self.ffmpeg.probe_duration(&asset.path).await {
                    Ok(d) => Some(d),
                    Err(e) => {
                        warn!("Could not probe {} ({}), requesting {}s", asset.path.display(), e, target);
                        None
                    }
                };
                let duration = effective_duration(target, asset.trim, probed);
                (self.builder.build_clip_command(&asset.path, output, duration), duration)
            }
        };

        debug!("Normalizing {:?} from {} ({:.3}s)", slot, asset.path.display(), duration);
        self.ffmpeg
            .execute_ffmpeg(args, self.ffmpeg.step_timeout_secs)
            .await
            .map_err(|e| PipelineError::normalization(&asset.path, crate::error::chain(&e)))?;

        if !output.is_file() {
            return Err(PipelineError::normalization(&asset.path, "encoder produced no output"));
        }

        Ok(Segment {
            slot,
            path: output.to_path_buf(),
            duration,
            source: asset.path.clone(),
        })
    }

    /// Normalize every pick of a selection into the workspace.
    ///
    /// Segments come back in selection order whether or not they were
    /// encoded concurrently.
    pub async fn normalize_all(
        &self,
        selection: &Selection,
        target: f64,
        workspace: &Workspace,
        parallel: bool,
    ) -> Result<Vec<Segment>, PipelineError> {
        let mut segments = Vec::with_capacity(selection.picks.len());

        if !parallel {
            for (slot, asset) in &selection.picks {
                let output = workspace.segment_path(*slot);
                segments.push(self.normalize(*slot, asset, target, &output).await?);
            }
        } else {
            // Dropping the set aborts every encode still in flight
            let mut set = JoinSet::new();
            for (index, (slot, asset)) in selection.picks.iter().cloned().enumerate() {
                let normalizer = self.clone();
                let output = workspace.segment_path(slot);
                set.spawn(async move {
                    (index, normalizer.normalize(slot, &asset, target, &output).await)
                });
            }

            let mut done: Vec<Option<Segment>> = vec![None; selection.picks.len()];
            while let Some(joined) = set.join_next().await {
                let failure = match joined {
                    Ok((index, Ok(segment))) => {
                        done[index] = Some(segment);
                        continue;
                    }
                    Ok((_, Err(e))) => e,
                    Err(e) => PipelineError::Normalization {
                        source_path: workspace.path().to_path_buf(),
                        reason: format!("normalize task failed: {}", e),
                    },
                };
                warn!("Stopping {} remaining encode(s) after failure", set.len());
                set.shutdown().await;
                return Err(failure);
            }
            segments.extend(done.into_iter().flatten());
        }

        info!("✅ Normalized {} segments", segments.len());
        Ok(segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::PoolSource;
    use crate::config::ReelConfig;
    use crate::ffmpeg::EncodingProfile;

    #[test]
    fn test_effective_duration_takes_minimum() {
        assert_eq!(effective_duration(5.0, None, None), 5.0);
        assert_eq!(effective_duration(5.0, Some(7.0), Some(12.0)), 5.0);
        assert_eq!(effective_duration(5.0, Some(5.0), Some(3.2)), 3.2);
        assert_eq!(effective_duration(5.0, Some(2.0), None), 2.0);
    }

    #[test]
    fn test_effective_duration_ignores_non_positive_hints() {
        assert_eq!(effective_duration(5.0, Some(0.0), Some(0.0)), 5.0);
    }

    #[tokio::test]
    async fn test_unreadable_source_is_normalization_error() {
        let cfg = ReelConfig::default();
        let normalizer = ClipNormalizer::new(
            FFmpegManager::from_config(&cfg),
            CommandBuilder::new(EncodingProfile::from_config(&cfg)),
        );
        let asset = Asset {
            path: PathBuf::from("/nonexistent/photo.png"),
            kind: AssetKind::Image,
            source: PoolSource::OtherClips,
            trim: None,
        };

        let err = normalizer
            .normalize(Slot::Photo1, &asset, 5.0, Path::new("/tmp/never.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "NormalizationError");
        assert!(err.to_string().contains("/nonexistent/photo.png"));
    }
}
