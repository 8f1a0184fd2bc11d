use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use crate::error::{self, PipelineError};
use crate::ffmpeg::{CommandBuilder, FFmpegManager};
use crate::normalize::Segment;

/// Position in the reel. Declaration order is playback order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    Intro,
    RandomClip,
    Photo1,
    TopicClip1,
    Photo2,
    TopicClip2,
}

impl Slot {
    /// Every slot, in playback order
    pub const ALL: [Slot; 6] = [
        Slot::Intro,
        Slot::RandomClip,
        Slot::Photo1,
        Slot::TopicClip1,
        Slot::Photo2,
        Slot::TopicClip2,
    ];

    pub fn position(&self) -> usize {
        Slot::ALL.iter().position(|s| s == self).unwrap_or(0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Slot::Intro => "intro",
            Slot::RandomClip => "random_clip",
            Slot::Photo1 => "photo_1",
            Slot::TopicClip1 => "topic_clip_1",
            Slot::Photo2 => "photo_2",
            Slot::TopicClip2 => "topic_clip_2",
        }
    }
}

/// Order segments for playback. Exactly one segment per slot is required.
pub fn build_manifest(segments: &[Segment]) -> Result<Vec<PathBuf>, PipelineError> {
    if segments.len() != Slot::ALL.len() {
        return Err(PipelineError::Compose(format!(
            "expected {} segments, got {}",
            Slot::ALL.len(),
            segments.len()
        )));
    }

    let mut manifest = Vec::with_capacity(Slot::ALL.len());
    for slot in Slot::ALL {
        let mut matching = segments.iter().filter(|s| s.slot == slot);
        match (matching.next(), matching.next()) {
            (Some(segment), None) => manifest.push(segment.path.clone()),
            (None, _) => {
                return Err(PipelineError::Compose(format!("no segment for slot {}", slot.as_str())))
            }
            (Some(_), Some(_)) => {
                return Err(PipelineError::Compose(format!("more than one segment for slot {}", slot.as_str())))
            }
        }
    }
    Ok(manifest)
}

/// Render a manifest in concat demuxer syntax
pub fn concat_list(manifest: &[PathBuf]) -> String {
    let mut out = String::new();
    for path in manifest {
        // Single quotes inside a quoted path are written as '\''
        let escaped = path.to_string_lossy().replace('\'', "'\\''");
        let _ = writeln!(out, "file '{}'", escaped);
    }
    out
}

/// Joins segments into one video without re-encoding
#[derive(Debug, Clone)]
pub struct SequenceComposer {
    ffmpeg: FFmpegManager,
    builder: CommandBuilder,
}

impl SequenceComposer {
    pub fn new(ffmpeg: FFmpegManager, builder: CommandBuilder) -> Self {
        Self { ffmpeg, builder }
    }

    /// Concatenate `manifest` into `output`, writing the list file to `list_file`
    pub async fn compose(
        &self,
        manifest: &[PathBuf],
        list_file: &Path,
        output: &Path,
    ) -> Result<PathBuf, PipelineError> {
        if manifest.is_empty() {
            return Err(PipelineError::Compose("manifest is empty".to_string()));
        }
        if let Some(missing) = manifest.iter().find(|p| !p.is_file()) {
            return Err(PipelineError::Compose(format!("segment missing: {}", missing.display())));
        }

        std::fs::write(list_file, concat_list(manifest)).map_err(|e| {
            PipelineError::Compose(format!("failed to write {}: {}", list_file.display(), e))
        })?;
        debug!("Wrote concat list {} ({} entries)", list_file.display(), manifest.len());

        let args = self.builder.build_concat_command(list_file, output);
        self.ffmpeg
            .execute_ffmpeg(args, self.ffmpeg.step_timeout_secs)
            .await
            .map_err(|e| PipelineError::Compose(error::chain(&e)))?;

        if !output.is_file() {
            return Err(PipelineError::Compose(format!("concat produced no file at {}", output.display())));
        }

        info!("✅ Composed {} segments into {}", manifest.len(), output.display());
        Ok(output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReelConfig;
    use crate::ffmpeg::EncodingProfile;
    use proptest::prelude::*;

    fn segment(slot: Slot) -> Segment {
        Segment {
            slot,
            path: PathBuf::from(format!("/w/{}.mp4", slot.as_str())),
            duration: 5.0,
            source: PathBuf::from("/c/x"),
        }
    }

    #[test]
    fn test_positions_follow_playback_order() {
        let positions: Vec<usize> = Slot::ALL.iter().map(Slot::position).collect();
        assert_eq!(positions, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_manifest_rejects_wrong_count() {
        let segments: Vec<Segment> = Slot::ALL[..5].iter().copied().map(segment).collect();
        assert_eq!(build_manifest(&segments).unwrap_err().kind(), "ComposeError");
    }

    #[test]
    fn test_manifest_rejects_duplicate_slot() {
        let mut segments: Vec<Segment> = Slot::ALL.iter().copied().map(segment).collect();
        segments[5] = segment(Slot::Photo1);
        let err = build_manifest(&segments).unwrap_err();
        assert!(err.to_string().contains("photo_1"), "{}", err);
    }

    #[test]
    fn test_concat_list_quotes_paths() {
        let list = concat_list(&[PathBuf::from("/w/a.mp4"), PathBuf::from("/w/it's.mp4")]);
        assert_eq!(list, "file '/w/a.mp4'\nfile '/w/it'\\''s.mp4'\n");
    }

    #[tokio::test]
    async fn test_compose_missing_segment() {
        let cfg = ReelConfig::default();
        let composer = SequenceComposer::new(
            FFmpegManager::from_config(&cfg),
            CommandBuilder::new(EncodingProfile::from_config(&cfg)),
        );
        let dir = tempfile::tempdir().unwrap();
        let manifest = vec![dir.path().join("missing.mp4")];

        let err = composer
            .compose(&manifest, &dir.path().join("list.txt"), &dir.path().join("out.mp4"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "ComposeError");
        assert!(!dir.path().join("list.txt").exists());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Any arrival order of the six segments yields the fixed playback order
        #[test]
        fn test_manifest_order_is_fixed(order in Just(Slot::ALL.to_vec()).prop_shuffle()) {
            let segments: Vec<Segment> = order.into_iter().map(segment).collect();
            let manifest = build_manifest(&segments).unwrap();
            let expected: Vec<PathBuf> = Slot::ALL.iter().map(|s| segment(*s).path).collect();
            prop_assert_eq!(manifest, expected);
        }
    }
}
