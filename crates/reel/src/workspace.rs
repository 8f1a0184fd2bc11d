use std::path::{Path, PathBuf};
use log::{debug, info, warn};
use crate::compose::Slot;
use crate::error::PipelineError;
use crate::pool::{self, TEMP_MARKER};

/// Job-private scratch directory.
///
/// Everything a job writes before publishing lives here. The directory is
/// removed by `cleanup` and, failing that, when the handle is dropped.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    content_root: PathBuf,
    cleaned: bool,
}

fn workspace_err(what: &str, path: &Path, e: std::io::Error) -> PipelineError {
    PipelineError::Workspace(format!("failed to {} {}: {}", what, path.display(), e))
}

impl Workspace {
    /// Create `<workspace_root>/<job_id>`, discarding anything left there
    pub fn create(workspace_root: &Path, job_id: &str, content_root: &Path) -> Result<Self, PipelineError> {
        let root = workspace_root.join(job_id);
        if root.exists() {
            warn!("Job {}: removing leftover workspace {}", job_id, root.display());
            std::fs::remove_dir_all(&root).map_err(|e| workspace_err("clear", &root, e))?;
        }
        std::fs::create_dir_all(&root).map_err(|e| workspace_err("create", &root, e))?;
        debug!("Job {}: workspace at {}", job_id, root.display());

        Ok(Self {
            root,
            content_root: content_root.to_path_buf(),
            cleaned: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn segment_path(&self, slot: Slot) -> PathBuf {
        self.root.join(format!("segment_{}_{}.mp4", slot.position(), slot.as_str()))
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join("concat.txt")
    }

    pub fn composed_path(&self) -> PathBuf {
        self.root.join("composed.mp4")
    }

    pub fn narration_path(&self) -> PathBuf {
        self.root.join("narration.wav")
    }

    /// Scratch space for the synthesizer
    pub fn tts_dir(&self) -> PathBuf {
        self.root.join("tts")
    }

    pub fn final_path(&self) -> PathBuf {
        self.root.join("final.mp4")
    }

    /// Move the finished video to `dest`, returning its size in bytes.
    ///
    /// Tries a rename first; across filesystems the file is copied beside
    /// `dest` and renamed into place so `dest` never holds a partial file.
    pub fn publish(&self, dest: &Path) -> Result<u64, PipelineError> {
        let src = self.final_path();
        if !src.is_file() {
            return Err(PipelineError::Workspace(format!("nothing to publish at {}", src.display())));
        }
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| workspace_err("create", parent, e))?;
        }

        if let Err(e) = std::fs::rename(&src, dest) {
            debug!("rename to {} failed ({}), copying instead", dest.display(), e);
            let name = dest
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "output".to_string());
            let staging = dest.with_file_name(format!(".{}{}", name, TEMP_MARKER));

            std::fs::copy(&src, &staging).map_err(|e| workspace_err("copy to", &staging, e))?;
            std::fs::rename(&staging, dest).map_err(|e| {
                let _ = std::fs::remove_file(&staging);
                workspace_err("move into place", dest, e)
            })?;
            let _ = std::fs::remove_file(&src);
        }

        let bytes = std::fs::metadata(dest).map_err(|e| workspace_err("stat", dest, e))?.len();
        info!("📦 Published {} ({} bytes)", dest.display(), bytes);
        Ok(bytes)
    }

    /// Remove the workspace and any stray temp files in the asset pools.
    /// Safe to call more than once.
    pub fn cleanup(&mut self) -> Result<(), PipelineError> {
        if self.root.exists() {
            std::fs::remove_dir_all(&self.root).map_err(|e| workspace_err("remove", &self.root, e))?;
            info!("🗑️ Removed workspace {}", self.root.display());
        }
        pool::sweep_stray_files(&self.content_root);
        self.cleaned = true;
        Ok(())
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if !self.cleaned {
            if let Err(e) = self.cleanup() {
                warn!("Workspace cleanup on drop failed: {}", e);
            }
        }
    }
}

/// Remove a workspace left behind by a previous process
pub fn remove_leftover(workspace_root: &Path, job_id: &str) -> Result<bool, PipelineError> {
    let root = workspace_root.join(job_id);
    if !root.exists() {
        return Ok(false);
    }
    std::fs::remove_dir_all(&root).map_err(|e| workspace_err("remove", &root, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_create_clears_leftovers() {
        let base = tempfile::tempdir().unwrap();
        let stale = base.path().join("job1").join("old.mp4");
        fs::create_dir_all(stale.parent().unwrap()).unwrap();
        fs::write(&stale, b"x").unwrap();

        let ws = Workspace::create(base.path(), "job1", base.path()).unwrap();
        assert!(ws.path().is_dir());
        assert!(!stale.exists());
    }

    #[test]
    fn test_segment_paths_are_distinct_and_ordered() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path(), "j", base.path()).unwrap();
        let mut paths: Vec<PathBuf> = Slot::ALL.iter().map(|s| ws.segment_path(*s)).collect();
        let in_order = paths.clone();
        paths.sort();
        paths.dedup();
        assert_eq!(paths, in_order);
    }

    #[test]
    fn test_publish_then_cleanup_keeps_output() {
        let base = tempfile::tempdir().unwrap();
        let content = tempfile::tempdir().unwrap();
        let mut ws = Workspace::create(base.path(), "job2", content.path()).unwrap();
        fs::write(ws.final_path(), b"video").unwrap();
        fs::write(ws.composed_path(), b"tmp").unwrap();

        let dest = base.path().join("uploads").join("graphs_job2.mp4");
        assert_eq!(ws.publish(&dest).unwrap(), 5);
        ws.cleanup().unwrap();
        ws.cleanup().unwrap();

        assert_eq!(fs::read(&dest).unwrap(), b"video");
        assert!(!base.path().join("job2").exists());
    }

    #[test]
    fn test_publish_without_output_fails() {
        let base = tempfile::tempdir().unwrap();
        let ws = Workspace::create(base.path(), "job3", base.path()).unwrap();
        let err = ws.publish(&base.path().join("out.mp4")).unwrap_err();
        assert_eq!(err.kind(), "WorkspaceError");
    }

    #[test]
    fn test_drop_removes_workspace_and_strays() {
        let base = tempfile::tempdir().unwrap();
        let content = tempfile::tempdir().unwrap();
        let clips = content.path().join("graphs").join("clips");
        fs::create_dir_all(&clips).unwrap();
        fs::write(clips.join("trimmed_a.mp4"), b"x").unwrap();
        fs::write(clips.join("a.mp4"), b"x").unwrap();

        let root = {
            let ws = Workspace::create(base.path(), "job4", content.path()).unwrap();
            fs::write(ws.segment_path(Slot::Intro), b"x").unwrap();
            ws.path().to_path_buf()
        };

        assert!(!root.exists());
        assert!(!clips.join("trimmed_a.mp4").exists());
        assert!(clips.join("a.mp4").exists());
    }

    #[test]
    fn test_remove_leftover() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("old")).unwrap();
        assert!(remove_leftover(base.path(), "old").unwrap());
        assert!(!remove_leftover(base.path(), "old").unwrap());
    }
}
