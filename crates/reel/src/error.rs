use std::path::PathBuf;
use thiserror::Error;

/// Failure of one pipeline stage. Every variant aborts the job.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// No pool in the fallback chain had a usable candidate
    #[error("no asset available for {request} (tried: {})", tried.join(" -> "))]
    AssetNotFound { request: String, tried: Vec<String> },

    #[error("failed to normalize {}: {reason}", source_path.display())]
    Normalization { source_path: PathBuf, reason: String },

    #[error("failed to compose sequence: {0}")]
    Compose(String),

    #[error("narration synthesis failed: {0}")]
    Synthesis(String),

    #[error("failed to merge narration into video: {0}")]
    Mux(String),

    #[error("job exceeded its {0}s time limit")]
    Timeout(u64),

    #[error("workspace error: {0}")]
    Workspace(String),
}

impl PipelineError {
    /// Stable name recorded on failed jobs
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::AssetNotFound { .. } => "AssetNotFound",
            PipelineError::Normalization { .. } => "NormalizationError",
            PipelineError::Compose(_) => "ComposeError",
            PipelineError::Synthesis(_) => "SynthesisError",
            PipelineError::Mux(_) => "MuxError",
            PipelineError::Timeout(_) => "TimeoutError",
            PipelineError::Workspace(_) => "WorkspaceError",
        }
    }

    pub(crate) fn normalization(source_path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        PipelineError::Normalization {
            source_path: source_path.into(),
            reason: err.to_string(),
        }
    }
}

/// Flatten an anyhow chain into one line for the taxonomy variants
pub(crate) fn chain(err: &anyhow::Error) -> String {
    format!("{:#}", err)
}
