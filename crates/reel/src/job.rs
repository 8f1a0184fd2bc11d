use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;
use crate::topic::Topic;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Selecting,
    Normalizing,
    Composing,
    Synthesizing,
    Muxing,
    Complete,
    Failed,
}

impl JobStatus {
    fn rank(&self) -> u8 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Selecting => 1,
            JobStatus::Normalizing => 2,
            JobStatus::Composing => 3,
            JobStatus::Synthesizing => 4,
            JobStatus::Muxing => 5,
            JobStatus::Complete => 6,
            JobStatus::Failed => 7,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Complete | JobStatus::Failed)
    }

    /// Past `Pending` but not finished
    pub fn is_active(&self) -> bool {
        !self.is_terminal() && *self != JobStatus::Pending
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Selecting => "selecting",
            JobStatus::Normalizing => "normalizing",
            JobStatus::Composing => "composing",
            JobStatus::Synthesizing => "synthesizing",
            JobStatus::Muxing => "muxing",
            JobStatus::Complete => "complete",
            JobStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reel generation request and its progress
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub topic: Topic,
    pub status: JobStatus,
    /// Where the finished video is published
    pub output_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub reason: Option<String>,
    /// `PipelineError::kind` of the failure
    pub error_kind: Option<String>,
    /// Selection seed, recorded so a job can be reproduced
    pub seed: Option<u64>,
    pub narration_secs: Option<f64>,
    pub output_bytes: Option<u64>,
}

impl Job {
    pub fn new(topic: Topic, output_path: PathBuf) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            topic,
            status: JobStatus::Pending,
            output_path,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            reason: None,
            error_kind: None,
            seed: None,
            narration_secs: None,
            output_bytes: None,
        }
    }

    /// First eight characters of the id, used in file names
    pub fn short_id(&self) -> &str {
        self.id.get(..8).unwrap_or(&self.id)
    }

    /// Move to a later status. Terminal jobs and backwards moves are rejected.
    pub fn advance(&mut self, next: JobStatus) -> Result<()> {
        if self.status.is_terminal() {
            bail!("job {} is already {}", self.id, self.status);
        }
        if next.rank() <= self.status.rank() {
            bail!("job {} cannot go from {} to {}", self.id, self.status, next);
        }

        let now = Utc::now();
        if self.started_at.is_none() && next != JobStatus::Failed {
            self.started_at = Some(now);
        }
        if next.is_terminal() {
            self.finished_at = Some(now);
        }
        self.status = next;
        Ok(())
    }

    /// Mark failed with a message and error kind
    pub fn fail(&mut self, kind: &str, reason: impl Into<String>) -> Result<()> {
        self.advance(JobStatus::Failed)?;
        self.error_kind = Some(kind.to_string());
        self.reason = Some(reason.into());
        Ok(())
    }

    pub fn elapsed(&self) -> Option<chrono::Duration> {
        let start = self.started_at?;
        Some(self.finished_at.unwrap_or_else(Utc::now) - start)
    }
}

fn job_file(job_state_dir: &Path, id: &str) -> PathBuf {
    job_state_dir.join(format!("{}.json", id))
}

/// Persist a job as `<dir>/<id>.json`, replacing the old file atomically
pub fn save_job(job: &Job, job_state_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(job_state_dir)
        .with_context(|| format!("Failed to create job state dir: {}", job_state_dir.display()))?;

    let path = job_file(job_state_dir, &job.id);
    let tmp = path.with_extension("json.tmp");
    let json = serde_json::to_string_pretty(job).context("Failed to serialize job")?;

    std::fs::write(&tmp, json)
        .with_context(|| format!("Failed to write job file: {}", tmp.display()))?;
    std::fs::rename(&tmp, &path)
        .with_context(|| format!("Failed to move job file into place: {}", path.display()))?;
    Ok(())
}

pub fn load_job(job_state_dir: &Path, id: &str) -> Result<Job> {
    let path = job_file(job_state_dir, id);
    let content = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read job file: {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse job file: {}", path.display()))
}

/// Every readable job in the directory, oldest first
pub fn load_all_jobs(job_state_dir: &Path) -> Result<Vec<Job>> {
    if !job_state_dir.exists() {
        return Ok(Vec::new());
    }

    let mut jobs = Vec::new();
    let entries = std::fs::read_dir(job_state_dir)
        .with_context(|| format!("Failed to read job state dir: {}", job_state_dir.display()))?;

    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|s| s.to_str()) != Some("json") {
            continue;
        }
        let parsed = std::fs::read_to_string(&path)
            .map_err(anyhow::Error::from)
            .and_then(|c| serde_json::from_str::<Job>(&c).map_err(anyhow::Error::from));
        match parsed {
            Ok(job) => jobs.push(job),
            Err(e) => warn!("Skipping unreadable job file {}: {}", path.display(), e),
        }
    }

    jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
    Ok(jobs)
}

/// Jobs shared between tasks; every write is persisted before it is visible
#[derive(Debug, Clone)]
pub struct JobTable {
    dir: PathBuf,
    jobs: Arc<RwLock<HashMap<String, Job>>>,
}

impl JobTable {
    /// Open the table, loading whatever jobs are already on disk
    pub fn load(job_state_dir: &Path) -> Result<Self> {
        let jobs = load_all_jobs(job_state_dir)?
            .into_iter()
            .map(|j| (j.id.clone(), j))
            .collect();
        Ok(Self {
            dir: job_state_dir.to_path_buf(),
            jobs: Arc::new(RwLock::new(jobs)),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn insert(&self, job: Job) -> Result<()> {
        save_job(&job, &self.dir)?;
        self.jobs.write().await.insert(job.id.clone(), job);
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Option<Job> {
        self.jobs.read().await.get(id).cloned()
    }

    /// Apply `f` to a copy of the job and keep it only if `f` and the save succeed
    pub async fn update<F>(&self, id: &str, f: F) -> Result<Job>
    where
        F: FnOnce(&mut Job) -> Result<()>,
    {
        let mut jobs = self.jobs.write().await;
        let current = jobs
            .get(id)
            .with_context(|| format!("Unknown job: {}", id))?;

        let mut updated = current.clone();
        f(&mut updated)?;
        save_job(&updated, &self.dir)?;
        jobs.insert(id.to_string(), updated.clone());
        Ok(updated)
    }

    /// All jobs, oldest first
    pub async fn list(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        jobs
    }
}
