use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{bail, Context, Result};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::time::{timeout, Duration};
use crate::assets::{AssetSelector, SelectionState};
use crate::cancel::{CancelOnDrop, Cancellation};
use crate::capper::cap_narration;
use crate::compose::{build_manifest, SequenceComposer};
use crate::config::ReelConfig;
use crate::error::{self, PipelineError};
use crate::ffmpeg::{CommandBuilder, EncodingProfile, FFmpegManager};
use crate::job::{Job, JobStatus, JobTable};
use crate::mux::Muxer;
use crate::narration::{sanitize_narration, writer_from_config, NarrationWriter};
use crate::normalize::ClipNormalizer;
use crate::synth::{CommandSynthesizer, NarrationSynthesizer};
use crate::topic::{self, Topic};
use crate::workspace::{self, Workspace};

/// What a successful run produced
#[derive(Debug, Clone, PartialEq)]
pub struct ReelOutput {
    pub path: PathBuf,
    pub bytes: u64,
    pub narration_secs: f64,
}

/// Runs reel jobs from selection to published video
pub struct Pipeline {
    cfg: ReelConfig,
    selector: AssetSelector,
    normalizer: ClipNormalizer,
    composer: SequenceComposer,
    muxer: Muxer,
    writer: Arc<dyn NarrationWriter>,
    synth: Arc<dyn NarrationSynthesizer>,
    jobs: JobTable,
}

impl Pipeline {
    pub fn new(
        cfg: ReelConfig,
        ffmpeg: FFmpegManager,
        writer: Arc<dyn NarrationWriter>,
        synth: Arc<dyn NarrationSynthesizer>,
    ) -> Result<Self> {
        let builder = CommandBuilder::new(EncodingProfile::from_config(&cfg));
        let jobs = JobTable::load(&cfg.job_state_dir)
            .with_context(|| format!("Failed to load jobs from {}", cfg.job_state_dir.display()))?;

        Ok(Self {
            selector: AssetSelector::new(&cfg.content_root, cfg.other_clips_trim_secs),
            normalizer: ClipNormalizer::new(ffmpeg.clone(), builder.clone()),
            composer: SequenceComposer::new(ffmpeg.clone(), builder.clone()),
            muxer: Muxer::new(ffmpeg, builder),
            writer,
            synth,
            jobs,
            cfg,
        })
    }

    /// Pipeline using the configured binaries, writer and TTS command
    pub fn from_config(cfg: ReelConfig) -> Result<Self> {
        let ffmpeg = FFmpegManager::from_config(&cfg);
        let writer = writer_from_config(&cfg);
        let synth: Arc<dyn NarrationSynthesizer> = Arc::new(CommandSynthesizer::from_config(&cfg.narration));
        Self::new(cfg, ffmpeg, writer, synth)
    }

    pub fn config(&self) -> &ReelConfig {
        &self.cfg
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    /// Topics with content on disk
    pub fn available_topics(&self) -> Vec<Topic> {
        topic::available_topics(&self.cfg.content_root)
    }

    /// Record a pending job. Without `output` the video goes to
    /// `<output_dir>/<topic>_<short id>.mp4`.
    pub async fn submit(&self, topic: Topic, output: Option<PathBuf>) -> Result<Job> {
        let mut job = Job::new(topic, PathBuf::new());
        job.output_path = match output {
            Some(path) => path,
            None => self.cfg.output_dir.join(format!("{}_{}.mp4", topic, job.short_id())),
        };
        if job.output_path.starts_with(&self.cfg.content_root) {
            bail!(
                "Output {} is inside the content root, where stray-file cleanup would remove its staging file",
                job.output_path.display()
            );
        }

        self.jobs.insert(job.clone()).await?;
        info!("Job {}: 🎬 queued {} -> {}", job.short_id(), topic, job.output_path.display());
        Ok(job)
    }

    /// Run a submitted job to completion or failure.
    ///
    /// Stage errors are returned as `PipelineError` inside the `anyhow`
    /// error and recorded on the job. The workspace is gone on return.
    pub async fn run(&self, job_id: &str) -> Result<ReelOutput> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .with_context(|| format!("Unknown job: {}", job_id))?;
        if job.status != JobStatus::Pending {
            bail!("Job {} is {}, only pending jobs can run", job.id, job.status);
        }

        let seed = self.cfg.seed.unwrap_or_else(rand::random);
        self.jobs
            .update(&job.id, |j| {
                j.seed = Some(seed);
                Ok(())
            })
            .await?;

        let outcome = match Workspace::create(&self.cfg.workspace_root, &job.id, &self.cfg.content_root) {
            Ok(mut ws) => {
                let cancel = Cancellation::new();
                let _stop_on_drop = CancelOnDrop(cancel.clone());
                let limit = self.cfg.job_timeout_secs;
                let result = match timeout(Duration::from_secs(limit), self.execute(&job, seed, &ws, &cancel)).await {
                    Ok(result) => result,
                    Err(_) => Err(PipelineError::Timeout(limit)),
                };
                // Blocking narration work must be gone before the workspace is removed
                cancel.cancel();
                cancel.settled().await;
                let published = result.and_then(|narration_secs| {
                    ws.publish(&job.output_path).map(|bytes| ReelOutput {
                        path: job.output_path.clone(),
                        bytes,
                        narration_secs,
                    })
                });
                if let Err(e) = ws.cleanup() {
                    warn!("Job {}: {}", job.short_id(), e);
                }
                published
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(output) => {
                self.jobs
                    .update(&job.id, |j| {
                        j.narration_secs = Some(output.narration_secs);
                        j.output_bytes = Some(output.bytes);
                        j.advance(JobStatus::Complete)
                    })
                    .await?;
                info!("Job {}: ✅ complete -> {}", job.short_id(), output.path.display());
                Ok(output)
            }
            Err(e) => {
                error!("Job {}: ❌ {} ({})", job.short_id(), e, e.kind());
                let kind = e.kind();
                let reason = e.to_string();
                if let Err(save_err) = self.jobs.update(&job.id, |j| j.fail(kind, reason)).await {
                    warn!("Job {}: could not record failure: {:#}", job.short_id(), save_err);
                }
                Err(e.into())
            }
        }
    }

    async fn set_status(&self, job: &Job, status: JobStatus) -> Result<(), PipelineError> {
        debug!("Job {}: {}", job.short_id(), status);
        self.jobs
            .update(&job.id, |j| j.advance(status))
            .await
            .map(|_| ())
            .map_err(|e| PipelineError::Workspace(format!("failed to record status: {}", error::chain(&e))))
    }

    /// All stages up to the muxed file in the workspace; returns narration seconds
    async fn execute(&self, job: &Job, seed: u64, ws: &Workspace, cancel: &Cancellation) -> Result<f64, PipelineError> {
        let cfg = &self.cfg;

        self.set_status(job, JobStatus::Selecting).await?;
        let mut rng = StdRng::seed_from_u64(seed);
        let mut state = SelectionState::new();
        let selection = self.selector.select_sequence(job.topic, cfg.segment_secs, &mut state, &mut rng)?;
        info!("Job {}: 🔍 selected {} assets (seed {})", job.short_id(), selection.picks.len(), seed);

        self.set_status(job, JobStatus::Normalizing).await?;
        let segments = self
            .normalizer
            .normalize_all(&selection, cfg.segment_secs, ws, cfg.parallel_normalize)
            .await?;

        self.set_status(job, JobStatus::Composing).await?;
        let manifest = build_manifest(&segments)?;
        let composed = self
            .composer
            .compose(&manifest, &ws.manifest_path(), &ws.composed_path())
            .await?;

        self.set_status(job, JobStatus::Synthesizing).await?;
        let narration_secs = self.narrate(job.topic, ws, cancel).await?;
        info!("Job {}: 🔊 narration {:.2}s", job.short_id(), narration_secs);

        self.set_status(job, JobStatus::Muxing).await?;
        self.muxer
            .merge(&composed, &ws.narration_path(), &ws.final_path())
            .await?;

        Ok(narration_secs)
    }

    /// Write, synthesize and cap the narration on the blocking pool.
    /// The task holds a `cancel` guard until it returns.
    async fn narrate(&self, topic: Topic, ws: &Workspace, cancel: &Cancellation) -> Result<f64, PipelineError> {
        let writer = Arc::clone(&self.writer);
        let synth = Arc::clone(&self.synth);
        let tts_dir = ws.tts_dir();
        let wav = ws.narration_path();
        let cap = self.cfg.narration_secs;
        let cancel = cancel.clone();
        let guard = cancel.hold().await;

        tokio::task::spawn_blocking(move || -> Result<f64, PipelineError> {
            let _guard = guard;
            let raw = writer
                .write_narration(topic, &cancel)
                .map_err(|e| PipelineError::Synthesis(error::chain(&e)))?;
            cancel.check()?;
            let text = sanitize_narration(&raw).map_err(|e| PipelineError::Synthesis(error::chain(&e)))?;
            if text.is_empty() {
                return Err(PipelineError::Synthesis("narration text is empty".to_string()));
            }

            let chunks = synth.synthesize(&text, &tts_dir, &cancel)?;
            let audio = cap_narration(chunks, cap)?;
            cancel.check()?;
            audio.write_wav(&wav)?;
            Ok(audio.duration_secs())
        })
        .await
        .map_err(|e| PipelineError::Synthesis(format!("narration task failed: {}", e)))?
    }

    /// Fail jobs a previous process left unfinished and drop their workspaces.
    /// Returns how many jobs were recovered.
    pub async fn recover_interrupted_jobs(&self) -> Result<usize> {
        let mut recovered = 0;
        for job in self.jobs.list().await {
            if job.status.is_terminal() {
                continue;
            }

            warn!("Job {}: ⚠️  found {} from a previous run, marking failed", job.short_id(), job.status);
            let was = job.status;
            self.jobs
                .update(&job.id, |j| j.fail("Interrupted", format!("interrupted while {}", was)))
                .await?;
            if workspace::remove_leftover(&self.cfg.workspace_root, &job.id)? {
                info!("Job {}: 🗑️ removed leftover workspace", job.short_id());
            }
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Delete the published video of a finished job. Returns false when
    /// there was no file to delete.
    pub async fn remove_output(&self, job_id: &str) -> Result<bool> {
        let job = self
            .jobs
            .get(job_id)
            .await
            .with_context(|| format!("Unknown job: {}", job_id))?;
        if job.status != JobStatus::Complete {
            bail!("Job {} is {}, only complete jobs have output", job.id, job.status);
        }
        remove_file_if_exists(&job.output_path)
    }
}

fn remove_file_if_exists(path: &Path) -> Result<bool> {
    if !path.exists() {
        return Ok(false);
    }
    std::fs::remove_file(path).with_context(|| format!("Failed to remove {}", path.display()))?;
    info!("🗑️ Removed {}", path.display());
    Ok(true)
}
