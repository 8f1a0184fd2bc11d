use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use reel::{
    config::ReelConfig,
    ffmpeg::FFmpegManager,
    job::{load_all_jobs, load_job, Job, JobStatus},
    narration::writer_from_config,
    pool,
    synth::CommandSynthesizer,
    Pipeline, PipelineError, Topic,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::{debug, error, info, warn};
use tokio::sync::Semaphore;

/// Topic reel composer
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (JSON or TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Build one reel in the foreground and print its path
    Generate {
        /// Topic to build (arrays, graphs, linked_list, queue, stack, trees)
        topic: String,
        /// Where to write the video
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Selection seed, for reproducing a previous reel
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Watch the request directory and run jobs as they arrive
    Serve,
    /// List topics that have content
    Topics,
    /// Show stored jobs, or one job in full
    Status {
        job_id: Option<String>,
    },
    /// Verify ffmpeg and ffprobe are usable
    Check,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins; otherwise info, or debug with --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let cfg = ReelConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command {
        Commands::Generate { topic, output, seed } => generate(cfg, &topic, output, seed).await,
        Commands::Serve => serve(cfg).await,
        Commands::Topics => {
            list_topics(&cfg);
            Ok(())
        }
        Commands::Status { job_id } => status(&cfg, job_id.as_deref()),
        Commands::Check => check(&cfg).await,
    }
}

/// Pipeline with validated transcoder binaries
async fn build_pipeline(cfg: ReelConfig) -> Result<Pipeline> {
    let ffmpeg = FFmpegManager::new(&cfg)
        .await
        .context("FFmpeg validation failed")?;
    let writer = writer_from_config(&cfg);
    let synth = Arc::new(CommandSynthesizer::from_config(&cfg.narration));
    Pipeline::new(cfg, ffmpeg, writer, synth)
}

async fn generate(mut cfg: ReelConfig, topic: &str, output: Option<PathBuf>, seed: Option<u64>) -> Result<()> {
    let topic: Topic = topic.parse()?;
    if seed.is_some() {
        cfg.seed = seed;
    }
    if !cfg.content_root.join(topic.as_str()).is_dir() {
        warn!("No content directory for {}, only the shared pools can be used", topic);
    }

    let pipeline = build_pipeline(cfg).await?;
    let job = pipeline.submit(topic, output).await?;
    let result = pipeline.run(&job.id).await?;

    info!("Job {}: narration {:.2}s, {} bytes", job.short_id(), result.narration_secs, result.bytes);
    println!("{}", result.path.display());
    Ok(())
}

/// Request file dropped into `request_dir()` by other tools
#[derive(serde::Serialize, serde::Deserialize, Debug)]
struct RequestFile {
    action: String,
    topic: Option<String>,
    job_id: Option<String>,
    output: Option<PathBuf>,
    timestamp: Option<String>,
}

async fn serve(cfg: ReelConfig) -> Result<()> {
    info!("Reel service starting");
    info!("Configuration loaded:");
    info!("  Content root: {}", cfg.content_root.display());
    info!("  Workspace root: {}", cfg.workspace_root.display());
    info!("  Output dir: {}", cfg.output_dir.display());
    info!("  Job state dir: {}", cfg.job_state_dir.display());
    info!("  Max concurrent jobs: {}", cfg.max_concurrent_jobs);
    info!("  Job timeout: {}s", cfg.job_timeout_secs);

    if !cfg.content_root.exists() {
        warn!("Content root does not exist: {}", cfg.content_root.display());
    }

    let request_dir = cfg.request_dir();
    fs::create_dir_all(&request_dir)
        .with_context(|| format!("Failed to create request directory: {}", request_dir.display()))?;

    let poll = tokio::time::Duration::from_secs(cfg.poll_interval_secs.max(1));
    let max_jobs = cfg.max_concurrent_jobs;
    let pipeline = Arc::new(build_pipeline(cfg).await?);

    // Recovery on startup: nothing from a previous process is still running
    info!("🔄 Starting recovery checks...");
    let recovered = pipeline.recover_interrupted_jobs().await
        .context("Failed to recover interrupted jobs")?;
    let cleaned = cleanup_orphans(pipeline.config()).await
        .context("Failed to clean up orphaned files")?;
    info!("✅ Startup recovery complete: {} job(s) recovered, {} orphan(s) cleaned", recovered, cleaned);

    let slots = Arc::new(Semaphore::new(max_jobs));

    loop {
        let started = process_request_files(&pipeline, &slots, &request_dir).await
            .context("Failed to process request files")?;
        if started > 0 {
            debug!("{} job(s) started, {} slot(s) free", started, slots.available_permits());
        }

        tokio::select! {
            _ = tokio::time::sleep(poll) => {}
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down; unfinished jobs will be marked failed on next start");
                return Ok(());
            }
        }
    }
}

/// Read, act on and delete every request file. Returns jobs started.
async fn process_request_files(pipeline: &Arc<Pipeline>, slots: &Arc<Semaphore>, request_dir: &Path) -> Result<usize> {
    let mut paths: Vec<PathBuf> = match fs::read_dir(request_dir) {
        Ok(entries) => entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|s| s.to_str()) == Some("json"))
            .collect(),
        Err(e) => {
            debug!("Failed to read request directory {}: {}", request_dir.display(), e);
            return Ok(0);
        }
    };
    paths.sort();

    let mut started = 0;
    for path in paths {
        let content = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!("Failed to read request file {}: {}", path.display(), e);
                continue;
            }
        };

        match serde_json::from_str::<RequestFile>(&content) {
            Ok(req) => match handle_request(pipeline, slots, req).await {
                Ok(true) => started += 1,
                Ok(false) => {}
                Err(e) => warn!("Request {} rejected: {:#}", path.display(), e),
            },
            Err(e) => warn!("Failed to parse request file {}: {}", path.display(), e),
        }

        fs::remove_file(&path)
            .with_context(|| format!("Failed to delete processed request file: {}", path.display()))?;
    }

    Ok(started)
}

/// Returns true when a job was started
async fn handle_request(pipeline: &Arc<Pipeline>, slots: &Arc<Semaphore>, req: RequestFile) -> Result<bool> {
    match req.action.as_str() {
        "generate" => {
            let topic: Topic = req
                .topic
                .as_deref()
                .context("generate request without a topic")?
                .parse()?;
            let job = pipeline.submit(topic, req.output).await?;

            let pipeline = Arc::clone(pipeline);
            let slots = Arc::clone(slots);
            tokio::spawn(async move {
                let _permit = match slots.acquire_owned().await {
                    Ok(p) => p,
                    Err(e) => {
                        error!("Job {}: could not acquire a slot: {}", job.short_id(), e);
                        return;
                    }
                };
                info!("Job {}: 🎬 starting {}", job.short_id(), job.topic);
                if let Err(e) = pipeline.run(&job.id).await {
                    match e.downcast_ref::<PipelineError>() {
                        Some(pe) => debug!("Job {}: finished with {}", job.short_id(), pe.kind()),
                        None => error!("Job {}: {:#}", job.short_id(), e),
                    }
                }
            });
            Ok(true)
        }
        "remove" => {
            let job_id = req.job_id.context("remove request without a job_id")?;
            if pipeline.remove_output(&job_id).await? {
                info!("Job {}: output removed", job_id);
            } else {
                info!("Job {}: no output to remove", job_id);
            }
            Ok(false)
        }
        other => bail!("unknown action: {}", other),
    }
}

/// Remove stale workspaces and stray temp files in the content pools.
/// Only safe while no job is running.
async fn cleanup_orphans(cfg: &ReelConfig) -> Result<usize> {
    info!("🔍 Checking for orphaned temp files...");
    let workspace_root = cfg.workspace_root.clone();
    let content_root = cfg.content_root.clone();

    tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut cleaned = 0;
        if workspace_root.exists() {
            for entry in fs::read_dir(&workspace_root)
                .with_context(|| format!("Failed to read {}", workspace_root.display()))?
            {
                let path = entry?.path();
                if path.is_dir() {
                    fs::remove_dir_all(&path)
                        .with_context(|| format!("Failed to remove {}", path.display()))?;
                    info!("🗑️  Deleted orphaned workspace: {}", path.display());
                    cleaned += 1;
                }
            }
        }
        cleaned += pool::sweep_stray_files(&content_root);
        Ok(cleaned)
    })
    .await
    .context("Orphan cleanup task failed")?
}

fn list_topics(cfg: &ReelConfig) {
    let topics = reel::topic::available_topics(&cfg.content_root);
    if topics.is_empty() {
        warn!("No topic directories under {}", cfg.content_root.display());
    }
    for topic in topics {
        println!("{}", topic);
    }
}

/// Helper function to format a duration for display
fn format_duration(d: chrono::Duration) -> String {
    let minutes = d.num_minutes();
    let seconds = d.num_seconds() % 60;
    format!("{}m {:02}s", minutes, seconds)
}

fn status_line(job: &Job) -> String {
    let elapsed = job.elapsed().map(format_duration).unwrap_or_else(|| "-".to_string());
    let detail = match job.status {
        JobStatus::Failed => job.reason.clone().unwrap_or_default(),
        _ => job.output_path.display().to_string(),
    };
    format!("{}  {:<12} {:<12} {:>8}  {}", job.short_id(), job.status.as_str(), job.topic.as_str(), elapsed, detail)
}

fn status(cfg: &ReelConfig, job_id: Option<&str>) -> Result<()> {
    if let Some(id) = job_id {
        let jobs = load_all_jobs(&cfg.job_state_dir)?;
        let job = match jobs.iter().find(|j| j.id.starts_with(id)) {
            Some(j) => j.clone(),
            None => load_job(&cfg.job_state_dir, id)?,
        };
        println!("{}", serde_json::to_string_pretty(&job)?);
        return Ok(());
    }

    let jobs = load_all_jobs(&cfg.job_state_dir)?;
    if jobs.is_empty() {
        println!("No jobs in {}", cfg.job_state_dir.display());
        return Ok(());
    }
    for job in &jobs {
        println!("{}", status_line(job));
    }
    Ok(())
}

async fn check(cfg: &ReelConfig) -> Result<()> {
    let manager = FFmpegManager::new(cfg).await?;
    let version = FFmpegManager::detect_version(&manager.ffmpeg_bin).await?;
    println!("✅ ffmpeg {} at {} (libx264 available)", version, manager.ffmpeg_bin.display());

    let output = tokio::process::Command::new(&manager.ffprobe_bin)
        .arg("-version")
        .output()
        .await
        .with_context(|| format!("Failed to execute FFprobe at: {}", manager.ffprobe_bin.display()))?;
    if !output.status.success() {
        bail!("ffprobe at {} is not usable", manager.ffprobe_bin.display());
    }
    println!("✅ ffprobe at {}", manager.ffprobe_bin.display());

    if cfg.content_root.is_dir() {
        println!("✅ content root {}", cfg.content_root.display());
    } else {
        println!("⚠️  content root {} does not exist", cfg.content_root.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(95)), "1m 35s");
        assert_eq!(format_duration(chrono::Duration::seconds(7)), "0m 07s");
    }

    #[test]
    fn test_request_file_parses_minimal_generate() {
        let req: RequestFile = serde_json::from_str(r#"{"action": "generate", "topic": "graphs"}"#).unwrap();
        assert_eq!(req.action, "generate");
        assert_eq!(req.topic.as_deref(), Some("graphs"));
        assert!(req.output.is_none());
    }

    #[test]
    fn test_status_line_shows_reason_for_failed_jobs() {
        let mut job = Job::new(Topic::Graphs, PathBuf::from("/out/g.mp4"));
        job.fail("AssetNotFound", "no asset available").unwrap();
        let line = status_line(&job);
        assert!(line.contains("failed"));
        assert!(line.contains("no asset available"));
    }

    #[test]
    fn test_args_parse_generate() {
        let args = Args::try_parse_from(["reel", "-v", "generate", "trees", "-o", "/tmp/t.mp4"]).unwrap();
        assert!(args.verbose);
        match args.command {
            Commands::Generate { topic, output, seed } => {
                assert_eq!(topic, "trees");
                assert_eq!(output, Some(PathBuf::from("/tmp/t.mp4")));
                assert_eq!(seed, None);
            }
            other => panic!("unexpected command: {:?}", other),
        }
    }
}
