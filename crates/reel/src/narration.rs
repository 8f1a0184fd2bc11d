use std::path::PathBuf;
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use tokio::process::Command;
use crate::cancel::{run_command, Cancellation};
use crate::config::ReelConfig;
use crate::topic::Topic;

/// Produces the prose read over a reel. Called from blocking code; long
/// running writers should give up once `cancel` fires.
pub trait NarrationWriter: Send + Sync {
    fn write_narration(&self, topic: Topic, cancel: &Cancellation) -> Result<String>;
}

/// Runs an external command and reads the narration from its stdout.
/// `{topic}` in any argument is replaced with the topic's display name.
#[derive(Debug, Clone)]
pub struct CommandNarrationWriter {
    pub command: Vec<String>,
}

impl NarrationWriter for CommandNarrationWriter {
    fn write_narration(&self, topic: Topic, cancel: &Cancellation) -> Result<String> {
        let (program, rest) = self
            .command
            .split_first()
            .ok_or_else(|| anyhow!("narration writer command is empty"))?;
        let args: Vec<String> = rest
            .iter()
            .map(|a| a.replace("{topic}", topic.display_name()))
            .collect();

        let mut cmd = Command::new(program);
        cmd.args(&args);
        let output = run_command(cmd, None, cancel)
            .with_context(|| format!("Failed to run narration writer: {}", program))?;

        if !output.status.success() {
            bail!(
                "narration writer exited with code {}: {}",
                output.status.code().unwrap_or(-1),
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        String::from_utf8(output.stdout).context("narration writer output is not valid UTF-8")
    }
}

/// Reads `<content_root>/<topic>/narration.txt`
#[derive(Debug, Clone)]
pub struct FileNarrationWriter {
    pub content_root: PathBuf,
}

impl NarrationWriter for FileNarrationWriter {
    fn write_narration(&self, topic: Topic, _cancel: &Cancellation) -> Result<String> {
        let path = self.content_root.join(topic.as_str()).join("narration.txt");
        std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read narration file: {}", path.display()))
    }
}

/// Writer selected by the configuration
pub fn writer_from_config(cfg: &ReelConfig) -> Arc<dyn NarrationWriter> {
    if cfg.narration.writer_command.is_empty() {
        Arc::new(FileNarrationWriter { content_root: cfg.content_root.clone() })
    } else {
        Arc::new(CommandNarrationWriter { command: cfg.narration.writer_command.clone() })
    }
}

/// Flatten writer output into continuous speech: no list markers,
/// brackets, dashes or markdown emphasis.
pub fn sanitize_narration(text: &str) -> Result<String> {
    let list_marker = Regex::new(r"^\s*(?:[-*+•]+|\d+[.)]|[a-zA-Z][.)](?:\s))\s*")?;
    let brackets = Regex::new(r"[()\[\]{}<>]")?;
    let dashes = Regex::new(r"\s*[-–—]+\s*")?;
    let emphasis = Regex::new(r"[*_#`~]")?;
    let spaces = Regex::new(r"\s+")?;

    let mut pieces = Vec::new();
    for line in text.lines() {
        let line = list_marker.replace(line, "");
        let line = brackets.replace_all(&line, "");
        let line = emphasis.replace_all(&line, "");
        let line = dashes.replace_all(&line, " ");
        let line = line.trim();
        if !line.is_empty() {
            pieces.push(line.to_string());
        }
    }

    Ok(spaces.replace_all(&pieces.join(" "), " ").trim().to_string())
}

/// Split prose into sentences, keeping terminal punctuation
pub fn split_sentences(text: &str) -> Result<Vec<String>> {
    let re = Regex::new(r"(?s)([^.!?]+[.!?]+)|([^.!?]+$)")?;
    Ok(re
        .find_iter(text)
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| s.chars().any(char::is_alphanumeric))
        .collect())
}
