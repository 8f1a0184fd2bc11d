use std::future::Future;
use std::process::Output;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use anyhow::{anyhow, bail, Context, Result};
use log::debug;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::Duration;
use crate::error::PipelineError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Stop signal shared between a job and the blocking work it started.
///
/// Blocking work holds a [`Cancellation::hold`] guard for as long as it may
/// touch the workspace; [`Cancellation::settled`] waits for every guard to go.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
    busy: Arc<Mutex<()>>,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Synthesis error once cancelled, so a stage can bail between steps
    pub fn check(&self) -> Result<(), PipelineError> {
        if self.is_cancelled() {
            return Err(PipelineError::Synthesis("narration cancelled".to_string()));
        }
        Ok(())
    }

    pub async fn hold(&self) -> OwnedMutexGuard<()> {
        Arc::clone(&self.busy).lock_owned().await
    }

    /// Wait until no guard from [`Cancellation::hold`] is alive
    pub async fn settled(&self) {
        drop(self.busy.lock().await);
    }

    async fn cancelled(&self) {
        while !self.is_cancelled() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Sets the flag when dropped, so a dropped job future stops its blocking work
pub struct CancelOnDrop(pub Cancellation);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Run `cmd` to completion from blocking code, killing it on cancellation.
///
/// Uses the surrounding runtime when called from `spawn_blocking`, otherwise
/// a private current-thread runtime. Must not be called from async code.
pub fn run_command(mut cmd: Command, stdin: Option<&[u8]>, cancel: &Cancellation) -> Result<Output> {
    cmd.kill_on_drop(true);
    cmd.stdin(if stdin.is_some() { std::process::Stdio::piped() } else { std::process::Stdio::null() });
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let input = stdin.map(|b| b.to_vec());
    let program = format!("{:?}", cmd.as_std().get_program());
    block_on(async move {
        if cancel.is_cancelled() {
            bail!("cancelled before starting {}", program);
        }
        let mut child = cmd.spawn().with_context(|| format!("Failed to spawn {}", program))?;

        if let Some(input) = input {
            let mut pipe = child.stdin.take().ok_or_else(|| anyhow!("Failed to open stdin of {}", program))?;
            pipe.write_all(&input).await.with_context(|| format!("Failed to write to {}", program))?;
        }

        tokio::select! {
            output = child.wait_with_output() => {
                output.with_context(|| format!("Failed to wait for {}", program))
            }
            _ = cancel.cancelled() => {
                debug!("Killing {} after cancellation", program);
                bail!("{} was cancelled", program)
            }
        }
    })?
}

fn block_on<F: Future>(fut: F) -> Result<F::Output> {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => Ok(handle.block_on(fut)),
        Err(_) => {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to start runtime for external command")?;
            Ok(runtime.block_on(fut))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_after_cancel() {
        let cancel = Cancellation::new();
        assert!(cancel.check().is_ok());
        cancel.clone().cancel();
        assert_eq!(cancel.check().unwrap_err().kind(), "SynthesisError");
    }

    #[test]
    fn test_cancel_on_drop() {
        let cancel = Cancellation::new();
        drop(CancelOnDrop(cancel.clone()));
        assert!(cancel.is_cancelled());
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_passes_stdin() {
        let mut cmd = Command::new("cat");
        cmd.arg("-");
        let output = run_command(cmd, Some(b"hello"), &Cancellation::new()).unwrap();
        assert!(output.status.success());
        assert_eq!(output.stdout, b"hello");
    }

    #[cfg(unix)]
    #[test]
    fn test_run_command_killed_on_cancel() {
        let cancel = Cancellation::new();
        let trigger = cancel.clone();
        let timer = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(200));
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = run_command(cmd, None, &cancel).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < std::time::Duration::from_secs(3));
        timer.join().unwrap();
    }

    #[tokio::test]
    async fn test_settled_waits_for_blocking_holder() {
        let cancel = Cancellation::new();
        let guard = cancel.hold().await;
        let finished = Arc::new(AtomicBool::new(false));
        let marker = Arc::clone(&finished);

        tokio::task::spawn_blocking(move || {
            let _guard = guard;
            std::thread::sleep(std::time::Duration::from_millis(200));
            marker.store(true, Ordering::SeqCst);
        });

        cancel.settled().await;
        assert!(finished.load(Ordering::SeqCst));
    }
}
