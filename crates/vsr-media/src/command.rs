//! Media tool command builder and runner (wraps the external ffmpeg-compatible tool).

use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::{MediaError, MediaResult};
use crate::progress::{parse_progress_line, MediaProgress};

/// Builder for invocations of the external media tool.
#[derive(Debug, Clone)]
pub struct MediaCommand {
    binary: String,
    args: Vec<String>,
}

impl MediaCommand {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }
}

/// Runs a [`MediaCommand`] with progress tracking, cancellation, and a timeout ceiling.
pub struct MediaRunner {
    cancel_rx: Option<watch::Receiver<bool>>,
    timeout_secs: Option<u64>,
}

impl Default for MediaRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl MediaRunner {
    pub fn new() -> Self {
        Self {
            cancel_rx: None,
            timeout_secs: None,
        }
    }

    pub fn with_cancel(mut self, cancel_rx: watch::Receiver<bool>) -> Self {
        self.cancel_rx = Some(cancel_rx);
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub async fn run(&self, cmd: &MediaCommand) -> MediaResult<()> {
        self.run_with_progress(cmd, |_| {}).await
    }

    pub async fn run_with_progress<F>(&self, cmd: &MediaCommand, on_progress: F) -> MediaResult<()>
    where
        F: Fn(MediaProgress) + Send + 'static,
    {
        which::which(&cmd.binary).map_err(|_| {
            if cmd.binary == "ffprobe" {
                MediaError::FfprobeNotFound
            } else {
                MediaError::FfmpegNotFound
            }
        })?;

        debug!(binary = %cmd.binary, args = ?cmd.args, "running media tool");

        let mut child = Command::new(&cmd.binary)
            .args(&cmd.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        let stderr = child.stderr.take().expect("stderr not captured");
        let stdout = child.stdout.take();
        let mut reader = BufReader::new(stderr).lines();

        let progress_handle = tokio::spawn(async move {
            let mut current = MediaProgress::default();
            while let Ok(Some(line)) = reader.next_line().await {
                if let Some(progress) = parse_progress_line(&line, &mut current) {
                    on_progress(progress);
                }
            }
        });

        // Drain stdout so a full pipe never blocks the child (probe writes JSON here
        // but the runner itself doesn't need it — callers read stdout separately).
        if let Some(stdout) = stdout {
            tokio::spawn(async move {
                let mut reader = BufReader::new(stdout).lines();
                while let Ok(Some(_)) = reader.next_line().await {}
            });
        }

        let result = self.wait_for_completion(&mut child).await;
        let _ = progress_handle.await;
        result
    }

    async fn wait_for_completion(&self, child: &mut Child) -> MediaResult<()> {
        let wait_future = child.wait();

        let status = if let Some(timeout_secs) = self.timeout_secs {
            match tokio::time::timeout(std::time::Duration::from_secs(timeout_secs), wait_future)
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    warn!(timeout_secs, "media tool timed out, killing process");
                    let _ = child.kill().await;
                    return Err(MediaError::Timeout(timeout_secs));
                }
            }
        } else {
            wait_future.await?
        };

        if let Some(ref cancel_rx) = self.cancel_rx {
            if *cancel_rx.borrow() {
                info!("media tool cancelled, killing process");
                let _ = child.kill().await;
                return Err(MediaError::Internal("cancelled".to_string()));
            }
        }

        if status.success() {
            Ok(())
        } else {
            Err(MediaError::NonZeroExit { code: status.code() })
        }
    }
}

pub fn check_ffmpeg() -> MediaResult<PathBuf> {
    which::which("ffmpeg").map_err(|_| MediaError::FfmpegNotFound)
}

pub fn check_ffprobe() -> MediaResult<PathBuf> {
    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_collects_args_in_order() {
        let cmd = MediaCommand::new("ffmpeg")
            .arg("-y")
            .args(["-i", "input.mp4"]);
        assert_eq!(cmd.args, vec!["-y", "-i", "input.mp4"]);
    }
}
