//! Invocation of the external frame upscaler binary.
//!
//! The upscaler is a separate executable (e.g. a ncnn-vulkan Real-ESRGAN build) that
//! reads every frame in an input directory and writes an upscaled PNG per frame to an
//! output directory. Unlike the Frame I/O Adapter's ffmpeg wrapper, success here is
//! judged by both the exit code and how many output files actually landed.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{WorkerError, WorkerResult};
use vsr_core::BatchConfig;

/// Minimum fraction of expected output frames that must be present for a run to count
/// as successful, even when the process itself exits 0.
const MIN_SUCCESS_FRACTION: f64 = 0.8;

/// Run the upscaler once against `input_dir`/`output_dir` under `config`, with a hard
/// wall-clock ceiling. Returns the number of output files actually produced. Aborted
/// immediately, killing the child process, if `cancel` fires first.
pub async fn run_once(
    binary: &str,
    config: &BatchConfig,
    input_dir: &Path,
    output_dir: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> WorkerResult<usize> {
    which::which(binary).map_err(|_| WorkerError::UpscalerNotFound(binary.to_string()))?;
    tokio::fs::create_dir_all(output_dir).await?;

    let args = build_args(config, input_dir, output_dir);
    debug!(binary, ?args, "invoking upscaler");

    let mut child = Command::new(binary)
        .args(&args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| WorkerError::upscaler_failed(format!("spawn failed: {e}")))?;

    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    if let Some(stdout) = stdout {
        tokio::spawn(drain(stdout));
    }
    if let Some(stderr) = stderr {
        tokio::spawn(drain(stderr));
    }

    let status = tokio::select! {
        result = tokio::time::timeout(timeout, child.wait()) => match result {
            Ok(result) => result.map_err(|e| WorkerError::upscaler_failed(e.to_string()))?,
            Err(_) => {
                warn!(timeout_secs = timeout.as_secs(), "upscaler timed out, killing process");
                let _ = child.kill().await;
                return Err(WorkerError::UpscalerTimeout(timeout.as_secs()));
            }
        },
        _ = cancel.cancelled() => {
            warn!("batch cancelled, killing upscaler process");
            let _ = child.kill().await;
            return Err(WorkerError::Cancelled);
        }
    };

    let produced = count_files(output_dir).await?;

    if !status.success() {
        return Err(WorkerError::upscaler_failed(format!(
            "exited with status {:?} ({} frames produced)",
            status.code(),
            produced
        )));
    }

    Ok(produced)
}

/// Run the upscaler against `config`, and on failure or a short output count, retry
/// once with a conservative configuration (halved tile size floored at 64, a single
/// thread, GPU 0) before giving up.
pub async fn run_with_fallback(
    binary: &str,
    config: &BatchConfig,
    input_dir: &Path,
    output_dir: &Path,
    timeout: Duration,
    expected_frames: usize,
    cancel: &CancellationToken,
) -> WorkerResult<usize> {
    let min_frames = ((expected_frames as f64) * MIN_SUCCESS_FRACTION).ceil() as usize;

    match run_once(binary, config, input_dir, output_dir, timeout, cancel).await {
        Ok(produced) if produced >= min_frames => return Ok(produced),
        Ok(produced) => {
            warn!(
                produced,
                min_frames, "upscaler produced too few frames, retrying with conservative configuration"
            );
        }
        Err(WorkerError::Cancelled) => return Err(WorkerError::Cancelled),
        Err(e) => {
            warn!(error = %e, "upscaler run failed, retrying with conservative configuration");
        }
    }

    let fallback = conservative_config(config);
    clear_dir(output_dir).await?;
    let produced = run_once(binary, &fallback, input_dir, output_dir, timeout, cancel).await?;

    if produced < min_frames {
        return Err(WorkerError::upscaler_failed(format!(
            "fallback run produced only {produced}/{expected_frames} frames"
        )));
    }

    Ok(produced)
}

fn conservative_config(config: &BatchConfig) -> BatchConfig {
    BatchConfig {
        model: config.model.clone(),
        scale: config.scale,
        tile_size: (config.tile_size / 2).max(64),
        threads: 1,
        gpu_id: Some(0),
    }
}

fn build_args(config: &BatchConfig, input_dir: &Path, output_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "-i".to_string(),
        input_dir.display().to_string(),
        "-o".to_string(),
        output_dir.display().to_string(),
        "-n".to_string(),
        config.model.clone(),
        "-s".to_string(),
        config.scale.to_string(),
        "-t".to_string(),
        config.tile_size.to_string(),
        "-f".to_string(),
        "png".to_string(),
    ];
    if let Some(gpu_id) = config.gpu_id {
        args.push("-g".to_string());
        args.push(gpu_id.to_string());
    }
    args.push("-j".to_string());
    args.push(format!("{t}:{t}:{t}", t = config.threads.max(1)));
    args
}

async fn count_files(dir: &Path) -> WorkerResult<usize> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            count += 1;
        }
    }
    Ok(count)
}

async fn clear_dir(dir: &Path) -> WorkerResult<()> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if entry.file_type().await?.is_file() {
            let _ = tokio::fs::remove_file(entry.path()).await;
        }
    }
    Ok(())
}

async fn drain<R>(reader: R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    use tokio::io::{AsyncBufReadExt, BufReader};
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(_)) = lines.next_line().await {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> BatchConfig {
        BatchConfig {
            model: "realesrgan-x4plus".to_string(),
            scale: 4,
            tile_size: 128,
            threads: 8,
            gpu_id: Some(0),
        }
    }

    #[test]
    fn build_args_includes_gpu_and_thread_flags() {
        let config = sample_config();
        let args = build_args(&config, Path::new("/in"), Path::new("/out"));
        assert!(args.contains(&"-g".to_string()));
        assert!(args.contains(&"0".to_string()));
        assert!(args.contains(&"8:8:8".to_string()));
    }

    #[test]
    fn build_args_omits_gpu_flag_when_cpu_only() {
        let mut config = sample_config();
        config.gpu_id = None;
        let args = build_args(&config, Path::new("/in"), Path::new("/out"));
        assert!(!args.contains(&"-g".to_string()));
    }

    #[test]
    fn conservative_config_halves_tile_and_floors_at_64() {
        let config = sample_config();
        let fallback = conservative_config(&config);
        assert_eq!(fallback.tile_size, 64);
        assert_eq!(fallback.threads, 1);
        assert_eq!(fallback.gpu_id, Some(0));

        let mut tiny = config;
        tiny.tile_size = 96;
        let fallback = conservative_config(&tiny);
        assert_eq!(fallback.tile_size, 64);
    }
}
