//! Job submission, status, and cancellation.

use std::path::{Path as StdPath, PathBuf};

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use tracing::info;

use vsr_core::batch::DEFAULT_BATCH_SIZE;
use vsr_core::JobId;

use crate::error::{ApiError, ApiResult};
use crate::metrics;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SubmitJobRequest {
    pub source_path: String,
    pub output_path: String,
}

#[derive(Debug, Serialize)]
pub struct SubmitJobResponse {
    pub job_id: String,
}

/// POST /jobs — demux the source video, slice its frames into batches, and hand
/// the pending batches to the Scheduler.
pub async fn submit_job(
    State(state): State<AppState>,
    Json(req): Json<SubmitJobRequest>,
) -> ApiResult<Json<SubmitJobResponse>> {
    let job_id = state.store.create_job(req.source_path.clone(), req.output_path.clone()).await;
    let job_dir = PathBuf::from(&state.config.work_dir).join("jobs").join(job_id.as_str());
    tokio::fs::create_dir_all(&job_dir)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let extracted = vsr_media::extract(&req.source_path, &job_dir).await?;

    state
        .store
        .set_job_frames(
            &job_id,
            extracted.frame_count,
            extracted.frame_rate,
            extracted.audio_tracks,
            extracted.subtitle_tracks,
        )
        .await?;

    create_batches(&state, &job_id, &job_dir, extracted.frame_count).await?;

    metrics::record_job_submitted();
    state.scheduler.notify();
    info!(%job_id, frames = extracted.frame_count, "job submitted");

    Ok(Json(SubmitJobResponse { job_id: job_id.to_string() }))
}

async fn create_batches(
    state: &AppState,
    job_id: &JobId,
    job_dir: &StdPath,
    frame_count: u32,
) -> ApiResult<()> {
    let frames_dir = job_dir.join("original_frames");
    let batches_dir = job_dir.join("batches");

    let mut start = 0u32;
    let mut index = 0usize;
    while start < frame_count {
        let end = (start + DEFAULT_BATCH_SIZE - 1).min(frame_count - 1);
        let filenames: Vec<String> = (start..=end).map(|i| format!("frame_{:06}.png", i + 1)).collect();

        let batch_dir = batches_dir.join(format!("batch_{:03}", index));
        tokio::fs::create_dir_all(&batch_dir)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        for name in &filenames {
            let src = frames_dir.join(name);
            let dst = batch_dir.join(name);
            if tokio::fs::hard_link(&src, &dst).await.is_err() {
                tokio::fs::copy(&src, &dst)
                    .await
                    .map_err(|e| ApiError::Internal(e.to_string()))?;
            }
        }

        state
            .store
            .create_batch(job_id, start, end, filenames, batch_dir.to_string_lossy().to_string())
            .await?;

        start = end + 1;
        index += 1;
    }

    Ok(())
}

#[derive(Debug, Serialize)]
pub struct JobStatusResponse {
    pub job_id: String,
    pub status: String,
    pub total_batches: usize,
    pub pending: usize,
    pub assigned: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub percent_complete: f64,
}

/// GET /jobs/:id
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobStatusResponse>> {
    let job_id = JobId::from_string(job_id);
    let progress = state.store.job_progress(&job_id).await?;
    Ok(Json(JobStatusResponse {
        job_id: job_id.to_string(),
        status: progress.status.as_str().to_string(),
        total_batches: progress.total_batches,
        pending: progress.pending,
        assigned: progress.assigned,
        processing: progress.processing,
        completed: progress.completed,
        failed: progress.failed,
        percent_complete: progress.percent_complete,
    }))
}

#[derive(Debug, Serialize)]
pub struct CancelJobResponse {
    pub job_id: String,
    pub batches_in_flight: usize,
}

/// POST /jobs/:id/cancel — mark the job and every non-terminal batch cancelled, then
/// push a `cancel_batch` message to each worker holding an in-flight batch so it kills
/// its upscaler child process and deletes its scratch files.
pub async fn cancel_job(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> ApiResult<Json<CancelJobResponse>> {
    let job_id = JobId::from_string(job_id);
    let in_flight = state.store.cancel_job(&job_id).await?;
    let batches_in_flight = in_flight.len();
    info!(%job_id, in_flight = batches_in_flight, "job cancelled");
    state.scheduler.cancel_batches(in_flight);
    Ok(Json(CancelJobResponse {
        job_id: job_id.to_string(),
        batches_in_flight,
    }))
}
