//! Background task: assembles a job's output video once every batch has settled.

use std::path::PathBuf;

use tokio::sync::broadcast;
use tracing::{info, warn};

use vsr_scheduler::SchedulerEvent;

use crate::metrics;
use crate::state::AppState;

/// Subscribe to the Scheduler's event bus and run the Frame I/O Adapter's `assemble`
/// step whenever a job finishes all of its batches.
pub async fn run_assembly_loop(state: AppState) {
    let mut events = state.scheduler.events().subscribe();
    loop {
        match events.recv().await {
            Ok(SchedulerEvent::JobReadyToAssemble { job_id }) => {
                if let Err(e) = assemble_job(&state, &job_id).await {
                    warn!(%job_id, error = %e, "job assembly failed");
                    metrics::record_job_failed();
                    let _ = state.store.fail_job(&job_id, e.to_string()).await;
                } else {
                    metrics::record_job_completed();
                }
            }
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "assembly loop lagged behind scheduler events");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn assemble_job(state: &AppState, job_id: &vsr_core::JobId) -> Result<(), String> {
    state.store.mark_job_assembling(job_id).await.map_err(|e| e.to_string())?;

    let job = state.store.get_job(job_id).await.map_err(|e| e.to_string())?;
    let job_dir = PathBuf::from(&state.config.work_dir).join("jobs").join(job_id.as_str());
    let upscaled_dir = job_dir.join("upscaled_final");

    vsr_media::assemble(
        &upscaled_dir,
        job.total_frames,
        &job.audio_tracks,
        &job.subtitle_tracks,
        job.frame_rate,
        &job.output_path,
        false,
    )
    .await
    .map_err(|e| e.to_string())?;

    state.store.complete_job(job_id).await.map_err(|e| e.to_string())?;
    info!(%job_id, output = %job.output_path, "job assembled");
    Ok(())
}
