//! Job definitions: a single video submission and its lifecycle.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::{BatchId, JobId};

/// A sidecar audio track extracted from the source video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrack {
    pub language: String,
    pub codec: String,
    pub default: bool,
    pub forced: bool,
    pub path: String,
}

/// A sidecar subtitle track extracted from the source video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubtitleTrack {
    pub language: String,
    pub codec: String,
    pub default: bool,
    pub forced: bool,
    pub path: String,
}

/// Job state in the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Created,
    Extracting,
    Processing,
    Assembling,
    Completed,
    Failed,
    Cancelled,
    Paused,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Created => "created",
            JobStatus::Extracting => "extracting",
            JobStatus::Processing => "processing",
            JobStatus::Assembling => "assembling",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single video submission, owning an ordered list of batches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub source_path: String,
    pub output_path: String,
    pub created_at: DateTime<Utc>,
    pub status: JobStatus,
    pub frame_rate: f64,
    pub total_frames: u32,
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
    pub batch_ids: Vec<BatchId>,
    pub completed_batches: u32,
    pub failed_batches: u32,
    pub error_message: Option<String>,
}

impl Job {
    /// Create a fresh job immediately after submission. Frame extraction details are
    /// filled in later via [`Job::set_frames`] once the Frame I/O Adapter has run.
    pub fn new(source_path: impl Into<String>, output_path: impl Into<String>) -> Self {
        Self {
            id: JobId::new(),
            source_path: source_path.into(),
            output_path: output_path.into(),
            created_at: Utc::now(),
            status: JobStatus::Created,
            frame_rate: 0.0,
            total_frames: 0,
            audio_tracks: Vec::new(),
            subtitle_tracks: Vec::new(),
            batch_ids: Vec::new(),
            completed_batches: 0,
            failed_batches: 0,
            error_message: None,
        }
    }

    /// Record extraction results (frame count, rate, sidecar tracks) and move to
    /// `Processing` once batches can be dispatched.
    pub fn set_frames(
        &mut self,
        total_frames: u32,
        frame_rate: f64,
        audio_tracks: Vec<AudioTrack>,
        subtitle_tracks: Vec<SubtitleTrack>,
    ) {
        self.total_frames = total_frames;
        self.frame_rate = frame_rate;
        self.audio_tracks = audio_tracks;
        self.subtitle_tracks = subtitle_tracks;
        self.status = JobStatus::Processing;
    }

    pub fn add_batch(&mut self, batch_id: BatchId) {
        self.batch_ids.push(batch_id);
    }

    /// Progress ratio: completed batches over total batches. Zero when there are no
    /// batches yet (job still extracting).
    pub fn progress(&self) -> f64 {
        if self.batch_ids.is_empty() {
            return 0.0;
        }
        self.completed_batches as f64 / self.batch_ids.len() as f64
    }

    /// True once every batch owned by this job has reached `completed`.
    pub fn all_batches_complete(&self) -> bool {
        !self.batch_ids.is_empty() && self.completed_batches as usize == self.batch_ids.len()
    }

    pub fn start_assembling(&mut self) {
        self.status = JobStatus::Assembling;
    }

    pub fn complete(&mut self) {
        self.status = JobStatus::Completed;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = JobStatus::Failed;
        self.error_message = Some(error.into());
    }

    pub fn cancel(&mut self) {
        self.status = JobStatus::Cancelled;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_created_with_no_batches() {
        let job = Job::new("/in.mp4", "/out.mp4");
        assert_eq!(job.status, JobStatus::Created);
        assert_eq!(job.progress(), 0.0);
        assert!(!job.all_batches_complete());
    }

    #[test]
    fn progress_tracks_completed_over_total() {
        let mut job = Job::new("/in.mp4", "/out.mp4");
        job.add_batch(BatchId::new());
        job.add_batch(BatchId::new());
        assert_eq!(job.progress(), 0.0);
        job.completed_batches = 1;
        assert_eq!(job.progress(), 0.5);
        job.completed_batches = 2;
        assert_eq!(job.progress(), 1.0);
        assert!(job.all_batches_complete());
    }
}
