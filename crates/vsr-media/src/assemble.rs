//! Remux upscaled frames plus sidecar tracks back into a single video file.

use std::path::Path;

use vsr_core::{AudioTrack, SubtitleTrack};

use crate::command::{MediaCommand, MediaRunner};
use crate::error::{MediaError, MediaResult};

/// Consume upscaled frames in ascending index order, mux them at `frame_rate`, attach
/// every sidecar stream in its original order, and write `output_path`.
///
/// Missing frames are tolerated only when `force` is set; otherwise a count mismatch
/// against `expected_frames` fails with [`MediaError::IncompleteFrames`].
pub async fn assemble(
    frames_dir: impl AsRef<Path>,
    expected_frames: u32,
    audio_tracks: &[AudioTrack],
    subtitle_tracks: &[SubtitleTrack],
    frame_rate: f64,
    output_path: impl AsRef<Path>,
    force: bool,
) -> MediaResult<()> {
    let frames_dir = frames_dir.as_ref();
    let output_path = output_path.as_ref();

    let actual = count_frames(frames_dir).await?;
    if actual != expected_frames && !force {
        return Err(MediaError::IncompleteFrames {
            expected: expected_frames as usize,
            found: actual as usize,
        });
    }

    let mut cmd = MediaCommand::new("ffmpeg").args([
        "-y",
        "-framerate",
        &format!("{:.3}", frame_rate),
        "-i",
        &frames_dir.join("frame_%06d.png").to_string_lossy(),
    ]);

    for track in audio_tracks {
        cmd = cmd.args(["-i", &track.path]);
    }
    for track in subtitle_tracks {
        cmd = cmd.args(["-i", &track.path]);
    }

    // Video from input 0, each sidecar mapped in original order from its own input.
    cmd = cmd.args(["-map", "0:v:0"]);
    for (i, _) in audio_tracks.iter().enumerate() {
        cmd = cmd.args(["-map", &format!("{}:a:0", i + 1)]);
    }
    for (i, _) in subtitle_tracks.iter().enumerate() {
        cmd = cmd.args(["-map", &format!("{}:s:0", i + 1 + audio_tracks.len())]);
    }

    cmd = cmd.args(["-c:v", "libx264", "-pix_fmt", "yuv420p", "-c:a", "copy", "-c:s", "copy"]);
    cmd = cmd.arg(output_path.to_string_lossy().to_string());

    MediaRunner::new()
        .run(&cmd)
        .await
        .map_err(|e| MediaError::assembly_failed(e.to_string()))
}

async fn count_frames(dir: &Path) -> MediaResult<u32> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0u32;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().and_then(|e| e.to_str()) == Some("png") {
            count += 1;
        }
    }
    Ok(count)
}
