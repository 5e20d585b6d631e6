//! Demux a source video into per-frame PNGs plus sidecar audio/subtitle files.

use std::path::{Path, PathBuf};

use vsr_core::{AudioTrack, SubtitleTrack};

use crate::command::{MediaCommand, MediaRunner};
use crate::error::{MediaError, MediaResult};
use crate::probe::{probe, StreamDescriptor};

pub struct ExtractResult {
    pub frames_dir: PathBuf,
    pub frame_count: u32,
    pub frame_rate: f64,
    pub audio_tracks: Vec<AudioTrack>,
    pub subtitle_tracks: Vec<SubtitleTrack>,
}

/// Demux `video_path` into `frame_%06d.png` at constant frame rate inside
/// `work_dir/original_frames`, and probe-then-extract any audio/subtitle tracks into
/// `work_dir`. Quality is pinned to 1 (highest) to preserve information for the
/// upscaler.
pub async fn extract(video_path: impl AsRef<Path>, work_dir: impl AsRef<Path>) -> MediaResult<ExtractResult> {
    let video_path = video_path.as_ref();
    let work_dir = work_dir.as_ref();

    let info = probe(video_path).await?;

    let frames_dir = work_dir.join("original_frames");
    tokio::fs::create_dir_all(&frames_dir).await?;

    let runner = MediaRunner::new();
    let frame_pattern = frames_dir.join("frame_%06d.png");
    let extract_frames = MediaCommand::new("ffmpeg")
        .args([
            "-y",
            "-i",
            &video_path.to_string_lossy(),
            "-qscale:v",
            "1",
            "-vsync",
            "0",
        ])
        .arg(frame_pattern.to_string_lossy().to_string());
    runner
        .run(&extract_frames)
        .await
        .map_err(|e| MediaError::extraction_failed(e.to_string()))?;

    let frame_count = count_png_files(&frames_dir).await?;
    if frame_count == 0 {
        return Err(MediaError::SourceUnreadable);
    }

    let audio_tracks = extract_audio_tracks(video_path, work_dir, &info.audio_streams, &runner).await?;
    let subtitle_tracks =
        extract_subtitle_tracks(video_path, work_dir, &info.subtitle_streams, &runner).await?;

    Ok(ExtractResult {
        frames_dir,
        frame_count,
        frame_rate: info.frame_rate,
        audio_tracks,
        subtitle_tracks,
    })
}

async fn count_png_files(dir: &Path) -> MediaResult<u32> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut count = 0u32;
    while let Some(entry) = entries.next_entry().await? {
        if entry.path().extension().and_then(|e| e.to_str()) == Some("png") {
            count += 1;
        }
    }
    Ok(count)
}

fn audio_extension(codec: &str) -> &'static str {
    match codec {
        "aac" => "m4a",
        "mp3" => "mp3",
        "ac3" | "eac3" => "ac3",
        "flac" => "flac",
        _ => "mka",
    }
}

fn subtitle_extension(codec: &str) -> &'static str {
    match codec {
        "subrip" | "srt" => "srt",
        "ass" | "ssa" => "ass",
        "webvtt" => "vtt",
        _ => "mks",
    }
}

/// Extraction of a single sidecar stream is best-effort: a failure is logged and the
/// track is skipped rather than failing the whole extraction, since the Frame I/O
/// Adapter's contract only treats missing video as fatal.
async fn extract_audio_tracks(
    video_path: &Path,
    work_dir: &Path,
    streams: &[StreamDescriptor],
    runner: &MediaRunner,
) -> MediaResult<Vec<AudioTrack>> {
    let mut tracks = Vec::with_capacity(streams.len());
    for stream in streams {
        let ext = audio_extension(&stream.codec);
        let path = work_dir.join(format!("audio_{}.{}", stream.language, ext));
        let cmd = MediaCommand::new("ffmpeg").args([
            "-y",
            "-i",
            &video_path.to_string_lossy(),
            "-map",
            &format!("0:{}", stream.index),
            "-c",
            "copy",
        ]).arg(path.to_string_lossy().to_string());

        match runner.run(&cmd).await {
            Ok(()) => tracks.push(AudioTrack {
                language: stream.language.clone(),
                codec: stream.codec.clone(),
                default: stream.default,
                forced: stream.forced,
                path: path.to_string_lossy().to_string(),
            }),
            Err(e) => {
                tracing::warn!(language = %stream.language, error = %e, "audio sidecar extraction failed, skipping");
            }
        }
    }
    Ok(tracks)
}

async fn extract_subtitle_tracks(
    video_path: &Path,
    work_dir: &Path,
    streams: &[StreamDescriptor],
    runner: &MediaRunner,
) -> MediaResult<Vec<SubtitleTrack>> {
    let mut tracks = Vec::with_capacity(streams.len());
    for stream in streams {
        let ext = subtitle_extension(&stream.codec);
        let path = work_dir.join(format!("subs_{}.{}", stream.language, ext));
        let cmd = MediaCommand::new("ffmpeg").args([
            "-y",
            "-i",
            &video_path.to_string_lossy(),
            "-map",
            &format!("0:{}", stream.index),
        ]).arg(path.to_string_lossy().to_string());

        match runner.run(&cmd).await {
            Ok(()) => tracks.push(SubtitleTrack {
                language: stream.language.clone(),
                codec: stream.codec.clone(),
                default: stream.default,
                forced: stream.forced,
                path: path.to_string_lossy().to_string(),
            }),
            Err(e) => {
                tracing::warn!(language = %stream.language, error = %e, "subtitle sidecar extraction failed, skipping");
            }
        }
    }
    Ok(tracks)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_known_audio_codecs() {
        assert_eq!(audio_extension("aac"), "m4a");
        assert_eq!(audio_extension("opus"), "mka");
    }

    #[test]
    fn maps_known_subtitle_codecs() {
        assert_eq!(subtitle_extension("subrip"), "srt");
        assert_eq!(subtitle_extension("dvd_subtitle"), "mks");
    }
}
