//! ffprobe-based stream inspection.

use serde::Deserialize;
use std::path::Path;

use crate::error::{MediaError, MediaResult};

/// Video stream summary plus the raw stream descriptors needed to drive extraction.
#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub duration_secs: f64,
    pub width: u32,
    pub height: u32,
    /// Rounded to three decimals, per the extractor's numeric semantics.
    pub frame_rate: f64,
    pub video_codec: String,
    pub audio_streams: Vec<StreamDescriptor>,
    pub subtitle_streams: Vec<StreamDescriptor>,
}

#[derive(Debug, Clone)]
pub struct StreamDescriptor {
    pub index: u32,
    pub language: String,
    pub codec: String,
    pub default: bool,
    pub forced: bool,
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    index: u32,
    codec_type: String,
    codec_name: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    tags: Option<FfprobeTags>,
    disposition: Option<FfprobeDisposition>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeTags {
    language: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeDisposition {
    #[serde(default)]
    default: u32,
    #[serde(default)]
    forced: u32,
}

/// Probe `path` for video/audio/subtitle stream metadata. Fails with
/// [`MediaError::SourceUnreadable`] if no video stream is present.
pub async fn probe(path: impl AsRef<Path>) -> MediaResult<ProbeResult> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(MediaError::FileNotFound(path.to_path_buf()));
    }

    which::which("ffprobe").map_err(|_| MediaError::FfprobeNotFound)?;

    let output = tokio::process::Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        return Err(MediaError::SourceUnreadable);
    }

    let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

    let video_stream = parsed
        .streams
        .iter()
        .find(|s| s.codec_type == "video")
        .ok_or(MediaError::SourceUnreadable)?;

    let duration_secs = parsed
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    let frame_rate = video_stream
        .avg_frame_rate
        .as_ref()
        .or(video_stream.r_frame_rate.as_ref())
        .and_then(|r| parse_frame_rate(r))
        .unwrap_or(30.0);
    let frame_rate = (frame_rate * 1000.0).round() / 1000.0;

    let audio_streams = parsed
        .streams
        .iter()
        .filter(|s| s.codec_type == "audio")
        .map(to_descriptor)
        .collect();

    let subtitle_streams = parsed
        .streams
        .iter()
        .filter(|s| s.codec_type == "subtitle")
        .map(to_descriptor)
        .collect();

    Ok(ProbeResult {
        duration_secs,
        width: video_stream.width.unwrap_or(0),
        height: video_stream.height.unwrap_or(0),
        frame_rate,
        video_codec: video_stream.codec_name.clone().unwrap_or_default(),
        audio_streams,
        subtitle_streams,
    })
}

fn to_descriptor(stream: &FfprobeStream) -> StreamDescriptor {
    let tags = stream.tags.as_ref();
    let disposition = stream.disposition.as_ref();
    StreamDescriptor {
        index: stream.index,
        language: tags
            .and_then(|t| t.language.clone())
            .unwrap_or_else(|| "und".to_string()),
        codec: stream.codec_name.clone().unwrap_or_default(),
        default: disposition.map(|d| d.default != 0).unwrap_or(false),
        forced: disposition.map(|d| d.forced != 0).unwrap_or(false),
    }
}

/// Parse a frame rate string in "num/den" rational form, or a bare decimal.
fn parse_frame_rate(s: &str) -> Option<f64> {
    if let Some((num, den)) = s.split_once('/') {
        let num: f64 = num.parse().ok()?;
        let den: f64 = den.parse().ok()?;
        if den > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rational_and_decimal_frame_rates() {
        assert!((parse_frame_rate("30/1").unwrap() - 30.0).abs() < 0.001);
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.001);
        assert!((parse_frame_rate("23.976").unwrap() - 23.976).abs() < 0.001);
        assert!(parse_frame_rate("0/0").is_none());
    }

    #[test]
    fn descriptor_defaults_language_to_und() {
        let stream = FfprobeStream {
            index: 1,
            codec_type: "audio".to_string(),
            codec_name: Some("aac".to_string()),
            width: None,
            height: None,
            r_frame_rate: None,
            avg_frame_rate: None,
            tags: None,
            disposition: None,
        };
        let d = to_descriptor(&stream);
        assert_eq!(d.language, "und");
        assert!(!d.default);
    }
}
