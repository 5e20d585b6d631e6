//! Progress parsing for the external media tool's `-progress pipe:2` output.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MediaProgress {
    pub frame: u64,
    pub fps: f64,
    pub out_time_ms: i64,
    pub speed: f64,
    pub is_complete: bool,
}

impl MediaProgress {
    pub fn percentage(&self, total_duration_ms: i64) -> f64 {
        if total_duration_ms <= 0 {
            return 0.0;
        }
        ((self.out_time_ms as f64 / total_duration_ms as f64) * 100.0).min(100.0)
    }
}

/// Parse a single `key=value` progress line, folding it into `current`. Returns the
/// accumulated snapshot once a `progress=continue|end` line closes out the group.
pub fn parse_progress_line(line: &str, current: &mut MediaProgress) -> Option<MediaProgress> {
    let line = line.trim();
    let (key, value) = line.split_once('=')?;

    match key {
        "out_time_ms" | "out_time_us" => {
            if let Ok(us) = value.parse::<i64>() {
                current.out_time_ms = if key == "out_time_us" { us / 1000 } else { us };
            }
        }
        "frame" => {
            if let Ok(frame) = value.parse() {
                current.frame = frame;
            }
        }
        "fps" => {
            if let Ok(fps) = value.parse() {
                current.fps = fps;
            }
        }
        "speed" => {
            if value != "N/A" {
                if let Some(speed_str) = value.strip_suffix('x') {
                    if let Ok(speed) = speed_str.parse() {
                        current.speed = speed;
                    }
                }
            }
        }
        "progress" => {
            current.is_complete = value == "end";
            return Some(current.clone());
        }
        _ => {}
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_until_progress_marker() {
        let mut progress = MediaProgress::default();
        assert!(parse_progress_line("frame=120", &mut progress).is_none());
        assert!(parse_progress_line("out_time_ms=4000000", &mut progress).is_none());
        let snapshot = parse_progress_line("progress=continue", &mut progress).unwrap();
        assert_eq!(snapshot.frame, 120);
        assert_eq!(snapshot.out_time_ms, 4000000);
        assert!(!snapshot.is_complete);
    }
}
