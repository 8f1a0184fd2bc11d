use std::collections::HashMap;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Complete ffprobe output structure
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeData {
    #[serde(default)]
    pub streams: Vec<FFProbeStream>,
    pub format: FFProbeFormat,
}

/// Format-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeFormat {
    pub format_name: String,
    pub duration: Option<String>,
    pub bit_rate: Option<String>,
    pub tags: Option<HashMap<String, String>>,
}

/// Stream-level metadata from ffprobe
#[derive(Debug, Clone, Deserialize)]
pub struct FFProbeStream {
    pub index: i32,
    pub codec_type: Option<String>,
    pub codec_name: Option<String>,
    pub width: Option<i32>,
    pub height: Option<i32>,
    pub avg_frame_rate: Option<String>,
    pub r_frame_rate: Option<String>,
    pub pix_fmt: Option<String>,
    pub sample_aspect_ratio: Option<String>,
    pub sample_rate: Option<String>,
    pub duration: Option<String>,
}

impl FFProbeData {
    /// Parse the JSON printed by `ffprobe -print_format json -show_streams -show_format`
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).context("Failed to parse ffprobe JSON")
    }

    /// Container duration, falling back to the longest stream
    pub fn duration_secs(&self) -> Option<f64> {
        self.format
            .duration
            .as_deref()
            .and_then(parse_seconds)
            .or_else(|| {
                self.streams
                    .iter()
                    .filter_map(|s| s.duration.as_deref().and_then(parse_seconds))
                    .fold(None, |acc: Option<f64>, d| Some(acc.map_or(d, |a| a.max(d))))
            })
    }

    pub fn video_stream(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("video"))
    }

    pub fn audio_stream(&self) -> Option<&FFProbeStream> {
        self.streams.iter().find(|s| s.codec_type.as_deref() == Some("audio"))
    }
}

impl FFProbeStream {
    /// Frame rate from `avg_frame_rate`, or `r_frame_rate` when the average is unset
    pub fn frame_rate(&self) -> Option<f64> {
        self.avg_frame_rate
            .as_deref()
            .and_then(parse_frame_rate)
            .or_else(|| self.r_frame_rate.as_deref().and_then(parse_frame_rate))
    }
}

fn parse_seconds(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}

/// Parse frame rate from ffprobe format ("30/1", "30000/1001" or "29.97")
pub fn parse_frame_rate(frame_rate_str: &str) -> Option<f64> {
    if let Some(slash_pos) = frame_rate_str.find('/') {
        let num_str = &frame_rate_str[..slash_pos];
        let den_str = &frame_rate_str[slash_pos + 1..];
        if let (Ok(num), Ok(den)) = (num_str.parse::<f64>(), den_str.parse::<f64>()) {
            if den != 0.0 && num > 0.0 {
                return Some(num / den);
            }
        }
        return None;
    }

    frame_rate_str.parse::<f64>().ok()
        .filter(|&f| f > 0.0 && f < 200.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"index": 0, "codec_type": "video", "codec_name": "h264", "width": 960, "height": 540,
             "avg_frame_rate": "30/1", "r_frame_rate": "30/1", "pix_fmt": "yuv420p",
             "sample_aspect_ratio": "1:1", "duration": "30.000000"},
            {"index": 1, "codec_type": "audio", "codec_name": "aac", "sample_rate": "24000",
             "duration": "29.418000"}
        ],
        "format": {"format_name": "mov,mp4,m4a,3gp,3g2,mj2", "duration": "29.418000", "bit_rate": "812345"}
    }"#;

    #[test]
    fn test_parse_sample() {
        let data = FFProbeData::from_json(SAMPLE).unwrap();
        let video = data.video_stream().unwrap();
        assert_eq!((video.width, video.height), (Some(960), Some(540)));
        assert_eq!(video.frame_rate(), Some(30.0));
        assert_eq!(data.audio_stream().unwrap().codec_name.as_deref(), Some("aac"));
        assert!((data.duration_secs().unwrap() - 29.418).abs() < 1e-9);
    }

    #[test]
    fn test_duration_falls_back_to_longest_stream() {
        let json = r#"{
            "streams": [
                {"index": 0, "codec_type": "video", "duration": "5.0"},
                {"index": 1, "codec_type": "audio", "duration": "5.2"}
            ],
            "format": {"format_name": "mp4"}
        }"#;
        let data = FFProbeData::from_json(json).unwrap();
        assert_eq!(data.duration_secs(), Some(5.2));
    }

    #[test]
    fn test_image_has_no_duration() {
        let json = r#"{"streams": [{"index": 0, "codec_type": "video"}], "format": {"format_name": "png_pipe"}}"#;
        assert_eq!(FFProbeData::from_json(json).unwrap().duration_secs(), None);
    }

    #[test]
    fn test_parse_frame_rate() {
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert!((parse_frame_rate("30000/1001").unwrap() - 29.97).abs() < 0.01);
        assert_eq!(parse_frame_rate("25"), Some(25.0));
        assert_eq!(parse_frame_rate("0/0"), None);
        assert_eq!(parse_frame_rate("garbage"), None);
    }
}
