// FFprobe wrapper for video stream info

use std::path::Path;
use std::process::Command;

use serde::Deserialize;

use crate::db::schema::MetadataRecord;
use crate::error::{MediaflowError, Result};

use super::exif::parse_rational;

#[derive(Debug, Deserialize)]
struct FFprobeOutput {
    streams: Option<Vec<FFprobeStream>>,
    format: Option<FFprobeFormat>,
}

#[derive(Debug, Deserialize)]
struct FFprobeStream {
    codec_type: Option<String>,
    codec_name: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    duration: Option<String>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FFprobeFormat {
    duration: Option<String>,
    bit_rate: Option<String>,
    tags: Option<FFprobeTags>,
}

#[derive(Debug, Deserialize)]
struct FFprobeTags {
    creation_time: Option<String>,
}

/// Run ffprobe and return its JSON document.
pub fn probe_raw(path: &Path) -> Result<serde_json::Value> {
    let output = Command::new(crate::tools::ffprobe_path())
        .args([
            "-v", "quiet",
            "-print_format", "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .output()
        .map_err(|e| MediaflowError::FFprobe(format!("Failed to run ffprobe: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaflowError::FFprobe(format!("ffprobe failed: {}", stderr)));
    }

    serde_json::from_slice(&output.stdout)
        .map_err(|e| MediaflowError::FFprobe(format!("Failed to parse ffprobe output: {}", e)))
}

/// Fill video fields of `record` from an ffprobe document (primary video stream).
/// Unparsable values leave their field unset.
pub fn apply_probe(doc: &serde_json::Value, record: &mut MetadataRecord) {
    let probe: FFprobeOutput = match serde_json::from_value(doc.clone()) {
        Ok(p) => p,
        Err(e) => {
            log::warn!("Unexpected ffprobe document shape: {}", e);
            return;
        }
    };

    let video = probe
        .streams
        .iter()
        .flatten()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    if let Some(stream) = video {
        record.width = stream.width;
        record.height = stream.height;
        record.codec = stream.codec_name.clone();
        record.fps = parse_frame_rate(stream.avg_frame_rate.as_deref())
            .or_else(|| parse_frame_rate(stream.r_frame_rate.as_deref()));
        record.duration = parse_seconds(stream.duration.as_deref());
        record.bitrate = stream.bit_rate.as_deref().and_then(|b| b.trim().parse().ok());
    }

    if let Some(format) = &probe.format {
        if record.duration.is_none() {
            record.duration = parse_seconds(format.duration.as_deref());
        }
        if record.bitrate.is_none() {
            record.bitrate = format.bit_rate.as_deref().and_then(|b| b.trim().parse().ok());
        }
        if record.date_taken.is_none() {
            record.date_taken = format.tags.as_ref().and_then(|t| t.creation_time.clone());
        }
    }
}

/// Frame rate as "n/d" ("30000/1001") or plain number. "0/0" is unset.
fn parse_frame_rate(rate: Option<&str>) -> Option<f64> {
    parse_rational(rate?).filter(|fps| *fps > 0.0)
}

fn parse_seconds(duration: Option<&str>) -> Option<f64> {
    duration?.trim().parse::<f64>().ok().filter(|d| d.is_finite() && *d >= 0.0)
}
