// Typed settings snapshot
//
// Each key is parsed independently. A missing or unparsable value falls back
// to the compiled default for that key; parsing never fails as a whole.

use std::collections::HashMap;

use serde::{de::DeserializeOwned, Serialize};

use crate::constants::{
    DEFAULT_PREVIEW_DURATION_SECS, DEFAULT_PREVIEW_RESOLUTION, DEFAULT_SCAN_EXCLUDE,
    DEFAULT_THUMBNAIL_FORMAT, DEFAULT_THUMBNAIL_QUALITY, DEFAULT_THUMBNAIL_RESOLUTION,
};

pub const KEY_THUMBNAIL_RESOLUTION: &str = "thumbnail_resolution";
pub const KEY_PREVIEW_RESOLUTION: &str = "preview_resolution";
pub const KEY_THUMBNAIL_FORMAT: &str = "thumbnail_format";
pub const KEY_THUMBNAIL_QUALITY: &str = "thumbnail_quality";
pub const KEY_PREVIEW_DURATION: &str = "preview_duration";
pub const KEY_VIDEO_PREVIEWS_ENABLED: &str = "video_previews_enabled";
pub const KEY_SCAN_EXCLUDE: &str = "scan_exclude";
pub const KEY_JOB_CONCURRENCY: &str = "job_concurrency";
pub const KEY_JOB_DELAY_MS: &str = "job_delay_ms";

/// Encoder used for thumbnails and previews of the image pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailFormat {
    Jpeg,
    Png,
    Webp,
}

impl ThumbnailFormat {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "jpeg" | "jpg" => Some(ThumbnailFormat::Jpeg),
            "png" => Some(ThumbnailFormat::Png),
            "webp" => Some(ThumbnailFormat::Webp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ThumbnailFormat::Jpeg => "jpg",
            ThumbnailFormat::Png => "png",
            ThumbnailFormat::Webp => "webp",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsSnapshot {
    pub thumbnail_resolution: String,
    pub preview_resolution: String,
    pub thumbnail_format: ThumbnailFormat,
    pub thumbnail_quality: u8,
    pub preview_duration: u32,
    pub video_previews_enabled: bool,
    pub scan_exclude: Vec<String>,
    pub job_concurrency: HashMap<String, usize>,
    pub job_delay_ms: HashMap<String, u64>,
}

impl Default for SettingsSnapshot {
    fn default() -> Self {
        Self {
            thumbnail_resolution: DEFAULT_THUMBNAIL_RESOLUTION.to_string(),
            preview_resolution: DEFAULT_PREVIEW_RESOLUTION.to_string(),
            thumbnail_format: ThumbnailFormat::parse(DEFAULT_THUMBNAIL_FORMAT)
                .unwrap_or(ThumbnailFormat::Jpeg),
            thumbnail_quality: DEFAULT_THUMBNAIL_QUALITY,
            preview_duration: DEFAULT_PREVIEW_DURATION_SECS,
            video_previews_enabled: true,
            scan_exclude: DEFAULT_SCAN_EXCLUDE.iter().map(|s| s.to_string()).collect(),
            job_concurrency: HashMap::new(),
            job_delay_ms: HashMap::new(),
        }
    }
}

impl SettingsSnapshot {
    /// Materialize a snapshot from the raw key-value store.
    pub fn from_raw(raw: &HashMap<String, String>) -> Self {
        let d = Self::default();
        Self {
            thumbnail_resolution: parse_label(raw.get(KEY_THUMBNAIL_RESOLUTION), d.thumbnail_resolution),
            preview_resolution: parse_label(raw.get(KEY_PREVIEW_RESOLUTION), d.preview_resolution),
            thumbnail_format: raw
                .get(KEY_THUMBNAIL_FORMAT)
                .and_then(|v| ThumbnailFormat::parse(v))
                .unwrap_or(d.thumbnail_format),
            thumbnail_quality: parse_number::<u8>(raw.get(KEY_THUMBNAIL_QUALITY), d.thumbnail_quality)
                .clamp(1, 100),
            preview_duration: parse_number(raw.get(KEY_PREVIEW_DURATION), d.preview_duration),
            video_previews_enabled: parse_bool(raw.get(KEY_VIDEO_PREVIEWS_ENABLED), d.video_previews_enabled),
            scan_exclude: parse_json(raw.get(KEY_SCAN_EXCLUDE), d.scan_exclude),
            job_concurrency: parse_json(raw.get(KEY_JOB_CONCURRENCY), d.job_concurrency),
            job_delay_ms: parse_json(raw.get(KEY_JOB_DELAY_MS), d.job_delay_ms),
        }
    }

    /// Factory defaults in their stored string form, used to seed an empty store.
    pub fn default_raw() -> Vec<(&'static str, String)> {
        let d = Self::default();
        vec![
            (KEY_THUMBNAIL_RESOLUTION, d.thumbnail_resolution),
            (KEY_PREVIEW_RESOLUTION, d.preview_resolution),
            (KEY_THUMBNAIL_FORMAT, DEFAULT_THUMBNAIL_FORMAT.to_string()),
            (KEY_THUMBNAIL_QUALITY, d.thumbnail_quality.to_string()),
            (KEY_PREVIEW_DURATION, d.preview_duration.to_string()),
            (KEY_VIDEO_PREVIEWS_ENABLED, d.video_previews_enabled.to_string()),
            (KEY_SCAN_EXCLUDE, serde_json::to_string(&d.scan_exclude).unwrap_or_else(|_| "[]".to_string())),
            (KEY_JOB_CONCURRENCY, "{}".to_string()),
            (KEY_JOB_DELAY_MS, "{}".to_string()),
        ]
    }

    /// Explicit concurrency override for a job type, if configured.
    pub fn concurrency_override(&self, job_type: &str) -> Option<usize> {
        self.job_concurrency.get(job_type).copied()
    }

    /// Explicit inter-job delay override for a job type, if configured.
    pub fn delay_override_ms(&self, job_type: &str) -> Option<u64> {
        self.job_delay_ms.get(job_type).copied()
    }

    pub fn is_excluded(&self, name: &str) -> bool {
        self.scan_exclude.iter().any(|e| e == name)
    }
}

fn parse_label(value: Option<&String>, default: String) -> String {
    match value.map(|v| v.trim()) {
        Some(v) if !v.is_empty() => v.to_string(),
        _ => default,
    }
}

/// Booleans are true only for the literal string "true".
fn parse_bool(value: Option<&String>, default: bool) -> bool {
    match value {
        Some(v) => v.trim() == "true",
        None => default,
    }
}

fn parse_number<T: std::str::FromStr>(value: Option<&String>, default: T) -> T {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn parse_json<T: DeserializeOwned>(value: Option<&String>, default: T) -> T {
    match value {
        Some(v) => match serde_json::from_str(v) {
            Ok(parsed) => parsed,
            Err(e) => {
                log::warn!("Ignoring unparsable settings value {:?}: {}", v, e);
                default
            }
        },
        None => default,
    }
}

/// Resolve a target pixel height from a resolution label with a leading integer,
/// e.g. "480p" -> 480. Unparsable labels fall back to `fallback`.
pub fn label_height(label: &str, fallback: u32) -> u32 {
    let re = match regex::Regex::new(r"^\s*(\d+)") {
        Ok(re) => re,
        Err(_) => return fallback,
    };
    re.captures(label)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .filter(|h| *h > 0)
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_absent_keys_use_defaults() {
        let snapshot = SettingsSnapshot::from_raw(&HashMap::new());
        assert_eq!(snapshot, SettingsSnapshot::default());
    }

    #[test]
    fn test_unparsable_json_falls_back() {
        let snapshot = SettingsSnapshot::from_raw(&raw(&[
            (KEY_SCAN_EXCLUDE, "[not json"),
            (KEY_JOB_CONCURRENCY, "{\"scan\": \"many\"}"),
        ]));
        assert_eq!(snapshot.scan_exclude, SettingsSnapshot::default().scan_exclude);
        assert!(snapshot.job_concurrency.is_empty());
    }

    #[test]
    fn test_valid_values_override() {
        let snapshot = SettingsSnapshot::from_raw(&raw(&[
            (KEY_THUMBNAIL_RESOLUTION, "480p"),
            (KEY_THUMBNAIL_QUALITY, "55"),
            (KEY_VIDEO_PREVIEWS_ENABLED, "false"),
            (KEY_JOB_CONCURRENCY, "{\"thumbnail\": 4}"),
            (KEY_JOB_DELAY_MS, "{\"preview\": 1500}"),
            (KEY_SCAN_EXCLUDE, "[\"tmp\"]"),
        ]));
        assert_eq!(snapshot.thumbnail_resolution, "480p");
        assert_eq!(snapshot.thumbnail_quality, 55);
        assert!(!snapshot.video_previews_enabled);
        assert_eq!(snapshot.concurrency_override("thumbnail"), Some(4));
        assert_eq!(snapshot.concurrency_override("scan"), None);
        assert_eq!(snapshot.delay_override_ms("preview"), Some(1500));
        assert!(snapshot.is_excluded("tmp"));
        assert!(!snapshot.is_excluded(".git"));
    }

    #[test]
    fn test_bool_requires_literal_true() {
        let snapshot = SettingsSnapshot::from_raw(&raw(&[(KEY_VIDEO_PREVIEWS_ENABLED, "yes")]));
        assert!(!snapshot.video_previews_enabled);
        let snapshot = SettingsSnapshot::from_raw(&raw(&[(KEY_VIDEO_PREVIEWS_ENABLED, "true")]));
        assert!(snapshot.video_previews_enabled);
    }

    #[test]
    fn test_bad_number_falls_back() {
        let snapshot = SettingsSnapshot::from_raw(&raw(&[(KEY_PREVIEW_DURATION, "ten")]));
        assert_eq!(snapshot.preview_duration, DEFAULT_PREVIEW_DURATION_SECS);
    }

    #[test]
    fn test_label_height() {
        assert_eq!(label_height("480p", 240), 480);
        assert_eq!(label_height("1080", 240), 1080);
        assert_eq!(label_height("hd", 240), 240);
        assert_eq!(label_height("0p", 240), 240);
    }

    #[test]
    fn test_default_raw_round_trips() {
        let seeded: HashMap<String, String> = SettingsSnapshot::default_raw()
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        assert_eq!(SettingsSnapshot::from_raw(&seeded), SettingsSnapshot::default());
    }
}
