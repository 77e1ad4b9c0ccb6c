// Metadata extraction
//
// Images are read with kamadak-exif (exiftool fills gaps when installed,
// pixel dimensions come from the decoder as a last resort). Videos are probed
// with ffprobe. Extraction failures are logged and the job records whatever
// fields were obtained.

pub mod exif;
pub mod exiftool;
pub mod ffprobe;
pub mod sidecar;

use std::path::Path;

use serde_json::{json, Map, Value};

use crate::db::schema::{self, MediaType, MetadataRecord};
use crate::error::{MediaflowError, Result};
use crate::jobs::registry::{required_str, JobContext, Processor};
use crate::scan::{describe_file, discover};

/// Convert an EXIF-style timestamp ("2023:06:15 14:30:00") to ISO8601 UTC.
/// Already-ISO values pass through when they parse.
pub fn normalize_exif_date(date_str: &str) -> Option<String> {
    let trimmed = date_str.trim().trim_end_matches('\0');
    for fmt in ["%Y:%m:%d %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = chrono::NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(dt.format("%Y-%m-%dT%H:%M:%SZ").to_string());
        }
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&chrono::Utc).format("%Y-%m-%dT%H:%M:%SZ").to_string());
    }
    None
}

/// Extract image fields. Never fails; missing data stays unset.
pub fn extract_image(path: &Path) -> MetadataRecord {
    let mut record = MetadataRecord::default();
    let mut raw = Map::new();

    if let Some(exif_data) = exif::read_exif(path) {
        raw.insert("exif".to_string(), exif::apply_exif(&exif_data, &mut record));
    } else if exiftool::is_available() {
        match exiftool::extract_raw(path) {
            Ok(dump) => {
                exiftool::apply_dump(&dump, &mut record);
                raw.insert("exiftool".to_string(), dump);
            }
            Err(e) => log::warn!("exiftool failed for {}: {}", path.display(), e),
        }
    }

    if record.width.is_none() || record.height.is_none() {
        match image::image_dimensions(path) {
            Ok((w, h)) => {
                record.width = Some(w as i64);
                record.height = Some(h as i64);
            }
            Err(e) => log::debug!("Could not read dimensions of {}: {}", path.display(), e),
        }
    }

    record.raw = Value::Object(raw);
    record
}

/// Extract video fields via ffprobe. A probe failure yields an empty record.
pub fn extract_video(path: &Path) -> MetadataRecord {
    let mut record = MetadataRecord::default();
    match ffprobe::probe_raw(path) {
        Ok(doc) => {
            ffprobe::apply_probe(&doc, &mut record);
            record.raw = json!({ "ffprobe": doc });
        }
        Err(e) => {
            log::warn!("Metadata probe failed for {}: {}", path.display(), e);
            record.raw = json!({});
        }
    }
    record
}

pub struct MetadataProcessor;

impl Processor for MetadataProcessor {
    fn process(&self, ctx: &JobContext, payload: &Value) -> Result<Value> {
        let media_id = required_str(payload, "mediaId")?;
        required_str(payload, "fileId")?;
        let file_path = required_str(payload, "filePath")?;
        let path = Path::new(file_path);

        let media = ctx.store()
            .with_conn(|conn| schema::get_media(conn, media_id))?
            .ok_or_else(|| MediaflowError::NotFound(format!("media {}", media_id)))?;
        if !path.exists() {
            return Err(MediaflowError::NotFound(format!("file {}", file_path)));
        }

        ctx.progress(10, "extracting");
        let mut record = match media.media_type {
            MediaType::Image => extract_image(path),
            MediaType::Video => extract_video(path),
        };
        record.media_id = media_id.to_string();

        if let Some(sidecar_path) = discover::discover_sidecar(path) {
            ctx.progress(60, "reading sidecar");
            match sidecar::read_sidecar(&sidecar_path) {
                Ok(content) => {
                    sidecar::merge_into(&mut record.raw, content);
                    match ensure_sidecar_row(ctx, &sidecar_path, &media) {
                        Ok(id) => record.sidecar_file_id = Some(id),
                        Err(e) => log::warn!("Failed to record sidecar {}: {}", sidecar_path.display(), e),
                    }
                }
                Err(e) => log::warn!("Failed to parse sidecar {}: {}", sidecar_path.display(), e),
            }
        }

        ctx.store().with_conn(|conn| schema::upsert_metadata(conn, &record))?;
        ctx.stats_changed();

        Ok(json!({
            "mediaId": media_id,
            "width": record.width,
            "height": record.height,
            "sidecarFileId": record.sidecar_file_id,
        }))
    }
}

/// File row id of a sidecar, creating the row when its scan job has not run yet.
fn ensure_sidecar_row(ctx: &JobContext, sidecar_path: &Path, media: &schema::Media) -> Result<String> {
    let path_str = sidecar_path.to_string_lossy().to_string();
    if let Some(existing) = ctx.store().with_conn(|conn| schema::get_file_by_path(conn, &path_str))? {
        return Ok(existing.id);
    }

    let parent_id = ctx.store()
        .with_conn(|conn| schema::get_file(conn, &media.file_id))?
        .and_then(|f| f.parent_id);
    let file = describe_file(sidecar_path, &media.source_id, parent_id)?;
    ctx.store().with_conn(|conn| schema::upsert_file(conn, &file))
}
