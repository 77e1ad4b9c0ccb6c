// Renditions for the grid and the viewer
//
// Thumbnail jobs write two size classes plus an LQIP placeholder into the
// thumbnail cache. Preview jobs transcode a short clip for videos.

pub mod proxy;
pub mod thumb;

use std::path::{Path, PathBuf};

use image::{DynamicImage, GenericImageView};
use serde_json::{json, Value};

use crate::cache::{rendition_path, write_atomic, CacheCategory};
use crate::constants::{FALLBACK_TARGET_HEIGHT, LQIP_LABEL, PREVIEW_EXTENSION, TEMP_FILE_PREFIX};
use crate::db::schema::{self, Media, MediaType, Thumbnail};
use crate::error::{MediaflowError, Result};
use crate::jobs::registry::{required_str, JobContext, Processor};
use crate::settings::label_height;

use self::proxy::PreviewOptions;

/// Size labels rendered by a thumbnail job, deduplicated.
pub fn size_classes(thumbnail_label: &str, preview_label: &str) -> Vec<String> {
    let mut labels = vec![thumbnail_label.to_string()];
    if preview_label != thumbnail_label {
        labels.push(preview_label.to_string());
    }
    labels
}

fn load_media(ctx: &JobContext, media_id: &str) -> Result<Media> {
    ctx.store()
        .with_conn(|conn| schema::get_media(conn, media_id))?
        .ok_or_else(|| MediaflowError::NotFound(format!("media {}", media_id)))
}

fn known_duration(ctx: &JobContext, media_id: &str) -> Option<f64> {
    ctx.store()
        .with_conn(|conn| schema::get_metadata(conn, media_id))
        .ok()
        .flatten()
        .and_then(|m| m.duration)
}

/// Decode the source image, grabbing a frame first for videos.
fn decode_source(ctx: &JobContext, media: &Media, path: &Path) -> Result<DynamicImage> {
    match media.media_type {
        MediaType::Image => Ok(image::open(path)?),
        MediaType::Video => {
            let frame_path = ctx.env.cache_root.join(format!(
                "{}{}.png",
                TEMP_FILE_PREFIX,
                uuid::Uuid::new_v4().simple()
            ));
            let result = thumb::extract_frame(path, &frame_path, known_duration(ctx, &media.id))
                .and_then(|_| image::open(&frame_path).map_err(MediaflowError::from));
            let _ = std::fs::remove_file(&frame_path);
            result
        }
    }
}

fn write_rendition(ctx: &JobContext, media_id: &str, label: &str, ext: &str, bytes: &[u8], width: u32, height: u32) -> Result<PathBuf> {
    let output = rendition_path(&ctx.env.cache_root, CacheCategory::Thumbnails, label, media_id, ext);
    write_atomic(&output, bytes)?;
    let thumb = Thumbnail {
        media_id: media_id.to_string(),
        size: label.to_string(),
        path: output.to_string_lossy().to_string(),
        width: width as i64,
        height: height as i64,
    };
    ctx.store().with_conn(|conn| schema::upsert_thumbnail(conn, &thumb))?;
    Ok(output)
}

pub struct ThumbnailProcessor;

impl Processor for ThumbnailProcessor {
    fn process(&self, ctx: &JobContext, payload: &Value) -> Result<Value> {
        let media_id = required_str(payload, "mediaId")?;
        let file_path = required_str(payload, "filePath")?;
        let path = Path::new(file_path);
        let media = load_media(ctx, media_id)?;

        let settings = &ctx.settings;
        let source = decode_source(ctx, &media, path)?;
        ctx.progress(20, "decoded");

        let mut written = Vec::new();

        // Placeholder does not depend on the size classes and is best effort
        match thumb::render_lqip(&source)
            .and_then(|(bytes, w, h)| write_rendition(ctx, media_id, LQIP_LABEL, "jpg", &bytes, w, h))
        {
            Ok(_) => written.push(LQIP_LABEL.to_string()),
            Err(e) => log::warn!("Failed to write placeholder for media {}: {}", media_id, e),
        }

        let mut first_error = None;
        for label in size_classes(&settings.thumbnail_resolution, &settings.preview_resolution) {
            let target = label_height(&label, FALLBACK_TARGET_HEIGHT);
            let resized = thumb::resize_to_height(&source, target);
            let (w, h) = resized.dimensions();
            let result = thumb::encode(&resized, settings.thumbnail_format, settings.thumbnail_quality)
                .and_then(|bytes| write_rendition(ctx, media_id, &label, settings.thumbnail_format.extension(), &bytes, w, h));
            match result {
                Ok(out) => {
                    log::debug!("Wrote {} thumbnail {}", label, out.display());
                    written.push(label);
                }
                Err(e) => {
                    log::warn!("Failed to write {} thumbnail for media {}: {}", label, media_id, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        ctx.progress(80, "thumbnails written");
        ctx.stats_changed();

        if let Some(e) = first_error {
            return Err(e);
        }
        Ok(json!({ "mediaId": media_id, "sizes": written }))
    }
}

pub struct PreviewProcessor;

impl Processor for PreviewProcessor {
    fn process(&self, ctx: &JobContext, payload: &Value) -> Result<Value> {
        let media_id = required_str(payload, "mediaId")?;
        let file_path = required_str(payload, "filePath")?;
        let media = load_media(ctx, media_id)?;
        if media.media_type != MediaType::Video {
            return Ok(json!({ "mediaId": media_id, "skipped": "not a video" }));
        }

        let settings = &ctx.settings;
        let label = settings.preview_resolution.clone();
        let options = PreviewOptions {
            height: label_height(&label, FALLBACK_TARGET_HEIGHT),
            duration_secs: settings.preview_duration,
        };
        let output = rendition_path(&ctx.env.cache_root, CacheCategory::Previews, &label, media_id, PREVIEW_EXTENSION);

        ctx.progress(10, "transcoding");
        proxy::generate_preview(Path::new(file_path), &output, &options)?;
        ctx.stats_changed();

        Ok(json!({
            "mediaId": media_id,
            "size": label,
            "path": output.to_string_lossy(),
        }))
    }
}
