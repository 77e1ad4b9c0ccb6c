// Thumbnail rendering
//
// Still frames for videos come from ffmpeg; everything after the decode
// (resize, encode, placeholder blur) runs through the image crate.

use std::io::Cursor;
use std::path::Path;
use std::process::Command;

use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageFormat};

use crate::constants::{LQIP_BLUR_SIGMA, LQIP_HEIGHT, LQIP_QUALITY};
use crate::error::{MediaflowError, Result};
use crate::settings::ThumbnailFormat;

/// Where to grab the poster frame, as a fraction of the duration.
const SEEK_PERCENT: f64 = 0.1;

/// Width for a target height, keeping aspect. Never upscales.
pub fn target_dimensions(width: u32, height: u32, target_height: u32) -> (u32, u32) {
    if height == 0 || width == 0 || height <= target_height {
        return (width, height);
    }
    let scaled = (width as f64 * target_height as f64 / height as f64).round() as u32;
    (scaled.max(1), target_height)
}

pub fn resize_to_height(img: &DynamicImage, target_height: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let (tw, th) = target_dimensions(w, h, target_height);
    if (tw, th) == (w, h) {
        return img.clone();
    }
    img.resize_exact(tw, th, FilterType::Lanczos3)
}

/// Encode in the configured format. Quality applies to JPEG only.
pub fn encode(img: &DynamicImage, format: ThumbnailFormat, quality: u8) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    match format {
        ThumbnailFormat::Jpeg => {
            let rgb = img.to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100));
            encoder.encode_image(&rgb)?;
        }
        ThumbnailFormat::Png => {
            img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
        }
        ThumbnailFormat::Webp => {
            // Lossless only in the image crate
            DynamicImage::ImageRgba8(img.to_rgba8())
                .write_to(&mut Cursor::new(&mut buf), ImageFormat::WebP)?;
        }
    }
    Ok(buf)
}

/// Tiny blurred JPEG used as a placeholder while the real thumbnail loads.
pub fn render_lqip(img: &DynamicImage) -> Result<(Vec<u8>, u32, u32)> {
    let small = resize_to_height(img, LQIP_HEIGHT);
    let blurred = small.blur(LQIP_BLUR_SIGMA);
    let (w, h) = blurred.dimensions();
    let bytes = encode(&blurred, ThumbnailFormat::Jpeg, LQIP_QUALITY)?;
    Ok((bytes, w, h))
}

/// Extract a single frame from a video into `output_path` (format by extension).
pub fn extract_frame(source_path: &Path, output_path: &Path, duration_secs: Option<f64>) -> Result<()> {
    if let Some(parent) = output_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let seek_time = format_duration(seek_seconds(duration_secs));

    let output = Command::new(crate::tools::ffmpeg_path())
        .args(["-y", "-v", "error", "-ss", &seek_time, "-i"])
        .arg(source_path)
        .args(["-frames:v", "1"])
        .arg(output_path)
        .output()
        .map_err(|e| MediaflowError::FFmpeg(format!("Failed to run ffmpeg: {}", e)))?;

    if !output.status.success() {
        let _ = std::fs::remove_file(output_path);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaflowError::FFmpeg(format!("Frame extraction failed: {}", stderr.trim())));
    }

    match std::fs::metadata(output_path) {
        Ok(m) if m.len() > 0 => Ok(()),
        _ => {
            let _ = std::fs::remove_file(output_path);
            Err(MediaflowError::FFmpeg("Extracted frame is empty or missing".to_string()))
        }
    }
}

/// Frame grab offset. Unknown durations seek to the first frame so clips
/// shorter than a second still yield one.
pub fn seek_seconds(duration_secs: Option<f64>) -> f64 {
    duration_secs
        .filter(|d| d.is_finite() && *d > 0.0)
        .map(|d| d * SEEK_PERCENT)
        .unwrap_or(0.0)
}

/// Format seconds as HH:MM:SS.mmm for ffmpeg.
pub fn format_duration(seconds: f64) -> String {
    let hours = (seconds / 3600.0) as u32;
    let minutes = ((seconds % 3600.0) / 60.0) as u32;
    let secs = seconds % 60.0;
    format!("{:02}:{:02}:{:06.3}", hours, minutes, secs)
}
