// Extension classification and sidecar discovery

use std::path::{Path, PathBuf};

use crate::constants::{IMAGE_EXTENSIONS, SIDECAR_EXTENSIONS, TEMP_FILE_PREFIX, VIDEO_EXTENSIONS};
use crate::db::schema::MediaType;

fn lower_extension(path: &Path) -> Option<String> {
    path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase())
}

/// Mime type by extension. Unknown extensions have none.
pub fn mime_type(path: &Path) -> Option<&'static str> {
    let mime = match lower_extension(path)?.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        "webp" => "image/webp",
        "heic" => "image/heic",
        "avif" => "image/avif",
        "mp4" => "video/mp4",
        "mov" => "video/quicktime",
        "avi" => "video/x-msvideo",
        "mkv" => "video/x-matroska",
        "mts" | "m2ts" | "ts" => "video/mp2t",
        "mpg" | "mpeg" => "video/mpeg",
        "wmv" => "video/x-ms-wmv",
        "webm" => "video/webm",
        "3gp" => "video/3gpp",
        "m4v" => "video/x-m4v",
        "ogv" => "video/ogg",
        "xmp" => "application/rdf+xml",
        "json" => "application/json",
        _ => return None,
    };
    Some(mime)
}

/// Media type and mime for image/video files; None for everything else.
pub fn classify(path: &Path) -> Option<(MediaType, &'static str)> {
    let ext = lower_extension(path)?;
    let media_type = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaType::Image
    } else if VIDEO_EXTENSIONS.contains(&ext.as_str()) {
        MediaType::Video
    } else {
        return None;
    };
    Some((media_type, mime_type(path)?))
}

/// First companion file sharing the media file's base name, checked in
/// candidate-extension order.
pub fn discover_sidecar(media_path: &Path) -> Option<PathBuf> {
    let stem = media_path.file_stem().and_then(|s| s.to_str())?;
    let parent = media_path.parent()?;

    SIDECAR_EXTENSIONS
        .iter()
        .map(|ext| parent.join(format!("{}.{}", stem, ext)))
        .find(|candidate| candidate.is_file())
}

/// Our own in-progress cache writes.
pub fn is_temp_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with(TEMP_FILE_PREFIX))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_classify() {
        assert_eq!(classify(Path::new("/a/IMG_1.JPG")), Some((MediaType::Image, "image/jpeg")));
        assert_eq!(classify(Path::new("/a/clip.mov")), Some((MediaType::Video, "video/quicktime")));
        assert_eq!(classify(Path::new("/a/notes.txt")), None);
        assert_eq!(classify(Path::new("/a/IMG_1.xmp")), None);
        assert_eq!(classify(Path::new("/a/noext")), None);
    }

    #[test]
    fn test_mime_for_sidecars() {
        assert_eq!(mime_type(Path::new("a.XMP")), Some("application/rdf+xml"));
        assert_eq!(mime_type(Path::new("a.bin")), None);
    }

    #[test]
    fn test_discover_sidecar() {
        let tmp = TempDir::new().unwrap();
        let media = tmp.path().join("IMG_1.jpg");
        std::fs::write(&media, b"x").unwrap();
        assert!(discover_sidecar(&media).is_none());

        std::fs::write(tmp.path().join("IMG_1.json"), b"{}").unwrap();
        assert_eq!(discover_sidecar(&media), Some(tmp.path().join("IMG_1.json")));

        // xmp is checked before json
        std::fs::write(tmp.path().join("IMG_1.xmp"), b"<x/>").unwrap();
        assert_eq!(discover_sidecar(&media), Some(tmp.path().join("IMG_1.xmp")));
    }

    #[test]
    fn test_temp_files() {
        assert!(is_temp_file(Path::new("/c/.mediaflow_tmp_abc.jpg")));
        assert!(!is_temp_file(Path::new("/c/abc.jpg")));
    }
}
