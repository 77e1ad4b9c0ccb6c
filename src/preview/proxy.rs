// Short transcoded preview clips for video media.
// H.264 at the preview height, capped to the configured duration.

use std::path::Path;
use std::process::Command;

use crate::constants::{
    PREVIEW_AUDIO_CODEC, PREVIEW_CRF, PREVIEW_EXTENSION, PREVIEW_PIXEL_FORMAT, PREVIEW_VIDEO_CODEC,
    TEMP_FILE_PREFIX,
};
use crate::error::{MediaflowError, Result};

#[derive(Debug, Clone, PartialEq)]
pub struct PreviewOptions {
    pub height: u32,
    pub duration_secs: u32,
}

/// Build the ffmpeg argument list for a preview transcode.
pub fn preview_args(source_path: &Path, output_path: &Path, options: &PreviewOptions) -> Vec<String> {
    vec![
        "-y".to_string(),
        "-v".to_string(), "error".to_string(),
        "-i".to_string(), source_path.to_string_lossy().to_string(),
        "-t".to_string(), options.duration_secs.max(1).to_string(),
        // -2 keeps the width even for yuv420p
        "-vf".to_string(), format!("scale=-2:{}", options.height),
        "-c:v".to_string(), PREVIEW_VIDEO_CODEC.to_string(),
        "-preset".to_string(), "veryfast".to_string(),
        "-crf".to_string(), PREVIEW_CRF.to_string(),
        "-pix_fmt".to_string(), PREVIEW_PIXEL_FORMAT.to_string(),
        "-c:a".to_string(), PREVIEW_AUDIO_CODEC.to_string(),
        "-b:a".to_string(), "128k".to_string(),
        "-movflags".to_string(), "+faststart".to_string(),
        output_path.to_string_lossy().to_string(),
    ]
}

/// Transcode a preview. Output appears at `output_path` only on success.
pub fn generate_preview(source_path: &Path, output_path: &Path, options: &PreviewOptions) -> Result<()> {
    let parent = output_path
        .parent()
        .ok_or_else(|| MediaflowError::Other(format!("Invalid preview path: {}", output_path.display())))?;
    std::fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        "{}{}.{}",
        TEMP_FILE_PREFIX,
        uuid::Uuid::new_v4().simple(),
        PREVIEW_EXTENSION
    ));

    let output = Command::new(crate::tools::ffmpeg_path())
        .args(preview_args(source_path, &tmp_path, options))
        .output()
        .map_err(|e| MediaflowError::FFmpeg(format!("Failed to run ffmpeg: {}", e)))?;

    if !output.status.success() {
        let _ = std::fs::remove_file(&tmp_path);
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(MediaflowError::FFmpeg(format!("Preview transcode failed: {}", stderr.trim())));
    }

    match std::fs::metadata(&tmp_path) {
        Ok(m) if m.len() > 0 => {}
        _ => {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(MediaflowError::FFmpeg("Preview file is empty or missing".to_string()));
        }
    }

    if let Err(e) = std::fs::rename(&tmp_path, output_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_args() {
        let opts = PreviewOptions { height: 720, duration_secs: 10 };
        let args = preview_args(Path::new("/in/clip.mov"), Path::new("/out/p.mp4"), &opts);

        let pos = |flag: &str| args.iter().position(|a| a == flag).unwrap();
        assert_eq!(args[pos("-t") + 1], "10");
        assert_eq!(args[pos("-vf") + 1], "scale=-2:720");
        assert_eq!(args[pos("-c:v") + 1], "libx264");
        assert_eq!(args[pos("-pix_fmt") + 1], "yuv420p");
        assert_eq!(args[pos("-movflags") + 1], "+faststart");
        assert_eq!(args.last().unwrap(), "/out/p.mp4");
    }

    #[test]
    fn test_zero_duration_is_clamped() {
        let opts = PreviewOptions { height: 480, duration_secs: 0 };
        let args = preview_args(Path::new("a.mp4"), Path::new("b.mp4"), &opts);
        let pos = args.iter().position(|a| a == "-t").unwrap();
        assert_eq!(args[pos + 1], "1");
    }
}
