// Mediaflow Constants
// Compiled defaults. Runtime-tunable values live in the settings store and
// fall back to these when a key is missing or unparsable.

// Hashing
pub const HASH_ALGORITHM: &str = "blake3";
pub const HASH_CHUNK_SIZE: usize = 1_048_576; // 1MB

// Paths
pub const DB_FILENAME: &str = "mediaflow.db";
pub const CACHE_FOLDER: &str = "cache";
pub const THUMBNAILS_FOLDER: &str = "thumbnails";
pub const PREVIEWS_FOLDER: &str = "previews";
pub const TEMP_FILE_PREFIX: &str = ".mediaflow_tmp_";

// Job settings
pub const JOB_MAX_ATTEMPTS: i64 = 3;
pub const JOB_BASE_BACKOFF_MS: i64 = 1_000;
pub const KEEP_COMPLETED_JOBS: i64 = 100;
pub const KEEP_FAILED_JOBS: i64 = 500;
pub const WORKER_IDLE_POLL_MS: u64 = 500;

// Per-type concurrency defaults
pub const DEFAULT_SCAN_CONCURRENCY: usize = 4;
pub const DEFAULT_METADATA_CONCURRENCY: usize = 2;
pub const DEFAULT_THUMBNAIL_CONCURRENCY: usize = 2;
pub const DEFAULT_PREVIEW_CONCURRENCY: usize = 1;

// Per-type inter-job delay defaults (ms)
pub const DEFAULT_SCAN_DELAY_MS: u64 = 0;
pub const DEFAULT_METADATA_DELAY_MS: u64 = 50;
pub const DEFAULT_THUMBNAIL_DELAY_MS: u64 = 100;
pub const DEFAULT_PREVIEW_DELAY_MS: u64 = 500;
pub const FALLBACK_JOB_DELAY_MS: u64 = 100;

// Thumbnail settings
pub const DEFAULT_THUMBNAIL_RESOLUTION: &str = "240p";
pub const DEFAULT_PREVIEW_RESOLUTION: &str = "720p";
pub const DEFAULT_THUMBNAIL_FORMAT: &str = "jpeg";
pub const DEFAULT_THUMBNAIL_QUALITY: u8 = 80;
pub const FALLBACK_TARGET_HEIGHT: u32 = 240;

// Low-quality image placeholder
pub const LQIP_LABEL: &str = "lqip";
pub const LQIP_HEIGHT: u32 = 32;
pub const LQIP_BLUR_SIGMA: f32 = 2.5;
pub const LQIP_QUALITY: u8 = 30;

// Video preview settings
pub const DEFAULT_PREVIEW_DURATION_SECS: u32 = 10;
pub const PREVIEW_VIDEO_CODEC: &str = "libx264";
pub const PREVIEW_AUDIO_CODEC: &str = "aac";
pub const PREVIEW_PIXEL_FORMAT: &str = "yuv420p";
pub const PREVIEW_CRF: u32 = 28;
pub const PREVIEW_EXTENSION: &str = "mp4";

// Live stats
pub const STATS_THROTTLE_MS: u64 = 2_000;

// Default scan exclusions
pub const DEFAULT_SCAN_EXCLUDE: [&str; 4] = [".git", ".DS_Store", "@eaDir", "node_modules"];

// Sidecar candidates, checked in order against the media file's base name
pub const SIDECAR_EXTENSIONS: [&str; 4] = ["xmp", "XMP", "json", "JSON"];

// Video extensions
pub const VIDEO_EXTENSIONS: [&str; 14] = [
    "mp4", "mov", "avi", "mkv", "mts", "m2ts", "mpg", "mpeg",
    "wmv", "webm", "3gp", "m4v", "ts", "ogv",
];

// Image extensions
pub const IMAGE_EXTENSIONS: [&str; 10] = [
    "jpg", "jpeg", "png", "gif", "bmp", "tif", "tiff", "webp", "heic", "avif",
];
