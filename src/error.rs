// Mediaflow Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MediaflowError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// Bad input that a retry will not fix (missing payload fields, bad paths).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Natural-key collision, e.g. a source path that is already registered.
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("FFprobe error: {0}")]
    FFprobe(String),

    #[error("FFmpeg error: {0}")]
    FFmpeg(String),

    #[error("ExifTool error: {0}")]
    ExifTool(String),

    #[error("Hash error: {0}")]
    Hash(String),

    #[error("{0}")]
    Other(String),
}

impl MediaflowError {
    pub fn is_validation(&self) -> bool {
        matches!(self, MediaflowError::Validation(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MediaflowError::Conflict(_))
    }
}

impl From<anyhow::Error> for MediaflowError {
    fn from(err: anyhow::Error) -> Self {
        MediaflowError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, MediaflowError>;
