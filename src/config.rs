// Process configuration
//
// Resolution order for each path:
// 1) Explicit value (CLI flag)
// 2) Environment variable (MEDIAFLOW_DATA_DIR, MEDIAFLOW_DB_PATH, MEDIAFLOW_CACHE_DIR)
// 3) Platform data directory from `directories`

use std::env;
use std::path::{Path, PathBuf};

use crate::constants::{CACHE_FOLDER, DB_FILENAME};
use crate::error::{MediaflowError, Result};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub data_dir: PathBuf,
    pub db_path: PathBuf,
    pub cache_root: PathBuf,
}

impl AppConfig {
    /// Lay out database and cache under a single data directory.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            db_path: data_dir.join(DB_FILENAME),
            cache_root: data_dir.join(CACHE_FOLDER),
            data_dir,
        }
    }

    /// Resolve configuration from an optional override plus the environment.
    pub fn resolve(data_dir_override: Option<&Path>) -> Result<Self> {
        let data_dir = match data_dir_override {
            Some(dir) => dir.to_path_buf(),
            None => match env::var("MEDIAFLOW_DATA_DIR") {
                Ok(v) if !v.is_empty() => PathBuf::from(v),
                _ => default_data_dir()?,
            },
        };

        let mut config = Self::with_data_dir(data_dir);

        if let Ok(v) = env::var("MEDIAFLOW_DB_PATH") {
            if !v.is_empty() {
                config.db_path = PathBuf::from(v);
            }
        }
        if let Ok(v) = env::var("MEDIAFLOW_CACHE_DIR") {
            if !v.is_empty() {
                config.cache_root = PathBuf::from(v);
            }
        }

        Ok(config)
    }

    /// Create the data and cache directories if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        std::fs::create_dir_all(&self.cache_root)?;
        if let Some(parent) = self.db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(())
    }
}

fn default_data_dir() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", "mediaflow")
        .ok_or_else(|| MediaflowError::Other("Could not determine data directory".to_string()))?;
    Ok(dirs.data_dir().to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_data_dir_layout() {
        let config = AppConfig::with_data_dir("/srv/media");
        assert_eq!(config.db_path, PathBuf::from("/srv/media/mediaflow.db"));
        assert_eq!(config.cache_root, PathBuf::from("/srv/media/cache"));
    }

    #[test]
    fn test_override_wins() {
        let config = AppConfig::resolve(Some(Path::new("/tmp/override"))).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/override"));
    }
}
