// Cache path layout
//
// <cache_root>/<category>/<size_label>/<shard>/<id>.<ext>
// Path resolution is a pure function of the id, no lookup required.

mod shard;

pub use shard::trie_path;

use std::path::{Path, PathBuf};

use crate::constants::{PREVIEWS_FOLDER, THUMBNAILS_FOLDER};

/// Top-level cache categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheCategory {
    Thumbnails,
    Previews,
}

impl CacheCategory {
    pub fn folder(&self) -> &'static str {
        match self {
            CacheCategory::Thumbnails => THUMBNAILS_FOLDER,
            CacheCategory::Previews => PREVIEWS_FOLDER,
        }
    }
}

/// Build the output path for a rendition. Does not check existence.
pub fn rendition_path(
    cache_root: &Path,
    category: CacheCategory,
    size_label: &str,
    id: &str,
    extension: &str,
) -> PathBuf {
    let mut path = cache_root.join(category.folder()).join(size_label);
    path.push(trie_path(id));
    path.set_extension(extension);
    path
}

/// Write bytes atomically: temp file in the target directory, fsync, rename.
pub fn write_atomic(output_path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    use std::io::Write;

    let parent = output_path.parent().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, "output path has no parent")
    })?;
    std::fs::create_dir_all(parent)?;

    let tmp_path = parent.join(format!(
        "{}{}",
        crate::constants::TEMP_FILE_PREFIX,
        uuid::Uuid::new_v4().simple()
    ));
    {
        let mut file = std::fs::File::create(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if let Err(e) = std::fs::rename(&tmp_path, output_path) {
        let _ = std::fs::remove_file(&tmp_path);
        return Err(e);
    }

    Ok(())
}
