// Source lifecycle: add, rescan, remove, enable, watch toggle

use std::path::Path;

use crate::db::schema::{self, Source, SourceMode};
use crate::error::{MediaflowError, Result};
use crate::jobs::JobEnv;

use super::enqueue_scan;

/// Register a directory as a source and queue its root scan.
pub fn add_source(env: &JobEnv, path: &Path, mode: SourceMode) -> Result<Source> {
    if !path.exists() {
        return Err(MediaflowError::Validation(format!("Path does not exist: {}", path.display())));
    }
    if !path.is_dir() {
        return Err(MediaflowError::Validation(format!("Not a directory: {}", path.display())));
    }
    let path = std::fs::canonicalize(path)?;
    let path_str = path.to_string_lossy().to_string();

    let source = env.store.with_conn(|conn| schema::insert_source(conn, &path_str, mode))?;
    log::info!("Added source {} ({})", source.path, source.id);

    enqueue_scan(env, &source.id, &path, None, true)?;
    Ok(source)
}

/// Queue a fresh root scan. Returns the root job id.
pub fn rescan_source(env: &JobEnv, source_id: &str) -> Result<String> {
    let source = get_source(env, source_id)?;
    if !source.enabled {
        return Err(MediaflowError::Validation(format!("Source is disabled: {}", source.path)));
    }
    enqueue_scan(env, &source.id, Path::new(&source.path), None, true)
}

/// Remove a source. Its files, media, metadata and thumbnails cascade.
pub fn remove_source(env: &JobEnv, source_id: &str) -> Result<()> {
    let removed = env.store.with_conn(|conn| schema::delete_source(conn, source_id))?;
    if !removed {
        return Err(MediaflowError::NotFound(format!("source {}", source_id)));
    }
    log::info!("Removed source {}", source_id);
    env.stats.notify_changed();
    Ok(())
}

pub fn set_source_enabled(env: &JobEnv, source_id: &str, enabled: bool) -> Result<Source> {
    get_source(env, source_id)?;
    env.store.with_conn(|conn| schema::update_source_enabled(conn, source_id, enabled))?;
    get_source(env, source_id)
}

/// Switch between scan-once and watch. Turning watch on also rescans.
pub fn set_watch(env: &JobEnv, source_id: &str, on: bool) -> Result<Source> {
    let mode = if on { SourceMode::Watch } else { SourceMode::ScanOnce };
    let source = get_source(env, source_id)?;
    env.store.with_conn(|conn| schema::update_source_mode(conn, source_id, mode))?;
    if on && source.enabled {
        rescan_source(env, source_id)?;
    }
    get_source(env, source_id)
}

pub fn list_sources(env: &JobEnv) -> Result<Vec<Source>> {
    env.store.with_conn(schema::list_sources)
}

fn get_source(env: &JobEnv, source_id: &str) -> Result<Source> {
    env.store
        .with_conn(|conn| schema::get_source(conn, source_id))?
        .ok_or_else(|| MediaflowError::NotFound(format!("source {}", source_id)))
}
