// Source scanner
//
// Recursion is expressed as job fan-out: a directory job records the
// directory and queues one scan job per immediate entry, carrying the
// directory's file id as the children's parent. Nothing recurses in-process.

pub mod discover;
pub mod sources;
pub mod watch;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use walkdir::WalkDir;

use crate::db::schema::{self, MediaType, NewFile, SourceStatus};
use crate::error::{MediaflowError, Result};
use crate::hash::compute_content_hash;
use crate::jobs::ledger;
use crate::jobs::progress::Event;
use crate::jobs::registry::{optional_str, required_str, JobContext, JobOutcome, Processor};
use crate::jobs::{JobEnv, JobType};

pub use sources::{add_source, list_sources, remove_source, rescan_source, set_source_enabled, set_watch};

/// Payload of a scan job.
pub fn scan_payload(source_id: &str, path: &Path, parent_id: Option<&str>, root: bool) -> Value {
    json!({
        "sourceId": source_id,
        "path": path.to_string_lossy(),
        "parentId": parent_id,
        "root": root,
    })
}

pub fn enqueue_scan(env: &JobEnv, source_id: &str, path: &Path, parent_id: Option<&str>, root: bool) -> Result<String> {
    let name = if root {
        format!("scan source {}", path.display())
    } else {
        format!("scan {}", path.display())
    };
    env.queue.enqueue(JobType::Scan, &name, scan_payload(source_id, path, parent_id, root))
}

/// Stat and hash a regular file. Runs without holding the store.
pub fn describe_file(path: &Path, source_id: &str, parent_id: Option<String>) -> Result<NewFile> {
    let meta = std::fs::metadata(path)?;
    let hash = compute_content_hash(path)?;
    let modified_at = meta.modified().ok().map(|t| {
        chrono::DateTime::<chrono::Utc>::from(t).format("%Y-%m-%dT%H:%M:%SZ").to_string()
    });

    Ok(NewFile {
        path: path.to_string_lossy().to_string(),
        name: file_name(path),
        extension: path.extension().and_then(|e| e.to_str()).map(|e| e.to_lowercase()),
        size: meta.len() as i64,
        hash: Some(hash),
        is_directory: false,
        mime_type: discover::mime_type(path).map(String::from),
        parent_id,
        source_id: source_id.to_string(),
        modified_at,
    })
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string_lossy().to_string())
}

pub struct ScanProcessor;

impl Processor for ScanProcessor {
    fn process(&self, ctx: &JobContext, payload: &Value) -> Result<Value> {
        let source_id = required_str(payload, "sourceId")?;
        let path = PathBuf::from(required_str(payload, "path")?);
        let parent_id = optional_str(payload, "parentId").map(String::from);
        let is_root = payload.get("root").and_then(|v| v.as_bool()).unwrap_or(false);

        let source = ctx.store()
            .with_conn(|conn| schema::get_source(conn, source_id))?
            .ok_or_else(|| MediaflowError::NotFound(format!("source {}", source_id)))?;
        if !source.enabled {
            log::info!("Skipping scan of disabled source {}", source.path);
            return Ok(json!({ "skipped": "disabled" }));
        }

        if is_root {
            set_status(&ctx.env, source_id, SourceStatus::Scanning)?;
            let child = enqueue_scan(&ctx.env, source_id, &path, None, false)?;
            return Ok(json!({ "root": true, "next": child }));
        }

        let meta = std::fs::symlink_metadata(&path)?;
        if meta.file_type().is_symlink() {
            return Ok(json!({ "skipped": "symlink" }));
        }
        if meta.is_dir() {
            scan_directory(ctx, source_id, &path, parent_id)
        } else {
            scan_file(ctx, source_id, &path, parent_id)
        }
    }

    fn finished(&self, ctx: &JobContext, payload: &Value, outcome: JobOutcome) {
        let source_id = match optional_str(payload, "sourceId") {
            Some(id) => id,
            None => return,
        };
        let is_root = payload.get("root").and_then(|v| v.as_bool()).unwrap_or(false);

        let result = match outcome {
            JobOutcome::Retrying => Ok(()),
            JobOutcome::Failed if is_root => set_status(&ctx.env, source_id, SourceStatus::Error),
            JobOutcome::Completed | JobOutcome::Failed => finish_if_complete(&ctx.env, source_id),
        };
        if let Err(e) = result {
            log::warn!("Failed to update status of source {}: {}", source_id, e);
        }
    }

    /// A drained scan may have been the last open one for its source.
    fn drained(&self, env: &Arc<JobEnv>, payload: &Value) {
        if let Some(source_id) = optional_str(payload, "sourceId") {
            if let Err(e) = finish_if_complete(env, source_id) {
                log::warn!("Failed to update status of source {}: {}", source_id, e);
            }
        }
    }
}

fn scan_directory(ctx: &JobContext, source_id: &str, path: &Path, parent_id: Option<String>) -> Result<Value> {
    let dir = NewFile {
        path: path.to_string_lossy().to_string(),
        name: file_name(path),
        extension: None,
        size: 0,
        hash: None,
        is_directory: true,
        mime_type: None,
        parent_id,
        source_id: source_id.to_string(),
        modified_at: None,
    };
    let dir_id = ctx.store().with_conn(|conn| schema::upsert_file(conn, &dir))?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(path).min_depth(1).max_depth(1).follow_links(false).sort_by_file_name() {
        match entry {
            Ok(entry) => entries.push(entry.into_path()),
            Err(e) => log::warn!("Skipping unreadable entry in {}: {}", path.display(), e),
        }
    }

    let mut queued = 0;
    for entry in &entries {
        if should_skip(ctx, entry) {
            continue;
        }
        enqueue_scan(&ctx.env, source_id, entry, Some(&dir_id), false)?;
        queued += 1;
    }

    ctx.progress(100, &format!("{} entries", queued));
    Ok(json!({ "directoryId": dir_id, "entries": queued }))
}

fn should_skip(ctx: &JobContext, path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    ctx.settings.is_excluded(name)
        || discover::is_temp_file(path)
        || path.starts_with(&ctx.env.cache_root)
}

fn scan_file(ctx: &JobContext, source_id: &str, path: &Path, parent_id: Option<String>) -> Result<Value> {
    // Hash is recomputed on every scan
    let file = describe_file(path, source_id, parent_id)?;
    let classified = discover::classify(path);

    let (file_id, media_id) = ctx.store().transaction(|conn| {
        let file_id = schema::upsert_file(conn, &file)?;
        let media_id = match classified {
            Some((media_type, mime)) => Some(schema::upsert_media(conn, &file_id, source_id, media_type, mime)?),
            None => None,
        };
        Ok((file_id, media_id))
    })?;

    let mut chained = Vec::new();
    if let (Some(media_id), Some((media_type, _))) = (&media_id, classified) {
        let payload = json!({
            "mediaId": media_id,
            "fileId": file_id,
            "filePath": file.path,
            "sourceId": source_id,
            "mediaType": media_type.as_str(),
        });
        chained.push(JobType::Metadata);
        chained.push(JobType::Thumbnail);
        if media_type == MediaType::Video && ctx.settings.video_previews_enabled {
            chained.push(JobType::Preview);
        }
        for job_type in &chained {
            let name = format!("{} {}", job_type.as_str(), file.name);
            ctx.enqueue(*job_type, &name, payload.clone())?;
        }
    }

    ctx.stats_changed();
    Ok(json!({
        "fileId": file_id,
        "mediaId": media_id,
        "hash": file.hash,
        "chained": chained.iter().map(|t| t.as_str()).collect::<Vec<_>>(),
    }))
}

fn set_status(env: &JobEnv, source_id: &str, status: SourceStatus) -> Result<()> {
    env.store.with_conn(|conn| schema::update_source_status(conn, source_id, status))?;
    env.notifier.emit(Event::SourceStatus {
        source_id: source_id.to_string(),
        status,
    });
    Ok(())
}

/// Move a scanning source to OK once none of its scan jobs remain open.
fn finish_if_complete(env: &JobEnv, source_id: &str) -> Result<()> {
    let finished = env.store.transaction(|conn| {
        if ledger::count_open_scans(conn, source_id)? > 0 {
            return Ok(false);
        }
        match schema::get_source(conn, source_id)? {
            Some(source) if source.status == SourceStatus::Scanning => {
                schema::mark_source_scanned(conn, source_id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    })?;

    if finished {
        log::info!("Source {} scan complete", source_id);
        env.notifier.emit(Event::SourceStatus {
            source_id: source_id.to_string(),
            status: SourceStatus::Ok,
        });
        env.stats.notify_changed();
    }
    Ok(())
}

#[cfg(test)]
mod tests;
