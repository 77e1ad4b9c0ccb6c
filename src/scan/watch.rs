// Filesystem watchers for sources in watch mode.
// Created and modified paths become ordinary scan jobs.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use crate::db::schema::{self, Source};
use crate::error::{MediaflowError, Result};
use crate::jobs::JobEnv;

use super::{discover, enqueue_scan};

/// One recursive watcher per watched source, keyed by source id.
pub struct SourceWatcher {
    env: Arc<JobEnv>,
    watchers: Mutex<HashMap<String, RecommendedWatcher>>,
}

impl SourceWatcher {
    pub fn new(env: Arc<JobEnv>) -> Self {
        Self {
            env,
            watchers: Mutex::new(HashMap::new()),
        }
    }

    pub fn watch(&self, source: &Source) -> Result<()> {
        let mut watchers = self.watchers.lock().unwrap_or_else(|p| p.into_inner());
        if watchers.contains_key(&source.id) {
            return Ok(());
        }

        let env = Arc::clone(&self.env);
        let source_id = source.id.clone();
        let mut watcher = RecommendedWatcher::new(
            move |result: notify::Result<Event>| match result {
                Ok(event) => handle_event(&env, &source_id, event),
                Err(e) => log::error!("Watcher error for source {}: {}", source_id, e),
            },
            Config::default(),
        ).map_err(|e| MediaflowError::Other(format!("Failed to create watcher: {}", e)))?;

        watcher
            .watch(Path::new(&source.path), RecursiveMode::Recursive)
            .map_err(|e| MediaflowError::Other(format!("Failed to watch {}: {}", source.path, e)))?;

        log::info!("Watching source {}", source.path);
        watchers.insert(source.id.clone(), watcher);
        Ok(())
    }

    /// Dropping the watcher stops it.
    pub fn unwatch(&self, source_id: &str) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|p| p.into_inner());
        if watchers.remove(source_id).is_some() {
            log::info!("Stopped watching source {}", source_id);
        }
    }

    pub fn is_watching(&self, source_id: &str) -> bool {
        let watchers = self.watchers.lock().unwrap_or_else(|p| p.into_inner());
        watchers.contains_key(source_id)
    }

    pub fn clear(&self) {
        let mut watchers = self.watchers.lock().unwrap_or_else(|p| p.into_inner());
        watchers.clear();
    }
}

fn handle_event(env: &JobEnv, source_id: &str, event: Event) {
    let relevant = match event.kind {
        EventKind::Create(_) => true,
        EventKind::Modify(ModifyKind::Data(_)) | EventKind::Modify(ModifyKind::Name(_)) => true,
        _ => false,
    };
    if !relevant {
        return;
    }

    let settings = env.settings.snapshot();
    for path in &event.paths {
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
        if settings.is_excluded(name) || discover::is_temp_file(path) || path.starts_with(&env.cache_root) {
            continue;
        }
        // Renamed-away paths show up here too
        if !path.exists() {
            continue;
        }

        let parent_id = path
            .parent()
            .map(|p| p.to_string_lossy().to_string())
            .and_then(|p| {
                env.store
                    .with_conn(|conn| schema::get_file_by_path(conn, &p))
                    .ok()
                    .flatten()
            })
            .map(|f| f.id);

        if let Err(e) = enqueue_scan(env, source_id, path, parent_id.as_deref(), false) {
            log::warn!("Failed to queue scan for {}: {}", path.display(), e);
        }
    }
}
