// Mediaflow - library entry point
//
// `Mediaflow` owns the store, the job environment, the worker pool, the stats
// broadcaster and the source watchers, and exposes the operations the CLI
// drives.

pub mod cache;
pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod hash;
pub mod jobs;
pub mod metadata;
pub mod preview;
pub mod scan;
pub mod settings;
pub mod stats;
pub mod tools;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use config::AppConfig;
use db::schema::{Source, SourceMode};
use db::Store;
use error::{MediaflowError, Result};
use jobs::ledger::{JobRun, RunFilter};
use jobs::pool::{ReconcileReport, WorkerPoolManager};
use jobs::progress::Notifier;
use jobs::registry::Registry;
use jobs::{JobEnv, QueueAction, QueueConfig, QueueStatus};
use scan::watch::SourceWatcher;
use settings::SettingsSnapshot;
use stats::LiveStats;

const IDLE_POLL: Duration = Duration::from_millis(100);

pub struct Mediaflow {
    config: AppConfig,
    env: Arc<JobEnv>,
    pool: Arc<WorkerPoolManager>,
    watcher: SourceWatcher,
    threads: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl Mediaflow {
    /// Open the store and wire the runtime with the standard processors.
    /// Nothing runs until `start`.
    pub fn open(config: AppConfig, notifier: Arc<dyn Notifier>) -> Result<Self> {
        Self::open_with_registry(config, notifier, Registry::standard())
    }

    pub fn open_with_registry(config: AppConfig, notifier: Arc<dyn Notifier>, registry: Registry) -> Result<Self> {
        config.ensure_dirs()?;
        let store = Arc::new(Store::open(&config.db_path)?);
        log::info!("Opened database at {}", config.db_path.display());

        let env = JobEnv::new(store, notifier, config.cache_root.clone())?;
        let pool = Arc::new(WorkerPoolManager::new(registry, Arc::clone(&env)));
        let watcher = SourceWatcher::new(Arc::clone(&env));

        Ok(Self {
            config,
            env,
            pool,
            watcher,
            threads: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn env(&self) -> &Arc<JobEnv> {
        &self.env
    }

    /// Recover stalled jobs, spin up workers and background threads, and
    /// attach watchers to watch-mode sources.
    pub fn start(&self) -> Result<ReconcileReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(ReconcileReport::default());
        }

        let recovered = self.env.queue.recover_stalled()?;
        if recovered > 0 {
            log::info!("Requeued {} jobs left active by a previous run", recovered);
        }

        tools::log_missing_tools();
        let report = self.pool.reconcile()?;
        log::info!("Workers started: {:?}", self.pool.running());

        {
            let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
            threads.push(self.pool.spawn_settings_listener()?);
            threads.push(self.env.stats.start()?);
        }

        for source in scan::list_sources(&self.env)? {
            if source.enabled && source.mode == SourceMode::Watch {
                if let Err(e) = self.watcher.watch(&source) {
                    log::warn!("Could not watch {}: {}", source.path, e);
                }
            }
        }
        Ok(report)
    }

    /// Stop watchers and workers. In-flight jobs finish first.
    pub fn shutdown(&self) {
        if !self.started.swap(false, Ordering::SeqCst) {
            return;
        }
        log::info!("Shutting down");
        self.watcher.clear();
        self.pool.close();
        self.env.stats.stop();

        let threads: Vec<_> = {
            let mut threads = self.threads.lock().unwrap_or_else(|p| p.into_inner());
            threads.drain(..).collect()
        };
        for handle in threads {
            if handle.join().is_err() {
                log::error!("Background thread panicked during shutdown");
            }
        }
    }

    /// Block until every queue is empty and nothing is running.
    /// Returns false on timeout.
    pub fn wait_until_idle(&self, timeout: Option<Duration>) -> Result<bool> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut idle_polls = 0;
        loop {
            // Two consecutive idle polls so completion hooks can land
            if self.env.queue.is_idle()? {
                idle_polls += 1;
                if idle_polls >= 2 {
                    return Ok(true);
                }
            } else {
                idle_polls = 0;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(false);
            }
            std::thread::sleep(IDLE_POLL);
        }
    }

    // ----- Sources -----

    pub fn add_source(&self, path: &Path, mode: SourceMode) -> Result<Source> {
        let source = scan::add_source(&self.env, path, mode)?;
        if mode == SourceMode::Watch && self.started.load(Ordering::SeqCst) {
            self.watcher.watch(&source)?;
        }
        Ok(source)
    }

    pub fn list_sources(&self) -> Result<Vec<Source>> {
        scan::list_sources(&self.env)
    }

    pub fn get_source(&self, id: &str) -> Result<Source> {
        self.env
            .store
            .with_conn(|conn| db::schema::get_source(conn, id))?
            .ok_or_else(|| MediaflowError::NotFound(format!("source {}", id)))
    }

    pub fn rescan_source(&self, id: &str) -> Result<String> {
        scan::rescan_source(&self.env, id)
    }

    pub fn remove_source(&self, id: &str) -> Result<()> {
        self.watcher.unwatch(id);
        scan::remove_source(&self.env, id)
    }

    pub fn set_source_enabled(&self, id: &str, enabled: bool) -> Result<Source> {
        let source = scan::set_source_enabled(&self.env, id, enabled)?;
        if !enabled {
            self.watcher.unwatch(id);
        } else if source.mode == SourceMode::Watch && self.started.load(Ordering::SeqCst) {
            self.watcher.watch(&source)?;
        }
        Ok(source)
    }

    /// Toggle watch mode; the watcher follows when the runtime is started.
    pub fn set_watch(&self, id: &str, on: bool) -> Result<Source> {
        let source = scan::set_watch(&self.env, id, on)?;
        if !on {
            self.watcher.unwatch(id);
        } else if source.enabled && self.started.load(Ordering::SeqCst) {
            self.watcher.watch(&source)?;
        }
        Ok(source)
    }

    // ----- Queues -----

    pub fn queue_status(&self) -> Result<Vec<QueueStatus>> {
        self.env.queue.status()
    }

    pub fn queue_config(&self) -> Vec<QueueConfig> {
        self.env.queue.config()
    }

    pub fn control_queue(&self, name: &str, action: QueueAction) -> Result<()> {
        self.pool.control(name, action)
    }

    pub fn list_jobs(&self, filter: &RunFilter) -> Result<Vec<JobRun>> {
        self.env.queue.list_runs(filter)
    }

    pub fn get_job(&self, id: &str) -> Result<Option<JobRun>> {
        self.env.queue.get_run(id)
    }

    // ----- Settings -----

    pub fn settings(&self) -> Arc<SettingsSnapshot> {
        self.env.settings.snapshot()
    }

    pub fn raw_settings(&self) -> Result<std::collections::HashMap<String, String>> {
        self.env.settings.raw()
    }

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        self.env.settings.get_raw(key)
    }

    /// Write a setting. Running workers reconcile through the settings listener.
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.env.settings.set(key, value)
    }

    // ----- Stats -----

    pub fn stats(&self) -> Result<LiveStats> {
        stats::collect(&self.env.store, &self.config.cache_root)
    }
}

impl Drop for Mediaflow {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobs::progress::ChannelNotifier;
    use jobs::progress::Event;
    use tempfile::TempDir;

    fn open(tmp: &TempDir) -> (Mediaflow, std::sync::mpsc::Receiver<Event>) {
        let (tx, rx) = std::sync::mpsc::channel();
        let config = AppConfig::with_data_dir(tmp.path().join("data"));
        let app = Mediaflow::open(config, Arc::new(ChannelNotifier::new(tx))).unwrap();
        app.set_setting(
            settings::snapshot::KEY_JOB_DELAY_MS,
            r#"{"scan":0,"metadata":0,"thumbnail":0,"preview":0}"#,
        )
        .unwrap();
        (app, rx)
    }

    #[test]
    fn test_open_start_process_shutdown() {
        let tmp = TempDir::new().unwrap();
        let media = tmp.path().join("media");
        std::fs::create_dir_all(&media).unwrap();
        image::RgbImage::new(40, 30).save(media.join("a.png")).unwrap();

        let (app, rx) = open(&tmp);
        let source = app.add_source(&media, SourceMode::ScanOnce).unwrap();
        app.start().unwrap();
        assert!(app.wait_until_idle(Some(Duration::from_secs(30))).unwrap());

        let deadline = Instant::now() + Duration::from_secs(5);
        while app.get_source(&source.id).unwrap().status != db::schema::SourceStatus::Ok {
            assert!(Instant::now() < deadline, "source never reached OK");
            std::thread::sleep(Duration::from_millis(20));
        }

        let stats = app.stats().unwrap();
        assert_eq!(stats.total_files, 1);
        assert_eq!(stats.media_by_type.get("image"), Some(&1));

        app.shutdown();
        // Second shutdown is a no-op
        app.shutdown();

        let events: Vec<Event> = rx.try_iter().collect();
        assert!(events.iter().any(|e| matches!(
            e,
            Event::SourceStatus { status: db::schema::SourceStatus::Ok, .. }
        )));
    }

    #[test]
    fn test_control_unknown_queue_is_validation() {
        let tmp = TempDir::new().unwrap();
        let (app, _rx) = open(&tmp);
        let err = app.control_queue("bogus", QueueAction::Pause).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_settings_round_trip() {
        let tmp = TempDir::new().unwrap();
        let (app, _rx) = open(&tmp);
        app.set_setting("thumbnail_resolution", "480p").unwrap();
        assert_eq!(app.get_setting("thumbnail_resolution").unwrap().as_deref(), Some("480p"));
        assert_eq!(app.settings().thumbnail_resolution, "480p");
    }
}
