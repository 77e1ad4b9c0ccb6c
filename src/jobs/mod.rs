// Job system module
//
// Every submission is two coupled writes under one id: a JobRun row in the
// ledger and a broker job in the queue for that type. Both happen in one
// transaction so the two stores never diverge.

pub mod broker;
pub mod ledger;
pub mod pool;
pub mod progress;
pub mod registry;
pub mod worker;

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::constants::{
    DEFAULT_METADATA_CONCURRENCY, DEFAULT_METADATA_DELAY_MS, DEFAULT_PREVIEW_CONCURRENCY,
    DEFAULT_PREVIEW_DELAY_MS, DEFAULT_SCAN_CONCURRENCY, DEFAULT_SCAN_DELAY_MS,
    DEFAULT_THUMBNAIL_CONCURRENCY, DEFAULT_THUMBNAIL_DELAY_MS,
};
use crate::db::{new_id, Store};
use crate::error::{MediaflowError, Result};
use crate::settings::SettingsCache;
use crate::stats::StatsBroadcaster;

use broker::{BrokerJob, FailOutcome, QueueCounts, WakeSignal};
use ledger::{JobRun, RunFilter};
use progress::{Event, JobProgress, Notifier};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobType {
    Scan,
    Metadata,
    Thumbnail,
    Preview,
}

impl JobType {
    pub fn all() -> [JobType; 4] {
        [JobType::Scan, JobType::Metadata, JobType::Thumbnail, JobType::Preview]
    }

    /// Queue name in the broker and type tag in the ledger.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::Scan => "scan",
            JobType::Metadata => "metadata",
            JobType::Thumbnail => "thumbnail",
            JobType::Preview => "preview",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scan" => Some(JobType::Scan),
            "metadata" => Some(JobType::Metadata),
            "thumbnail" => Some(JobType::Thumbnail),
            "preview" => Some(JobType::Preview),
            _ => None,
        }
    }

    pub fn default_concurrency(&self) -> Option<usize> {
        match self {
            JobType::Scan => Some(DEFAULT_SCAN_CONCURRENCY),
            JobType::Metadata => Some(DEFAULT_METADATA_CONCURRENCY),
            JobType::Thumbnail => Some(DEFAULT_THUMBNAIL_CONCURRENCY),
            JobType::Preview => Some(DEFAULT_PREVIEW_CONCURRENCY),
        }
    }

    pub fn default_delay_ms(&self) -> Option<u64> {
        match self {
            JobType::Scan => Some(DEFAULT_SCAN_DELAY_MS),
            JobType::Metadata => Some(DEFAULT_METADATA_DELAY_MS),
            JobType::Thumbnail => Some(DEFAULT_THUMBNAIL_DELAY_MS),
            JobType::Preview => Some(DEFAULT_PREVIEW_DELAY_MS),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            JobType::Scan => "Walk source directories, hash files and fan out media jobs",
            JobType::Metadata => "Extract EXIF, stream info and sidecar metadata",
            JobType::Thumbnail => "Render thumbnail, preview and placeholder images",
            JobType::Preview => "Transcode short playback previews for videos",
        }
    }
}

/// Queue-level control actions. There is no per-job cancel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueAction {
    Pause,
    Resume,
    /// Discard waiting and delayed jobs. The queue is not paused and
    /// active jobs run to completion.
    Drain,
}

impl QueueAction {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pause" => Some(QueueAction::Pause),
            "resume" => Some(QueueAction::Resume),
            "drain" => Some(QueueAction::Drain),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub job_type: JobType,
    #[serde(flatten)]
    pub counts: QueueCounts,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueConfig {
    pub job_type: JobType,
    pub description: &'static str,
    pub default_concurrency: usize,
    pub default_delay_ms: u64,
}

/// Resolve a queue name to its job type.
pub fn parse_queue_name(name: &str) -> Result<JobType> {
    JobType::parse(name).ok_or_else(|| MediaflowError::Validation(format!("Unknown job type: {}", name)))
}

/// Shared dependencies handed to workers and processors.
pub struct JobEnv {
    pub store: Arc<Store>,
    pub queue: Arc<JobQueue>,
    pub settings: Arc<SettingsCache>,
    pub stats: Arc<StatsBroadcaster>,
    pub notifier: Arc<dyn Notifier>,
    pub cache_root: PathBuf,
}

impl JobEnv {
    /// Load settings and wire the queue and stats broadcaster around one store.
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>, cache_root: PathBuf) -> Result<Arc<Self>> {
        let settings = Arc::new(SettingsCache::load(Arc::clone(&store))?);
        let queue = Arc::new(JobQueue::new(Arc::clone(&store), Arc::clone(&notifier)));
        let stats = Arc::new(StatsBroadcaster::new(
            Arc::clone(&store),
            Arc::clone(&notifier),
            cache_root.clone(),
        ));
        Ok(Arc::new(Self {
            store,
            queue,
            settings,
            stats,
            notifier,
            cache_root,
        }))
    }
}

/// Ledger + broker facade. Owns the wake signal idle workers block on.
pub struct JobQueue {
    store: Arc<Store>,
    notifier: Arc<dyn Notifier>,
    wake: WakeSignal,
}

impl JobQueue {
    pub fn new(store: Arc<Store>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            store,
            notifier,
            wake: WakeSignal::new(),
        }
    }

    pub fn wake_signal(&self) -> &WakeSignal {
        &self.wake
    }

    /// Create the ledger row and submit to the broker under the same id.
    pub fn enqueue(&self, job_type: JobType, name: &str, payload: Value) -> Result<String> {
        let id = new_id();
        self.store.transaction(|conn| {
            ledger::create_run(conn, &id, name, job_type.as_str(), &payload)?;
            broker::submit(conn, job_type.as_str(), &id, &payload)
        })?;
        log::debug!("Queued {} job {} ({})", job_type.as_str(), id, name);
        self.wake.notify();
        Ok(id)
    }

    /// Claim the next due job and mark its ledger row running.
    pub fn claim(&self, job_type: JobType, worker_id: &str) -> Result<Option<BrokerJob>> {
        self.store.transaction(|conn| {
            let job = broker::claim(conn, job_type.as_str(), worker_id)?;
            if let Some(job) = &job {
                ledger::mark_running(conn, &job.id, job.attempt)?;
            }
            Ok(job)
        })
    }

    pub fn complete(&self, job_type: JobType, job: &BrokerJob, result: &Value) -> Result<()> {
        self.store.transaction(|conn| {
            broker::complete(conn, &job.id)?;
            ledger::complete_run(conn, &job.id, result)?;
            broker::trim_history(conn, job_type.as_str())?;
            Ok(())
        })?;
        self.notifier.emit(Event::JobProgress(
            JobProgress::new(&job.id, job_type.as_str(), 100).with_message("completed"),
        ));
        Ok(())
    }

    /// Record a failed attempt. The ledger shows `failed` only once the
    /// broker has exhausted its retries.
    pub fn fail(&self, job_type: JobType, job: &BrokerJob, error: &str) -> Result<FailOutcome> {
        let outcome = self.store.transaction(|conn| {
            let outcome = broker::fail(conn, &job.id, error)?;
            match outcome {
                FailOutcome::Retrying { .. } => ledger::requeue_run(conn, &job.id, Some(error))?,
                FailOutcome::Failed { .. } => {
                    ledger::fail_run(conn, &job.id, error)?;
                    broker::trim_history(conn, job_type.as_str())?;
                }
            }
            Ok(outcome)
        })?;
        if let FailOutcome::Failed { .. } = outcome {
            self.notifier.emit(Event::JobProgress(
                JobProgress::new(&job.id, job_type.as_str(), 0).error(error),
            ));
        }
        Ok(outcome)
    }

    /// Persist and push a progress update for a running job.
    pub fn progress(&self, job_type: JobType, id: &str, percent: i64, message: &str) -> Result<()> {
        self.store.with_conn(|conn| ledger::set_progress(conn, id, percent))?;
        self.notifier.emit(Event::JobProgress(
            JobProgress::new(id, job_type.as_str(), percent).with_message(message),
        ));
        Ok(())
    }

    /// Per-type counts by state plus the paused flag.
    pub fn status(&self) -> Result<Vec<QueueStatus>> {
        JobType::all().iter().map(|t| self.status_of(*t)).collect()
    }

    pub fn status_of(&self, job_type: JobType) -> Result<QueueStatus> {
        let counts = self.store.with_conn(|conn| broker::counts(conn, job_type.as_str()))?;
        Ok(QueueStatus { job_type, counts })
    }

    /// Static per-type configuration and descriptions.
    pub fn config(&self) -> Vec<QueueConfig> {
        JobType::all()
            .iter()
            .map(|t| QueueConfig {
                job_type: *t,
                description: t.description(),
                default_concurrency: t.default_concurrency().unwrap_or(1),
                default_delay_ms: t.default_delay_ms().unwrap_or(crate::constants::FALLBACK_JOB_DELAY_MS),
            })
            .collect()
    }

    /// Run a control action against a queue named by its type tag.
    /// Drain here skips processor hooks; `WorkerPoolManager::control` runs them.
    pub fn control(&self, name: &str, action: QueueAction) -> Result<()> {
        let job_type = parse_queue_name(name)?;
        match action {
            QueueAction::Pause => self.pause(job_type),
            QueueAction::Resume => self.resume(job_type),
            QueueAction::Drain => self.drain(job_type).map(|_| ()),
        }
    }

    pub fn pause(&self, job_type: JobType) -> Result<()> {
        self.store.with_conn(|conn| broker::set_paused(conn, job_type.as_str(), true))?;
        log::info!("Paused {} queue", job_type.as_str());
        Ok(())
    }

    pub fn resume(&self, job_type: JobType) -> Result<()> {
        self.store.with_conn(|conn| broker::set_paused(conn, job_type.as_str(), false))?;
        log::info!("Resumed {} queue", job_type.as_str());
        self.wake.notify();
        Ok(())
    }

    /// Discard pending jobs. Their ledger rows are closed as failed so no
    /// queued row is left without a broker job behind it. Returns the
    /// payloads of the discarded jobs.
    pub fn drain(&self, job_type: JobType) -> Result<Vec<Value>> {
        let payloads = self.store.transaction(|conn| {
            let ids = broker::drain(conn, job_type.as_str())?;
            let mut payloads = Vec::with_capacity(ids.len());
            for id in &ids {
                if let Some(run) = ledger::get_run(conn, id)? {
                    payloads.push(run.data);
                }
                ledger::fail_run(conn, id, "drained")?;
            }
            Ok(payloads)
        })?;
        log::info!("Drained {} pending {} jobs", payloads.len(), job_type.as_str());
        Ok(payloads)
    }

    /// Return jobs left active by a crashed process to the queue.
    pub fn recover_stalled(&self) -> Result<usize> {
        let ids = self.store.transaction(|conn| {
            let ids = broker::reclaim_active(conn)?;
            for id in &ids {
                ledger::requeue_run(conn, id, None)?;
            }
            Ok(ids)
        })?;
        if !ids.is_empty() {
            log::warn!("Recovered {} stalled jobs", ids.len());
            self.wake.notify();
        }
        Ok(ids.len())
    }

    /// True when no queue has waiting, delayed or active work.
    pub fn is_idle(&self) -> Result<bool> {
        for status in self.status()? {
            let c = &status.counts;
            if c.waiting + c.delayed + c.active > 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<JobRun>> {
        self.store.with_conn(|conn| ledger::get_run(conn, id))
    }

    pub fn list_runs(&self, filter: &RunFilter) -> Result<Vec<JobRun>> {
        self.store.with_conn(|conn| ledger::list_runs(conn, filter))
    }

    pub fn count_runs(&self, job_type: JobType) -> Result<i64> {
        self.store.with_conn(|conn| ledger::count_runs(conn, job_type.as_str(), None))
    }
}
