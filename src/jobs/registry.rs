// Job type -> processor dispatch table

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::db::Store;
use crate::error::{MediaflowError, Result};
use crate::settings::SettingsSnapshot;

use super::{JobEnv, JobType};

/// How a delivery ended, as seen by the processor's `finished` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    Retrying,
    Failed,
}

/// Everything a processor may touch while running one job.
pub struct JobContext {
    pub job_id: String,
    pub job_type: JobType,
    pub attempt: i64,
    /// Settings as of job start. Later writes do not affect this job.
    pub settings: Arc<SettingsSnapshot>,
    pub env: Arc<JobEnv>,
}

impl JobContext {
    pub fn store(&self) -> &Store {
        &self.env.store
    }

    /// Progress updates are best effort.
    pub fn progress(&self, percent: i64, message: &str) {
        if let Err(e) = self.env.queue.progress(self.job_type, &self.job_id, percent, message) {
            log::warn!("Failed to record progress for job {}: {}", self.job_id, e);
        }
    }

    pub fn enqueue(&self, job_type: JobType, name: &str, payload: Value) -> Result<String> {
        self.env.queue.enqueue(job_type, name, payload)
    }

    pub fn stats_changed(&self) {
        self.env.stats.notify_changed();
    }
}

pub trait Processor: Send + Sync {
    fn process(&self, ctx: &JobContext, payload: &Value) -> Result<Value>;

    /// Called after the outcome of a delivery has been recorded.
    fn finished(&self, _ctx: &JobContext, _payload: &Value, _outcome: JobOutcome) {}

    /// Called for each pending job discarded by a drain.
    fn drained(&self, _env: &Arc<JobEnv>, _payload: &Value) {}
}

/// Static map from job type to its single processor implementation.
#[derive(Clone, Default)]
pub struct Registry {
    processors: HashMap<JobType, Arc<dyn Processor>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production table: one processor per job type.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(JobType::Scan, Arc::new(crate::scan::ScanProcessor));
        registry.register(JobType::Metadata, Arc::new(crate::metadata::MetadataProcessor));
        registry.register(JobType::Thumbnail, Arc::new(crate::preview::ThumbnailProcessor));
        registry.register(JobType::Preview, Arc::new(crate::preview::PreviewProcessor));
        registry
    }

    pub fn register(&mut self, job_type: JobType, processor: Arc<dyn Processor>) {
        self.processors.insert(job_type, processor);
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Processor>> {
        self.processors.get(&job_type).cloned()
    }
}

/// A required string field of a job payload.
pub fn required_str<'a>(payload: &'a Value, field: &str) -> Result<&'a str> {
    payload
        .get(field)
        .and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MediaflowError::Validation(format!("Job payload is missing '{}'", field)))
}

/// An optional string field of a job payload.
pub fn optional_str<'a>(payload: &'a Value, field: &str) -> Option<&'a str> {
    payload.get(field).and_then(|v| v.as_str())
}
