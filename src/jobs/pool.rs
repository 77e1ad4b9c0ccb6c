// Worker pool manager
//
// Per job type: no worker -> running(N) -> running(N') ...
// Reconciliation runs once at startup and again on every settings change.
// A type whose desired concurrency is unchanged is left alone. A replaced
// worker is stopped and retired without waiting for its in-flight jobs, so
// a long transcode never holds up another type's change.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;

use crate::error::Result;
use crate::settings::SettingsSnapshot;

use super::registry::Registry;
use super::worker::Worker;
use super::{parse_queue_name, JobEnv, JobType, QueueAction};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub started: Vec<JobType>,
    pub restarted: Vec<JobType>,
    pub unchanged: Vec<JobType>,
    pub skipped: Vec<JobType>,
}

/// Settings override, else compiled default, else 1. Never below 1.
pub fn desired_concurrency(settings: &SettingsSnapshot, job_type: JobType) -> usize {
    settings
        .concurrency_override(job_type.as_str())
        .or_else(|| job_type.default_concurrency())
        .unwrap_or(1)
        .max(1)
}

pub struct WorkerPoolManager {
    registry: Registry,
    env: Arc<JobEnv>,
    // Held for the whole reconciliation so runs never interleave
    workers: Mutex<HashMap<JobType, Worker>>,
    // Stopped workers still finishing their last jobs
    retiring: Mutex<Vec<Worker>>,
    closed: AtomicBool,
}

impl WorkerPoolManager {
    pub fn new(registry: Registry, env: Arc<JobEnv>) -> Self {
        Self {
            registry,
            env,
            workers: Mutex::new(HashMap::new()),
            retiring: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Bring every job type's worker in line with the current settings.
    pub fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();
        if self.closed.load(Ordering::SeqCst) {
            return Ok(report);
        }

        self.reap_retired();

        let settings = self.env.settings.snapshot();
        for key in settings.job_concurrency.keys() {
            if JobType::parse(key).is_none() {
                log::warn!("Ignoring concurrency for unknown job type '{}'", key);
            }
        }

        let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        for job_type in JobType::all() {
            let processor = match self.registry.get(job_type) {
                Some(p) => p,
                None => {
                    log::warn!("No processor registered for {} jobs, skipping", job_type.as_str());
                    report.skipped.push(job_type);
                    continue;
                }
            };

            let desired = desired_concurrency(&settings, job_type);
            let restarting = match workers.get(&job_type) {
                Some(worker) if worker.concurrency() == desired => {
                    report.unchanged.push(job_type);
                    continue;
                }
                Some(_) => true,
                None => false,
            };

            if let Some(old) = workers.remove(&job_type) {
                log::info!(
                    "Reconfiguring {} worker: {} -> {}",
                    job_type.as_str(),
                    old.concurrency(),
                    desired
                );
                old.stop();
                self.retiring.lock().unwrap_or_else(|p| p.into_inner()).push(old);
            }

            let worker = Worker::start(job_type, desired, processor, Arc::clone(&self.env))?;
            workers.insert(job_type, worker);
            if restarting {
                report.restarted.push(job_type);
            } else {
                report.started.push(job_type);
            }
        }

        Ok(report)
    }

    /// Join retired workers whose threads have all exited.
    fn reap_retired(&self) {
        let finished: Vec<Worker> = {
            let mut retiring = self.retiring.lock().unwrap_or_else(|p| p.into_inner());
            let (finished, live): (Vec<Worker>, Vec<Worker>) = retiring.drain(..).partition(|w| w.is_finished());
            *retiring = live;
            finished
        };
        for worker in finished {
            worker.close();
        }
    }

    /// Number of replaced workers still finishing in-flight jobs.
    pub fn retiring(&self) -> usize {
        self.reap_retired();
        self.retiring.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Queue control by name. A drain also hands every discarded payload to
    /// the type's processor.
    pub fn control(&self, name: &str, action: QueueAction) -> Result<()> {
        match action {
            QueueAction::Drain => self.drain(parse_queue_name(name)?).map(|_| ()),
            _ => self.env.queue.control(name, action),
        }
    }

    pub fn drain(&self, job_type: JobType) -> Result<usize> {
        let payloads = self.env.queue.drain(job_type)?;
        if let Some(processor) = self.registry.get(job_type) {
            for payload in &payloads {
                processor.drained(&self.env, payload);
            }
        }
        Ok(payloads.len())
    }

    /// Running concurrency per job type.
    pub fn running(&self) -> Vec<(JobType, usize)> {
        let workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
        let mut running: Vec<_> = workers.iter().map(|(t, w)| (*t, w.concurrency())).collect();
        running.sort();
        running
    }

    /// Reconcile on every settings change until the pool is closed.
    pub fn spawn_settings_listener(self: &Arc<Self>) -> Result<JoinHandle<()>> {
        let rx = self.env.settings.subscribe();
        let pool: Weak<Self> = Arc::downgrade(self);
        let handle = std::thread::Builder::new()
            .name("pool-reconciler".into())
            .spawn(move || loop {
                let changed = rx.recv_timeout(Duration::from_millis(500));
                let pool = match pool.upgrade() {
                    Some(p) if !p.closed.load(Ordering::SeqCst) => p,
                    _ => return,
                };
                match changed {
                    Ok(_) => {
                        // Collapse a burst of writes into one pass
                        while rx.try_recv().is_ok() {}
                        match pool.reconcile() {
                            Ok(report) => log::debug!("Reconciled workers: {:?}", report),
                            Err(e) => log::error!("Worker reconciliation failed: {}", e),
                        }
                    }
                    Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {}
                    Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => return,
                }
            })?;
        Ok(handle)
    }

    /// Close every worker, letting in-flight jobs finish.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut drained: Vec<Worker> = {
            let mut workers = self.workers.lock().unwrap_or_else(|p| p.into_inner());
            workers.drain().map(|(_, w)| w).collect()
        };
        drained.extend(self.retiring.lock().unwrap_or_else(|p| p.into_inner()).drain(..));
        for worker in drained {
            worker.close();
        }
    }
}

impl Drop for WorkerPoolManager {
    fn drop(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
