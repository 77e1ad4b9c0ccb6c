// Per-type worker: N threads pulling from one broker queue.
//
// Threads check the shutdown flag only between jobs, so closing a worker
// lets in-flight jobs finish. Each job runs under catch_unwind so a
// panicking processor fails only its own job.

use std::any::Any;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::constants::{FALLBACK_JOB_DELAY_MS, WORKER_IDLE_POLL_MS};
use crate::error::Result;
use crate::settings::SettingsSnapshot;

use super::broker::{self, BrokerJob, FailOutcome};
use super::registry::{JobContext, JobOutcome, Processor};
use super::{JobEnv, JobType};

pub struct Worker {
    job_type: JobType,
    concurrency: usize,
    env: Arc<JobEnv>,
    shutdown: Arc<AtomicBool>,
    handles: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn start(
        job_type: JobType,
        concurrency: usize,
        processor: Arc<dyn Processor>,
        env: Arc<JobEnv>,
    ) -> Result<Self> {
        let mut worker = Self {
            job_type,
            concurrency,
            env: Arc::clone(&env),
            shutdown: Arc::new(AtomicBool::new(false)),
            handles: Vec::with_capacity(concurrency),
        };

        for index in 0..concurrency {
            let processor = Arc::clone(&processor);
            let env = Arc::clone(&env);
            let shutdown = Arc::clone(&worker.shutdown);
            let spawned = std::thread::Builder::new()
                .name(format!("{}-worker-{}", job_type.as_str(), index))
                .spawn(move || worker_loop(job_type, index, processor, env, shutdown));
            match spawned {
                Ok(handle) => worker.handles.push(handle),
                Err(e) => {
                    worker.close();
                    return Err(e.into());
                }
            }
        }

        log::info!("Started {} worker with concurrency {}", job_type.as_str(), concurrency);
        Ok(worker)
    }

    pub fn job_type(&self) -> JobType {
        self.job_type
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Stop pulling new jobs. In-flight jobs keep running.
    pub fn stop(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.env.queue.wake_signal().notify();
    }

    /// True once every thread has exited.
    pub fn is_finished(&self) -> bool {
        self.handles.iter().all(|h| h.is_finished())
    }

    /// Stop pulling new jobs and wait for in-flight ones to finish.
    pub fn close(mut self) {
        self.stop();
        for handle in std::mem::take(&mut self.handles) {
            if handle.join().is_err() {
                log::error!("{} worker thread panicked outside a job", self.job_type.as_str());
            }
        }
        log::info!("Closed {} worker", self.job_type.as_str());
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Detached threads still stop after their current job
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

/// Delay after each job: settings override, else the type's compiled
/// default, else the global floor.
pub fn inter_job_delay(settings: &SettingsSnapshot, job_type: JobType) -> Duration {
    let ms = settings
        .delay_override_ms(job_type.as_str())
        .or_else(|| job_type.default_delay_ms())
        .unwrap_or(FALLBACK_JOB_DELAY_MS);
    Duration::from_millis(ms)
}

fn worker_loop(
    job_type: JobType,
    index: usize,
    processor: Arc<dyn Processor>,
    env: Arc<JobEnv>,
    shutdown: Arc<AtomicBool>,
) {
    let worker_id = broker::worker_id(index);
    let idle = Duration::from_millis(WORKER_IDLE_POLL_MS);

    while !shutdown.load(Ordering::SeqCst) {
        let seen = env.queue.wake_signal().generation();
        let job = match env.queue.claim(job_type, &worker_id) {
            Ok(Some(job)) => job,
            Ok(None) => {
                env.queue.wake_signal().wait(seen, idle);
                continue;
            }
            Err(e) => {
                log::error!("{} worker: claim failed: {}", job_type.as_str(), e);
                sleep_unless_shutdown(&shutdown, idle);
                continue;
            }
        };

        run_job(job_type, processor.as_ref(), &env, job);

        let delay = inter_job_delay(&env.settings.snapshot(), job_type);
        sleep_unless_shutdown(&shutdown, delay);
    }
}

fn run_job(job_type: JobType, processor: &dyn Processor, env: &Arc<JobEnv>, job: BrokerJob) {
    let ctx = JobContext {
        job_id: job.id.clone(),
        job_type,
        attempt: job.attempt,
        settings: env.settings.snapshot(),
        env: Arc::clone(env),
    };

    log::debug!("Running {} job {} (attempt {})", job_type.as_str(), job.id, job.attempt);

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        processor.process(&ctx, &job.payload)
    }));

    let error = match result {
        Ok(Ok(value)) => match env.queue.complete(job_type, &job, &value) {
            Ok(()) => {
                processor.finished(&ctx, &job.payload, JobOutcome::Completed);
                return;
            }
            Err(e) => {
                log::error!("Failed to record completion of {} job {}: {}", job_type.as_str(), job.id, e);
                return;
            }
        },
        Ok(Err(e)) => e.to_string(),
        Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
    };

    log::error!(
        "{} job {} failed (attempt {}/{}): {} payload={}",
        job_type.as_str(),
        job.id,
        job.attempt,
        job.max_attempts,
        error,
        job.payload
    );

    match env.queue.fail(job_type, &job, &error) {
        Ok(FailOutcome::Retrying { delay_ms, .. }) => {
            log::info!("Retrying {} job {} in {}ms", job_type.as_str(), job.id, delay_ms);
            processor.finished(&ctx, &job.payload, JobOutcome::Retrying);
        }
        Ok(FailOutcome::Failed { .. }) => {
            processor.finished(&ctx, &job.payload, JobOutcome::Failed);
        }
        Err(e) => {
            log::error!("Failed to record failure of {} job {}: {}", job_type.as_str(), job.id, e);
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn sleep_unless_shutdown(shutdown: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !shutdown.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_delay_prefers_override() {
        let mut settings = SettingsSnapshot::default();
        assert_eq!(inter_job_delay(&settings, JobType::Preview), Duration::from_millis(500));

        settings.job_delay_ms = HashMap::from([("preview".to_string(), 5)]);
        assert_eq!(inter_job_delay(&settings, JobType::Preview), Duration::from_millis(5));
        assert_eq!(inter_job_delay(&settings, JobType::Scan), Duration::from_millis(0));
    }

    #[test]
    fn test_panic_message() {
        let caught = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(caught.as_ref()), "boom 1");
    }
}
