// Push-notification events and sinks

use std::sync::mpsc::Sender;
use std::sync::Mutex;

use serde::Serialize;

use crate::db::schema::SourceStatus;
use crate::stats::LiveStats;

/// Progress payload pushed while a job runs.
/// Every job type uses this same shape.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobProgress {
    pub job_id: String,
    pub job_type: String,
    pub percent: i64,
    pub message: String,
    pub is_error: bool,
    pub error_message: Option<String>,
}

impl JobProgress {
    pub fn new(job_id: impl Into<String>, job_type: impl Into<String>, percent: i64) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            percent: percent.clamp(0, 100),
            message: String::new(),
            is_error: false,
            error_message: None,
        }
    }

    pub fn with_message(mut self, msg: impl Into<String>) -> Self {
        self.message = msg.into();
        self
    }

    pub fn error(mut self, msg: impl Into<String>) -> Self {
        self.is_error = true;
        self.error_message = Some(msg.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "camelCase")]
pub enum Event {
    JobProgress(JobProgress),
    #[serde(rename_all = "camelCase")]
    SourceStatus { source_id: String, status: SourceStatus },
    Stats(LiveStats),
}

/// Push channel for status, progress and stats events.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: Event);
}

/// Writes every event to the log. Used by the CLI.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn emit(&self, event: Event) {
        match &event {
            Event::JobProgress(p) if p.is_error => {
                log::warn!("[{}] {} failed: {}", p.job_type, p.job_id, p.error_message.as_deref().unwrap_or(""));
            }
            Event::JobProgress(p) => {
                log::debug!("[{}] {} {}% {}", p.job_type, p.job_id, p.percent, p.message);
            }
            Event::SourceStatus { source_id, status } => {
                log::info!("Source {} is now {}", source_id, status.as_str());
            }
            Event::Stats(stats) => {
                log::info!(
                    "Stats: {} files, {} bytes, {} media",
                    stats.total_files,
                    stats.total_bytes,
                    stats.media_by_type.values().sum::<i64>()
                );
            }
        }
    }
}

/// Forwards events into a channel.
pub struct ChannelNotifier {
    tx: Mutex<Sender<Event>>,
}

impl ChannelNotifier {
    pub fn new(tx: Sender<Event>) -> Self {
        Self { tx: Mutex::new(tx) }
    }
}

impl Notifier for ChannelNotifier {
    fn emit(&self, event: Event) {
        let tx = self.tx.lock().unwrap_or_else(|p| p.into_inner());
        // Receiver gone means nobody is listening any more
        let _ = tx.send(event);
    }
}
