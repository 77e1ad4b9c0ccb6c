// Mediaflow CLI binary

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};

use mediaflow::config::AppConfig;
use mediaflow::db::schema::SourceMode;
use mediaflow::jobs::ledger::{JobStatus, RunFilter};
use mediaflow::jobs::progress::LogNotifier;
use mediaflow::jobs::{JobType, QueueAction};
use mediaflow::Mediaflow;

#[derive(Parser)]
#[command(name = "mediaflow")]
#[command(about = "Mediaflow - index media directories and render thumbnails and previews", long_about = None)]
#[command(version)]
struct Cli {
    /// Data directory holding the database and cache
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage media sources
    Source {
        #[command(subcommand)]
        action: SourceCommand,
    },

    /// Inspect and control job queues
    Queue {
        #[command(subcommand)]
        action: QueueCommand,
    },

    /// Inspect the job ledger
    Jobs {
        #[command(subcommand)]
        action: JobsCommand,
    },

    /// Read and write settings
    Settings {
        #[command(subcommand)]
        action: SettingsCommand,
    },

    /// Show library totals and disk space
    Stats,

    /// Run workers until the queues are empty
    Run {
        /// Keep running (watchers and workers) until killed
        #[arg(long)]
        forever: bool,
        /// Give up after this many seconds
        #[arg(long)]
        timeout: Option<u64>,
    },
}

#[derive(Subcommand)]
enum SourceCommand {
    /// Register a directory and queue its scan
    Add {
        path: PathBuf,
        /// Watch for changes after the first scan
        #[arg(long)]
        watch: bool,
    },
    /// List sources
    List,
    /// Queue a fresh scan
    Rescan { id: String },
    /// Remove a source and everything indexed under it
    Remove { id: String },
    /// Turn watch mode on or off
    Watch {
        id: String,
        #[arg(long)]
        off: bool,
    },
    /// Enable or disable a source
    Enable {
        id: String,
        #[arg(long)]
        off: bool,
    },
}

#[derive(Subcommand)]
enum QueueCommand {
    /// Counts per queue
    Status,
    /// Compiled defaults per queue
    Config,
    /// Stop handing out jobs
    Pause { name: String },
    /// Resume a paused queue
    Resume { name: String },
    /// Discard waiting and delayed jobs
    Drain { name: String },
}

#[derive(Subcommand)]
enum JobsCommand {
    /// List recorded jobs, newest first
    List {
        /// Filter by job type (scan, metadata, thumbnail, preview)
        #[arg(long = "type")]
        job_type: Option<String>,
        /// Filter by status (queued, running, completed, failed)
        #[arg(long)]
        status: Option<String>,
        /// Maximum jobs to show
        #[arg(long, default_value = "50")]
        limit: i64,
    },
    /// Show one job with its payload and result
    Show { id: String },
}

#[derive(Subcommand)]
enum SettingsCommand {
    List,
    Get { key: String },
    Set { key: String, value: String },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.data_dir.as_deref())?;
    let app = Mediaflow::open(config, Arc::new(LogNotifier))?;

    match cli.command {
        Commands::Source { action } => cmd_source(&app, action),
        Commands::Queue { action } => cmd_queue(&app, action),
        Commands::Jobs { action: JobsCommand::List { job_type, status, limit } } => cmd_jobs(&app, job_type, status, limit),
        Commands::Jobs { action: JobsCommand::Show { id } } => cmd_job_show(&app, &id),
        Commands::Settings { action } => cmd_settings(&app, action),
        Commands::Stats => cmd_stats(&app),
        Commands::Run { forever, timeout } => cmd_run(&app, forever, timeout),
    }
}

fn cmd_source(app: &Mediaflow, action: SourceCommand) -> Result<()> {
    match action {
        SourceCommand::Add { path, watch } => {
            let mode = if watch { SourceMode::Watch } else { SourceMode::ScanOnce };
            let source = app.add_source(&path, mode)?;
            println!("Added source {} ({})", source.path, source.id);
            println!("Scan queued. Use 'mediaflow run' to process it.");
        }
        SourceCommand::List => {
            let sources = app.list_sources()?;
            if sources.is_empty() {
                println!("No sources. Use 'mediaflow source add <path>' to add one.");
                return Ok(());
            }
            println!("{:<32}  {:>9}  {:>8}  {:>7}  {:>20}  {}", "ID", "Mode", "Status", "Enabled", "Scanned", "Path");
            println!("{}", "-".repeat(100));
            for s in sources {
                println!(
                    "{:<32}  {:>9}  {:>8}  {:>7}  {:>20}  {}",
                    s.id,
                    s.mode.as_str(),
                    s.status.as_str(),
                    if s.enabled { "yes" } else { "no" },
                    s.scanned_at.as_deref().unwrap_or("-"),
                    s.path
                );
            }
        }
        SourceCommand::Rescan { id } => {
            let job_id = app.rescan_source(&id)?;
            println!("Queued scan job {}", job_id);
        }
        SourceCommand::Remove { id } => {
            app.remove_source(&id)?;
            println!("Removed source {}", id);
        }
        SourceCommand::Watch { id, off } => {
            let source = app.set_watch(&id, !off)?;
            println!("Source {} mode: {}", source.id, source.mode.as_str());
        }
        SourceCommand::Enable { id, off } => {
            let source = app.set_source_enabled(&id, !off)?;
            println!("Source {} enabled: {}", source.id, source.enabled);
        }
    }
    Ok(())
}

fn cmd_queue(app: &Mediaflow, action: QueueCommand) -> Result<()> {
    let (name, queue_action) = match action {
        QueueCommand::Status => {
            println!("{:>10}  {:>8}  {:>8}  {:>7}  {:>10}  {:>7}  {}", "Queue", "Waiting", "Delayed", "Active", "Completed", "Failed", "Paused");
            println!("{}", "-".repeat(70));
            for q in app.queue_status()? {
                let c = &q.counts;
                println!(
                    "{:>10}  {:>8}  {:>8}  {:>7}  {:>10}  {:>7}  {}",
                    q.job_type.as_str(), c.waiting, c.delayed, c.active, c.completed, c.failed,
                    if c.paused { "yes" } else { "no" }
                );
            }
            return Ok(());
        }
        QueueCommand::Config => {
            println!("{:>10}  {:>11}  {:>8}  {}", "Queue", "Concurrency", "Delay", "Description");
            println!("{}", "-".repeat(70));
            for c in app.queue_config() {
                println!(
                    "{:>10}  {:>11}  {:>6}ms  {}",
                    c.job_type.as_str(), c.default_concurrency, c.default_delay_ms, c.description
                );
            }
            return Ok(());
        }
        QueueCommand::Pause { name } => (name, QueueAction::Pause),
        QueueCommand::Resume { name } => (name, QueueAction::Resume),
        QueueCommand::Drain { name } => (name, QueueAction::Drain),
    };

    app.control_queue(&name, queue_action)?;
    println!("{:?} applied to queue {}", queue_action, name);
    Ok(())
}

fn cmd_jobs(app: &Mediaflow, job_type: Option<String>, status: Option<String>, limit: i64) -> Result<()> {
    if let Some(t) = &job_type {
        JobType::parse(t).ok_or_else(|| anyhow!("Unknown job type: {}", t))?;
    }
    let status = match status {
        Some(s) => Some(JobStatus::parse(&s).ok_or_else(|| anyhow!("Unknown status: {}", s))?),
        None => None,
    };
    let filter = RunFilter { job_type, status, limit: Some(limit) };

    let jobs = app.list_jobs(&filter)?;
    if jobs.is_empty() {
        println!("No jobs found.");
        return Ok(());
    }

    println!("{:<32}  {:>10}  {:>10}  {:>8}  {:>8}  {}", "ID", "Type", "Status", "Progress", "Attempts", "Name");
    println!("{}", "-".repeat(100));
    for job in jobs {
        println!(
            "{:<32}  {:>10}  {:>10}  {:>7}%  {:>8}  {}",
            job.id, job.job_type, job.status.as_str(), job.progress, job.attempts, job.name
        );
    }
    Ok(())
}

fn cmd_job_show(app: &Mediaflow, id: &str) -> Result<()> {
    let job = app.get_job(id)?.ok_or_else(|| anyhow!("Job {} not found", id))?;

    println!("Job {}", job.id);
    println!();
    println!("Name:        {}", job.name);
    println!("Type:        {}", job.job_type);
    println!("Status:      {}", job.status.as_str());
    println!("Progress:    {}%", job.progress);
    println!("Attempts:    {}", job.attempts);
    println!("Created:     {}", job.created_at);
    if let Some(ref started) = job.started_at {
        println!("Started:     {}", started);
    }
    if let Some(ref completed) = job.completed_at {
        println!("Completed:   {}", completed);
    }
    println!("Payload:     {}", job.data);
    if let Some(ref result) = job.result {
        println!("Result:      {}", result);
    }
    Ok(())
}

fn cmd_settings(app: &Mediaflow, action: SettingsCommand) -> Result<()> {
    match action {
        SettingsCommand::List => {
            let mut raw: Vec<_> = app.raw_settings()?.into_iter().collect();
            raw.sort();
            for (key, value) in raw {
                println!("{} = {}", key, value);
            }
        }
        SettingsCommand::Get { key } => match app.get_setting(&key)? {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Setting not found: {}", key),
        },
        SettingsCommand::Set { key, value } => {
            app.set_setting(&key, &value)?;
            println!("{} = {}", key, value);
        }
    }
    Ok(())
}

fn cmd_stats(app: &Mediaflow) -> Result<()> {
    let stats = app.stats()?;
    println!("Files:       {}", stats.total_files);
    println!("Size:        {}", format_size(stats.total_bytes));
    for (media_type, count) in &stats.media_by_type {
        println!("  {:<10} {}", media_type, count);
    }
    println!(
        "Disk:        {} free of {}",
        format_size(stats.disk_free as i64),
        format_size(stats.disk_total as i64)
    );
    Ok(())
}

fn cmd_run(app: &Mediaflow, forever: bool, timeout: Option<u64>) -> Result<()> {
    let report = app.start()?;
    log::debug!("Reconcile report: {:?}", report);

    if forever {
        println!("Running. Press Ctrl-C to stop.");
        loop {
            std::thread::park();
        }
    }

    let finished = app.wait_until_idle(timeout.map(Duration::from_secs))?;
    app.shutdown();

    for q in app.queue_status()? {
        println!("{:>10}: {} completed, {} failed", q.job_type.as_str(), q.counts.completed, q.counts.failed);
    }
    if !finished {
        anyhow::bail!("Timed out with work still queued");
    }
    Ok(())
}

fn format_size(bytes: i64) -> String {
    const KB: i64 = 1024;
    const MB: i64 = KB * 1024;
    const GB: i64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}
