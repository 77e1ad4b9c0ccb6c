// Job ledger: durable record of every submitted unit of work.
// Row ids are shared with the broker; the ledger never generates its own.

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;
use serde_json::Value;

use crate::db::now_rfc3339;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: String,
    pub name: String,
    pub job_type: String,
    pub status: JobStatus,
    pub data: Value,
    pub progress: i64,
    pub result: Option<Value>,
    pub attempts: i64,
    pub created_at: String,
    pub started_at: Option<String>,
    pub completed_at: Option<String>,
}

/// Filter for `list_runs`. Empty fields match everything.
#[derive(Debug, Clone, Default)]
pub struct RunFilter {
    pub job_type: Option<String>,
    pub status: Option<JobStatus>,
    pub limit: Option<i64>,
}

const RUN_COLUMNS: &str =
    "id, name, type, status, data, progress, result, attempts, created_at, started_at, completed_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<JobRun> {
    let status: String = row.get(3)?;
    let data: String = row.get(4)?;
    let result: Option<String> = row.get(6)?;
    Ok(JobRun {
        id: row.get(0)?,
        name: row.get(1)?,
        job_type: row.get(2)?,
        status: JobStatus::parse(&status).unwrap_or(JobStatus::Queued),
        data: serde_json::from_str(&data).unwrap_or(Value::Null),
        progress: row.get(5)?,
        result: result.and_then(|r| serde_json::from_str(&r).ok()),
        attempts: row.get(7)?,
        created_at: row.get(8)?,
        started_at: row.get(9)?,
        completed_at: row.get(10)?,
    })
}

pub fn create_run(conn: &Connection, id: &str, name: &str, job_type: &str, data: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO job_runs (id, name, type, status, data, created_at)
         VALUES (?1, ?2, ?3, 'queued', ?4, ?5)",
        params![id, name, job_type, serde_json::to_string(data)?, now_rfc3339()],
    )?;
    Ok(())
}

pub fn mark_running(conn: &Connection, id: &str, attempt: i64) -> Result<()> {
    conn.execute(
        "UPDATE job_runs SET status = 'running', attempts = ?1, progress = 0,
            started_at = ?2, completed_at = NULL
         WHERE id = ?3",
        params![attempt, now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn set_progress(conn: &Connection, id: &str, percent: i64) -> Result<()> {
    conn.execute(
        "UPDATE job_runs SET progress = ?1 WHERE id = ?2",
        params![percent.clamp(0, 100), id],
    )?;
    Ok(())
}

pub fn complete_run(conn: &Connection, id: &str, result: &Value) -> Result<()> {
    conn.execute(
        "UPDATE job_runs SET status = 'completed', progress = 100, result = ?1, completed_at = ?2
         WHERE id = ?3",
        params![serde_json::to_string(result)?, now_rfc3339(), id],
    )?;
    Ok(())
}

pub fn fail_run(conn: &Connection, id: &str, error: &str) -> Result<()> {
    let result = serde_json::json!({ "error": error });
    conn.execute(
        "UPDATE job_runs SET status = 'failed', result = ?1, completed_at = ?2 WHERE id = ?3",
        params![serde_json::to_string(&result)?, now_rfc3339(), id],
    )?;
    Ok(())
}

/// Back to queued after a retryable failure or a stalled claim.
pub fn requeue_run(conn: &Connection, id: &str, error: Option<&str>) -> Result<()> {
    let result = error.map(|e| serde_json::json!({ "error": e }).to_string());
    conn.execute(
        "UPDATE job_runs SET status = 'queued', progress = 0, result = ?1 WHERE id = ?2",
        params![result, id],
    )?;
    Ok(())
}

pub fn get_run(conn: &Connection, id: &str) -> Result<Option<JobRun>> {
    let sql = format!("SELECT {} FROM job_runs WHERE id = ?1", RUN_COLUMNS);
    Ok(conn.query_row(&sql, params![id], run_from_row).optional()?)
}

pub fn list_runs(conn: &Connection, filter: &RunFilter) -> Result<Vec<JobRun>> {
    let sql = format!(
        "SELECT {} FROM job_runs
         WHERE (?1 IS NULL OR type = ?1) AND (?2 IS NULL OR status = ?2)
         ORDER BY created_at DESC, rowid DESC
         LIMIT ?3",
        RUN_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let runs = stmt.query_map(
        params![
            filter.job_type,
            filter.status.map(|s| s.as_str()),
            filter.limit.unwrap_or(-1),
        ],
        run_from_row,
    )?.collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(runs)
}

/// Count ledger rows of one type, optionally restricted to a status.
pub fn count_runs(conn: &Connection, job_type: &str, status: Option<JobStatus>) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM job_runs WHERE type = ?1 AND (?2 IS NULL OR status = ?2)",
        params![job_type, status.map(|s| s.as_str())],
        |row| row.get(0),
    )?)
}

/// Scan jobs of a source that are still queued or running.
pub fn count_open_scans(conn: &Connection, source_id: &str) -> Result<i64> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM job_runs
         WHERE type = 'scan'
           AND status IN ('queued', 'running')
           AND json_extract(data, '$.sourceId') = ?1",
        params![source_id],
        |row| row.get(0),
    )?)
}
