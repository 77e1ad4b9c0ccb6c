// Job broker: per-type durable queues with retry/backoff and bounded history.
//
// The broker knows nothing about job semantics. It stores an opaque payload
// under an id handed to it by the caller and delivers it at least once.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use crate::constants::{JOB_BASE_BACKOFF_MS, JOB_MAX_ATTEMPTS, KEEP_COMPLETED_JOBS, KEEP_FAILED_JOBS};
use crate::db::now_millis;
use crate::error::{MediaflowError, Result};

#[derive(Debug, Clone)]
pub struct BrokerJob {
    pub id: String,
    pub queue: String,
    pub payload: serde_json::Value,
    /// Attempt number of the current delivery, starting at 1.
    pub attempt: i64,
    pub max_attempts: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Scheduled again after `delay_ms`.
    Retrying { attempt: i64, delay_ms: i64 },
    /// Attempts exhausted.
    Failed { attempts: i64 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    pub waiting: i64,
    pub delayed: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub paused: bool,
}

/// Exponential backoff: base, 2x base, 4x base...
pub fn backoff_ms(attempt: i64) -> i64 {
    let exp = (attempt.max(1) - 1).min(20) as u32;
    JOB_BASE_BACKOFF_MS * 2_i64.pow(exp)
}

fn ensure_queue(conn: &Connection, queue: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO broker_queues (name, paused) VALUES (?1, 0) ON CONFLICT(name) DO NOTHING",
        params![queue],
    )?;
    Ok(())
}

/// Submit a job under a caller-provided id.
pub fn submit(conn: &Connection, queue: &str, id: &str, payload: &serde_json::Value) -> Result<()> {
    ensure_queue(conn, queue)?;
    let now = now_millis();
    conn.execute(
        "INSERT INTO broker_jobs (id, queue, payload, state, attempts, max_attempts, available_at, created_at)
         VALUES (?1, ?2, ?3, 'waiting', 0, ?4, ?5, ?5)",
        params![id, queue, serde_json::to_string(payload)?, JOB_MAX_ATTEMPTS, now],
    )?;
    Ok(())
}

/// Claim the oldest due job of a queue. Returns None when the queue is
/// paused or has nothing due.
pub fn claim(conn: &Connection, queue: &str, worker_id: &str) -> Result<Option<BrokerJob>> {
    let result = conn.query_row(
        "UPDATE broker_jobs
         SET state = 'active', attempts = attempts + 1, claimed_by = ?1
         WHERE id = (
             SELECT id FROM broker_jobs
             WHERE queue = ?2
               AND state = 'waiting'
               AND available_at <= ?3
               AND NOT EXISTS (SELECT 1 FROM broker_queues WHERE name = ?2 AND paused = 1)
             ORDER BY available_at ASC, created_at ASC
             LIMIT 1
         )
         RETURNING id, queue, payload, attempts, max_attempts",
        params![worker_id, queue, now_millis()],
        |row| {
            let payload: String = row.get(2)?;
            Ok(BrokerJob {
                id: row.get(0)?,
                queue: row.get(1)?,
                payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
                attempt: row.get(3)?,
                max_attempts: row.get(4)?,
            })
        },
    );

    match result {
        Ok(job) => Ok(Some(job)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(MediaflowError::Database(e)),
    }
}

pub fn complete(conn: &Connection, id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE broker_jobs SET state = 'completed', finished_at = ?1, last_error = NULL, claimed_by = NULL
         WHERE id = ?2 AND state = 'active'",
        params![now_millis(), id],
    )?;
    Ok(rows > 0)
}

/// Record a failed delivery and either schedule a retry or give up.
pub fn fail(conn: &Connection, id: &str, error: &str) -> Result<FailOutcome> {
    let (attempts, max_attempts): (i64, i64) = conn.query_row(
        "SELECT attempts, max_attempts FROM broker_jobs WHERE id = ?1",
        params![id],
        |row| Ok((row.get(0)?, row.get(1)?)),
    ).map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => MediaflowError::NotFound(format!("broker job {}", id)),
        other => MediaflowError::Database(other),
    })?;

    let now = now_millis();
    if attempts >= max_attempts {
        conn.execute(
            "UPDATE broker_jobs SET state = 'failed', last_error = ?1, finished_at = ?2, claimed_by = NULL
             WHERE id = ?3",
            params![error, now, id],
        )?;
        Ok(FailOutcome::Failed { attempts })
    } else {
        let delay_ms = backoff_ms(attempts);
        conn.execute(
            "UPDATE broker_jobs SET state = 'waiting', last_error = ?1, available_at = ?2, claimed_by = NULL
             WHERE id = ?3",
            params![error, now + delay_ms, id],
        )?;
        Ok(FailOutcome::Retrying { attempt: attempts, delay_ms })
    }
}

/// Trim finished history of a queue down to the retention windows.
pub fn trim_history(conn: &Connection, queue: &str) -> Result<usize> {
    let mut removed = 0;
    for (state, keep) in [("completed", KEEP_COMPLETED_JOBS), ("failed", KEEP_FAILED_JOBS)] {
        removed += conn.execute(
            "DELETE FROM broker_jobs
             WHERE queue = ?1 AND state = ?2
               AND id NOT IN (
                   SELECT id FROM broker_jobs
                   WHERE queue = ?1 AND state = ?2
                   ORDER BY finished_at DESC, rowid DESC
                   LIMIT ?3
               )",
            params![queue, state, keep],
        )?;
    }
    Ok(removed)
}

pub fn counts(conn: &Connection, queue: &str) -> Result<QueueCounts> {
    let now = now_millis();
    let mut counts = conn.query_row(
        "SELECT
            COALESCE(SUM(state = 'waiting' AND available_at <= ?2), 0),
            COALESCE(SUM(state = 'waiting' AND available_at > ?2), 0),
            COALESCE(SUM(state = 'active'), 0),
            COALESCE(SUM(state = 'completed'), 0),
            COALESCE(SUM(state = 'failed'), 0)
         FROM broker_jobs WHERE queue = ?1",
        params![queue, now],
        |row| Ok(QueueCounts {
            waiting: row.get(0)?,
            delayed: row.get(1)?,
            active: row.get(2)?,
            completed: row.get(3)?,
            failed: row.get(4)?,
            paused: false,
        }),
    )?;
    counts.paused = is_paused(conn, queue)?;
    Ok(counts)
}

pub fn is_paused(conn: &Connection, queue: &str) -> Result<bool> {
    let paused: Option<bool> = conn.query_row(
        "SELECT paused FROM broker_queues WHERE name = ?1",
        params![queue],
        |row| row.get(0),
    ).optional()?;
    Ok(paused.unwrap_or(false))
}

pub fn set_paused(conn: &Connection, queue: &str, paused: bool) -> Result<()> {
    conn.execute(
        "INSERT INTO broker_queues (name, paused) VALUES (?1, ?2)
         ON CONFLICT(name) DO UPDATE SET paused = excluded.paused",
        params![queue, paused],
    )?;
    Ok(())
}

/// Discard every pending (waiting or delayed) job. Active jobs are left
/// to finish. Returns the discarded ids.
pub fn drain(conn: &Connection, queue: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "DELETE FROM broker_jobs WHERE queue = ?1 AND state = 'waiting' RETURNING id"
    )?;
    let ids = stmt.query_map(params![queue], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Return jobs left active by a previous process to the waiting state.
pub fn reclaim_active(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "UPDATE broker_jobs SET state = 'waiting', claimed_by = NULL, available_at = ?1
         WHERE state = 'active'
         RETURNING id"
    )?;
    let ids = stmt.query_map(params![now_millis()], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(ids)
}

/// Worker identifier: host and process.
pub fn worker_id(thread_index: usize) -> String {
    let hostname = hostname::get()
        .map(|h| h.to_string_lossy().to_string())
        .unwrap_or_else(|_| "unknown".to_string());
    format!("{}:{}:{}", hostname, std::process::id(), thread_index)
}

/// Wakes idle workers when new work is submitted.
/// Waiters re-check the queue on wake or after the timeout, whichever comes first.
pub struct WakeSignal {
    generation: Mutex<u64>,
    cvar: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            cvar: Condvar::new(),
        }
    }

    pub fn generation(&self) -> u64 {
        *self.generation.lock().unwrap_or_else(|p| p.into_inner())
    }

    pub fn notify(&self) {
        let mut generation = self.generation.lock().unwrap_or_else(|p| p.into_inner());
        *generation = generation.wrapping_add(1);
        self.cvar.notify_all();
    }

    /// Block until the generation moves past `seen` or `timeout` elapses.
    pub fn wait(&self, seen: u64, timeout: Duration) {
        let guard = self.generation.lock().unwrap_or_else(|p| p.into_inner());
        let _ = self.cvar
            .wait_timeout_while(guard, timeout, |generation| *generation == seen)
            .unwrap_or_else(|p| p.into_inner());
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use serde_json::json;

    fn setup_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff_ms(1), 1_000);
        assert_eq!(backoff_ms(2), 2_000);
        assert_eq!(backoff_ms(3), 4_000);
    }

    #[test]
    fn test_claim_uses_submitted_id() {
        let conn = setup_test_db();
        submit(&conn, "scan", "job-1", &json!({"path": "/a"})).unwrap();

        let job = claim(&conn, "scan", "w").unwrap().unwrap();
        assert_eq!(job.id, "job-1");
        assert_eq!(job.attempt, 1);
        assert_eq!(job.payload["path"], "/a");

        // Nothing left to claim
        assert!(claim(&conn, "scan", "w").unwrap().is_none());
        assert!(claim(&conn, "metadata", "w").unwrap().is_none());
    }

    #[test]
    fn test_retry_then_fail() {
        let conn = setup_test_db();
        submit(&conn, "thumbnail", "j", &json!({})).unwrap();

        claim(&conn, "thumbnail", "w").unwrap().unwrap();
        assert_eq!(fail(&conn, "j", "e1").unwrap(), FailOutcome::Retrying { attempt: 1, delay_ms: 1_000 });

        // Backoff keeps it out of reach
        assert!(claim(&conn, "thumbnail", "w").unwrap().is_none());
        let c = counts(&conn, "thumbnail").unwrap();
        assert_eq!((c.waiting, c.delayed), (0, 1));

        for expected in [2, 3] {
            conn.execute("UPDATE broker_jobs SET available_at = 0 WHERE id = 'j'", []).unwrap();
            let job = claim(&conn, "thumbnail", "w").unwrap().unwrap();
            assert_eq!(job.attempt, expected);
            let outcome = fail(&conn, "j", "again").unwrap();
            if expected < 3 {
                assert!(matches!(outcome, FailOutcome::Retrying { .. }));
            } else {
                assert_eq!(outcome, FailOutcome::Failed { attempts: 3 });
            }
        }
        assert_eq!(counts(&conn, "thumbnail").unwrap().failed, 1);
    }

    #[test]
    fn test_pause_blocks_claims() {
        let conn = setup_test_db();
        submit(&conn, "scan", "j", &json!({})).unwrap();
        set_paused(&conn, "scan", true).unwrap();
        assert!(claim(&conn, "scan", "w").unwrap().is_none());
        assert!(counts(&conn, "scan").unwrap().paused);

        set_paused(&conn, "scan", false).unwrap();
        assert!(claim(&conn, "scan", "w").unwrap().is_some());
    }

    #[test]
    fn test_drain_leaves_active() {
        let conn = setup_test_db();
        submit(&conn, "scan", "a", &json!({})).unwrap();
        submit(&conn, "scan", "b", &json!({})).unwrap();
        submit(&conn, "scan", "c", &json!({})).unwrap();
        let active = claim(&conn, "scan", "w").unwrap().unwrap();

        let mut drained = drain(&conn, "scan").unwrap();
        drained.sort();
        assert_eq!(drained.len(), 2);
        assert!(!drained.contains(&active.id));

        let c = counts(&conn, "scan").unwrap();
        assert_eq!((c.waiting, c.active), (0, 1));
        assert!(complete(&conn, &active.id).unwrap());
    }

    #[test]
    fn test_history_is_bounded() {
        let conn = setup_test_db();
        let total = KEEP_COMPLETED_JOBS + 5;
        for i in 0..total {
            let id = format!("j{}", i);
            submit(&conn, "metadata", &id, &json!({})).unwrap();
            claim(&conn, "metadata", "w").unwrap().unwrap();
            complete(&conn, &id).unwrap();
        }
        assert_eq!(trim_history(&conn, "metadata").unwrap(), 5);
        assert_eq!(counts(&conn, "metadata").unwrap().completed, KEEP_COMPLETED_JOBS);
    }

    #[test]
    fn test_reclaim_active() {
        let conn = setup_test_db();
        submit(&conn, "scan", "j", &json!({})).unwrap();
        claim(&conn, "scan", "w").unwrap().unwrap();

        assert_eq!(reclaim_active(&conn).unwrap(), vec!["j".to_string()]);
        let job = claim(&conn, "scan", "w").unwrap().unwrap();
        assert_eq!(job.attempt, 2);
    }

    #[test]
    fn test_wake_signal_returns_on_notify() {
        let signal = std::sync::Arc::new(WakeSignal::new());
        let seen = signal.generation();
        let waker = std::sync::Arc::clone(&signal);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            waker.notify();
        });
        let start = std::time::Instant::now();
        signal.wait(seen, Duration::from_secs(5));
        assert!(start.elapsed() < Duration::from_secs(5));
        handle.join().unwrap();
    }
}
