use std::{path::Path, sync::Mutex, time::Duration};

use indoc::indoc;
use miette::{bail, Context, IntoDiagnostic, Result};
use rusqlite::{params, Connection, OptionalExtension, Params, Row, TransactionBehavior};
use tracing::{debug, warn};

use super::{FailedJob, JobQueue, QueueCounts};
use crate::{
    types::{ClaimedJob, Job, JobId, JobState},
    utils::MutexUtils,
};

/// How long a statement waits for another process holding the database lock
const BUSY_TIMEOUT: Duration = Duration::from_secs(30);

/// The job queue and the fetch ledger, in a single sqlite file shared by
/// every worker of every process.
#[derive(Debug)]
pub struct Sqlite {
    conn: Mutex<Connection>,
}

impl Sqlite {
    /// Open the database file, creating it and its tables if needed
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .into_diagnostic()
                .wrap_err("Could not create the queue parent directories")?;
        }

        let conn = Connection::open(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not open sqlite file {}", path.display()))?;

        // Readers do not block the writer, needed with several worker processes
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))
            .into_diagnostic()
            .wrap_err("Could not enable WAL journal")?;

        Self::with_connection(conn)
    }

    /// A private database living as long as the handle
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .into_diagnostic()
            .wrap_err("Could not open in-memory sqlite")?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .into_diagnostic()
            .wrap_err("Could not set busy timeout")?;

        let db = Self {
            conn: Mutex::new(conn),
        };
        db.create_tables().wrap_err("Could not create tables")?;
        Ok(db)
    }

    /// Create the tables if they do not already exist
    fn create_tables(&self) -> Result<()> {
        self.conn.with_lock(|conn| {
            conn.execute_batch(indoc! {"
                BEGIN;
                CREATE TABLE IF NOT EXISTS jobs (
                    id              INTEGER PRIMARY KEY,
                    kind            TEXT NOT NULL,
                    target          TEXT NOT NULL,
                    channel         TEXT,
                    state           TEXT NOT NULL DEFAULT 'pending',
                    attempts        INTEGER NOT NULL DEFAULT 0,
                    available_at    INTEGER NOT NULL,
                    claimed_at      INTEGER,
                    last_error      TEXT,
                    summary         TEXT,
                    created_at      INTEGER NOT NULL,
                    finished_at     INTEGER
                );
                CREATE INDEX IF NOT EXISTS jobs_runnable
                    ON jobs (state, available_at, id);
                CREATE TABLE IF NOT EXISTS fetches (
                    host    TEXT NOT NULL,
                    at      INTEGER NOT NULL
                );
                CREATE INDEX IF NOT EXISTS fetches_by_host
                    ON fetches (host, at);
                COMMIT;
            "})
            .into_diagnostic()
        })
    }

    /// Run a statement settling a running job, failing if the job is not running
    fn settle<P: Params>(&self, id: JobId, what: &str, sql: &str, params: P) -> Result<()> {
        let changed = self.conn.with_lock(|conn| {
            conn.execute(sql, params)
                .into_diagnostic()
                .wrap_err_with(|| format!("Could not {what} job {id}"))
        })?;

        if changed == 0 {
            bail!("Could not {what} job {id}: it is not running");
        }
        debug!("Job {id}: {what}");
        Ok(())
    }

    /// Record a fetch for the host if fewer than `ceiling` were recorded
    /// since `window_start`.
    ///
    /// Return None when recorded, or the time of the oldest fetch still in
    /// the window when the ceiling is reached.
    pub fn admit_fetch(
        &self,
        host: &str,
        now: i64,
        window_start: i64,
        ceiling: u32,
    ) -> Result<Option<i64>> {
        self.conn.with_lock(|mut conn| {
            // Immediate, so that two processes cannot both count then insert
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .into_diagnostic()?;

            tx.execute(
                "DELETE FROM fetches WHERE host = ? AND at <= ?",
                params![host, window_start],
            )
            .into_diagnostic()
            .wrap_err("Could not prune the fetch ledger")?;

            let (count, oldest): (u32, Option<i64>) = tx
                .query_row(
                    "SELECT COUNT(*), MIN(at) FROM fetches WHERE host = ?",
                    [host],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .into_diagnostic()?;

            let res = if count < ceiling {
                tx.execute(
                    "INSERT INTO fetches (host, at) VALUES (?, ?)",
                    params![host, now],
                )
                .into_diagnostic()
                .wrap_err("Could not record the fetch")?;
                None
            } else {
                Some(oldest.unwrap_or(now))
            };

            tx.commit().into_diagnostic()?;
            Ok(res)
        })
    }

    /// Number of fetches per host recorded after the given time
    pub fn fetches_since(&self, since: i64) -> Result<Vec<(String, usize)>> {
        self.conn.with_lock(|conn| {
            let mut stmt = conn
                .prepare(indoc! {"
                    SELECT host, COUNT(*) FROM fetches
                    WHERE at > ?
                    GROUP BY host
                    ORDER BY host
                "})
                .into_diagnostic()?;

            let rows = stmt
                .query_map([since], |row| Ok((row.get(0)?, row.get(1)?)))
                .into_diagnostic()?
                .collect::<rusqlite::Result<Vec<_>>>()
                .into_diagnostic()
                .wrap_err("Could not read the fetch ledger")?;
            Ok(rows)
        })
    }
}

/// Read `kind, target, channel` starting at column `start`
fn job_from_row(row: &Row<'_>, start: usize) -> rusqlite::Result<(String, String, Option<String>)> {
    Ok((row.get(start)?, row.get(start + 1)?, row.get(start + 2)?))
}

impl JobQueue for Sqlite {
    fn enqueue(&self, job: &Job, now: i64) -> Result<JobId> {
        let id = self.conn.with_lock(|conn| {
            conn.query_row(
                indoc! {"
                    INSERT INTO jobs (kind, target, channel, state, available_at, created_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, ?5)
                    RETURNING id
                "},
                params![
                    job.name(),
                    job.target(),
                    job.parent_channel(),
                    JobState::Pending.as_str(),
                    now
                ],
                |row| row.get(0),
            )
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not enqueue {job}"))
        })?;

        debug!("Enqueued {job} as job {id}");
        Ok(id)
    }

    fn claim(&self, now: i64) -> Result<Option<ClaimedJob>> {
        loop {
            let claimed = self.conn.with_lock(|conn| {
                conn.query_row(
                    indoc! {"
                        UPDATE jobs
                        SET state = 'running', attempts = attempts + 1, claimed_at = ?1
                        WHERE id = (
                            SELECT id FROM jobs
                            WHERE state = 'pending' AND available_at <= ?1
                            ORDER BY available_at, id
                            LIMIT 1
                        )
                        RETURNING id, attempts, kind, target, channel
                    "},
                    [now],
                    |row| {
                        Ok((
                            row.get::<_, JobId>(0)?,
                            row.get::<_, u32>(1)?,
                            job_from_row(row, 2)?,
                        ))
                    },
                )
                .optional()
                .into_diagnostic()
                .wrap_err("Could not claim a job")
            })?;

            let Some((id, attempts, (kind, target, channel))) = claimed else {
                return Ok(None);
            };

            match Job::from_parts(&kind, target, channel) {
                Some(job) => return Ok(Some(ClaimedJob { id, job, attempts })),
                None => {
                    warn!("Job {id} has unknown kind '{kind}', failing it");
                    self.fail(id, &format!("unknown job kind: {kind}"), now)?;
                }
            }
        }
    }

    fn complete(&self, id: JobId, summary: &str, now: i64) -> Result<()> {
        self.settle(
            id,
            "complete",
            indoc! {"
                UPDATE jobs
                SET state = 'done', summary = ?2, finished_at = ?3, claimed_at = NULL
                WHERE id = ?1 AND state = 'running'
            "},
            params![id, summary, now],
        )
    }

    fn fail(&self, id: JobId, reason: &str, now: i64) -> Result<()> {
        self.settle(
            id,
            "fail",
            indoc! {"
                UPDATE jobs
                SET state = 'failed', last_error = ?2, finished_at = ?3, claimed_at = NULL
                WHERE id = ?1 AND state = 'running'
            "},
            params![id, reason, now],
        )
    }

    fn retry_at(&self, id: JobId, at: i64, reason: &str) -> Result<()> {
        self.settle(
            id,
            "retry",
            indoc! {"
                UPDATE jobs
                SET state = 'pending', available_at = ?2, last_error = ?3, claimed_at = NULL
                WHERE id = ?1 AND state = 'running'
            "},
            params![id, at, reason],
        )
    }

    fn defer(&self, id: JobId, at: i64, reason: &str) -> Result<()> {
        self.settle(
            id,
            "defer",
            indoc! {"
                UPDATE jobs
                SET state = 'pending', available_at = ?2, last_error = ?3, claimed_at = NULL,
                    attempts = MAX(attempts - 1, 0)
                WHERE id = ?1 AND state = 'running'
            "},
            params![id, at, reason],
        )
    }

    fn requeue_stale(&self, claimed_before: i64) -> Result<usize> {
        self.conn.with_lock(|conn| {
            conn.execute(
                indoc! {"
                    UPDATE jobs
                    SET state = 'pending', claimed_at = NULL, last_error = 'lease expired'
                    WHERE state = 'running' AND claimed_at < ?
                "},
                [claimed_before],
            )
            .into_diagnostic()
            .wrap_err("Could not requeue stale jobs")
        })
    }

    fn counts(&self) -> Result<QueueCounts> {
        let rows: Vec<(String, usize)> = self.conn.with_lock(|conn| {
            let mut stmt = conn
                .prepare("SELECT state, COUNT(*) FROM jobs GROUP BY state")
                .into_diagnostic()?;
            let rows = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
                .into_diagnostic()?
                .collect::<rusqlite::Result<Vec<_>>>()
                .into_diagnostic()
                .wrap_err("Could not count jobs")?;
            Ok(rows)
        })?;

        let mut counts = QueueCounts::default();
        for (state, n) in rows {
            match JobState::parse(&state) {
                Some(JobState::Pending) => counts.pending = n,
                Some(JobState::Running) => counts.running = n,
                Some(JobState::Done) => counts.done = n,
                Some(JobState::Failed) => counts.failed = n,
                None => warn!("{n} jobs in unknown state '{state}'"),
            }
        }
        Ok(counts)
    }

    fn recent_failures(&self, limit: usize) -> Result<Vec<FailedJob>> {
        let rows = self.conn.with_lock(|conn| {
            let mut stmt = conn
                .prepare(indoc! {"
                    SELECT id, attempts, COALESCE(last_error, ''), COALESCE(finished_at, 0),
                           kind, target, channel
                    FROM jobs
                    WHERE state = 'failed'
                    ORDER BY finished_at DESC, id DESC
                    LIMIT ?
                "})
                .into_diagnostic()?;
            let rows = stmt
                .query_map([limit], |row| {
                    Ok((
                        row.get::<_, JobId>(0)?,
                        row.get::<_, u32>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        job_from_row(row, 4)?,
                    ))
                })
                .into_diagnostic()?
                .collect::<rusqlite::Result<Vec<_>>>()
                .into_diagnostic()
                .wrap_err("Could not read failed jobs")?;
            Ok(rows)
        })?;

        Ok(rows
            .into_iter()
            .filter_map(|(id, attempts, reason, finished_at, (kind, target, channel))| {
                Job::from_parts(&kind, target, channel).map(|job| FailedJob {
                    id,
                    job,
                    attempts,
                    reason,
                    finished_at,
                })
            })
            .collect())
    }
}
