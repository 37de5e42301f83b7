mod sqlite;

use miette::Result;

pub use sqlite::Sqlite;

use crate::types::{ClaimedJob, Job, JobId};

/// Number of jobs in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueCounts {
    pub pending: usize,
    pub running: usize,
    pub done: usize,
    pub failed: usize,
}

impl QueueCounts {
    /// Nothing left to run nor being run
    pub fn is_drained(&self) -> bool {
        self.pending == 0 && self.running == 0
    }
}

/// A job that ended in the `failed` state
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedJob {
    pub id: JobId,
    pub job: Job,
    pub attempts: u32,
    pub reason: String,
    pub finished_at: i64,
}

/// A durable queue of jobs.
///
/// Jobs go `pending -> running -> done | failed`. A running job can be sent
/// back to pending, either as a retry or as a deferral which does not count
/// as an attempt.
///
/// Every timestamp is in unix seconds and given by the caller, so that the
/// queue never reads the clock itself.
pub trait JobQueue
where
    Self: Sync,
{
    /// Add a job, runnable right away
    fn enqueue(&self, job: &Job, now: i64) -> Result<JobId>;

    /// Take the oldest runnable pending job and mark it running.
    ///
    /// Two concurrent claims **must** never return the same job.
    fn claim(&self, now: i64) -> Result<Option<ClaimedJob>>;

    fn complete(&self, id: JobId, summary: &str, now: i64) -> Result<()>;

    /// Mark the job as failed for good
    fn fail(&self, id: JobId, reason: &str, now: i64) -> Result<()>;

    /// Put the job back to pending, runnable from `at`.
    /// The attempt it just made stays counted.
    fn retry_at(&self, id: JobId, at: i64, reason: &str) -> Result<()>;

    /// Put the job back to pending, runnable from `at`.
    /// The job was not attempted, its attempt is given back.
    fn defer(&self, id: JobId, at: i64, reason: &str) -> Result<()>;

    /// Send back to pending the running jobs claimed before the given time.
    /// Return how many were requeued.
    fn requeue_stale(&self, claimed_before: i64) -> Result<usize>;

    fn counts(&self) -> Result<QueueCounts>;

    /// The most recently failed jobs, newest first
    fn recent_failures(&self, limit: usize) -> Result<Vec<FailedJob>>;

    fn is_drained(&self) -> Result<bool> {
        Ok(self.counts()?.is_drained())
    }
}
