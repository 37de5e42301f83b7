use std::{thread, time::Duration};

use crossbeam_channel::{select, Receiver};
use miette::{miette, Context, IntoDiagnostic, Result};
use tracing::{debug, error, info, warn};

use crate::{
    config::RetrySettings,
    database::JobQueue,
    tasks::TaskContext,
    types::{ClaimedJob, TaskOutcome},
    utils::unix_now,
};

/// What the queue did with a job after it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settlement {
    Completed,
    Failed,
    /// Pending again, runnable from the given time
    Retried { at: i64 },
    Deferred { at: i64 },
}

fn secs_ceil(delay: Duration) -> i64 {
    delay.as_secs_f64().ceil().max(1.0) as i64
}

/// Report the outcome of a job to the queue, retrying it when it failed for a
/// reason that may go away and it has attempts left.
pub fn settle(
    queue: &dyn JobQueue,
    retry: &RetrySettings,
    claimed: &ClaimedJob,
    outcome: &TaskOutcome,
    now: i64,
) -> Result<Settlement> {
    let id = claimed.id;
    match outcome {
        TaskOutcome::Done { summary } => {
            queue.complete(id, summary, now)?;
            Ok(Settlement::Completed)
        }
        TaskOutcome::Failed { kind, reason }
            if kind.is_retryable() && claimed.attempts < retry.max_attempts =>
        {
            let at = now.saturating_add(secs_ceil(retry.backoff(claimed.attempts)));
            queue.retry_at(id, at, reason)?;
            Ok(Settlement::Retried { at })
        }
        TaskOutcome::Failed { reason, .. } => {
            queue.fail(id, reason, now)?;
            Ok(Settlement::Failed)
        }
        TaskOutcome::Deferred { delay, reason } => {
            let at = now.saturating_add(secs_ceil(*delay));
            queue.defer(id, at, reason)?;
            Ok(Settlement::Deferred { at })
        }
    }
}

/// Run `workers` threads claiming and running jobs.
///
/// With `drain`, return once no job is pending nor running. Otherwise run
/// until a worker hits a queue error.
pub fn run_pool(ctx: &TaskContext, wake: &Receiver<()>, workers: usize, drain: bool) -> Result<()> {
    let stale_before = unix_now() - ctx.settings.queue.stale_after_secs as i64;
    let requeued = ctx.queue.requeue_stale(stale_before)?;
    if requeued > 0 {
        warn!("{requeued} jobs were left running by a previous run, requeued them");
    }

    info!("Starting {workers} workers");
    thread::scope(|scope| -> Result<()> {
        let handles = (1..=workers)
            .map(|n| {
                thread::Builder::new()
                    .name(format!("worker-{n}"))
                    .spawn_scoped(scope, move || worker_loop(ctx, wake, drain))
                    .into_diagnostic()
                    .wrap_err("Could not spawn worker thread")
            })
            .collect::<Result<Vec<_>>>()?;

        let mut res = Ok(());
        for handle in handles {
            let worker_res = handle
                .join()
                .unwrap_or_else(|_| Err(miette!("Worker thread panicked")));
            if let Err(err) = worker_res {
                error!("Worker stopped: {err:?}");
                res = Err(err);
            }
        }
        res
    })?;

    info!("All workers stopped");
    Ok(())
}

fn worker_loop(ctx: &TaskContext, wake: &Receiver<()>, drain: bool) -> Result<()> {
    let poll = ctx.settings.queue.poll_interval();
    debug!("Worker started, waiting for jobs");

    loop {
        let Some(claimed) = ctx.queue.claim(unix_now())? else {
            if drain && ctx.queue.is_drained()? {
                debug!("Queue drained, stopping");
                return Ok(());
            }

            select! {
                recv(wake) -> msg => {
                    if msg.is_err() {
                        // Nobody left to wake us up
                        thread::sleep(poll);
                    }
                }
                default(poll) => {}
            }
            continue;
        };

        info!("Running {} (attempt {})", claimed.job, claimed.attempts);
        let outcome = ctx.run_job(&claimed.job);

        let settlement = settle(ctx.queue, &ctx.settings.retry, &claimed, &outcome, unix_now())
            .wrap_err_with(|| format!("Could not settle job {}", claimed.id))?;
        match settlement {
            Settlement::Completed => info!("{}: {outcome}", claimed.job),
            Settlement::Failed => warn!("{}: {outcome}", claimed.job),
            Settlement::Retried { at } => warn!(
                "{}: {outcome}, retrying in {}s",
                claimed.job,
                at - unix_now()
            ),
            Settlement::Deferred { .. } => info!("{}: {outcome}", claimed.job),
        }

        // A job put back in the queue may be for another worker
        if !matches!(settlement, Settlement::Completed | Settlement::Failed) {
            ctx.notify();
        }
    }
}
