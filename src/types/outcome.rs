use std::{fmt::Display, time::Duration};

/// Why a task did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The video is removed, private or blocked
    Unavailable,
    /// The extractor returned no information for the reference
    NoInfo,
    /// The remote side rate-limited us
    Throttled,
    /// Any other failure of the external tools
    Transient,
    /// Local filesystem or database failure
    Io,
    /// The channel listing failed
    Listing,
    /// The channel listing was empty
    NoEntries,
}

impl FailureKind {
    /// Whether running the task again later may succeed
    pub fn is_retryable(self) -> bool {
        matches!(self, FailureKind::Throttled | FailureKind::Transient)
    }
}

/// What a task reports back to the queue.
///
/// Tasks never panic nor bubble up errors for a bad reference, the worker
/// decides what to do with the outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskOutcome {
    Done { summary: String },
    Failed { kind: FailureKind, reason: String },
    /// Not attempted, run it again after the delay
    Deferred { delay: Duration, reason: String },
}

impl TaskOutcome {
    pub fn done(summary: impl Into<String>) -> Self {
        TaskOutcome::Done {
            summary: summary.into(),
        }
    }

    pub fn failed(kind: FailureKind, reason: impl Into<String>) -> Self {
        TaskOutcome::Failed {
            kind,
            reason: reason.into(),
        }
    }
}

impl Display for TaskOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskOutcome::Done { summary } => f.write_str(summary),
            TaskOutcome::Failed { kind, reason } => write!(f, "{reason} ({kind:?})"),
            TaskOutcome::Deferred { delay, reason } => {
                write!(f, "{reason}, retrying in {}s", delay.as_secs())
            }
        }
    }
}
