use std::sync::{Mutex, MutexGuard};

use miette::{miette, Result};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};

pub trait MutexUtils<T> {
    /// Lock a mutex and execute a function with its lock.
    /// This makes sure that the mutex is locked only during the function execution.
    ///
    /// A poisoned mutex is reported as an error instead of a panic.
    fn with_lock<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(MutexGuard<'_, T>) -> Result<R>;
}

impl<T> MutexUtils<T> for Mutex<T> {
    fn with_lock<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(MutexGuard<'_, T>) -> Result<R>,
    {
        let guard = self
            .lock()
            .map_err(|_| miette!("Lock poisoned by a panicking thread"))?;
        f(guard)
    }
}

/// Current time as seconds since the unix epoch
pub fn unix_now() -> i64 {
    OffsetDateTime::now_utc().unix_timestamp()
}

/// Current time as an RFC 3339 timestamp, in UTC
pub fn now_rfc3339() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Round to 2 decimals, the precision of every size in the reports
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
