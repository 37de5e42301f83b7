use std::time::Duration;

use miette::Result;
use tracing::debug;
use url::Url;

use crate::database::Sqlite;

/// Host used for references that are not URLs (bare video IDs)
pub const DEFAULT_HOST: &str = "www.youtube.com";

/// Width of the sliding window the ceiling applies to
pub const WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Granted,
    /// The ceiling is reached, a slot frees after this long
    Wait(Duration),
}

/// The host a reference points to, which the ceiling is counted per
pub fn host_of(reference: &str) -> String {
    Url::parse(reference.trim())
        .ok()
        .and_then(|url| url.host_str().map(str::to_lowercase))
        .unwrap_or_else(|| DEFAULT_HOST.to_owned())
}

/// Decides whether a download towards a host may start now
pub trait RateLimiter: Sync {
    fn try_acquire(&self, host: &str, now: i64) -> Result<Admission>;
}

/// At most `ceiling` downloads per host over the last hour, counted in the
/// fetch ledger of the queue database so that every worker shares it.
#[derive(Debug)]
pub struct HourlyLimiter<'a> {
    db: &'a Sqlite,
    ceiling: u32,
}

impl<'a> HourlyLimiter<'a> {
    /// A ceiling of 0 lets everything through
    pub fn new(db: &'a Sqlite, ceiling: u32) -> Self {
        Self { db, ceiling }
    }
}

impl RateLimiter for HourlyLimiter<'_> {
    fn try_acquire(&self, host: &str, now: i64) -> Result<Admission> {
        if self.ceiling == 0 {
            return Ok(Admission::Granted);
        }

        let window = WINDOW.as_secs() as i64;
        match self.db.admit_fetch(host, now, now - window, self.ceiling)? {
            None => Ok(Admission::Granted),
            Some(oldest) => {
                let wait = (oldest + window - now).max(1) as u64;
                debug!(
                    "{host}: {} downloads in the last hour, next slot in {wait}s",
                    self.ceiling
                );
                Ok(Admission::Wait(Duration::from_secs(wait)))
            }
        }
    }
}
