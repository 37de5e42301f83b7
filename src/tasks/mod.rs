mod dispatcher;
mod downloader;
mod scraper;

use std::path::PathBuf;

use crossbeam_channel::{Sender, TrySendError};
use tracing::{debug, warn};

pub use dispatcher::{dispatch_file, parse_dispatch_line};
pub use downloader::download_video;
pub use scraper::{channel_list_url, scrape_channel};

use crate::{
    config::Settings,
    database::JobQueue,
    outside::{AudioTranscoder, FetchOptions, MediaExtractor},
    pacer::Sleeper,
    proxy,
    rate_limiter::RateLimiter,
    result::Error,
    types::{FailureKind, Job, TaskOutcome},
};

/// Everything a task needs, shared by every worker
pub struct TaskContext<'a> {
    pub settings: &'a Settings,
    pub extractor: &'a dyn MediaExtractor,
    pub transcoder: &'a dyn AudioTranscoder,
    pub queue: &'a dyn JobQueue,
    pub limiter: &'a dyn RateLimiter,
    pub sleeper: &'a dyn Sleeper,
    /// Wakes up idle workers when new jobs are enqueued
    pub wake: Option<Sender<()>>,
}

impl TaskContext<'_> {
    /// Execute the job, turning every failure into an outcome
    pub fn run_job(&self, job: &Job) -> TaskOutcome {
        match job {
            Job::ScrapeChannel { channel } => scrape_channel(self, channel),
            Job::DownloadVideo { video, channel } => {
                download_video(self, video, channel.as_deref())
            }
        }
    }

    /// Options of the next extractor requests.
    ///
    /// The proxy is resolved again each time, the gateway rotates addresses
    /// per connection.
    pub fn fetch_options(&self) -> FetchOptions {
        let proxy = proxy::resolve(&self.settings.proxy);
        if let Some(url) = &proxy {
            debug!("Going through proxy {}", proxy::redact(url));
        }

        FetchOptions {
            proxy,
            cookies: self.cookies_file(),
            sleep_requests: self.settings.pacing.sleep_requests(),
            retries: self.settings.retry.fetch_retries,
            fragment_retries: self.settings.retry.fragment_retries,
        }
    }

    fn cookies_file(&self) -> Option<PathBuf> {
        let path = self.settings.cookies_file.as_ref()?;
        if path.is_file() {
            Some(path.clone())
        } else {
            warn!("Cookies file {} not found, going without", path.display());
            None
        }
    }

    /// Tell an idle worker there is something new to claim
    pub fn notify(&self) {
        let Some(wake) = &self.wake else {
            return;
        };

        match wake.try_send(()) {
            // A full channel means a wake-up is already pending
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Disconnected(())) => debug!("No worker to wake up"),
        }
    }
}

/// How the queue should see an error of the external tools
pub fn failure_kind(err: &Error) -> FailureKind {
    match err {
        Error::Unavailable(_) => FailureKind::Unavailable,
        Error::Throttled(_) => FailureKind::Throttled,
        Error::Miette(_) => FailureKind::Transient,
    }
}
