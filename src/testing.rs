//! Test doubles for the external tools and the clock-bound parts of the tasks

use std::{
    fs,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use miette::miette;
use tempfile::TempDir;

use crate::{
    config::Settings,
    database::Sqlite,
    outside::{AudioTags, AudioTarget, AudioTranscoder, FetchOptions, MediaExtractor},
    pacer::Sleeper,
    rate_limiter::{Admission, RateLimiter},
    result::{Error, Result},
    tasks::TaskContext,
    types::VideoInfo,
};

#[derive(Debug, Clone)]
pub enum FakeError {
    Unavailable,
    Throttled,
    Other(&'static str),
}

impl FakeError {
    fn to_error(&self) -> Error {
        match self {
            FakeError::Unavailable => Error::Unavailable("ERROR: Video unavailable".into()),
            FakeError::Throttled => Error::Throttled("HTTP Error 429: Too Many Requests".into()),
            FakeError::Other(msg) => miette!("{msg}").into(),
        }
    }
}

#[derive(Debug, Default)]
pub struct FakeExtractor {
    pub entries: Vec<String>,
    pub listing_error: Option<FakeError>,
    pub info: Option<VideoInfo>,
    pub info_error: Option<FakeError>,
    pub download_error: Option<FakeError>,
    listed: Mutex<Vec<String>>,
    downloads: AtomicUsize,
}

impl FakeExtractor {
    pub fn listed_urls(&self) -> Vec<String> {
        self.listed.lock().unwrap().clone()
    }

    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

impl MediaExtractor for FakeExtractor {
    fn list_channel(&self, url: &str, _opts: &FetchOptions) -> Result<Vec<String>> {
        self.listed.lock().unwrap().push(url.to_owned());
        match &self.listing_error {
            Some(err) => Err(err.to_error()),
            None => Ok(self.entries.clone()),
        }
    }

    fn fetch_info(&self, _video: &str, _opts: &FetchOptions) -> Result<Option<VideoInfo>> {
        match &self.info_error {
            Some(err) => Err(err.to_error()),
            None => Ok(self.info.clone()),
        }
    }

    fn download_audio(&self, _video: &str, out_dir: &Path, _opts: &FetchOptions) -> Result<PathBuf> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = &self.download_error {
            return Err(err.to_error());
        }

        let id = self.info.as_ref().map_or("video", |info| info.id.as_str());
        let path = out_dir.join(format!("{id}.webm"));
        fs::write(&path, b"source audio").unwrap();
        Ok(path)
    }
}

/// Copies the input to the output
#[derive(Debug, Default)]
pub struct FakeTranscoder {
    pub fail: bool,
    calls: Mutex<Vec<(AudioTarget, AudioTags)>>,
}

impl FakeTranscoder {
    pub fn last_call(&self) -> Option<(AudioTarget, AudioTags)> {
        self.calls.lock().unwrap().last().cloned()
    }
}

impl AudioTranscoder for FakeTranscoder {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        tags: &AudioTags,
    ) -> Result<()> {
        self.calls.lock().unwrap().push((*target, tags.clone()));
        if self.fail {
            return Err(miette!("ffmpeg did run but was not successful").into());
        }
        fs::copy(input, output).unwrap();
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct FakeLimiter {
    pub wait: Option<Duration>,
    hosts: Mutex<Vec<String>>,
}

impl FakeLimiter {
    pub fn hosts(&self) -> Vec<String> {
        self.hosts.lock().unwrap().clone()
    }
}

impl RateLimiter for FakeLimiter {
    fn try_acquire(&self, host: &str, _now: i64) -> miette::Result<Admission> {
        self.hosts.lock().unwrap().push(host.to_owned());
        Ok(self.wait.map_or(Admission::Granted, Admission::Wait))
    }
}

/// Records the pauses instead of making them
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    slept: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn slept(&self) -> Vec<Duration> {
        self.slept.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.lock().unwrap().push(duration);
    }
}

/// Owns everything a [`TaskContext`] borrows
pub struct Harness {
    pub _dir: TempDir,
    pub settings: Settings,
    pub extractor: FakeExtractor,
    pub transcoder: FakeTranscoder,
    pub queue: Sqlite,
    pub limiter: FakeLimiter,
    pub sleeper: RecordingSleeper,
}

impl Harness {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.downloads_dir = dir.path().join("downloads");
        fs::create_dir_all(&settings.downloads_dir).unwrap();
        settings.proxy.user_env = "YTHARVEST_TEST_UNSET_PROXY_USER".into();
        settings.proxy.pass_env = "YTHARVEST_TEST_UNSET_PROXY_PASS".into();

        Self {
            _dir: dir,
            settings,
            extractor: FakeExtractor::default(),
            transcoder: FakeTranscoder::default(),
            queue: Sqlite::open_in_memory().unwrap(),
            limiter: FakeLimiter::default(),
            sleeper: RecordingSleeper::default(),
        }
    }

    pub fn ctx(&self) -> TaskContext<'_> {
        TaskContext {
            settings: &self.settings,
            extractor: &self.extractor,
            transcoder: &self.transcoder,
            queue: &self.queue,
            limiter: &self.limiter,
            sleeper: &self.sleeper,
            wake: None,
        }
    }
}

/// What the extractor reports for a regular video
pub fn video_info(id: &str) -> VideoInfo {
    VideoInfo {
        id: id.to_owned(),
        title: Some(format!("Title of {id}")),
        description: Some("A description".into()),
        upload_date: Some("20240131".into()),
        duration: Some(61.0),
        view_count: Some(1234),
        like_count: Some(56),
        channel_id: Some("C".into()),
        channel: Some("Some Channel".into()),
        uploader: None,
        channel_url: Some("https://www.youtube.com/channel/C".into()),
        uploader_url: None,
        webpage_url: Some(format!("https://www.youtube.com/watch?v={id}")),
        acodec: Some("opus".into()),
        asr: Some(48000),
        abr: Some(129.5),
    }
}
