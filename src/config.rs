use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    time::Duration,
};

use config::{Config, Environment, File};
use miette::{bail, Context, IntoDiagnostic, Result};
use serde::Deserialize;

use crate::types::{AudioFormat, Bitrate};

/// Prefix of the environment variables overriding the configuration
pub const ENV_PREFIX: &str = "YTHARVEST";

/// Configuration file read when none is given on the command line
pub const DEFAULT_CONFIG_FILE: &str = "ytharvest.toml";

/// Every tunable of the tool.
///
/// Values come from, by increasing priority: the defaults below, the TOML
/// configuration file, the `YTHARVEST_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub downloads_dir: PathBuf,
    pub queue_path: PathBuf,
    pub workers: usize,
    /// Browser-exported cookies (Netscape format) used to look like a logged-in session
    pub cookies_file: Option<PathBuf>,
    pub dispatch: DispatchSettings,
    pub scrape: ScrapeSettings,
    pub pacing: PacingSettings,
    pub retry: RetrySettings,
    pub audio: AudioSettings,
    pub proxy: ProxySettings,
    pub queue: QueueSettings,
    pub tools: ToolSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchSettings {
    /// Substring identifying a channel URL in the dispatch file
    pub channel_marker: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScrapeSettings {
    /// Channel tab to list, appended to channel URLs. Empty to list the URL as-is
    pub channel_tab: String,
    pub batch_size: usize,
    pub batch_pause_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PacingSettings {
    /// Delay the extractor waits between its own requests
    pub sleep_requests_secs: f64,
    pub pre_download_min_secs: u64,
    pub pre_download_max_secs: u64,
    /// Per host, across every worker. 0 disables the ceiling
    pub max_downloads_per_hour: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries of the extractor itself for a transfer
    pub fetch_retries: u32,
    pub fragment_retries: u32,
    /// Number of times the queue runs a job before giving up on it
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub multiplier: f64,
    pub jitter: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioSettings {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate: Bitrate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProxySettings {
    pub scheme: String,
    pub host: String,
    pub port: u16,
    /// Name of the environment variable holding the proxy user
    pub user_env: String,
    /// Name of the environment variable holding the proxy password
    pub pass_env: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub poll_interval_secs: u64,
    /// A running job not settled after this long is considered abandoned
    pub stale_after_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolSettings {
    pub yt_dlp: String,
    pub ffmpeg: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            downloads_dir: PathBuf::from("downloads"),
            queue_path: PathBuf::from("ytharvest.sqlite"),
            workers: 2,
            cookies_file: None,
            dispatch: DispatchSettings::default(),
            scrape: ScrapeSettings::default(),
            pacing: PacingSettings::default(),
            retry: RetrySettings::default(),
            audio: AudioSettings::default(),
            proxy: ProxySettings::default(),
            queue: QueueSettings::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            channel_marker: "youtube.com/channel/".to_string(),
        }
    }
}

impl Default for ScrapeSettings {
    fn default() -> Self {
        Self {
            channel_tab: "videos".to_string(),
            batch_size: 10,
            batch_pause_secs: 1.0,
        }
    }
}

impl Default for PacingSettings {
    fn default() -> Self {
        Self {
            sleep_requests_secs: 1.0,
            pre_download_min_secs: 10,
            pre_download_max_secs: 20,
            max_downloads_per_hour: 60,
        }
    }
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            fetch_retries: 10,
            fragment_retries: 10,
            max_attempts: 3,
            initial_backoff_secs: 60,
            max_backoff_secs: 3600,
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            format: AudioFormat::M4a,
            sample_rate: 44000,
            channels: 1,
            bitrate: Bitrate::kbps(128),
        }
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            scheme: "http".to_string(),
            host: "gate.decodo.com".to_string(),
            port: 7000,
            user_env: "DECODO_USER".to_string(),
            pass_env: "DECODO_PASS".to_string(),
        }
    }
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            stale_after_secs: 2 * 3600,
        }
    }
}

impl Default for ToolSettings {
    fn default() -> Self {
        Self {
            yt_dlp: "yt-dlp".to_string(),
            ffmpeg: "ffmpeg".to_string(),
        }
    }
}

impl Settings {
    /// Load the settings from the configuration file and the process environment.
    ///
    /// An explicitly given file must exist. Without one, [`DEFAULT_CONFIG_FILE`]
    /// is read if present.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        Self::load_from(file, None)
    }

    /// Same as [`Settings::load`], with the environment replaced by `env` when given
    pub fn load_from(file: Option<&Path>, env: Option<HashMap<String, String>>) -> Result<Self> {
        let file_source = match file {
            Some(path) => File::from(path).required(true),
            None => File::from(Path::new(DEFAULT_CONFIG_FILE)).required(false),
        };

        let settings: Settings = Config::builder()
            .add_source(file_source)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(env),
            )
            .build()
            .into_diagnostic()
            .wrap_err("Could not read the configuration")?
            .try_deserialize()
            .into_diagnostic()
            .wrap_err("Invalid configuration")?;

        settings.validate()?;
        Ok(settings)
    }

    /// Reject settings that would make the tasks misbehave
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.pacing.pre_download_min_secs > self.pacing.pre_download_max_secs {
            bail!(
                "pacing.pre_download_min_secs ({}) is greater than pacing.pre_download_max_secs ({})",
                self.pacing.pre_download_min_secs,
                self.pacing.pre_download_max_secs
            );
        }
        if self.audio.channels == 0 {
            bail!("audio.channels must be at least 1");
        }
        if self.audio.sample_rate == 0 {
            bail!("audio.sample_rate must not be zero");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.scrape.batch_size == 0 {
            bail!("scrape.batch_size must be at least 1");
        }
        for (key, value) in [
            ("pacing.sleep_requests_secs", self.pacing.sleep_requests_secs),
            ("scrape.batch_pause_secs", self.scrape.batch_pause_secs),
            ("retry.multiplier", self.retry.multiplier),
        ] {
            if !value.is_finite() || value < 0.0 {
                bail!("{key} must be a positive number, got {value}");
            }
        }
        Ok(())
    }
}

impl ScrapeSettings {
    pub fn batch_pause(&self) -> Duration {
        secs_to_duration(self.batch_pause_secs)
    }
}

impl PacingSettings {
    pub fn sleep_requests(&self) -> Duration {
        secs_to_duration(self.sleep_requests_secs)
    }

    /// Pick the pre-download sleep uniformly in the configured window
    pub fn pre_download_delay(&self) -> Duration {
        let min_ms = self.pre_download_min_secs.saturating_mul(1000);
        let max_ms = self.pre_download_max_secs.saturating_mul(1000);
        Duration::from_millis(fastrand::u64(min_ms..=max_ms))
    }
}

impl RetrySettings {
    /// Delay before running a failed job again, after `attempt` failed attempts
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31) as i32;
        let base = self.initial_backoff_secs as f64 * self.multiplier.powi(exponent);
        let capped = base.min(self.max_backoff_secs as f64);

        let delay = if self.jitter {
            // Up to 25% more
            capped + fastrand::f64() * 0.25 * capped
        } else {
            capped
        };

        secs_to_duration(delay)
    }
}

/// Saturate at the bounds instead of panicking, the values come from the user
fn secs_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

impl QueueSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}
