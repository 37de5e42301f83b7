use std::fmt::Display;

pub type JobId = i64;

pub const SCRAPE_CHANNEL: &str = "scrape_channel_videos";
pub const DOWNLOAD_VIDEO: &str = "download_video";

/// A unit of queued work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Job {
    /// List a channel and enqueue one download per video
    ScrapeChannel { channel: String },

    /// Download a single video, the channel is kept for the metadata
    DownloadVideo {
        video: String,
        channel: Option<String>,
    },
}

impl Job {
    pub fn scrape(channel: impl Into<String>) -> Self {
        Job::ScrapeChannel {
            channel: channel.into(),
        }
    }

    pub fn download(video: impl Into<String>, channel: Option<String>) -> Self {
        Job::DownloadVideo {
            video: video.into(),
            channel,
        }
    }

    /// The job name, as stored in the queue
    pub fn name(&self) -> &'static str {
        match self {
            Job::ScrapeChannel { .. } => SCRAPE_CHANNEL,
            Job::DownloadVideo { .. } => DOWNLOAD_VIDEO,
        }
    }

    /// The reference the job works on
    pub fn target(&self) -> &str {
        match self {
            Job::ScrapeChannel { channel } => channel,
            Job::DownloadVideo { video, .. } => video,
        }
    }

    /// The parent channel of a download job
    pub fn parent_channel(&self) -> Option<&str> {
        match self {
            Job::ScrapeChannel { .. } => None,
            Job::DownloadVideo { channel, .. } => channel.as_deref(),
        }
    }

    /// Rebuild a job from its stored columns.
    /// Return None for an unknown job name.
    pub fn from_parts(name: &str, target: String, channel: Option<String>) -> Option<Self> {
        match name {
            SCRAPE_CHANNEL => Some(Job::ScrapeChannel { channel: target }),
            DOWNLOAD_VIDEO => Some(Job::DownloadVideo {
                video: target,
                channel,
            }),
            _ => None,
        }
    }
}

impl Display for Job {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Job::ScrapeChannel { channel } => write!(f, "{SCRAPE_CHANNEL}({channel})"),
            Job::DownloadVideo {
                video,
                channel: Some(channel),
            } => write!(f, "{DOWNLOAD_VIDEO}({video}, {channel})"),
            Job::DownloadVideo {
                video,
                channel: None,
            } => write!(f, "{DOWNLOAD_VIDEO}({video})"),
        }
    }
}

/// A job a worker took ownership of
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: JobId,
    pub job: Job,
    /// Number of times the job has been claimed, this one included
    pub attempts: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    Running,
    Done,
    Failed,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running => "running",
            JobState::Done => "done",
            JobState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobState::Pending),
            "running" => Some(JobState::Running),
            "done" => Some(JobState::Done),
            "failed" => Some(JobState::Failed),
            _ => None,
        }
    }
}
