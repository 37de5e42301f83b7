mod bitrate;
mod extension;
mod info;
mod job;
mod metadata;
mod outcome;

pub use bitrate::Bitrate;
pub use extension::AudioFormat;
pub use info::{ChannelListing, VideoInfo, WATCH_URL};
pub use job::{ClaimedJob, Job, JobId, JobState};
pub use metadata::{AudioDocument, MetadataDocument};
pub use outcome::{FailureKind, TaskOutcome};
