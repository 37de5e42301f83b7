mod command;
mod ffmpeg;
mod ytdl;

pub use ffmpeg::{AudioTags, AudioTarget, AudioTranscoder, Ffmpeg};
pub use ytdl::{FetchOptions, MediaExtractor, Ytdl};
