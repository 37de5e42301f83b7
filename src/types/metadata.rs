use std::fmt::Display;

use serde::{Deserialize, Serialize};

/// The JSON document written beside every downloaded audio file.
///
/// Field names are read back by the `stats` command and by external tooling,
/// do not rename them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataDocument {
    pub video_id: String,
    pub channel_url: Option<String>,
    pub channel_id: Option<String>,
    pub channel_name: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub upload_date: Option<String>,
    pub duration_sec: Option<u64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub webpage_url: Option<String>,
    pub downloaded_at: String,
    pub audio: AudioDocument,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDocument {
    pub codec: String,
    /// The configured rate. The encoder may have snapped it to the nearest
    /// rate it supports, probe the file for the encoded one.
    pub sample_rate: u32,
    pub channels: u8,
    pub original_codec: Option<String>,
    pub original_sample_rate: Option<u32>,
    pub original_bitrate: Option<f64>,
    pub file_name: String,
    pub file_size_bytes: u64,
    /// Relative to the downloads root
    pub file_path: String,
}

impl Display for MetadataDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} '{}' ({}, {} bytes)",
            self.video_id, self.title, self.audio.file_name, self.audio.file_size_bytes
        )
    }
}
