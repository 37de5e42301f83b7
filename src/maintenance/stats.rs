use std::{fmt::Display, fs, path::Path};

use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{audio_files, files_matching, video_dirs};
use crate::{
    types::AudioFormat,
    utils::{now_rfc3339, round2},
};

const MIB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsReport {
    pub timestamp: String,
    pub successful_downloads: usize,
    pub failed_downloads: usize,
    pub total_size_mb: f64,
    pub average_size_mb: f64,
    pub videos: Vec<VideoStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoStats {
    pub video_id: String,
    pub size_mb: f64,
    pub duration_sec: u64,
    pub title: String,
}

/// The few fields of the metadata document the report needs, any document
/// missing them still counts
#[derive(Debug, Default, Deserialize)]
struct MetadataSummary {
    #[serde(default)]
    duration_sec: Option<u64>,
    #[serde(default)]
    title: Option<String>,
}

impl MetadataSummary {
    fn read(path: &Path) -> Self {
        let res = fs::read(path)
            .into_diagnostic()
            .and_then(|bytes| serde_json::from_slice::<Self>(&bytes).into_diagnostic());
        match res {
            Ok(summary) => summary,
            Err(err) => {
                warn!("Could not read {}: {err}", path.display());
                Self::default()
            }
        }
    }
}

/// Gather the statistics of the downloads root.
///
/// A video counts as successful when its directory holds both an audio
/// file and a metadata document. Return None when the root does not exist.
pub fn collect_stats(root: &Path, format: AudioFormat) -> Result<Option<StatsReport>> {
    if !root.is_dir() {
        return Ok(None);
    }

    let mut failed_downloads = 0;
    let mut total_bytes = 0u64;
    let mut videos = Vec::new();

    for dir in video_dirs(root)? {
        let audio = audio_files(&dir, format)?;
        let json = files_matching(&dir, |path| {
            path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
        })?;

        let (Some(audio), Some(json)) = (audio.first(), json.first()) else {
            failed_downloads += 1;
            continue;
        };

        let size = fs::metadata(audio).into_diagnostic()?.len();
        total_bytes += size;

        let summary = MetadataSummary::read(json);
        videos.push(VideoStats {
            video_id: dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default(),
            size_mb: round2(size as f64 / MIB),
            duration_sec: summary.duration_sec.unwrap_or(0),
            title: summary.title.unwrap_or_else(|| "Unknown".to_string()),
        });
    }

    let total_size_mb = total_bytes as f64 / MIB;
    let average_size_mb = if videos.is_empty() {
        0.0
    } else {
        total_size_mb / videos.len() as f64
    };

    Ok(Some(StatsReport {
        timestamp: now_rfc3339(),
        successful_downloads: videos.len(),
        failed_downloads,
        total_size_mb: round2(total_size_mb),
        average_size_mb: round2(average_size_mb),
        videos,
    }))
}

impl Display for StatsReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rule = "=".repeat(50);
        writeln!(f, "{rule}")?;
        writeln!(f, "Download statistics report")?;
        writeln!(f, "{rule}")?;
        writeln!(f, "Timestamp: {}", self.timestamp)?;
        writeln!(f, "Successful downloads: {}", self.successful_downloads)?;
        writeln!(f, "Failed downloads: {}", self.failed_downloads)?;
        writeln!(f, "Total size: {} MB", self.total_size_mb)?;
        writeln!(f, "Average size: {} MB per video", self.average_size_mb)?;
        write!(f, "{rule}")
    }
}
