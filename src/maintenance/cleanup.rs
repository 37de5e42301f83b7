use std::{fmt::Display, fs, path::Path};

use miette::{Context, IntoDiagnostic, Result};
use tracing::info;

use super::{audio_files, video_dirs};
use crate::types::AudioFormat;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Names of the removed directories
    pub removed: Vec<String>,
    /// Directories left, each holding an audio file
    pub remaining: usize,
}

impl Display for CleanupReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Removed {} failed downloads", self.removed.len())?;
        write!(f, "Remaining successful: {} videos", self.remaining)
    }
}

/// Remove every video directory without an audio file.
///
/// Return None when the downloads root does not exist.
pub fn cleanup(root: &Path, format: AudioFormat) -> Result<Option<CleanupReport>> {
    if !root.is_dir() {
        return Ok(None);
    }

    let mut report = CleanupReport::default();
    for dir in video_dirs(root)? {
        if !audio_files(&dir, format)?.is_empty() {
            report.remaining += 1;
            continue;
        }

        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        info!("Removing failed: {name}");
        fs::remove_dir_all(&dir)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not remove {}", dir.display()))?;
        report.removed.push(name);
    }

    Ok(Some(report))
}
