mod cleanup;
mod stats;

use std::{
    fs,
    path::{Path, PathBuf},
};

use miette::{Context, IntoDiagnostic, Result};

pub use cleanup::{cleanup, CleanupReport};
pub use stats::{collect_stats, StatsReport, VideoStats};

use crate::types::AudioFormat;

/// The per-video directories of the downloads root, sorted by name
fn video_dirs(root: &Path) -> Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(root)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not read {}", root.display()))?
    {
        let path = entry.into_diagnostic()?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// The files of the directory with the given extension, sorted by name
fn files_matching(dir: &Path, matches: impl Fn(&Path) -> bool) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not read {}", dir.display()))?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && matches(path))
        .collect();
    files.sort();
    Ok(files)
}

fn audio_files(dir: &Path, format: AudioFormat) -> Result<Vec<PathBuf>> {
    files_matching(dir, |path| format.matches_path(path))
}
