use std::{
    fs,
    path::{Path, PathBuf},
};

use miette::{Context, IntoDiagnostic, Result};
use serde::Serialize;
use tracing::debug;

use crate::types::AudioFormat;

/// `<root>/<id>`
pub fn video_dir(root: &Path, video_id: &str) -> PathBuf {
    root.join(video_id)
}

/// `<root>/<id>/<id>.<ext>`
pub fn audio_path(root: &Path, video_id: &str, format: AudioFormat) -> PathBuf {
    video_dir(root, video_id).join(format!("{video_id}{}", format.with_dot()))
}

/// `<root>/<id>/<id>.json`
pub fn metadata_path(root: &Path, video_id: &str) -> PathBuf {
    video_dir(root, video_id).join(format!("{video_id}.json"))
}

/// Move a file, falling back to copy & delete when renaming is not possible
/// (e.g. across filesystems). The destination is overwritten.
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }

    debug!(
        "Could not rename {} to {}, copying it instead",
        from.display(),
        to.display()
    );
    fs::copy(from, to)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not copy {} to {}", from.display(), to.display()))?;
    fs::remove_file(from)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not remove {}", from.display()))
}

/// Write the value as pretty JSON, replacing the file if it exists
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .into_diagnostic()
        .wrap_err("Could not serialize to JSON")?;
    json.push('\n');

    fs::write(path, json)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not write {}", path.display()))
}
