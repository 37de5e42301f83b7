use std::{fmt::Display, path::Path};

use serde::Deserialize;

/// The audio container/codec pair stored for every downloaded video
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    M4a,
    Opus,
    Mp3,
}

impl AudioFormat {
    /// Return the extension without the leading dot.
    /// e.g. "ext"
    pub fn with_no_dot(self) -> &'static str {
        match self {
            AudioFormat::M4a => "m4a",
            AudioFormat::Opus => "opus",
            AudioFormat::Mp3 => "mp3",
        }
    }

    /// Return the extension with the leading dot.
    /// e.g. ".ext"
    pub fn with_dot(self) -> &'static str {
        match self {
            AudioFormat::M4a => ".m4a",
            AudioFormat::Opus => ".opus",
            AudioFormat::Mp3 => ".mp3",
        }
    }

    /// The ffmpeg encoder producing this format
    pub fn encoder(self) -> &'static str {
        match self {
            AudioFormat::M4a => "aac",
            AudioFormat::Opus => "libopus",
            AudioFormat::Mp3 => "libmp3lame",
        }
    }

    /// Sample rates the encoder accepts, in increasing order
    pub fn supported_sample_rates(self) -> &'static [u32] {
        match self {
            AudioFormat::M4a => &[
                7350, 8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000, 64000, 88200,
                96000,
            ],
            AudioFormat::Opus => &[8000, 12000, 16000, 24000, 48000],
            AudioFormat::Mp3 => &[8000, 11025, 12000, 16000, 22050, 24000, 32000, 44100, 48000],
        }
    }

    /// Closest sample rate the encoder accepts
    pub fn nearest_sample_rate(self, wanted: u32) -> u32 {
        self.supported_sample_rates()
            .iter()
            .copied()
            .min_by_key(|rate| rate.abs_diff(wanted))
            .unwrap_or(wanted)
    }

    /// Check whether the path has this format's extension
    pub fn matches_path<P: AsRef<Path>>(self, path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case(self.with_no_dot()))
    }
}

impl Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.with_no_dot())
    }
}
