use std::{
    ffi::OsString,
    fmt::Debug,
    path::Path,
};

use tracing::warn;

use super::command::{assert_success_command, FFXXX_DEFAULT_ARGS};
use crate::{
    config::AudioSettings,
    result::Result,
    types::{AudioFormat, Bitrate},
};

/// What every stored audio file is converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AudioTarget {
    pub format: AudioFormat,
    pub sample_rate: u32,
    pub channels: u8,
    pub bitrate: Bitrate,
}

impl From<&AudioSettings> for AudioTarget {
    fn from(settings: &AudioSettings) -> Self {
        Self {
            format: settings.format,
            sample_rate: settings.sample_rate,
            channels: settings.channels,
            bitrate: settings.bitrate,
        }
    }
}

/// Tags embedded in the output file
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AudioTags {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub date: Option<String>,
    pub comment: Option<String>,
}

impl AudioTags {
    fn pairs(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("title", Some(self.title.as_str())),
            ("artist", self.artist.as_deref()),
            ("album", self.album.as_deref()),
            ("date", self.date.as_deref()),
            ("comment", self.comment.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|value| (key, value)))
    }
}

pub trait AudioTranscoder: Sync + Debug {
    /// Convert the input audio stream to the target format, rate and layout,
    /// replacing any existing metadata with the given tags.
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        tags: &AudioTags,
    ) -> Result<()>;
}

/// Interface for the [ffmpeg](https://ffmpeg.org) program
#[derive(Debug)]
pub struct Ffmpeg {
    program: String,
}

impl Ffmpeg {
    /// Verify that the `ffmpeg` binary is reachable
    pub fn new(program: &str) -> Result<Self> {
        assert_success_command(program, |cmd| cmd.arg("-version"))
            .map_err(|err| err.wrap_err_with(|| format!("{program} not found or not working")))?;

        Ok(Self {
            program: program.to_owned(),
        })
    }

    pub fn transcode_args(
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        tags: &AudioTags,
    ) -> Vec<OsString> {
        let sample_rate = target.format.nearest_sample_rate(target.sample_rate);
        if sample_rate != target.sample_rate {
            warn!(
                "{} does not support {} Hz, encoding at {sample_rate} Hz",
                target.format.encoder(),
                target.sample_rate
            );
        }

        let mut args: Vec<OsString> = FFXXX_DEFAULT_ARGS.iter().map(OsString::from).collect();
        args.push("-y".into());
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        args.extend(["-vn", "-map_metadata", "-1"].map(OsString::from));

        for (key, value) in tags.pairs() {
            args.push("-metadata".into());
            args.push(format!("{key}={value}").into());
        }

        args.extend(
            [
                "-c:a",
                target.format.encoder(),
                "-b:a",
                &target.bitrate.to_string(),
                "-ar",
                &sample_rate.to_string(),
                "-ac",
                &target.channels.to_string(),
                "--",
            ]
            .map(OsString::from),
        );
        args.push(output.as_os_str().to_owned());
        args
    }
}

impl AudioTranscoder for Ffmpeg {
    fn transcode(
        &self,
        input: &Path,
        output: &Path,
        target: &AudioTarget,
        tags: &AudioTags,
    ) -> Result<()> {
        let args = Self::transcode_args(input, output, target, tags);
        assert_success_command(&self.program, |cmd| cmd.args(&args))
    }
}
