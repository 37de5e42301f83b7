use std::{fmt::Display, str::FromStr};

use serde::Deserialize;

/// Audio bitrate in kbit/s, written the way ffmpeg takes it ("128K")
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct Bitrate(u16);

impl Bitrate {
    pub const fn kbps(value: u16) -> Self {
        Self(value)
    }
}

impl FromStr for Bitrate {
    type Err = Box<dyn std::error::Error + Sync + Send>;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(num_prefix) = s.trim().to_lowercase().strip_suffix('k') {
            let value: u16 = num_prefix.parse()?;
            if value == 0 {
                return Err(Box::from("Bitrate must not be zero"));
            }
            Ok(Self(value))
        } else {
            Err(Box::from("Bitrate does not end with 'K'"))
        }
    }
}

impl TryFrom<String> for Bitrate {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value
            .parse()
            .map_err(|err| format!("invalid bitrate '{value}': {err}"))
    }
}

impl Display for Bitrate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}K", self.0)
    }
}
