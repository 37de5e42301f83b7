use serde::Deserialize;

/// Base used to turn a bare video ID into a reference the extractor accepts
pub const WATCH_URL: &str = "https://www.youtube.com/watch?v=";

/// The subset of the extractor's info JSON the downloader relies on.
///
/// Every field except the ID may be missing depending on the site.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct VideoInfo {
    pub id: String,
    pub title: Option<String>,
    pub description: Option<String>,
    pub upload_date: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub channel_id: Option<String>,
    pub channel: Option<String>,
    pub uploader: Option<String>,
    pub channel_url: Option<String>,
    pub uploader_url: Option<String>,
    pub webpage_url: Option<String>,
    pub acodec: Option<String>,
    pub asr: Option<u32>,
    pub abr: Option<f64>,
}

impl VideoInfo {
    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or("Unknown")
    }

    pub fn channel_name(&self) -> Option<&str> {
        self.channel.as_deref().or(self.uploader.as_deref())
    }

    pub fn channel_url(&self) -> Option<&str> {
        self.channel_url.as_deref().or(self.uploader_url.as_deref())
    }

    pub fn duration_secs(&self) -> Option<u64> {
        self.duration
            .filter(|d| d.is_finite() && *d >= 0.0)
            .map(|d| d.round() as u64)
    }

    /// The source audio codec, `None` when the extractor reports "none"
    pub fn source_codec(&self) -> Option<&str> {
        self.acodec.as_deref().filter(|codec| *codec != "none")
    }
}

/// A flat listing of a channel, entries are not resolved
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChannelListing {
    #[serde(default)]
    pub entries: Vec<Option<FlatEntry>>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FlatEntry {
    pub id: Option<String>,
    pub url: Option<String>,
    pub ie_key: Option<String>,
}

impl FlatEntry {
    /// The reference to hand to the downloader.
    ///
    /// Channel tabs (videos, shorts, live) are listings themselves and have no
    /// reference.
    pub fn reference(&self) -> Option<String> {
        if self.ie_key.as_deref() == Some("YoutubeTab") {
            return None;
        }

        match (&self.url, &self.id) {
            (Some(url), _) if !url.trim().is_empty() => Some(url.trim().to_owned()),
            (_, Some(id)) if !id.trim().is_empty() => Some(format!("{WATCH_URL}{}", id.trim())),
            _ => None,
        }
    }
}

impl ChannelListing {
    /// References of every usable entry, in listing order
    pub fn references(&self) -> Vec<String> {
        self.entries
            .iter()
            .flatten()
            .filter_map(FlatEntry::reference)
            .collect()
    }
}
