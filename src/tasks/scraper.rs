use tracing::{debug, info, warn};
use url::Url;

use super::TaskContext;
use crate::{
    types::{FailureKind, Job, TaskOutcome},
    utils::unix_now,
};

/// The URL listing the videos of a channel: the configured tab is appended
/// to the path unless already there. Bare identifiers are left untouched.
pub fn channel_list_url(channel: &str, tab: &str) -> String {
    let channel = channel.trim();
    let tab = tab.trim_matches('/');
    let Ok(mut url) = Url::parse(channel) else {
        return channel.to_owned();
    };
    if tab.is_empty() {
        return channel.to_owned();
    }

    let has_tab = url
        .path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
        == Some(tab);
    match url.path_segments_mut() {
        Ok(mut segments) => {
            segments.pop_if_empty();
            if !has_tab {
                segments.push(tab);
            }
        }
        // Not a hierarchical URL, nothing to append to
        Err(()) => return channel.to_owned(),
    }
    url.into()
}

/// List the channel and enqueue one download job per video
pub fn scrape_channel(ctx: &TaskContext, channel: &str) -> TaskOutcome {
    let url = channel_list_url(channel, &ctx.settings.scrape.channel_tab);
    info!("Listing channel {url}");

    let videos = match ctx.extractor.list_channel(&url, &ctx.fetch_options()) {
        Ok(videos) => videos,
        Err(err) => {
            warn!("Could not list {channel}: {err}");
            return TaskOutcome::failed(FailureKind::Listing, format!("scrape failed: {err}"));
        }
    };

    if videos.is_empty() {
        return TaskOutcome::failed(
            FailureKind::NoEntries,
            format!("no entries found for: {channel}"),
        );
    }
    info!("{} videos listed for {channel}", videos.len());

    let batch_size = ctx.settings.scrape.batch_size.max(1);
    for (idx, video) in videos.iter().enumerate() {
        let job = Job::download(video.as_str(), Some(channel.to_owned()));
        if let Err(err) = ctx.queue.enqueue(&job, unix_now()) {
            return TaskOutcome::failed(
                FailureKind::Io,
                format!("scrape failed: could not enqueue {video} ({idx} enqueued): {err}"),
            );
        }
        ctx.notify();

        let enqueued = idx + 1;
        if enqueued % batch_size == 0 && enqueued < videos.len() {
            debug!("{enqueued} jobs enqueued, pausing");
            ctx.sleeper.sleep(ctx.settings.scrape.batch_pause());
        }
    }

    TaskOutcome::done(format!(
        "Added {} video jobs for channel: {channel}",
        videos.len()
    ))
}
