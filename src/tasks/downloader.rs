use std::{fs, path::Path};

use tracing::{debug, info, warn};

use super::{failure_kind, TaskContext};
use crate::{
    io::{audio_path, metadata_path, move_file, video_dir, write_json},
    outside::{AudioTags, AudioTarget},
    rate_limiter::{host_of, Admission},
    result::Error,
    types::{AudioDocument, FailureKind, MetadataDocument, TaskOutcome, VideoInfo, WATCH_URL},
    utils::{now_rfc3339, unix_now},
};

fn failed(video: &str, kind: FailureKind, reason: impl std::fmt::Display) -> TaskOutcome {
    TaskOutcome::failed(kind, format!("Failed: {video} - {reason}"))
}

/// The ID names a directory, it must not escape the downloads root
fn is_safe_id(id: &str) -> bool {
    !id.is_empty() && id != "." && id != ".." && !id.contains(['/', '\\'])
}

/// Download a video's audio and write its metadata document beside it
pub fn download_video(ctx: &TaskContext, video: &str, channel: Option<&str>) -> TaskOutcome {
    let host = host_of(video);
    match ctx.limiter.try_acquire(&host, unix_now()) {
        Ok(Admission::Granted) => {}
        Ok(Admission::Wait(delay)) => {
            info!("Hourly ceiling reached for {host}, deferring {video}");
            return TaskOutcome::Deferred {
                delay,
                reason: format!("hourly download ceiling reached for {host}"),
            };
        }
        Err(err) => return failed(video, FailureKind::Io, err),
    }

    let delay = ctx.settings.pacing.pre_download_delay();
    debug!("Waiting {:.1}s before downloading {video}", delay.as_secs_f64());
    ctx.sleeper.sleep(delay);

    let opts = ctx.fetch_options();
    let info = match ctx.extractor.fetch_info(video, &opts) {
        Ok(Some(info)) if is_safe_id(&info.id) => info,
        Ok(Some(info)) => {
            return failed(video, FailureKind::NoInfo, format!("invalid video id '{}'", info.id))
        }
        Ok(None) => return failed(video, FailureKind::NoInfo, "could not extract info"),
        Err(err) => return failed(video, failure_kind(&err), err),
    };

    info!("Downloading {} '{}'", info.id, info.title());
    match store_video(ctx, video, channel, &info, &opts) {
        Ok(doc) => {
            info!("Stored {doc}");
            TaskOutcome::done(format!("Success: {}", info.id))
        }
        Err((kind, err)) => {
            warn!("Could not store {}: {err}", info.id);
            failed(video, kind, err)
        }
    }
}

type StoreResult<T> = std::result::Result<T, (FailureKind, Error)>;

fn io_err<T>(res: miette::Result<T>) -> StoreResult<T> {
    res.map_err(|err| (FailureKind::Io, err.into()))
}

fn tool_err<T>(res: crate::result::Result<T>) -> StoreResult<T> {
    res.map_err(|err| (failure_kind(&err), err))
}

/// Download, transcode and move the audio in place, then write the metadata
fn store_video(
    ctx: &TaskContext,
    video: &str,
    channel: Option<&str>,
    info: &VideoInfo,
    opts: &crate::outside::FetchOptions,
) -> StoreResult<MetadataDocument> {
    use miette::{Context, IntoDiagnostic};

    let root = &ctx.settings.downloads_dir;
    let audio = &ctx.settings.audio;

    // Out of the downloads root, so that no half-written file is ever seen there
    let tmp = io_err(
        tempfile::Builder::new()
            .prefix("ytharvest-")
            .tempdir()
            .into_diagnostic()
            .wrap_err("Could not create a temporary directory"),
    )?;

    let source = tool_err(ctx.extractor.download_audio(video, tmp.path(), opts))?;
    debug!("Fetched {}", source.display());

    let transcoded = tmp
        .path()
        .join(format!("{}.out{}", info.id, audio.format.with_dot()));
    tool_err(ctx.transcoder.transcode(
        &source,
        &transcoded,
        &AudioTarget::from(audio),
        &tags(info),
    ))?;

    // Created only now: an empty directory is what a cleanup run removes
    let dir = video_dir(root, &info.id);
    io_err(
        fs::create_dir_all(&dir)
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not create {}", dir.display())),
    )?;

    let audio_file = audio_path(root, &info.id, audio.format);
    io_err(move_file(&transcoded, &audio_file))?;

    let doc = io_err(describe(ctx, info, channel, &audio_file))?;
    if let Err(err) = write_json(&metadata_path(root, &info.id), &doc) {
        // Audio without its metadata is not a record, do not leave it behind
        if let Err(rm_err) = fs::remove_file(&audio_file) {
            warn!("Could not remove {}: {rm_err}", audio_file.display());
        }
        return Err((FailureKind::Io, err.into()));
    }

    Ok(doc)
}

fn tags(info: &VideoInfo) -> AudioTags {
    AudioTags {
        title: info.title().to_owned(),
        artist: info.channel_name().map(String::from),
        album: info.channel_name().map(String::from),
        date: info.upload_date.clone(),
        comment: info.webpage_url.clone(),
    }
}

fn describe(
    ctx: &TaskContext,
    info: &VideoInfo,
    channel: Option<&str>,
    audio_file: &Path,
) -> miette::Result<MetadataDocument> {
    use miette::{Context, IntoDiagnostic};

    let audio = &ctx.settings.audio;
    let file_size_bytes = fs::metadata(audio_file)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not stat {}", audio_file.display()))?
        .len();
    let file_name = format!("{}{}", info.id, audio.format.with_dot());

    Ok(MetadataDocument {
        video_id: info.id.clone(),
        channel_url: info
            .channel_url()
            .map(String::from)
            .or_else(|| channel.map(String::from)),
        channel_id: info.channel_id.clone(),
        channel_name: info.channel_name().map(String::from),
        title: info.title().to_owned(),
        description: info.description.clone(),
        upload_date: info.upload_date.clone(),
        duration_sec: info.duration_secs(),
        view_count: info.view_count,
        like_count: info.like_count,
        webpage_url: info
            .webpage_url
            .clone()
            .or_else(|| Some(format!("{WATCH_URL}{}", info.id))),
        downloaded_at: now_rfc3339(),
        audio: AudioDocument {
            codec: audio.format.to_string(),
            sample_rate: audio.sample_rate,
            channels: audio.channels,
            original_codec: info.source_codec().map(String::from),
            original_sample_rate: info.asr,
            original_bitrate: info.abr,
            file_path: format!("{}/{file_name}", info.id),
            file_name,
            file_size_bytes,
        },
    })
}

#[cfg(test)]
mod tests {
    use std::{path::PathBuf, sync::Mutex, time::Duration};

    use serde_json::Value;

    use super::*;
    use crate::{
        maintenance::cleanup,
        outside::{FetchOptions, MediaExtractor},
        testing::{video_info, FakeError, FakeExtractor, Harness},
        types::AudioFormat,
    };

    const VIDEO: &str = "https://www.youtube.com/watch?v=abc123";

    fn read_doc(h: &Harness, id: &str) -> MetadataDocument {
        let json = fs::read_to_string(metadata_path(&h.settings.downloads_dir, id)).unwrap();
        serde_json::from_str(&json).unwrap()
    }

    #[test]
    fn stores_audio_and_metadata() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));

        let outcome = download_video(&h.ctx(), VIDEO, Some("https://www.youtube.com/channel/C"));
        assert_eq!(outcome, TaskOutcome::done("Success: abc123"));

        let root = &h.settings.downloads_dir;
        let audio = audio_path(root, "abc123", h.settings.audio.format);
        assert!(audio.is_file());
        assert_eq!(
            fs::read_dir(video_dir(root, "abc123")).unwrap().count(),
            2,
            "only the audio and the metadata"
        );

        let doc = read_doc(&h, "abc123");
        assert_eq!(doc.video_id, "abc123");
        assert_eq!(doc.title, "Title of abc123");
        assert_eq!(doc.channel_name.as_deref(), Some("Some Channel"));
        assert_eq!(doc.upload_date.as_deref(), Some("20240131"));
        assert_eq!(doc.duration_sec, Some(61));
        assert_eq!(doc.audio.codec, "m4a");
        assert_eq!(doc.audio.sample_rate, 44000);
        assert_eq!(doc.audio.channels, 1);
        assert_eq!(doc.audio.original_codec.as_deref(), Some("opus"));
        assert_eq!(doc.audio.original_sample_rate, Some(48000));
        assert_eq!(doc.audio.file_name, "abc123.m4a");
        assert_eq!(doc.audio.file_path, "abc123/abc123.m4a");
        assert_eq!(doc.audio.file_size_bytes, fs::metadata(&audio).unwrap().len());

        let (target, tags) = h.transcoder.last_call().unwrap();
        assert_eq!(target, AudioTarget::from(&h.settings.audio));
        assert_eq!(tags.title, "Title of abc123");
        assert_eq!(tags.artist.as_deref(), Some("Some Channel"));
    }

    #[test]
    fn falls_back_to_parent_channel_url() {
        let mut h = Harness::new();
        let mut info = video_info("abc123");
        info.channel_url = None;
        info.uploader_url = None;
        h.extractor.info = Some(info);

        download_video(&h.ctx(), VIDEO, Some("https://www.youtube.com/channel/C"));
        assert_eq!(
            read_doc(&h, "abc123").channel_url.as_deref(),
            Some("https://www.youtube.com/channel/C")
        );
    }

    #[test]
    fn rerun_overwrites_the_record() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));
        assert_eq!(download_video(&h.ctx(), VIDEO, None), TaskOutcome::done("Success: abc123"));

        h.extractor.info.as_mut().unwrap().title = Some("Renamed".into());
        assert_eq!(download_video(&h.ctx(), VIDEO, None), TaskOutcome::done("Success: abc123"));
        assert_eq!(read_doc(&h, "abc123").title, "Renamed");
    }

    #[test]
    fn sleeps_inside_the_window_before_fetching() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));
        download_video(&h.ctx(), VIDEO, None);

        let slept = h.sleeper.slept();
        assert_eq!(slept.len(), 1);
        assert!(slept[0] >= Duration::from_secs(10) && slept[0] <= Duration::from_secs(20));
    }

    #[test]
    fn ceiling_defers_without_fetching() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));
        h.limiter.wait = Some(Duration::from_secs(120));

        let outcome = download_video(&h.ctx(), VIDEO, None);
        assert!(matches!(
            outcome,
            TaskOutcome::Deferred { delay, .. } if delay == Duration::from_secs(120)
        ));
        assert_eq!(h.limiter.hosts(), vec!["www.youtube.com".to_string()]);
        assert!(h.sleeper.slept().is_empty());
        assert_eq!(h.extractor.downloads(), 0);
    }

    #[test]
    fn missing_info_is_terminal() {
        let h = Harness::new();
        let outcome = download_video(&h.ctx(), VIDEO, None);
        assert_eq!(
            outcome,
            TaskOutcome::failed(
                FailureKind::NoInfo,
                format!("Failed: {VIDEO} - could not extract info")
            )
        );
        assert!(fs::read_dir(&h.settings.downloads_dir).unwrap().next().is_none());
    }

    #[test]
    fn tool_failures_are_classified() {
        let mut h = Harness::new();
        h.extractor.info_error = Some(FakeError::Unavailable);
        assert!(matches!(
            download_video(&h.ctx(), VIDEO, None),
            TaskOutcome::Failed { kind: FailureKind::Unavailable, .. }
        ));

        h.extractor.info_error = None;
        h.extractor.info = Some(video_info("abc123"));
        h.extractor.download_error = Some(FakeError::Throttled);
        assert!(matches!(
            download_video(&h.ctx(), VIDEO, None),
            TaskOutcome::Failed { kind: FailureKind::Throttled, .. }
        ));
    }

    #[test]
    fn failed_transcode_leaves_no_audio() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));
        h.transcoder.fail = true;

        let outcome = download_video(&h.ctx(), VIDEO, None);
        assert!(matches!(
            outcome,
            TaskOutcome::Failed { kind: FailureKind::Transient, .. }
        ));
        let root = &h.settings.downloads_dir;
        assert!(!audio_path(root, "abc123", h.settings.audio.format).exists());
        assert!(fs::read_dir(root).unwrap().next().is_none());
    }

    #[test]
    fn ids_escaping_the_root_are_rejected() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("../evil"));
        assert!(matches!(
            download_video(&h.ctx(), VIDEO, None),
            TaskOutcome::Failed { kind: FailureKind::NoInfo, .. }
        ));
        assert!(!is_safe_id(".."));
        assert!(is_safe_id("dQw4w9WgXcQ"));
    }

    fn sorted_keys(value: &Value) -> Vec<&str> {
        let mut keys: Vec<_> = value.as_object().unwrap().keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    #[test]
    fn metadata_file_keys() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));
        download_video(&h.ctx(), VIDEO, None);

        let json = fs::read_to_string(metadata_path(&h.settings.downloads_dir, "abc123")).unwrap();
        let doc: Value = serde_json::from_str(&json).unwrap();

        let mut expected = vec![
            "video_id",
            "channel_url",
            "channel_id",
            "channel_name",
            "title",
            "description",
            "upload_date",
            "duration_sec",
            "view_count",
            "like_count",
            "webpage_url",
            "downloaded_at",
            "audio",
        ];
        expected.sort_unstable();
        assert_eq!(sorted_keys(&doc), expected);

        let mut expected = vec![
            "codec",
            "sample_rate",
            "channels",
            "original_codec",
            "original_sample_rate",
            "original_bitrate",
            "file_name",
            "file_size_bytes",
            "file_path",
        ];
        expected.sort_unstable();
        assert_eq!(sorted_keys(&doc["audio"]), expected);

        assert_eq!(doc["audio"]["sample_rate"], 44000);
        assert_eq!(doc["audio"]["file_path"], "abc123/abc123.m4a");
    }

    /// Runs a cleanup of the downloads root while the audio is being fetched
    struct CleanupDuringFetch<'a> {
        inner: &'a FakeExtractor,
        root: PathBuf,
        format: AudioFormat,
        removed: Mutex<Vec<String>>,
    }

    impl MediaExtractor for CleanupDuringFetch<'_> {
        fn list_channel(&self, url: &str, opts: &FetchOptions) -> crate::result::Result<Vec<String>> {
            self.inner.list_channel(url, opts)
        }

        fn fetch_info(
            &self,
            video: &str,
            opts: &FetchOptions,
        ) -> crate::result::Result<Option<VideoInfo>> {
            self.inner.fetch_info(video, opts)
        }

        fn download_audio(
            &self,
            video: &str,
            out_dir: &Path,
            opts: &FetchOptions,
        ) -> crate::result::Result<PathBuf> {
            let report = cleanup(&self.root, self.format).unwrap().unwrap();
            self.removed.lock().unwrap().extend(report.removed);
            self.inner.download_audio(video, out_dir, opts)
        }
    }

    #[test]
    fn cleanup_while_fetching_keeps_the_download() {
        let mut h = Harness::new();
        h.extractor.info = Some(video_info("abc123"));
        let root = h.settings.downloads_dir.clone();
        fs::create_dir(root.join("stale")).unwrap();

        let extractor = CleanupDuringFetch {
            inner: &h.extractor,
            root: root.clone(),
            format: h.settings.audio.format,
            removed: Mutex::default(),
        };
        let ctx = TaskContext {
            extractor: &extractor,
            ..h.ctx()
        };

        assert_eq!(download_video(&ctx, VIDEO, None), TaskOutcome::done("Success: abc123"));
        assert_eq!(*extractor.removed.lock().unwrap(), vec!["stale".to_string()]);
        assert!(audio_path(&root, "abc123", h.settings.audio.format).is_file());
        assert!(metadata_path(&root, "abc123").is_file());
    }
}
