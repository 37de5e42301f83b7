use std::{
    ffi::{OsStr, OsString},
    path::{Path, PathBuf},
    process::{Command, Output},
    time::Duration,
};

use miette::{miette, Context, IntoDiagnostic};
use tracing::{debug, warn};

use super::command::{assert_success_command, last_lines, run_command, Capture};
use crate::{
    my_regex::classify_stderr,
    result::{bail, Result},
    types::{ChannelListing, VideoInfo},
};

/// Network options shared by every extractor request
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchOptions {
    pub proxy: Option<String>,
    pub cookies: Option<PathBuf>,
    /// Pause between the extractor's own requests
    pub sleep_requests: Duration,
    pub retries: u32,
    pub fragment_retries: u32,
}

/// Interface for listing channels and downloading streams and their metadata
pub trait MediaExtractor: Sync {
    /// List the video references of a channel without resolving them.
    fn list_channel(&self, url: &str, opts: &FetchOptions) -> Result<Vec<String>>;

    /// Get the video metadata without downloading the media.
    ///
    /// Return None if the extractor ran but gave no information.
    fn fetch_info(&self, video: &str, opts: &FetchOptions) -> Result<Option<VideoInfo>>;

    /// Download the best audio stream of the video into the directory.
    /// Return the path of the downloaded file.
    fn download_audio(&self, video: &str, out_dir: &Path, opts: &FetchOptions) -> Result<PathBuf>;
}

/// Interface for the [yt-dlp](https://github.com/yt-dlp/yt-dlp) program
#[derive(Debug)]
pub struct Ytdl {
    program: String,
}

impl Ytdl {
    /// Verify that the program is reachable
    pub fn new(program: &str) -> Result<Self> {
        assert_success_command(program, |cmd| cmd.arg("--version"))
            .map_err(|err| err.wrap_err_with(|| format!("{program} not found or not working")))?;

        Ok(Self {
            program: program.to_owned(),
        })
    }

    /// Run the command and check whether the extractor reported a condition
    /// the tasks handle specially, returning it as the matching error.
    ///
    /// In other cases, return the output handle.
    fn run_check_availability(&self, args: Vec<OsString>, capture: Capture) -> Result<Output> {
        let res = run_command(
            &self.program,
            |cmd: &mut Command| cmd.args(args),
            capture | Capture::STDERR,
        )?;

        let stderr = String::from_utf8_lossy(&res.stderr);
        match classify_stderr(&stderr) {
            Some(err) => Err(err),
            None => Ok(res),
        }
    }

    /// Arguments common to every request
    fn common_args(opts: &FetchOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--no-warnings".into()];

        if !opts.sleep_requests.is_zero() {
            args.push("--sleep-requests".into());
            args.push(format!("{}", opts.sleep_requests.as_secs_f64()).into());
        }
        if let Some(proxy) = &opts.proxy {
            args.push("--proxy".into());
            args.push(proxy.into());
        }
        if let Some(cookies) = &opts.cookies {
            args.push("--cookies".into());
            args.push(cookies.into());
        }

        args
    }

    pub fn listing_args(url: &str, opts: &FetchOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--flat-playlist".into(), "-J".into()];
        args.extend(Self::common_args(opts));
        args.push("--".into());
        args.push(url.into());
        args
    }

    pub fn info_args(video: &str, opts: &FetchOptions) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--skip-download".into(),
            "-J".into(),
            "--no-playlist".into(),
            // Select the audio stream so the reported codec & rates are the audio ones
            "-f".into(),
            "bestaudio/best".into(),
        ];
        args.extend(Self::common_args(opts));
        args.push("--".into());
        args.push(video.into());
        args
    }

    pub fn download_args(video: &str, out_dir: &Path, opts: &FetchOptions) -> Vec<OsString> {
        let mut template = out_dir.as_os_str().to_owned();
        template.push(std::path::MAIN_SEPARATOR_STR);
        template.push("%(id)s.%(ext)s");

        let mut args: Vec<OsString> = vec![
            "-q".into(),
            "--no-progress".into(),
            "--no-playlist".into(),
            "--no-continue".into(), // Or else fails when file already exists, even an empty one
            "-f".into(),
            "bestaudio/best".into(),
            "-o".into(),
            template,
            "--retries".into(),
            opts.retries.to_string().into(),
            "--fragment-retries".into(),
            opts.fragment_retries.to_string().into(),
            "--print".into(),
            "after_move:filepath".into(),
        ];
        args.extend(Self::common_args(opts));
        args.push("--".into());
        args.push(video.into());
        args
    }
}

impl MediaExtractor for Ytdl {
    fn list_channel(&self, url: &str, opts: &FetchOptions) -> Result<Vec<String>> {
        let res = self.run_check_availability(Self::listing_args(url, opts), Capture::STDOUT)?;

        let stdout = String::from_utf8_lossy(&res.stdout);
        if stdout.trim().is_empty() {
            return bail(format!(
                "Listing failed ({}): {}",
                res.status,
                last_lines(&res.stderr, 3)
            ));
        }

        let listing: ChannelListing = serde_json::from_str(stdout.trim())
            .into_diagnostic()
            .wrap_err("Could not parse listing JSON")?;

        if !res.status.success() {
            warn!("Listing of {url} reported errors, keeping the entries it returned");
        }

        Ok(listing.references())
    }

    fn fetch_info(&self, video: &str, opts: &FetchOptions) -> Result<Option<VideoInfo>> {
        let res = self.run_check_availability(Self::info_args(video, opts), Capture::STDOUT)?;

        let stdout = String::from_utf8_lossy(&res.stdout);
        let stdout = stdout.trim();
        if stdout.is_empty() || stdout == "null" {
            debug!(
                "No info for {video} ({}): {}",
                res.status,
                last_lines(&res.stderr, 3)
            );
            return Ok(None);
        }

        let info = serde_json::from_str::<VideoInfo>(stdout)
            .into_diagnostic()
            .wrap_err("Could not parse info JSON")?;
        Ok(Some(info))
    }

    fn download_audio(&self, video: &str, out_dir: &Path, opts: &FetchOptions) -> Result<PathBuf> {
        let res = self.run_check_availability(
            Self::download_args(video, out_dir, opts),
            Capture::STDOUT,
        )?;

        if !res.status.success() {
            return bail(format!(
                "Download failed ({}): {}",
                res.status,
                last_lines(&res.stderr, 3)
            ));
        }

        // The final path is printed once the file has been moved in place
        let stdout = String::from_utf8_lossy(&res.stdout);
        if let Some(path) = stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .last()
            .map(PathBuf::from)
            .filter(|path| path.is_file())
        {
            return Ok(path);
        }

        debug!("Downloaded path not printed, looking into {}", out_dir.display());
        let found = std::fs::read_dir(out_dir)
            .into_diagnostic()
            .wrap_err("Could not read download directory")?
            .flatten()
            .map(|entry| entry.path())
            .find(|path| path.is_file() && path.extension() != Some(OsStr::new("part")));

        found.ok_or_else(|| miette!("Download succeeded but produced no file").into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn as_strings(args: &[OsString]) -> Vec<String> {
        args.iter().map(|a| a.to_string_lossy().into_owned()).collect()
    }

    fn opts() -> FetchOptions {
        FetchOptions {
            proxy: Some("http://u:p@gate:7000".into()),
            cookies: Some(PathBuf::from("/cookies.txt")),
            sleep_requests: Duration::from_millis(1500),
            retries: 10,
            fragment_retries: 7,
        }
    }

    #[test]
    fn listing_is_flat_and_paced() {
        let args = as_strings(&Ytdl::listing_args("https://c/videos", &opts()));
        assert_eq!(&args[..2], ["--flat-playlist", "-J"]);
        let joined = args.join(" ");
        assert!(joined.contains("--sleep-requests 1.5"));
        assert!(joined.contains("--proxy http://u:p@gate:7000"));
        assert!(joined.contains("--cookies /cookies.txt"));
        assert_eq!(&args[args.len() - 2..], ["--", "https://c/videos"]);
    }

    #[test]
    fn direct_connection_has_no_proxy_nor_cookies() {
        let args = as_strings(&Ytdl::info_args("v", &FetchOptions::default()));
        assert!(!args.iter().any(|a| a == "--proxy" || a == "--cookies" || a == "--sleep-requests"));
        assert!(args.windows(2).any(|w| w == ["-f", "bestaudio/best"]));
    }

    #[test]
    fn download_has_bounded_retries() {
        let args = as_strings(&Ytdl::download_args("v", Path::new("/tmp/x"), &opts()));
        assert!(args.windows(2).any(|w| w == ["--retries", "10"]));
        assert!(args.windows(2).any(|w| w == ["--fragment-retries", "7"]));
        assert!(args.windows(2).any(|w| w == ["--print", "after_move:filepath"]));
        assert!(args.iter().any(|a| a.ends_with("%(id)s.%(ext)s")));
    }

    #[cfg(unix)]
    mod stub {
        use std::{fs, os::unix::fs::PermissionsExt};

        use tempfile::TempDir;

        use super::*;
        use crate::result::Error;

        /// Write an executable shell script standing in for yt-dlp
        fn stub(body: &str) -> (TempDir, String) {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("yt-dlp");
            fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
            fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
            let program = path.to_string_lossy().into_owned();
            (dir, program)
        }

        fn ytdl(program: &str) -> Ytdl {
            Ytdl {
                program: program.to_owned(),
            }
        }

        #[test]
        fn lists_entries_from_json() {
            let (_dir, program) = stub(
                r#"echo '{"entries": [{"id": "a", "url": "https://www.youtube.com/watch?v=a"}, null, {"id": "b"}]}'"#,
            );
            let refs = ytdl(&program)
                .list_channel("https://c", &FetchOptions::default())
                .unwrap();
            assert_eq!(refs.len(), 2);
            assert_eq!(refs[0], "https://www.youtube.com/watch?v=a");
        }

        #[test]
        fn empty_info_is_none() {
            let (_dir, program) = stub("echo 'ERROR: something odd' >&2\nexit 1");
            let info = ytdl(&program)
                .fetch_info("v", &FetchOptions::default())
                .unwrap();
            assert!(info.is_none());
        }

        #[test]
        fn unavailable_video_is_reported() {
            let (_dir, program) = stub("echo 'ERROR: [youtube] v: Video unavailable' >&2\nexit 1");
            let err = ytdl(&program)
                .fetch_info("v", &FetchOptions::default())
                .unwrap_err();
            assert!(matches!(err, Error::Unavailable(_)));
        }

        #[test]
        fn download_returns_printed_path() {
            let out = tempfile::tempdir().unwrap();
            let target = out.path().join("v.webm");
            let (_dir, program) = stub(&format!(
                "printf 'data' > '{0}'\necho '{0}'",
                target.display()
            ));
            let path = ytdl(&program)
                .download_audio("v", out.path(), &FetchOptions::default())
                .unwrap();
            assert_eq!(path, target);
        }

        #[test]
        fn version_check_fails_for_broken_program() {
            let (_dir, program) = stub("exit 1");
            assert!(Ytdl::new(&program).is_err());
        }
    }
}
