use std::{
    fs::File,
    io::{BufRead, BufReader},
    path::Path,
};

use miette::{Context, IntoDiagnostic, Result};
use tracing::{debug, info};

use crate::{database::JobQueue, types::Job, utils::unix_now};

/// Extract the channel reference of a dispatch line.
///
/// A line holds comma-separated fields, the second one being the channel URL
/// when it contains the marker. Anything else is skipped.
pub fn parse_dispatch_line(line: &str, marker: &str) -> Option<String> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    let channel = line.split(',').nth(1)?.trim();
    (!channel.is_empty() && channel.contains(marker)).then(|| channel.to_owned())
}

/// Enqueue one scrape job per channel found in the file.
/// Return the number of jobs enqueued.
pub fn dispatch_file(path: &Path, marker: &str, queue: &dyn JobQueue) -> Result<usize> {
    let file = File::open(path)
        .into_diagnostic()
        .wrap_err_with(|| format!("Could not open {}", path.display()))?;

    let mut count = 0;
    for (idx, line) in BufReader::new(file).lines().enumerate() {
        let line = line
            .into_diagnostic()
            .wrap_err_with(|| format!("Could not read {}", path.display()))?;

        match parse_dispatch_line(&line, marker) {
            Some(channel) => {
                queue.enqueue(&Job::scrape(channel), unix_now())?;
                count += 1;
            }
            None => debug!("Skipping line {}", idx + 1),
        }
    }

    info!("{count} channels enqueued from {}", path.display());
    Ok(count)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;
    use crate::database::Sqlite;

    const MARKER: &str = "youtube.com/channel/";

    #[test]
    fn parse_lines() {
        assert_eq!(
            parse_dispatch_line("x,https://www.youtube.com/channel/ABC123,y", MARKER),
            Some("https://www.youtube.com/channel/ABC123".to_string())
        );
        assert_eq!(
            parse_dispatch_line("  x ,  https://www.youtube.com/channel/ABC123  ", MARKER),
            Some("https://www.youtube.com/channel/ABC123".to_string())
        );
        assert_eq!(parse_dispatch_line("x,https://example.com,y", MARKER), None);
        assert_eq!(parse_dispatch_line("", MARKER), None);
        assert_eq!(parse_dispatch_line("   ", MARKER), None);
        assert_eq!(
            parse_dispatch_line("https://www.youtube.com/channel/ABC123", MARKER),
            None
        );
    }

    #[test]
    fn file_lines_become_scrape_jobs() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "name,url,extra").unwrap();
        writeln!(file, "a,https://www.youtube.com/channel/A,1").unwrap();
        writeln!(file).unwrap();
        writeln!(file, "b,https://example.com,2").unwrap();
        writeln!(file, "c,https://www.youtube.com/channel/C").unwrap();

        let queue = Sqlite::open_in_memory().unwrap();
        assert_eq!(dispatch_file(file.path(), MARKER, &queue).unwrap(), 2);

        let first = queue.claim(i64::MAX).unwrap().unwrap();
        assert_eq!(first.job, Job::scrape("https://www.youtube.com/channel/A"));
        let second = queue.claim(i64::MAX).unwrap().unwrap();
        assert_eq!(second.job, Job::scrape("https://www.youtube.com/channel/C"));
    }

    #[test]
    fn missing_file_is_an_error() {
        let queue = Sqlite::open_in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        assert!(dispatch_file(&dir.path().join("nope.csv"), MARKER, &queue).is_err());
    }
}
