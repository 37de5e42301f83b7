use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

use crate::result::Error;

/// Signs that the remote side wants us to slow down.
/// Checked first, bot checks also tend to mention the video being unavailable.
const THROTTLED: &str = concat!(
    r"HTTP Error 429",
    r"|Too Many Requests",
    r"|confirm you.?re not a bot",
    r"|rate[- ]limit",
);

/// Signs that the video will never be downloadable, retrying is useless
const UNAVAILABLE: &str = concat!(
    r"^ERROR:.*(?:",
    r"unavailable",
    r"|private video",
    r"|has been removed",
    r"|account .* terminated",
    r"|does not exist",
    r"|not available",
    r")",
);

struct Patterns {
    throttled: Regex,
    unavailable: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();

    PATTERNS.get_or_init(|| {
        let build = |pattern: &str| {
            RegexBuilder::new(pattern)
                .case_insensitive(true)
                .build()
                .unwrap_or_else(|err| panic!("invalid built-in pattern {pattern}: {err}"))
        };

        Patterns {
            throttled: build(THROTTLED),
            unavailable: build(UNAVAILABLE),
        }
    })
}

/// Look in the extractor's stderr for a condition the tasks handle specially
pub fn classify_stderr(stderr: &str) -> Option<Error> {
    let patterns = patterns();
    let lines = || stderr.lines().map(str::trim);

    if let Some(line) = lines().find(|line| patterns.throttled.is_match(line)) {
        return Some(Error::Throttled(line.to_owned()));
    }

    lines()
        .find(|line| patterns.unavailable.is_match(line))
        .map(|line| Error::Unavailable(line.to_owned()))
}
