use std::path::PathBuf;

use clap::{ArgAction, Parser, Subcommand};

macro_rules! arg_env {
    ($v:literal) => {
        concat!("YTHARVEST_", $v)
    };
}

/// Queue and run channel scraping and audio download jobs.
/// Scrape channels, pace and rate-limit downloads, normalize audio, keep metadata.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(version, arg_required_else_help = true)]
pub struct Args {
    /// Configuration file [default: ytharvest.toml if present]
    #[arg(long, short, global = true, value_name = "FILE", env = arg_env!("CONFIG"))]
    pub config: Option<PathBuf>,

    /// Downloads root, overrides the configuration
    #[arg(long, global = true, value_name = "DIR")]
    pub downloads: Option<PathBuf>,

    /// More logs, repeat for even more
    #[arg(long, short, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    /// Only log warnings and errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub action: Action,
}

/// What to do, one per subcommand
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Enqueue one scrape job per channel line of a file
    Dispatch {
        /// Comma-separated lines, the second field being a channel URL
        file: PathBuf,
    },

    /// Dispatch a file then work until every job is settled
    Run {
        file: PathBuf,

        /// Number of worker threads, overrides the configuration
        #[arg(long, short, value_name = "N")]
        workers: Option<usize>,
    },

    /// Enqueue the scraping of a channel
    Scrape { channel: String },

    /// Enqueue the download of a video
    Download {
        video: String,

        /// Channel the video belongs to, kept in its metadata
        #[arg(long)]
        channel: Option<String>,
    },

    /// Run workers on the queue
    Work {
        /// Number of worker threads, overrides the configuration
        #[arg(long, short, value_name = "N")]
        workers: Option<usize>,

        /// Stop once no job is pending nor running
        #[arg(long)]
        drain: bool,
    },

    /// Show the queue state and the recent failures
    Status {
        /// Number of recent failures to show
        #[arg(long, value_name = "N", default_value_t = 10)]
        failures: usize,
    },

    /// Remove the download directories without audio
    Cleanup,

    /// Report on the downloaded videos
    Stats {
        #[arg(long, short, value_name = "FILE", default_value = "download_stats.json")]
        output: PathBuf,
    },
}
