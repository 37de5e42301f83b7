mod cli;
mod config;
mod database;
mod io;
mod logging;
mod maintenance;
mod my_regex;
mod outside;
mod pacer;
mod proxy;
mod rate_limiter;
mod result;
mod tasks;
#[cfg(test)]
mod testing;
mod types;
mod utils;
mod worker;

use clap::Parser;
use crossbeam_channel::bounded;
use miette::{bail, miette, Context, IntoDiagnostic, Result};
use tracing::{debug, info};

use crate::{
    cli::{Action, Args},
    config::Settings,
    database::{JobQueue, Sqlite},
    outside::{Ffmpeg, Ytdl},
    pacer::ThreadSleeper,
    rate_limiter::{HourlyLimiter, WINDOW},
    tasks::{dispatch_file, TaskContext},
    types::Job,
    utils::unix_now,
};

fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_logging(logging::level_from_verbosity(args.verbose, args.quiet))?;

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(downloads) = args.downloads {
        settings.downloads_dir = downloads;
    }
    debug!("Settings: {settings:?}");

    match args.action {
        Action::Dispatch { file } => {
            let db = open_queue(&settings)?;
            let count = dispatch_file(&file, &settings.dispatch.channel_marker, &db)?;
            println!("Added {count} channel scraping jobs from {}", file.display());
        }
        Action::Run { file, workers } => {
            let db = open_queue(&settings)?;
            let count = dispatch_file(&file, &settings.dispatch.channel_marker, &db)?;
            println!("Added {count} channel scraping jobs from {}", file.display());
            work(&settings, &db, workers, true)?;
        }
        Action::Scrape { channel } => {
            let db = open_queue(&settings)?;
            enqueue(&db, Job::scrape(channel))?;
        }
        Action::Download { video, channel } => {
            let db = open_queue(&settings)?;
            enqueue(&db, Job::download(video, channel))?;
        }
        Action::Work { workers, drain } => {
            let db = open_queue(&settings)?;
            work(&settings, &db, workers, drain)?;
        }
        Action::Status { failures } => {
            let db = open_queue(&settings)?;
            status(&settings, &db, failures)?;
        }
        Action::Cleanup => {
            match maintenance::cleanup(&settings.downloads_dir, settings.audio.format)? {
                Some(report) => println!("{report}"),
                None => println!("No downloads folder found"),
            }
        }
        Action::Stats { output } => {
            match maintenance::collect_stats(&settings.downloads_dir, settings.audio.format)? {
                Some(report) => {
                    println!("{report}");
                    io::write_json(&output, &report)?;
                    println!("Stats saved to {}", output.display());
                }
                None => println!("No downloads folder found"),
            }
        }
    }

    Ok(())
}

fn open_queue(settings: &Settings) -> Result<Sqlite> {
    Sqlite::open(&settings.queue_path).wrap_err("Could not open the job queue")
}

fn enqueue(db: &Sqlite, job: Job) -> Result<()> {
    let id = db.enqueue(&job, unix_now())?;
    println!("Enqueued {job} as job {id}");
    Ok(())
}

/// Load the external programs
fn load_external_components(settings: &Settings) -> Result<(Ytdl, Ffmpeg)> {
    // Checking a program means running it, do both at once
    let yt_dlp = settings.tools.yt_dlp.clone();
    let ffmpeg = settings.tools.ffmpeg.clone();
    let ytdl_thread = std::thread::spawn(move || Ytdl::new(&yt_dlp));
    let ffmpeg_thread = std::thread::spawn(move || Ffmpeg::new(&ffmpeg));

    let ytdl = ytdl_thread
        .join()
        .map_err(|_| miette!("Could not join thread"))??;
    let ffmpeg = ffmpeg_thread
        .join()
        .map_err(|_| miette!("Could not join thread"))??;

    Ok((ytdl, ffmpeg))
}

fn work(settings: &Settings, db: &Sqlite, workers: Option<usize>, drain: bool) -> Result<()> {
    let workers = workers.unwrap_or(settings.workers);
    if workers == 0 {
        bail!("At least one worker is needed");
    }

    std::fs::create_dir_all(&settings.downloads_dir)
        .into_diagnostic()
        .wrap_err("Could not create downloads directory")?;

    let (ytdl, ffmpeg) = load_external_components(settings)?;
    let limiter = HourlyLimiter::new(db, settings.pacing.max_downloads_per_hour);
    let (wake_send, wake_recv) = bounded(workers);

    let ctx = TaskContext {
        settings,
        extractor: &ytdl,
        transcoder: &ffmpeg,
        queue: db,
        limiter: &limiter,
        sleeper: &ThreadSleeper,
        wake: Some(wake_send),
    };

    worker::run_pool(&ctx, &wake_recv, workers, drain)?;

    let counts = db.counts()?;
    info!(
        "Queue: {} pending, {} running, {} done, {} failed",
        counts.pending, counts.running, counts.done, counts.failed
    );
    Ok(())
}

fn status(settings: &Settings, db: &Sqlite, failures: usize) -> Result<()> {
    let counts = db.counts()?;
    println!("Queue {}", settings.queue_path.display());
    println!("  pending: {}", counts.pending);
    println!("  running: {}", counts.running);
    println!("  done:    {}", counts.done);
    println!("  failed:  {}", counts.failed);

    let window_start = unix_now() - WINDOW.as_secs() as i64;
    let fetches = db.fetches_since(window_start)?;
    if fetches.is_empty() {
        println!("No download in the last hour");
    } else {
        println!(
            "Downloads in the last hour (ceiling {}):",
            settings.pacing.max_downloads_per_hour
        );
        for (host, count) in fetches {
            println!("  {host}: {count}");
        }
    }

    let recent = db.recent_failures(failures)?;
    if !recent.is_empty() {
        println!("Recent failures:");
        let now = unix_now();
        for failed in recent {
            println!(
                "  #{} {}, {}s ago after {} attempts: {}",
                failed.id,
                failed.job,
                now - failed.finished_at,
                failed.attempts,
                failed.reason
            );
        }
    }

    Ok(())
}
