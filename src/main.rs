use anyhow::Result;
use clap::Parser;
use devotional_shorts::app::{App, shutdown_signal};
use devotional_shorts::init;
use devotional_shorts::pipeline::RunOptions;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// Produces and uploads the day's devotional shorts.
#[derive(Parser, Debug)]
#[command(name = "devotional-shorts")]
#[command(version)]
struct Args {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Produce exactly one video
    #[arg(long, conflicts_with = "count")]
    single: bool,

    /// Number of videos to produce (defaults to daily_video_count)
    #[arg(long)]
    count: Option<u32>,

    /// Select scripts and build metadata only; state stays in memory
    #[arg(long)]
    dry_run: bool,

    /// Render videos but do not upload them
    #[arg(long)]
    skip_upload: bool,

    /// Skip missed-slot detection and the retry queue
    #[arg(long)]
    skip_recovery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    devotional_shorts::init_tracing();
    let args = Args::parse();

    let app = App::bootstrap(&args.config, args.dry_run).await?;
    if !args.dry_run && !init::check_ffmpeg().await {
        warn!("ffmpeg/ffprobe not found in PATH; rendering will fail");
    }

    let opts = RunOptions {
        video_count: if args.single {
            1
        } else {
            args.count.unwrap_or(app.cfg.daily_video_count)
        },
        skip_recovery: args.skip_recovery,
        dry_run: args.dry_run,
    };
    info!(videos = opts.video_count, dry_run = opts.dry_run, "Starting devotional shorts run");

    let mut pipeline = app.pipeline(args.skip_upload).await?;
    let result = tokio::select! {
        res = pipeline.run(&opts) => Some(res),
        _ = shutdown_signal() => None,
    };

    if let Err(err) = pipeline.flush().await {
        error!(error = %err, "Failed to persist state on exit");
    }

    match result {
        Some(Ok(summary)) => {
            info!(
                uploaded = summary.uploaded,
                rendered = summary.rendered,
                upload_failures = summary.upload_failures,
                failed = summary.failed,
                "Run complete"
            );
            Ok(())
        }
        Some(Err(err)) => Err(err),
        None => {
            warn!("Interrupted; state flushed");
            Ok(())
        }
    }
}
