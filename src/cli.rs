use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use devotional_shorts::app::{App, shutdown_signal};
use devotional_shorts::init;
use devotional_shorts::recovery::describe_status;
use std::path::PathBuf;
use tracing::{error, warn};

/// Maintenance commands for the upload queue and the script inventory.
#[derive(Parser, Debug)]
#[command(name = "devotional-cli")]
#[command(version)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Detect missed slots, retry queued uploads and clean up old failures
    Recover,
    /// Show retry queue status
    Status,
    /// Script inventory maintenance
    Scripts {
        #[command(subcommand)]
        action: ScriptsAction,
    },
    /// Add a manual entry to the retry queue
    Enqueue {
        /// Reason recorded on the queue item
        #[arg(long)]
        reason: String,
        /// Upload job as JSON ({"videoPath": ..., "metadata": ..., "scriptId": ...})
        #[arg(long)]
        payload: String,
    },
    /// Empty the temp and output directories, keeping videos still queued for upload
    Clean,
}

#[derive(Subcommand, Debug)]
enum ScriptsAction {
    /// Inventory statistics and supply level
    Status,
    /// Mark every script unused again
    Reset,
    /// Generate scripts now (default: refill only when supply is low)
    Refill {
        #[arg(long)]
        count: Option<u32>,
    },
}

async fn queue_status(app: &App) -> Result<()> {
    let recovery = app.recovery().await?;
    for line in describe_status(&recovery.status(), Utc::now()) {
        println!("{}", line);
    }
    match recovery.detector().last_check_time().await? {
        Some(last) => println!("Last schedule check: {}", last.with_timezone(&Local)),
        None => println!("Last schedule check: never"),
    }
    println!("Upload schedule: {:?}", recovery.detector().hours());

    let usage = app.usage();
    let today = usage.today().await?;
    println!(
        "Pixabay downloads today: {}/{} ({} video(s) generated)",
        today.pixabay_count,
        usage.daily_limit(),
        today.videos_generated
    );
    Ok(())
}

async fn recover(app: &App) -> Result<()> {
    let mut pipeline = app.pipeline(false).await?;
    let result = tokio::select! {
        res = pipeline.recover() => Some(res),
        _ = shutdown_signal() => None,
    };

    if let Err(err) = pipeline.flush().await {
        error!(error = %err, "Failed to persist state on exit");
    }
    let report = match result {
        Some(res) => res?,
        None => {
            warn!("Interrupted; state flushed");
            return Ok(());
        }
    };
    let now = Utc::now();

    println!("Before:");
    for line in describe_status(&report.before, now) {
        println!("  {}", line);
    }
    println!("Missed slots found: {}", report.missed_slots.len());
    println!(
        "Processed {} item(s): {} succeeded, {} permanently failed",
        report.drain.processed, report.drain.succeeded, report.drain.permanently_failed
    );
    println!("Cleaned up {} old item(s)", report.cleaned);
    println!("After:");
    for line in describe_status(&report.after, now) {
        println!("  {}", line);
    }
    Ok(())
}

async fn clean(app: &App) -> Result<()> {
    let recovery = app.recovery().await?;
    let keep = recovery.queue().referenced_videos();
    let removed = init::clean_workspace(&app.cfg, &keep).await?;
    println!("Removed {} item(s)", removed);
    if !keep.is_empty() {
        println!("Kept {} video(s) still queued for upload", keep.len());
    }
    Ok(())
}

async fn scripts(app: &App, action: ScriptsAction) -> Result<()> {
    let mut inventory = app.inventory().await?;
    match action {
        ScriptsAction::Status => {
            let stats = inventory.stats();
            println!("Total scripts: {}", stats.total);
            println!("Used: {} ({:.1}%)", stats.used, stats.usage_percentage);
            println!("Unused: {}", stats.unused);
            println!("Supply level: {}", inventory.supply_level());
            for (source, count) in &stats.by_source {
                println!("  {}: {}", source, count);
            }
            if let Some(last) = stats.last_batch_generation {
                println!("Last batch generation: {}", last.with_timezone(&Local));
            }
            let report = inventory.report(5);
            if !report.recently_used.is_empty() {
                println!("Recently used:");
                for s in &report.recently_used {
                    println!("  #{} {} (used {}x)", s.id, s.verse, s.usage_count);
                }
            }
        }
        ScriptsAction::Reset => {
            inventory.reset_all().await?;
            println!("All {} scripts marked unused", inventory.scripts().len());
        }
        ScriptsAction::Refill { count } => {
            let generator = app
                .generator()
                .context("Refill needs openai_api_key in config.json")?;
            let summary = match count {
                Some(n) => Some(inventory.replenish(generator.as_ref(), n).await?),
                None => inventory.refill_if_needed(generator.as_ref(), &app.cfg.inventory).await?,
            };
            match summary {
                Some(s) => {
                    println!("Generated {} script(s), {} failed", s.success, s.failed);
                    for err in &s.errors {
                        println!("  {}", err);
                    }
                }
                None => println!("Script supply is fine; nothing generated"),
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    devotional_shorts::init_tracing();
    let cli = Cli::parse();
    let app = App::bootstrap(&cli.config, false).await?;

    match cli.command {
        Command::Recover => recover(&app).await,
        Command::Status => queue_status(&app).await,
        Command::Scripts { action } => scripts(&app, action).await,
        Command::Enqueue { reason, payload } => {
            let payload: serde_json::Value =
                serde_json::from_str(&payload).context("--payload must be valid JSON")?;
            let mut recovery = app.recovery().await?;
            let id = recovery.enqueue_failed_upload(payload, &reason).await?;
            println!("Queued {}", id);
            Ok(())
        }
        Command::Clean => clean(&app).await,
    }
}
