//! RugbySync — incremental match dataset updater
//!
//! One short-lived batch run per invocation; an external timer (cron,
//! systemd) drives scheduling. Per tournament: list the remote feed,
//! classify against the stored dataset, fetch detail only for new or
//! newly-completed matches, merge, rewrite the dataset atomically.
//!
//! Usage:
//!   rugby-sync [--season 2024-2025] [-t urc -t top14 | -t all]
//!              [--dry-run] [--data-dir PATH]
//!
//! Exit codes: 0 clean · 2 ran with conflicts/skips to review · 1 hard failure.

mod config;
mod orchestrator;

use std::env;
use std::fs::File;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use api_client::{ApiClient, RetryPolicy};
use chrono::Local;
use dotenv::dotenv;
use event_log::EventLogger;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Season;
use crate::orchestrator::SyncOptions;

const MAX_ISSUES_TO_DISPLAY: usize = 5;

#[derive(Debug, Default)]
struct CliArgs {
    season: Option<String>,
    tournaments: Vec<String>,
    dry_run: bool,
    data_dir: Option<PathBuf>,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<CliArgs> {
    let mut parsed = CliArgs::default();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--season" => {
                let Some(value) = args.next() else { bail!("--season needs a value") };
                parsed.season = Some(value);
            }
            "--tournaments" | "-t" => {
                let Some(value) = args.next() else { bail!("{arg} needs a value") };
                parsed.tournaments.push(value);
            }
            "--data-dir" => {
                let Some(value) = args.next() else { bail!("--data-dir needs a value") };
                parsed.data_dir = Some(PathBuf::from(value));
            }
            "--dry-run" => parsed.dry_run = true,
            other => bail!(
                "unknown argument '{other}' (expected --season, -t/--tournaments, --dry-run, --data-dir)"
            ),
        }
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = match parse_args(env::args().skip(1)) {
        Ok(args) => args,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };

    // Single instance lock — an overlapping timer run must not race the
    // dataset rewrite.
    let lock_file_path = env::temp_dir().join("rugby_sync.lock");
    let lock_file = match File::create(&lock_file_path) {
        Ok(f) => f,
        Err(e) => {
            error!("failed to create lock file at {:?}: {}", lock_file_path, e);
            return ExitCode::from(1);
        }
    };
    let mut lock = fd_lock::RwLock::new(lock_file);
    let _write_guard = match lock.try_write() {
        Ok(guard) => guard,
        Err(_) => {
            warn!("another rugby-sync run is already in progress, exiting");
            return ExitCode::from(1);
        }
    };

    match run(args).await {
        Ok(code) => code,
        Err(e) => {
            error!("{e:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: CliArgs) -> Result<ExitCode> {
    let season = match &args.season {
        Some(label) => Season::parse(label)?,
        None => Season::current(Local::now().date_naive()),
    };
    let tournaments = config::expand_selection(&args.tournaments)?;
    let data_dir = config::resolve_data_dir(args.data_dir);

    let fetch_concurrency = env::var("RUGBY_SYNC_FETCH_CONCURRENCY")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(4);

    info!("=== RugbySync — season {season} ===");
    info!("Data dir: {}", data_dir.display());
    if args.dry_run {
        info!("DRY RUN — no changes will be saved");
    }

    let client = ApiClient::new(RetryPolicy::default());
    let events = EventLogger::new("logs");
    let opts = SyncOptions {
        dry_run: args.dry_run,
        fetch_concurrency,
    };

    let mut additions = 0usize;
    let mut completions = 0usize;
    let mut unchanged = 0usize;
    let mut issues: Vec<String> = Vec::new();
    let mut failures: Vec<String> = Vec::new();

    for tournament in tournaments {
        info!("--- {} ({season}) ---", tournament.name);
        match orchestrator::sync_tournament(&client, tournament, season, &data_dir, &events, &opts)
            .await
        {
            Ok(summary) => {
                additions += summary.additions;
                completions += summary.completions;
                unchanged += summary.unchanged;
                for skip in &summary.skipped {
                    issues.push(format!("skipped {}: {} {}", skip.key, skip.field, skip.reason));
                }
                for conflict in &summary.conflicts {
                    issues.push(format!(
                        "conflict {}: stored {:?}-{:?}, remote {:?}-{:?}",
                        conflict.key,
                        conflict.existing_home,
                        conflict.existing_away,
                        conflict.remote_home,
                        conflict.remote_away
                    ));
                }
            }
            // one tournament failing must not block its siblings
            Err(e) => {
                error!("{} sync failed: {e:#}", tournament.code);
                failures.push(format!("{}: {e:#}", tournament.code));
            }
        }
    }

    info!("==================================================");
    info!("Summary:");
    info!("  New matches: {additions}");
    info!("  Completed results: {completions}");
    info!("  Unchanged: {unchanged}");
    if !issues.is_empty() {
        info!("  To review: {}", issues.len());
        for issue in issues.iter().take(MAX_ISSUES_TO_DISPLAY) {
            info!("    - {issue}");
        }
        if issues.len() > MAX_ISSUES_TO_DISPLAY {
            info!("    ... and {} more", issues.len() - MAX_ISSUES_TO_DISPLAY);
        }
    }
    if !failures.is_empty() {
        error!("  Failed tournaments: {}", failures.len());
        for failure in &failures {
            error!("    - {failure}");
        }
    }

    Ok(if !failures.is_empty() {
        ExitCode::from(1)
    } else if !issues.is_empty() {
        ExitCode::from(2)
    } else {
        ExitCode::SUCCESS
    })
}
