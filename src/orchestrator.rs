//! Per-tournament sync drive: list → classify → fetch detail where needed →
//! merge → persist (unless dry-run).
//!
//! Listing and classification run strictly before any detail fetch; fetches
//! fan out with bounded concurrency and the Merge Writer applies the plan in
//! identity-key order, so completion order never shows in the output.
//! Persistence is all-or-nothing per tournament: an aborted run writes
//! nothing, and the dataset save itself is an atomic rename.

use std::collections::{HashMap, HashSet};
use std::path::Path;

use anyhow::{Context, Result};
use api_client::ApiClient;
use chrono::Utc;
use event_log::{
    now_iso, ConflictEvent, EventLogger, MatchMergedEvent, RecordSkippedEvent, SyncStartedEvent,
    SyncSummaryEvent,
};
use futures_util::{stream, StreamExt};
use match_store::{Dataset, MatchDetail};
use sync_engine::{apply, classify, ChangeSummary, Classification};
use tracing::info;

use crate::config::{dataset_path, Season, TournamentConfig};

pub struct SyncOptions {
    pub dry_run: bool,
    pub fetch_concurrency: usize,
}

/// Sync one competition+season. Record-level problems (invalid records,
/// score conflicts) land in the returned `ChangeSummary`; anything returned
/// as `Err` aborted this tournament before persistence.
pub async fn sync_tournament(
    client: &ApiClient,
    tournament: &TournamentConfig,
    season: Season,
    data_dir: &Path,
    events: &EventLogger,
    opts: &SyncOptions,
) -> Result<ChangeSummary> {
    let path = dataset_path(data_dir, tournament, season);
    let dataset =
        Dataset::load(&path).with_context(|| format!("loading dataset for {}", tournament.code))?;
    info!(
        "{}: {} existing records in {}",
        tournament.name,
        dataset.len(),
        path.display()
    );

    let _ = events.log(&SyncStartedEvent {
        ts: now_iso(),
        event: "SYNC_STARTED",
        competition: tournament.code.to_string(),
        season: season.label(),
        dry_run: opts.dry_run,
        existing: dataset.len(),
    });

    let season_param = season.feed_param();
    let remote = client
        .list_matches(tournament.comp_id, tournament.provider, &season_param)
        .await
        .with_context(|| format!("listing matches for {}", tournament.code))?;

    let plan = classify(&dataset, &remote);
    let today = Utc::now().date_naive();

    let candidates: Vec<(String, String)> = plan
        .fetch_candidates(today)
        .map(|entry| (entry.key.clone(), entry.remote.provider_id.clone()))
        .collect();
    info!(
        "{}: {} remote matches, {} detail fetches queued",
        tournament.code,
        remote.len(),
        candidates.len()
    );

    let fetched: Vec<(String, Result<MatchDetail, api_client::ApiError>)> =
        stream::iter(candidates)
            .map(|(key, provider_id)| {
                let season_param = &season_param;
                async move {
                    let result = client
                        .fetch_detail(&provider_id, tournament.provider, season_param)
                        .await;
                    (key, result)
                }
            })
            .buffer_unordered(opts.fetch_concurrency.max(1))
            .collect()
            .await;

    let mut details: HashMap<String, MatchDetail> = HashMap::with_capacity(fetched.len());
    for (key, result) in fetched {
        let detail = result.with_context(|| format!("detail fetch for {key}"))?;
        details.insert(key, detail);
    }

    let (merged, summary) = apply(&dataset, &plan, &details, tournament.code, &season.label());
    emit_record_events(events, tournament, &plan, &summary);

    if opts.dry_run {
        info!("{}: dry run, dataset not written", tournament.code);
    } else {
        merged
            .save(&path)
            .with_context(|| format!("persisting dataset for {}", tournament.code))?;
        info!(
            "{}: saved {} records to {}",
            tournament.code,
            merged.len(),
            path.display()
        );
    }

    let _ = events.log(&SyncSummaryEvent {
        ts: now_iso(),
        event: "SYNC_SUMMARY",
        competition: tournament.code.to_string(),
        season: season.label(),
        dry_run: opts.dry_run,
        additions: summary.additions,
        completions: summary.completions,
        unchanged: summary.unchanged,
        skipped: summary.skipped.len(),
        conflicts: summary.conflicts.len(),
    });

    Ok(summary)
}

fn emit_record_events(
    events: &EventLogger,
    tournament: &TournamentConfig,
    plan: &sync_engine::SyncPlan,
    summary: &ChangeSummary,
) {
    let skipped_keys: HashSet<&str> = summary.skipped.iter().map(|s| s.key.as_str()).collect();

    for entry in &plan.entries {
        let kind = match entry.classification {
            Classification::New => "new",
            Classification::ResultAdded => "completed",
            Classification::Unchanged | Classification::Conflict => continue,
        };
        if skipped_keys.contains(entry.key.as_str()) {
            continue;
        }
        info!(
            "  {}: {} v {}",
            if kind == "new" { "New" } else { "Updated" },
            entry.remote.home_team,
            entry.remote.away_team
        );
        let _ = events.log(&MatchMergedEvent {
            ts: now_iso(),
            event: "MATCH_MERGED",
            competition: tournament.code.to_string(),
            key: entry.key.clone(),
            kind: kind.to_string(),
            home_score: entry.remote.home_score,
            away_score: entry.remote.away_score,
        });
    }

    for skip in &summary.skipped {
        let _ = events.log(&RecordSkippedEvent {
            ts: now_iso(),
            event: "RECORD_SKIPPED",
            competition: tournament.code.to_string(),
            key: skip.key.clone(),
            field: skip.field.clone(),
            reason: skip.reason.clone(),
        });
    }

    for conflict in &summary.conflicts {
        let _ = events.log(&ConflictEvent {
            ts: now_iso(),
            event: "SCORE_CONFLICT",
            competition: tournament.code.to_string(),
            key: conflict.key.clone(),
            existing_home: conflict.existing_home,
            existing_away: conflict.existing_away,
            remote_home: conflict.remote_home,
            remote_away: conflict.remote_away,
        });
    }
}
