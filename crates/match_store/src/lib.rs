//! RugbySync — Match Store
//!
//! Shared data model for rugby match records plus the per-competition JSON
//! dataset files (`{prefix}-{season}.json`, one JSON array per file).
//!
//! Matches are identified by `(date, home team, away team)` — provider match
//! ids are not stable across seasons/providers and never enter the key.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Separator for identity key parts. Not expected inside team names.
pub const KEY_SEPARATOR: char = '|';

// ── Model ────────────────────────────────────────────────────────────────────

/// One lineup position: player name plus minutes for subs and cards.
/// Starters (position ids 1–15) carry `on: [0]`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct LineupSlot {
    pub name: String,
    #[serde(default)]
    pub on: Vec<i64>,
    #[serde(default)]
    pub off: Vec<i64>,
    #[serde(default)]
    pub reds: Vec<i64>,
    #[serde(default)]
    pub yellows: Vec<i64>,
}

/// One scoring event (try, penalty, conversion, drop goal, ...).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScoringEvent {
    pub minute: i64,
    #[serde(rename = "type")]
    pub kind: String,
    pub player: Option<String>,
    pub value: i64,
}

/// Per-side slice of a match record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TeamEntry {
    pub team: String,
    #[serde(default)]
    pub score: Option<i64>,
    #[serde(default)]
    pub conference: Option<String>,
    #[serde(default)]
    pub lineup: BTreeMap<String, LineupSlot>,
    #[serde(default)]
    pub scores: Vec<ScoringEvent>,
}

impl TeamEntry {
    pub fn stub(team: impl Into<String>, score: Option<i64>, conference: Option<String>) -> Self {
        Self {
            team: team.into(),
            score,
            conference,
            lineup: BTreeMap::new(),
            scores: Vec::new(),
        }
    }
}

/// One fixture/result as persisted in the dataset file.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MatchRecord {
    pub date: String,
    pub home: TeamEntry,
    pub away: TeamEntry,
    #[serde(default)]
    pub stadium: Option<String>,
    #[serde(default)]
    pub round: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub round_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attendance: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub officials: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub competition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub season: Option<String>,
}

impl MatchRecord {
    pub fn identity_key(&self) -> String {
        identity_key(&self.date, &self.home.team, &self.away.team)
    }

    /// A record with both scores known. Results are terminal: a later sync
    /// never reverts one back to a scoreless fixture.
    pub fn is_result(&self) -> bool {
        self.home.score.is_some() && self.away.score.is_some()
    }

    pub fn match_day(&self) -> Option<NaiveDate> {
        match_day(&self.date)
    }

    /// Build a record from a listing summary, attaching detail payload
    /// (lineups + scoring events) when one was fetched.
    pub fn from_summary(
        summary: &MatchSummary,
        detail: Option<MatchDetail>,
        competition: &str,
        season: &str,
    ) -> Self {
        let detail = detail.unwrap_or_default();
        Self {
            date: summary.date.clone(),
            home: TeamEntry {
                team: summary.home_team.clone(),
                score: summary.home_score,
                conference: summary.home_conference.clone(),
                lineup: detail.home_lineup,
                scores: detail.home_scores,
            },
            away: TeamEntry {
                team: summary.away_team.clone(),
                score: summary.away_score,
                conference: summary.away_conference.clone(),
                lineup: detail.away_lineup,
                scores: detail.away_scores,
            },
            stadium: summary.stadium.clone(),
            round: summary.round,
            round_type: summary.round_type.clone(),
            attendance: summary.attendance,
            officials: summary.officials.clone(),
            competition: Some(competition.to_string()),
            season: Some(season.to_string()),
        }
    }
}

/// Listing-level view of one match, adapted from the feed's list endpoint.
/// Carries enough to classify and to build a stub record, not the lineups.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchSummary {
    /// Provider-internal match id, used only to address the detail endpoint.
    pub provider_id: String,
    pub date: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub home_conference: Option<String>,
    pub away_conference: Option<String>,
    pub stadium: Option<String>,
    pub round: Option<i64>,
    pub round_type: Option<String>,
    pub attendance: Option<i64>,
    pub officials: Option<serde_json::Value>,
    pub completed: bool,
}

impl MatchSummary {
    pub fn identity_key(&self) -> String {
        identity_key(&self.date, &self.home_team, &self.away_team)
    }

    pub fn match_day(&self) -> Option<NaiveDate> {
        match_day(&self.date)
    }
}

/// Detail-endpoint payload folded down to what the record stores.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchDetail {
    pub home_lineup: BTreeMap<String, LineupSlot>,
    pub away_lineup: BTreeMap<String, LineupSlot>,
    pub home_scores: Vec<ScoringEvent>,
    pub away_scores: Vec<ScoringEvent>,
}

// ── Identity ─────────────────────────────────────────────────────────────────

/// NFKC-fold a team name and collapse internal whitespace.
pub fn normalize_team(name: &str) -> String {
    let folded: String = name.nfkc().collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Calendar day of a feed timestamp (`2024-09-20T19:35:00.000Z` → 2024-09-20).
pub fn match_day(date: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(date.get(..10)?, "%Y-%m-%d").ok()
}

/// Stable identity key: `YYYY-MM-DD|home|away`. Date-only precision, team
/// names normalized, home side first.
pub fn identity_key(date: &str, home: &str, away: &str) -> String {
    let day = date.get(..10).unwrap_or(date);
    format!(
        "{day}{sep}{home}{sep}{away}",
        sep = KEY_SEPARATOR,
        home = normalize_team(home),
        away = normalize_team(away),
    )
}

// ── Dataset files ────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("dataset read/write failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("dataset is not valid match JSON at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// All persisted records for one competition+season, keyed by identity.
/// BTreeMap keeps the file output sorted and reruns byte-stable.
#[derive(Debug, Clone, Default)]
pub struct Dataset {
    records: BTreeMap<String, MatchRecord>,
}

impl Dataset {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: impl IntoIterator<Item = MatchRecord>) -> Self {
        let mut ds = Self::new();
        for record in records {
            ds.insert(record);
        }
        ds
    }

    pub fn get(&self, key: &str) -> Option<&MatchRecord> {
        self.records.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.contains_key(key)
    }

    /// Insert or replace by identity key. Returns the displaced record.
    pub fn insert(&mut self, record: MatchRecord) -> Option<MatchRecord> {
        self.records.insert(record.identity_key(), record)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in identity-key order.
    pub fn records(&self) -> impl Iterator<Item = &MatchRecord> {
        self.records.values()
    }

    /// Load a dataset file. A missing file is an empty dataset; an unreadable
    /// or malformed file is an error (never silently dropped).
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let raw = fs::read_to_string(path).map_err(|source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let records: Vec<MatchRecord> =
            serde_json::from_str(&raw).map_err(|source| StoreError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self::from_records(records))
    }

    /// Atomic rewrite: serialize to `<file>.json.tmp`, then rename over the
    /// target. The dataset file is never left partially written.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(io_err)?;
            }
        }

        let records: Vec<&MatchRecord> = self.records.values().collect();
        let body = serde_json::to_string_pretty(&records).map_err(|source| StoreError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, body.as_bytes()).map_err(|source| StoreError::Io {
            path: tmp.clone(),
            source,
        })?;
        fs::rename(&tmp, path).map_err(io_err)
    }
}
