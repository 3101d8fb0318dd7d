//! RugbySync — Event Log
//! JSONL audit stream, one file per day. Log failures never abort a sync.

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;

pub struct EventLogger {
    log_dir: PathBuf,
}

impl EventLogger {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        let dir = log_dir.into();
        fs::create_dir_all(&dir).ok();
        Self { log_dir: dir }
    }

    pub fn log<T: Serialize>(&self, event: &T) -> Result<()> {
        let date  = Utc::now().format("%Y-%m-%d").to_string();
        let path  = self.log_dir.join(format!("{date}.jsonl"));
        let line  = serde_json::to_string(event)?;
        let mut f = OpenOptions::new().create(true).append(true).open(&path)?;
        writeln!(f, "{line}")?;
        Ok(())
    }
}

pub fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

// ── Event types ──────────────────────────────────────────────────────────────

#[derive(Serialize, Debug)]
pub struct SyncStartedEvent {
    pub ts:          String,
    pub event:       &'static str,   // "SYNC_STARTED"
    pub competition: String,
    pub season:      String,
    pub dry_run:     bool,
    pub existing:    usize,
}

#[derive(Serialize, Debug)]
pub struct MatchMergedEvent {
    pub ts:          String,
    pub event:       &'static str,   // "MATCH_MERGED"
    pub competition: String,
    pub key:         String,
    pub kind:        String,         // "new" | "completed"
    pub home_score:  Option<i64>,
    pub away_score:  Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct ConflictEvent {
    pub ts:            String,
    pub event:         &'static str, // "SCORE_CONFLICT"
    pub competition:   String,
    pub key:           String,
    pub existing_home: Option<i64>,
    pub existing_away: Option<i64>,
    pub remote_home:   Option<i64>,
    pub remote_away:   Option<i64>,
}

#[derive(Serialize, Debug)]
pub struct RecordSkippedEvent {
    pub ts:          String,
    pub event:       &'static str,   // "RECORD_SKIPPED"
    pub competition: String,
    pub key:         String,
    pub field:       String,
    pub reason:      String,
}

#[derive(Serialize, Debug)]
pub struct SyncSummaryEvent {
    pub ts:           String,
    pub event:        &'static str,  // "SYNC_SUMMARY"
    pub competition:  String,
    pub season:       String,
    pub dry_run:      bool,
    pub additions:    usize,
    pub completions:  usize,
    pub unchanged:    usize,
    pub skipped:      usize,
    pub conflicts:    usize,
}
