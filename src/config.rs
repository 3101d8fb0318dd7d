//! Competition table, season handling and data directory resolution.
//!
//! The table is an immutable slice handed to the orchestrator; competition
//! ids belong to the rugby-union-feeds provider and are not stable real-world
//! identifiers, so they live here and nowhere near match identity.

use std::env;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate};

/// Northern-hemisphere club seasons start in August.
const SEASON_START_MONTH: u32 = 8;

const DEFAULT_DATA_DIR: &str = "json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TournamentConfig {
    pub code: &'static str,
    pub comp_id: u32,
    pub provider: &'static str,
    pub name: &'static str,
    pub file_prefix: &'static str,
}

pub const TOURNAMENTS: &[TournamentConfig] = &[
    TournamentConfig {
        code: "urc",
        comp_id: 1068,
        provider: "rugbyviz",
        name: "United Rugby Championship",
        file_prefix: "celtic",
    },
    TournamentConfig {
        code: "premiership",
        comp_id: 1011,
        provider: "rugbyviz",
        name: "Gallagher Premiership",
        file_prefix: "premiership",
    },
    TournamentConfig {
        code: "top14",
        comp_id: 1002,
        provider: "rugbyviz",
        name: "Top 14",
        file_prefix: "top14",
    },
    TournamentConfig {
        code: "pro-d2",
        comp_id: 1013,
        provider: "rugbyviz",
        name: "Pro D2",
        file_prefix: "pro-d2",
    },
    TournamentConfig {
        code: "euro-champions",
        comp_id: 1008,
        provider: "rugbyviz",
        name: "European Rugby Champions Cup",
        file_prefix: "euro-champions",
    },
    TournamentConfig {
        code: "euro-challenge",
        comp_id: 1026,
        provider: "rugbyviz",
        name: "European Rugby Challenge Cup",
        file_prefix: "euro-challenge",
    },
    TournamentConfig {
        code: "championship",
        comp_id: 1051,
        provider: "rugbyviz",
        name: "RFU Championship",
        file_prefix: "championship",
    },
];

pub fn find_tournament(code: &str) -> Option<&'static TournamentConfig> {
    TOURNAMENTS.iter().find(|t| t.code.eq_ignore_ascii_case(code))
}

/// Expand a selection of codes into configs; `all` means the whole table.
/// An empty selection defaults to the URC.
pub fn expand_selection(codes: &[String]) -> Result<Vec<&'static TournamentConfig>> {
    if codes.is_empty() {
        return Ok(vec![find_tournament("urc").expect("urc in table")]);
    }
    if codes.iter().any(|c| c.eq_ignore_ascii_case("all")) {
        return Ok(TOURNAMENTS.iter().collect());
    }
    codes
        .iter()
        .map(|code| {
            find_tournament(code).with_context(|| {
                let known: Vec<&str> = TOURNAMENTS.iter().map(|t| t.code).collect();
                format!("unknown tournament '{code}' (available: {})", known.join(", "))
            })
        })
        .collect()
}

/// A club season, labelled `YYYY-YYYY` with consecutive years.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Season {
    start_year: i32,
}

impl Season {
    pub fn parse(label: &str) -> Result<Self> {
        let Some((start, end)) = label.split_once('-') else {
            bail!("season must look like 2024-2025, got '{label}'");
        };
        let start: i32 = start.trim().parse().with_context(|| format!("bad season '{label}'"))?;
        let end: i32 = end.trim().parse().with_context(|| format!("bad season '{label}'"))?;
        if end != start + 1 {
            bail!("season years must be consecutive, got '{label}'");
        }
        Ok(Self { start_year: start })
    }

    /// Season in progress on the given day, by the August rule: July 2025 is
    /// still 2024-2025, August 2025 opens 2025-2026.
    pub fn current(today: NaiveDate) -> Self {
        let start_year = if today.month() >= SEASON_START_MONTH {
            today.year()
        } else {
            today.year() - 1
        };
        Self { start_year }
    }

    pub fn label(&self) -> String {
        format!("{}-{}", self.start_year, self.start_year + 1)
    }

    /// The feed's season parameter: start year plus a fixed `01` suffix.
    pub fn feed_param(&self) -> String {
        format!("{}01", self.start_year)
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Data directory precedence: explicit flag, then RUGBY_DATA_DIR, then the
/// local `json/` directory.
pub fn resolve_data_dir(flag: Option<PathBuf>) -> PathBuf {
    if let Some(dir) = flag {
        return dir;
    }
    if let Ok(dir) = env::var("RUGBY_DATA_DIR") {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    PathBuf::from(DEFAULT_DATA_DIR)
}

pub fn dataset_path(data_dir: &Path, tournament: &TournamentConfig, season: Season) -> PathBuf {
    data_dir.join(format!("{}-{}.json", tournament.file_prefix, season.label()))
}
