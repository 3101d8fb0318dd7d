//! RugbySync — Feed Client
//!
//! Client for the rugby-union-feeds JSON API (incrowdsports). Two endpoints:
//!   list:   GET /v1/matches?compId=&season=&provider=
//!   detail: GET /v1/matches/{id}?season=&provider=
//!
//! Transient faults (connect/timeout/5xx/429) are retried with doubling
//! backoff plus jitter; permanent faults (other 4xx, malformed JSON) surface
//! immediately. The client holds no state across calls beyond the pooled
//! reqwest connection.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use match_store::{LineupSlot, MatchDetail, MatchSummary, ScoringEvent};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_BASE_URL: &str = "https://rugby-union-feeds.incrowdsports.com";

/// Position ids 1–15 are the starting XV; everything above is the bench.
const STARTING_XV_MAX_POSITION: i64 = 15;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    /// Network/server fault worth retrying.
    #[error("transient feed fault: {0}")]
    Transient(String),
    /// API fault that a retry cannot fix.
    #[error("permanent feed fault: {0}")]
    Permanent(String),
}

impl ApiError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ApiError::Transient(_))
    }
}

fn classify_transport(err: reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ApiError::Transient(err.to_string())
    } else {
        ApiError::Permanent(err.to_string())
    }
}

// ── Retry policy ─────────────────────────────────────────────────────────────

/// Bounded retry with exponential backoff. `max_attempts` counts the first
/// try, so the default allows two retries after the initial request.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay before the retry following the given 1-based failed attempt:
    /// base delay doubled per attempt, plus up to 10% jitter.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let backoff = self.base_delay.saturating_mul(1u32 << exp);
        backoff + jitter(backoff)
    }
}

/// Up to 10% of the backoff, seeded from the clock's sub-second bits.
/// Enough to de-synchronize parallel fetches without a rand dependency.
fn jitter(backoff: Duration) -> Duration {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos())
        .unwrap_or(0);
    let fraction = f64::from(nanos % 1_000) / 1_000.0;
    Duration::from_millis((backoff.as_millis() as f64 * 0.1 * fraction) as u64)
}

/// Run `op`, retrying transient failures up to the policy bound. Permanent
/// failures are returned on the spot. The backoff sleep is the only
/// suspension point and is local to this one operation.
pub async fn retry<T, F, Fut>(policy: RetryPolicy, mut op: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, ApiError>>,
{
    let mut attempt = 1u32;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                warn!(
                    "transient feed error, retry {attempt}/{} in {:.1}s: {err}",
                    policy.max_attempts - 1,
                    delay.as_secs_f64()
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ── Wire shapes ──────────────────────────────────────────────────────────────

#[derive(Deserialize, Debug)]
struct ListResponse {
    data: Vec<WireMatch>,
}

#[derive(Deserialize, Debug)]
struct DetailResponse {
    #[serde(default)]
    data: Option<WireDetail>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireMatch {
    #[serde(default)]
    id: Value,
    date: String,
    #[serde(default)]
    status: Option<String>,
    home_team: WireTeam,
    away_team: WireTeam,
    #[serde(default)]
    venue: Option<WireVenue>,
    #[serde(default)]
    round: Option<i64>,
    #[serde(default)]
    round_type_id: Option<i64>,
    #[serde(default)]
    attendance: Option<i64>,
    #[serde(default)]
    officials: Option<Value>,
}

#[derive(Deserialize, Debug)]
struct WireTeam {
    name: String,
    #[serde(default)]
    score: Option<i64>,
    #[serde(default)]
    group: Option<String>,
}

#[derive(Deserialize, Debug)]
struct WireVenue {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireDetail {
    #[serde(default)]
    home_team: Option<WireSquad>,
    #[serde(default)]
    away_team: Option<WireSquad>,
    #[serde(default)]
    events: Vec<WireEvent>,
}

#[derive(Deserialize, Debug)]
struct WireSquad {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    players: Option<Vec<WirePlayer>>,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WirePlayer {
    id: Value,
    name: String,
    position_id: Value,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct WireEvent {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    team_id: Option<Value>,
    #[serde(default)]
    player_id: Option<Value>,
    #[serde(default)]
    minute: Option<i64>,
}

/// Feed ids show up both as numbers and as strings depending on provider.
fn id_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn id_number(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ── Status & scoring tables ──────────────────────────────────────────────────

const COMPLETED_STATUSES: &[&str] = &[
    "complete",
    "completed",
    "finished",
    "result",
    "fulltime",
    "ft",
    "played",
];

pub fn is_completed_status(status: Option<&str>) -> bool {
    status
        .map(|s| COMPLETED_STATUSES.contains(&s.trim().to_lowercase().as_str()))
        .unwrap_or(false)
}

/// Points value per scoring event type. Missed attempts are kept in the
/// timeline with value 0; anything unknown is not a scoring event.
pub fn scoring_value(kind: &str) -> Option<i64> {
    match kind {
        "Try" | "Penalty Try" => Some(5),
        "Penalty" | "Drop goal" => Some(3),
        "Conversion" => Some(2),
        "Missed drop goal" | "Missed penalty" | "Missed conversion" => Some(0),
        _ => None,
    }
}

// ── Adaptation ───────────────────────────────────────────────────────────────

fn summarize(m: WireMatch) -> MatchSummary {
    let completed = is_completed_status(m.status.as_deref());
    MatchSummary {
        provider_id: id_string(&m.id),
        date: m.date,
        home_team: m.home_team.name,
        away_team: m.away_team.name,
        // a score on a not-yet-completed match is a feed artifact; a fixture
        // stays scoreless until the status says otherwise
        home_score: if completed { m.home_team.score } else { None },
        away_score: if completed { m.away_team.score } else { None },
        home_conference: m.home_team.group,
        away_conference: m.away_team.group,
        stadium: m.venue.and_then(|v| v.name),
        // the feed uses round 0 for "no round assigned"
        round: m.round.filter(|r| *r > 0),
        round_type: m.round_type_id.map(|id| {
            if id == 1 { "league" } else { "knockout" }.to_string()
        }),
        attendance: m.attendance,
        officials: m.officials,
        completed,
    }
}

fn fold_side(players: &[WirePlayer]) -> (BTreeMap<String, LineupSlot>, HashMap<String, (String, String)>) {
    let mut lineup = BTreeMap::new();
    // player id → (name, position id)
    let mut index = HashMap::new();
    for player in players {
        let position = id_string(&player.position_id);
        let starter = id_number(&player.position_id)
            .map(|p| p <= STARTING_XV_MAX_POSITION)
            .unwrap_or(false);
        lineup.insert(
            position.clone(),
            LineupSlot {
                name: player.name.clone(),
                on: if starter { vec![0] } else { Vec::new() },
                off: Vec::new(),
                reds: Vec::new(),
                yellows: Vec::new(),
            },
        );
        index.insert(id_string(&player.id), (player.name.clone(), position));
    }
    (lineup, index)
}

/// Fold the detail payload's player lists and event timeline into lineups
/// and scoring events, one pass per side then one over the events. Matches
/// the dataset's historical shape: subs and cards land on the lineup slot
/// of the player's position.
fn fold_detail(detail: WireDetail) -> MatchDetail {
    let mut out = MatchDetail::default();

    let (Some(home), Some(away)) = (detail.home_team, detail.away_team) else {
        return out;
    };
    // lineups only make sense when the feed has squads for both sides
    let (Some(home_players), Some(away_players)) = (home.players, away.players) else {
        return out;
    };

    let (home_lineup, home_index) = fold_side(&home_players);
    let (away_lineup, away_index) = fold_side(&away_players);
    out.home_lineup = home_lineup;
    out.away_lineup = away_lineup;

    let home_id = id_string(&home.id);

    for event in detail.events {
        let Some(team_id) = event.team_id.as_ref() else {
            continue;
        };
        let is_home = id_string(team_id) == home_id;
        let minute = event.minute.unwrap_or(0);
        let player_key = event.player_id.as_ref().map(id_string);

        let (index, lineup, scores) = if is_home {
            (&home_index, &mut out.home_lineup, &mut out.home_scores)
        } else {
            (&away_index, &mut out.away_lineup, &mut out.away_scores)
        };

        if let Some(value) = scoring_value(&event.kind) {
            let player = player_key
                .as_ref()
                .and_then(|id| index.get(id))
                .map(|(name, _)| name.clone());
            scores.push(ScoringEvent {
                minute,
                kind: event.kind,
                player,
                value,
            });
            continue;
        }

        let Some(slot) = player_key
            .as_ref()
            .and_then(|id| index.get(id))
            .and_then(|(_, position)| lineup.get_mut(position))
        else {
            continue;
        };
        match event.kind.as_str() {
            "Sub On" => slot.on.push(minute),
            "Sub Off" => slot.off.push(minute),
            "Yellow card" => slot.yellows.push(minute),
            "Red card" => slot.reds.push(minute),
            _ => {}
        }
    }

    out
}

// ── Client ───────────────────────────────────────────────────────────────────

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ApiClient {
    pub fn new(retry: RetryPolicy) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36")
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
            base_url: DEFAULT_BASE_URL.to_string(),
            retry,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// List all matches for one competition+season.
    pub async fn list_matches(
        &self,
        comp_id: u32,
        provider: &str,
        season_param: &str,
    ) -> Result<Vec<MatchSummary>, ApiError> {
        let url = format!(
            "{}/v1/matches?compId={comp_id}&season={season_param}&provider={provider}",
            self.base_url
        );
        let raw = retry(self.retry, || self.fetch_once(&url)).await?;
        let parsed: ListResponse = serde_json::from_value(raw)
            .map_err(|e| ApiError::Permanent(format!("list payload missing 'data': {e}")))?;
        debug!("feed listed {} matches for comp {comp_id}", parsed.data.len());
        Ok(parsed.data.into_iter().map(summarize).collect())
    }

    /// Fetch one match's detail (squads + event timeline) and fold it down
    /// to lineups and scoring events.
    pub async fn fetch_detail(
        &self,
        match_id: &str,
        provider: &str,
        season_param: &str,
    ) -> Result<MatchDetail, ApiError> {
        let url = format!(
            "{}/v1/matches/{match_id}?season={season_param}&provider={provider}",
            self.base_url
        );
        let raw = retry(self.retry, || self.fetch_once(&url)).await?;
        let parsed: DetailResponse = serde_json::from_value(raw)
            .map_err(|e| ApiError::Permanent(format!("detail payload malformed: {e}")))?;
        Ok(parsed.data.map(fold_detail).unwrap_or_default())
    }

    async fn fetch_once(&self, url: &str) -> Result<Value, ApiError> {
        let resp = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(classify_transport)?;

        let status = resp.status();
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ApiError::Transient(format!("feed HTTP {status}")));
        }
        if !status.is_success() {
            return Err(ApiError::Permanent(format!("feed HTTP {status}")));
        }

        let raw = resp.text().await.map_err(classify_transport)?;
        serde_json::from_str(&raw)
            .map_err(|e| ApiError::Permanent(format!("malformed feed JSON: {e}")))
    }
}
