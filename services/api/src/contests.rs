//! Scheduled import of upcoming contests from the Codeforces API.

use crate::{db::Db, models::NewContest};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::{sync::Arc, time::Duration};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info, info_span, warn};

pub const CODEFORCES_SOURCE: &str = "codeforces";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("contest source request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("contest source returned an unexpected body: {0}")]
    Body(#[from] serde_json::Error),
    #[error("contest source reported failure: {0}")]
    Source(String),
    #[error("failed to store contests: {0}")]
    Store(#[from] anyhow::Error),
}

#[derive(Deserialize)]
struct ContestListResponse {
    status: String,
    #[serde(default)]
    comment: Option<String>,
    #[serde(default)]
    result: Vec<CodeforcesContest>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CodeforcesContest {
    id: i64,
    name: String,
    phase: String,
    duration_seconds: i64,
    #[serde(default)]
    start_time_seconds: Option<i64>,
}

impl CodeforcesContest {
    fn into_new_contest(self) -> Option<NewContest> {
        if self.phase != "BEFORE" {
            return None;
        }
        let start_time = DateTime::<Utc>::from_timestamp(self.start_time_seconds?, 0)?;
        let duration_seconds = i32::try_from(self.duration_seconds).ok()?;
        Some(NewContest {
            source: CODEFORCES_SOURCE.to_string(),
            external_id: self.id.to_string(),
            url: format!("https://codeforces.com/contest/{}", self.id),
            name: self.name,
            start_time,
            duration_seconds,
        })
    }
}

/// Parses a `contest.list` response, keeping contests that have not started.
pub fn parse_contest_list(body: &str) -> Result<Vec<NewContest>, SyncError> {
    let response: ContestListResponse = serde_json::from_str(body)?;
    if response.status != "OK" {
        return Err(SyncError::Source(
            response.comment.unwrap_or(response.status),
        ));
    }
    Ok(response
        .result
        .into_iter()
        .filter_map(CodeforcesContest::into_new_contest)
        .collect())
}

/// Fetches the source once and upserts what it returns. Returns the rows written.
pub async fn sync_once(
    http: &reqwest::Client,
    db: &Db,
    source_url: &str,
) -> Result<u64, SyncError> {
    let body = http
        .get(source_url)
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let contests = parse_contest_list(&body)?;
    debug!(upcoming = contests.len(), "Fetched contest list");
    Ok(db.upsert_contests(&contests).await?)
}

/// Runs [`sync_once`] immediately and then every `interval`. Failures are logged and retried next tick.
pub fn spawn_contest_sync(db: Arc<Db>, source_url: String, interval: Duration) -> JoinHandle<()> {
    let span = info_span!("contest_sync", source = CODEFORCES_SOURCE);
    tokio::spawn(
        async move {
            let http = reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .unwrap_or_default();
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                match sync_once(&http, &db, &source_url).await {
                    Ok(written) => info!(written, "Contest sync finished"),
                    Err(e) => warn!(error = %e, "Contest sync failed"),
                }
            }
        }
        .instrument(span),
    )
}
