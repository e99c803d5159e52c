//! balldontlie API client.
//!
//! Every request carries the raw credential in `Authorization`. Rate-limited (429)
//! and transient (5xx) responses are retried on one shared exponential backoff
//! counter; other failures surface immediately as typed errors.

use crate::config::Config;
use chrono::{Days, NaiveDate};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::header::{AUTHORIZATION, RETRY_AFTER};
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::{json, Value};
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

pub const GAMES_PATH: &str = "/nba/v1/games";
pub const TEAMS_PATH: &str = "/nba/v1/teams";
pub const PLAYERS_PATH: &str = "/nba/v1/players";

/// Largest page the upstream accepts.
pub const MAX_PER_PAGE: u32 = 100;

type Limiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

#[derive(Debug, Error)]
pub enum BdlError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("too many requests (rate limit), retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("upstream server error (status {status}): {body}")]
    UpstreamServer { status: u16, body: Value },

    #[error("upstream rejected request (status {status}): {body}")]
    UpstreamClient { status: u16, body: Value },

    #[error("request to upstream failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// Retry schedule. Delays are counted in `unit`s (seconds in production).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt.
    pub max_retries: u32,
    pub initial: u64,
    pub cap: u64,
    pub unit: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            initial: 2,
            cap: 30,
            unit: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff::new(self.initial, self.cap)
    }
}

/// Exponential backoff counter: yields `initial`, then doubles up to `cap`.
#[derive(Clone, Debug)]
pub struct Backoff {
    current: u64,
    cap: u64,
}

impl Backoff {
    pub fn new(initial: u64, cap: u64) -> Self {
        Self {
            current: initial.min(cap),
            cap,
        }
    }

    pub fn next_delay(&mut self) -> u64 {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.cap);
        delay
    }
}

/// Delay before retrying `status`, or `None` when the status is not retryable.
///
/// A 429 prefers the server's `Retry-After` hint; the backoff counter still
/// advances so a later hint-less response keeps escalating.
pub fn retry_delay(status: StatusCode, retry_after: Option<u64>, backoff: &mut Backoff) -> Option<u64> {
    if status == StatusCode::TOO_MANY_REQUESTS {
        let fallback = backoff.next_delay();
        return Some(retry_after.unwrap_or(fallback));
    }
    if status.is_server_error() {
        return Some(backoff.next_delay());
    }
    None
}

/// Only a plain non-negative integer counts; HTTP-date hints are ignored.
pub fn parse_retry_after(value: Option<&str>) -> Option<u64> {
    let value = value?.trim();
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// `days` consecutive calendar days starting at `start`.
pub fn day_window(start: NaiveDate, days: u32) -> Vec<NaiveDate> {
    (0..u64::from(days))
        .filter_map(|offset| start.checked_add_days(Days::new(offset)))
        .collect()
}

/// Query string for the games endpoint: one `dates[]` entry per day.
pub fn games_query(days: &[NaiveDate]) -> Vec<(&'static str, String)> {
    let mut query: Vec<(&'static str, String)> = days
        .iter()
        .map(|d| ("dates[]", d.format("%Y-%m-%d").to_string()))
        .collect();
    query.push(("per_page", MAX_PER_PAGE.to_string()));
    query
}

#[derive(Clone)]
pub struct BdlClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    retry: RetryPolicy,
    rate_limiter: Option<Arc<Limiter>>,
}

impl BdlClient {
    pub fn new(config: &Config) -> Result<Self, BdlError> {
        // HTTP client with timeouts
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(5)
            .build()?;

        let rate_limiter = config
            .requests_per_minute
            .and_then(NonZeroU32::new)
            .map(|n| Arc::new(RateLimiter::direct(Quota::per_minute(n))));

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key().map(str::to_string),
            retry: RetryPolicy {
                max_retries: config.max_retries,
                ..RetryPolicy::default()
            },
            rate_limiter,
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET `path` with `query`, retrying 429 and 5xx responses per the retry policy.
    pub async fn fetch<Q>(&self, path: &str, query: &Q) -> Result<Value, BdlError>
    where
        Q: Serialize + ?Sized,
    {
        self.fetch_recording_waits(path, query, &mut Vec::new()).await
    }

    /// `fetch`, appending each wait taken between attempts (in policy units) to `waits`.
    async fn fetch_recording_waits<Q>(&self, path: &str, query: &Q, waits: &mut Vec<u64>) -> Result<Value, BdlError>
    where
        Q: Serialize + ?Sized,
    {
        let api_key = self.api_key.as_deref().ok_or_else(|| {
            BdlError::Configuration("BALLDONTLIE_API_KEY is not set".to_string())
        })?;

        let url = format!("{}{}", self.base_url, path);
        let mut backoff = self.retry.backoff();
        let mut attempt: u32 = 0;

        loop {
            if let Some(limiter) = &self.rate_limiter {
                limiter.until_ready().await;
            }

            let response = self
                .http_client
                .get(&url)
                .header(AUTHORIZATION, api_key)
                .query(query)
                .send()
                .await?;

            let status = response.status();
            let retry_after = parse_retry_after(
                response
                    .headers()
                    .get(RETRY_AFTER)
                    .and_then(|v| v.to_str().ok()),
            );

            if let Some(wait) = retry_delay(status, retry_after, &mut backoff) {
                if attempt >= self.retry.max_retries {
                    if status == StatusCode::TOO_MANY_REQUESTS {
                        return Err(BdlError::RateLimited {
                            retry_after_secs: wait,
                        });
                    }
                    return Err(BdlError::UpstreamServer {
                        status: status.as_u16(),
                        body: read_error_body(response).await,
                    });
                }

                attempt += 1;
                warn!(
                    "{} returned {}; retry {}/{} in {} units",
                    path, status, attempt, self.retry.max_retries, wait
                );
                waits.push(wait);
                tokio::time::sleep(self.delay(wait)).await;
                continue;
            }

            if status.as_u16() >= 400 {
                return Err(BdlError::UpstreamClient {
                    status: status.as_u16(),
                    body: read_error_body(response).await,
                });
            }

            return Ok(response.json::<Value>().await?);
        }
    }

    fn delay(&self, units: u64) -> Duration {
        self.retry
            .unit
            .saturating_mul(u32::try_from(units).unwrap_or(u32::MAX))
    }

    /// Games for `days` consecutive days starting at `start`.
    pub async fn fetch_games(&self, start: NaiveDate, days: u32) -> Result<Value, BdlError> {
        let query = games_query(&day_window(start, days));
        let payload = self.fetch(GAMES_PATH, &query).await?;
        info!(
            "Fetched {} games for {} day(s) from {}",
            record_count(&payload),
            days,
            start
        );
        Ok(payload)
    }

    pub async fn fetch_teams(&self) -> Result<Value, BdlError> {
        let payload = self.fetch(TEAMS_PATH, &[] as &[(&str, &str)]).await?;
        info!("Fetched {} teams", record_count(&payload));
        Ok(payload)
    }

    pub async fn search_players(&self, search: &str, per_page: u32) -> Result<Value, BdlError> {
        let per_page = per_page.to_string();
        self.fetch(PLAYERS_PATH, &[("search", search), ("per_page", per_page.as_str())])
            .await
    }
}

fn record_count(payload: &Value) -> usize {
    payload
        .get("data")
        .and_then(Value::as_array)
        .map_or(0, Vec::len)
}

/// Upstream error body as JSON, falling back to `{"error": <text>}`.
async fn read_error_body(response: reqwest::Response) -> Value {
    match response.text().await {
        Ok(text) => serde_json::from_str(&text).unwrap_or_else(|_| json!({ "error": text })),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use tokio_test::{assert_err, assert_ok};

    fn test_config(base_url: String) -> Config {
        Config {
            api_key: Some("test-key".to_string()),
            base_url,
            requests_per_minute: None,
            ..Config::default()
        }
    }

    fn fast_client(config: &Config) -> BdlClient {
        BdlClient::new(config).unwrap().with_retry_policy(RetryPolicy {
            unit: Duration::from_millis(1),
            ..RetryPolicy::default()
        })
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let mut backoff = RetryPolicy::default().backoff();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay()).collect();
        assert_eq!(delays, vec![2, 4, 8, 16, 30, 30]);
    }

    #[test]
    fn rate_limit_delays_follow_backoff_without_hint() {
        let mut backoff = RetryPolicy::default().backoff();
        let delays: Vec<Option<u64>> = (0..3)
            .map(|_| retry_delay(StatusCode::TOO_MANY_REQUESTS, None, &mut backoff))
            .collect();
        assert_eq!(delays, vec![Some(2), Some(4), Some(8)]);
    }

    #[test]
    fn retry_after_hint_wins_but_backoff_still_advances() {
        let mut backoff = RetryPolicy::default().backoff();
        assert_eq!(
            retry_delay(StatusCode::TOO_MANY_REQUESTS, Some(7), &mut backoff),
            Some(7)
        );
        assert_eq!(
            retry_delay(StatusCode::SERVICE_UNAVAILABLE, None, &mut backoff),
            Some(4)
        );
    }

    #[test]
    fn client_errors_are_not_retryable() {
        let mut backoff = RetryPolicy::default().backoff();
        assert_eq!(retry_delay(StatusCode::NOT_FOUND, None, &mut backoff), None);
        assert_eq!(retry_delay(StatusCode::UNAUTHORIZED, Some(5), &mut backoff), None);
        assert_eq!(backoff.next_delay(), 2);
    }

    #[test]
    fn retry_after_must_be_numeric() {
        assert_eq!(parse_retry_after(Some("12")), Some(12));
        assert_eq!(parse_retry_after(Some(" 3 ")), Some(3));
        assert_eq!(parse_retry_after(Some("-1")), None);
        assert_eq!(parse_retry_after(Some("Wed, 21 Oct 2015 07:28:00 GMT")), None);
        assert_eq!(parse_retry_after(Some("")), None);
        assert_eq!(parse_retry_after(None), None);
    }

    #[test]
    fn day_window_spans_month_boundary() {
        let start = NaiveDate::from_ymd_opt(2024, 2, 28).unwrap();
        let query = games_query(&day_window(start, 3));
        assert_eq!(
            query,
            vec![
                ("dates[]", "2024-02-28".to_string()),
                ("dates[]", "2024-02-29".to_string()),
                ("dates[]", "2024-03-01".to_string()),
                ("per_page", "100".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn missing_credential_fails_before_any_request() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TEAMS_PATH)
            .expect(0)
            .create_async()
            .await;

        let config = Config {
            api_key: None,
            ..test_config(server.url())
        };
        let err = assert_err!(fast_client(&config).fetch_teams().await);
        assert!(matches!(err, BdlError::Configuration(_)));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sends_raw_credential_in_authorization_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TEAMS_PATH)
            .match_header("authorization", "test-key")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"id":1,"abbreviation":"ATL"}]}"#)
            .create_async()
            .await;

        let body = assert_ok!(fast_client(&test_config(server.url())).fetch_teams().await);
        assert_eq!(body["data"][0]["abbreviation"], "ATL");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn recovers_after_three_rate_limited_attempts() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", TEAMS_PATH)
            .with_status(429)
            .expect(3)
            .create_async()
            .await;
        let ok = server
            .mock("GET", TEAMS_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let mut waits = Vec::new();
        let body = assert_ok!(
            fast_client(&test_config(server.url()))
                .fetch_recording_waits(TEAMS_PATH, &[] as &[(&str, &str)], &mut waits)
                .await
        );
        assert_eq!(body, json!({ "data": [] }));
        assert_eq!(waits, vec![2, 4, 8]);
        limited.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn server_hint_then_backoff_drive_the_waits() {
        let mut server = mockito::Server::new_async().await;
        let limited = server
            .mock("GET", TEAMS_PATH)
            .with_status(429)
            .with_header("retry-after", "7")
            .expect(1)
            .create_async()
            .await;
        let unavailable = server
            .mock("GET", TEAMS_PATH)
            .with_status(503)
            .expect(1)
            .create_async()
            .await;
        let ok = server
            .mock("GET", TEAMS_PATH)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[]}"#)
            .expect(1)
            .create_async()
            .await;

        let mut waits = Vec::new();
        assert_ok!(
            fast_client(&test_config(server.url()))
                .fetch_recording_waits(TEAMS_PATH, &[] as &[(&str, &str)], &mut waits)
                .await
        );
        assert_eq!(waits, vec![7, 4]);
        limited.assert_async().await;
        unavailable.assert_async().await;
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn exhausted_rate_limit_reports_last_wait_hint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TEAMS_PATH)
            .with_status(429)
            .with_header("retry-after", "1")
            .expect(5)
            .create_async()
            .await;

        let err = assert_err!(fast_client(&test_config(server.url())).fetch_teams().await);
        assert!(matches!(err, BdlError::RateLimited { retry_after_secs: 1 }));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn persistent_server_errors_stop_after_five_attempts() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TEAMS_PATH)
            .with_status(500)
            .with_body(r#"{"message":"boom"}"#)
            .expect(5)
            .create_async()
            .await;

        let err = assert_err!(fast_client(&test_config(server.url())).fetch_teams().await);
        match err {
            BdlError::UpstreamServer { status, body } => {
                assert_eq!(status, 500);
                assert_eq!(body, json!({ "message": "boom" }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn client_error_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", TEAMS_PATH)
            .with_status(401)
            .with_body("Unauthorized")
            .expect(1)
            .create_async()
            .await;

        let err = assert_err!(fast_client(&test_config(server.url())).fetch_teams().await);
        match err {
            BdlError::UpstreamClient { status, body } => {
                assert_eq!(status, 401);
                assert_eq!(body, json!({ "error": "Unauthorized" }));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn games_request_lists_each_day() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", GAMES_PATH)
            .match_query(Matcher::Exact(
                "dates%5B%5D=2024-03-01&dates%5B%5D=2024-03-02&per_page=100".into(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"data":[{"id":10}],"meta":{"per_page":100}}"#)
            .create_async()
            .await;

        let start = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let body = assert_ok!(
            fast_client(&test_config(server.url()))
                .fetch_games(start, 2)
                .await
        );
        assert_eq!(body["data"][0]["id"], 10);
        mock.assert_async().await;
    }
}
