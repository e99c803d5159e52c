//! Inbound HTTP surface: passthrough, sync, local reads, and the cron trigger.

use crate::client::{BdlClient, BdlError, MAX_PER_PAGE};
use crate::config::Config;
use crate::error::ApiError;
use crate::health::{HealthStatus, SyncHealth};
use crate::store::PgStore;
use crate::sync::{SyncOutcome, Synchronizer};
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Days, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{error, info};

pub const TASK_TOKEN_HEADER: &str = "x-task-token";
pub const MAX_DAYS: u32 = 14;
const MIN_SEARCH_LEN: usize = 2;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub client: BdlClient,
    pub sync: Arc<Synchronizer<PgStore>>,
    pub health: SyncHealth,
}

impl AppState {
    pub fn new(config: Config, store: Option<PgStore>) -> Result<Self, BdlError> {
        let client = BdlClient::new(&config)?;
        Ok(Self {
            config: Arc::new(config),
            client,
            sync: Arc::new(Synchronizer::new(store)),
            health: SyncHealth::new(),
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct DaysQuery {
    #[serde(default = "default_days")]
    pub days: u32,
}

fn default_days() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
pub struct PlayersQuery {
    pub search: Option<String>,
    #[serde(default = "default_per_page")]
    pub per_page: u32,
}

fn default_per_page() -> u32 {
    25
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health_handler))
        .route("/nba/games", get(games))
        .route("/nba/teams", get(teams))
        .route("/nba/players", get(players))
        .route("/nba/sync/teams", post(sync_teams))
        .route("/nba/sync/games", post(sync_games))
        .route("/nba/db/teams", get(db_teams))
        .route("/nba/db/games", get(db_games))
        .route("/tasks/nba/sync-games", post(task_sync_games))
        .with_state(state)
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

fn validate_days(days: u32) -> Result<u32, ApiError> {
    if (1..=MAX_DAYS).contains(&days) {
        Ok(days)
    } else {
        Err(ApiError::Validation(format!(
            "days must be between 1 and {}, got {}",
            MAX_DAYS, days
        )))
    }
}

/// Checks `X-Task-Token` against the configured secret.
pub fn authorize_task(config: &Config, headers: &HeaderMap) -> Result<(), ApiError> {
    let expected = config
        .task_token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| ApiError::Configuration("TASK_TOKEN is not configured".to_string()))?;

    let provided = headers
        .get(TASK_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok());

    match provided {
        Some(token) if token == expected => Ok(()),
        Some(_) => Err(ApiError::Unauthorized("invalid X-Task-Token".to_string())),
        None => Err(ApiError::Unauthorized("missing X-Task-Token".to_string())),
    }
}

async fn root() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "bdl-sync",
        "utc": Utc::now().to_rfc3339(),
    }))
}

async fn health_handler(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let status = state.health.status().await;
    let last_sync = state.health.last_sync_time.read().await;
    let last_count = state.health.last_sync_count.read().await;
    let errors = state.health.error_count.read().await;

    let http_status = if status == HealthStatus::Unavailable {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (http_status, Json(json!({
        "ok": http_status == StatusCode::OK,
        "service": "bdl-sync",
        "version": env!("CARGO_PKG_VERSION"),
        "status": status.as_str(),
        "store_configured": state.sync.store_configured(),
        "last_sync": last_sync.map(|t| t.to_rfc3339()),
        "last_sync_count": *last_count,
        "consecutive_errors": *errors,
    })))
}

pub async fn games(
    State(state): State<AppState>,
    query: Result<Query<DaysQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let days = validate_days(query.days)?;
    Ok(Json(state.client.fetch_games(today(), days).await?))
}

pub async fn teams(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    Ok(Json(state.client.fetch_teams().await?))
}

pub async fn players(
    State(state): State<AppState>,
    query: Result<Query<PlayersQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let search = query.search.unwrap_or_default();
    if search.trim().chars().count() < MIN_SEARCH_LEN {
        return Err(ApiError::Validation(format!(
            "search must be at least {} characters",
            MIN_SEARCH_LEN
        )));
    }
    if !(1..=MAX_PER_PAGE).contains(&query.per_page) {
        return Err(ApiError::Validation(format!(
            "per_page must be between 1 and {}",
            MAX_PER_PAGE
        )));
    }
    Ok(Json(state.client.search_players(search.trim(), query.per_page).await?))
}

pub async fn sync_teams(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let payload = state.client.fetch_teams().await?;
    let outcome = state.sync.sync_teams(&payload).await?;
    Ok(Json(json!({
        "upserted": outcome.count(),
        "store_configured": outcome.store_configured(),
    })))
}

async fn run_games_sync(state: &AppState, days: u32) -> Result<SyncOutcome, ApiError> {
    let payload = state.client.fetch_games(today(), days).await?;
    let outcome = state.sync.sync_games(&payload).await?;
    info!("Synced {} games over {} day(s)", outcome.count(), days);
    Ok(outcome)
}

fn games_sync_body(outcome: SyncOutcome, days: u32) -> Value {
    json!({
        "upserted": outcome.count(),
        "days": days,
        "store_configured": outcome.store_configured(),
    })
}

pub async fn sync_games(
    State(state): State<AppState>,
    query: Result<Query<DaysQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let days = validate_days(query.days)?;
    let outcome = run_games_sync(&state, days).await?;
    Ok(Json(games_sync_body(outcome, days)))
}

pub async fn db_teams(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let rows = state.sync.read_teams().await?;
    Ok(Json(json!({
        "store_configured": state.sync.store_configured(),
        "data": rows,
    })))
}

pub async fn db_games(
    State(state): State<AppState>,
    query: Result<Query<DaysQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    let Query(query) = query?;
    let days = validate_days(query.days)?;
    let start = today();
    let end = start
        .checked_add_days(Days::new(u64::from(days - 1)))
        .unwrap_or(start);
    let rows = state.sync.read_between(start, end).await?;
    Ok(Json(json!({
        "store_configured": state.sync.store_configured(),
        "start": start,
        "end": end,
        "data": rows,
    })))
}

/// Token-gated games sync for an external scheduler.
pub async fn task_sync_games(
    State(state): State<AppState>,
    headers: HeaderMap,
    query: Result<Query<DaysQuery>, QueryRejection>,
) -> Result<Json<Value>, ApiError> {
    authorize_task(&state.config, &headers)?;
    let Query(query) = query?;
    let days = validate_days(query.days)?;

    match run_games_sync(&state, days).await {
        Ok(outcome) => {
            state.health.record_success(outcome.count()).await;
            Ok(Json(games_sync_body(outcome, days)))
        }
        Err(e) => {
            state.health.record_error().await;
            error!("Scheduled games sync failed: {}", e);
            Err(e)
        }
    }
}
