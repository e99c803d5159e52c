//! Keyed Postgres storage for teams and games.

use crate::normalize::{GameRow, TeamRow};
use anyhow::{anyhow, Result};
use chrono::NaiveDate;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Storage seam used by the synchronizer. Upserts are keyed on `id` and each
/// call is one transaction.
pub trait RecordStore: Send + Sync {
    fn upsert_teams(&self, rows: &[TeamRow]) -> impl Future<Output = Result<usize, StoreError>> + Send;

    fn upsert_games(&self, rows: &[GameRow]) -> impl Future<Output = Result<usize, StoreError>> + Send;

    /// All teams ordered by id.
    fn read_teams(&self) -> impl Future<Output = Result<Vec<TeamRow>, StoreError>> + Send;

    /// All games ordered by (day, id), undated games last.
    fn read_games(&self) -> impl Future<Output = Result<Vec<GameRow>, StoreError>> + Send;

    /// Games whose day lies in `[start, end]`, ordered by (day, id).
    fn read_games_between(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> impl Future<Output = Result<Vec<GameRow>, StoreError>> + Send;
}

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

#[derive(FromRow)]
struct TeamRecord {
    id: i64,
    abbreviation: Option<String>,
    city: Option<String>,
    conference: Option<String>,
    division: Option<String>,
    name: Option<String>,
    full_name: Option<String>,
    raw: Json<Value>,
}

impl From<TeamRecord> for TeamRow {
    fn from(r: TeamRecord) -> Self {
        Self {
            id: r.id,
            abbreviation: r.abbreviation,
            city: r.city,
            conference: r.conference,
            division: r.division,
            name: r.name,
            full_name: r.full_name,
            raw: r.raw.0,
        }
    }
}

#[derive(FromRow)]
struct GameRecord {
    id: i64,
    game_day: Option<NaiveDate>,
    season: Option<i32>,
    status: Option<String>,
    postseason: Option<bool>,
    home_team_id: Option<i64>,
    visitor_team_id: Option<i64>,
    home_team_score: Option<i32>,
    visitor_team_score: Option<i32>,
    raw: Json<Value>,
}

impl From<GameRecord> for GameRow {
    fn from(r: GameRecord) -> Self {
        Self {
            id: r.id,
            game_day: r.game_day,
            season: r.season,
            status: r.status,
            postseason: r.postseason,
            home_team_id: r.home_team_id,
            visitor_team_id: r.visitor_team_id,
            home_team_score: r.home_team_score,
            visitor_team_score: r.visitor_team_score,
            raw: r.raw.0,
        }
    }
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }

    /// Connect to Postgres, retrying with exponential backoff.
    pub async fn connect_with_retry(url: &str, max_retries: u32) -> Result<Self> {
        let mut attempt = 0;
        loop {
            match PgPoolOptions::new()
                .max_connections(10)
                .acquire_timeout(Duration::from_secs(10))
                .connect(url)
                .await
            {
                Ok(db) => {
                    info!("Connected to PostgreSQL");
                    return Ok(Self::new(db));
                }
                Err(e) => {
                    attempt += 1;
                    if attempt >= max_retries {
                        return Err(anyhow!(
                            "Failed to connect to database after {} attempts: {}",
                            max_retries,
                            e
                        ));
                    }
                    warn!("Database connection attempt {} failed: {}. Retrying...", attempt, e);
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
            }
        }
    }

    /// Create the team and game tables if they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nba_teams (
                id BIGINT PRIMARY KEY,
                abbreviation TEXT,
                city TEXT,
                conference TEXT,
                division TEXT,
                name TEXT,
                full_name TEXT,
                raw JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS nba_games (
                id BIGINT PRIMARY KEY,
                game_day DATE,
                season INTEGER,
                status TEXT,
                postseason BOOLEAN,
                home_team_id BIGINT,
                visitor_team_id BIGINT,
                home_team_score INTEGER,
                visitor_team_score INTEGER,
                raw JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.db)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS ix_nba_games_game_day ON nba_games (game_day)")
            .execute(&self.db)
            .await?;

        info!("Schema ready");
        Ok(())
    }
}

impl RecordStore for PgStore {
    async fn upsert_teams(&self, rows: &[TeamRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO nba_teams (
                    id, abbreviation, city, conference, division, name, full_name, raw
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (id) DO UPDATE SET
                    abbreviation = EXCLUDED.abbreviation,
                    city = EXCLUDED.city,
                    conference = EXCLUDED.conference,
                    division = EXCLUDED.division,
                    name = EXCLUDED.name,
                    full_name = EXCLUDED.full_name,
                    raw = EXCLUDED.raw
                "#,
            )
            .bind(row.id)
            .bind(&row.abbreviation)
            .bind(&row.city)
            .bind(&row.conference)
            .bind(&row.division)
            .bind(&row.name)
            .bind(&row.full_name)
            .bind(Json(&row.raw))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Stored {} teams", rows.len());
        Ok(rows.len())
    }

    async fn upsert_games(&self, rows: &[GameRow]) -> Result<usize, StoreError> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut tx = self.db.begin().await?;

        for row in rows {
            sqlx::query(
                r#"
                INSERT INTO nba_games (
                    id, game_day, season, status, postseason,
                    home_team_id, visitor_team_id,
                    home_team_score, visitor_team_score, raw
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (id) DO UPDATE SET
                    game_day = EXCLUDED.game_day,
                    season = EXCLUDED.season,
                    status = EXCLUDED.status,
                    postseason = EXCLUDED.postseason,
                    home_team_id = EXCLUDED.home_team_id,
                    visitor_team_id = EXCLUDED.visitor_team_id,
                    home_team_score = EXCLUDED.home_team_score,
                    visitor_team_score = EXCLUDED.visitor_team_score,
                    raw = EXCLUDED.raw
                "#,
            )
            .bind(row.id)
            .bind(row.game_day)
            .bind(row.season)
            .bind(&row.status)
            .bind(row.postseason)
            .bind(row.home_team_id)
            .bind(row.visitor_team_id)
            .bind(row.home_team_score)
            .bind(row.visitor_team_score)
            .bind(Json(&row.raw))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        info!("Stored {} games", rows.len());
        Ok(rows.len())
    }

    async fn read_teams(&self) -> Result<Vec<TeamRow>, StoreError> {
        let records: Vec<TeamRecord> = sqlx::query_as(
            r#"
            SELECT id, abbreviation, city, conference, division, name, full_name, raw
            FROM nba_teams
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(records.into_iter().map(TeamRow::from).collect())
    }

    async fn read_games(&self) -> Result<Vec<GameRow>, StoreError> {
        let records: Vec<GameRecord> = sqlx::query_as(
            r#"
            SELECT id, game_day, season, status, postseason,
                   home_team_id, visitor_team_id,
                   home_team_score, visitor_team_score, raw
            FROM nba_games
            ORDER BY game_day ASC NULLS LAST, id ASC
            "#,
        )
        .fetch_all(&self.db)
        .await?;

        Ok(records.into_iter().map(GameRow::from).collect())
    }

    async fn read_games_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<GameRow>, StoreError> {
        let records: Vec<GameRecord> = sqlx::query_as(
            r#"
            SELECT id, game_day, season, status, postseason,
                   home_team_id, visitor_team_id,
                   home_team_score, visitor_team_score, raw
            FROM nba_games
            WHERE game_day >= $1 AND game_day <= $2
            ORDER BY game_day ASC, id ASC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.db)
        .await?;

        Ok(records.into_iter().map(GameRow::from).collect())
    }
}
