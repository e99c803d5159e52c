//! Reconciles upstream batches into the store and reads them back.
//!
//! The store handle is optional: without one, syncs report
//! [`SyncOutcome::StoreUnavailable`] and reads return nothing.

use crate::normalize::{extract_records, normalize_game, normalize_team, GameRow, TeamRow};
use crate::store::{RecordStore, StoreError};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordKind {
    Team,
    Game,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    Upserted(usize),
    /// No store configured; nothing was written.
    StoreUnavailable,
}

impl SyncOutcome {
    /// Rows written, `0` when no store is configured.
    pub fn count(&self) -> usize {
        match self {
            SyncOutcome::Upserted(n) => *n,
            SyncOutcome::StoreUnavailable => 0,
        }
    }

    pub fn store_configured(&self) -> bool {
        matches!(self, SyncOutcome::Upserted(_))
    }
}

/// A stored row of either kind, as returned by [`Synchronizer::read_all`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StoredRow {
    Team(TeamRow),
    Game(GameRow),
}

pub struct Synchronizer<S> {
    store: Option<S>,
}

impl<S: RecordStore> Synchronizer<S> {
    pub fn new(store: Option<S>) -> Self {
        Self { store }
    }

    pub fn store_configured(&self) -> bool {
        self.store.is_some()
    }

    /// Normalize `batch` and upsert it as one transaction keyed on record id.
    pub async fn sync(&self, batch: &[Value], kind: RecordKind) -> Result<SyncOutcome, StoreError> {
        let Some(store) = &self.store else {
            return Ok(SyncOutcome::StoreUnavailable);
        };
        if batch.is_empty() {
            return Ok(SyncOutcome::Upserted(0));
        }

        let count = match kind {
            RecordKind::Team => {
                let rows: Vec<TeamRow> = normalize_batch(batch, kind, normalize_team);
                if rows.is_empty() {
                    0
                } else {
                    store.upsert_teams(&rows).await?
                }
            }
            RecordKind::Game => {
                let rows: Vec<GameRow> = normalize_batch(batch, kind, normalize_game);
                if rows.is_empty() {
                    0
                } else {
                    store.upsert_games(&rows).await?
                }
            }
        };

        Ok(SyncOutcome::Upserted(count))
    }

    /// Upsert the `data` records of a teams response.
    pub async fn sync_teams(&self, payload: &Value) -> Result<SyncOutcome, StoreError> {
        self.sync(extract_records(payload), RecordKind::Team).await
    }

    /// Upsert the `data` records of a games response.
    pub async fn sync_games(&self, payload: &Value) -> Result<SyncOutcome, StoreError> {
        self.sync(extract_records(payload), RecordKind::Game).await
    }

    pub async fn read_all(&self, kind: RecordKind) -> Result<Vec<StoredRow>, StoreError> {
        let Some(store) = &self.store else {
            return Ok(Vec::new());
        };
        match kind {
            RecordKind::Team => Ok(store
                .read_teams()
                .await?
                .into_iter()
                .map(StoredRow::Team)
                .collect()),
            RecordKind::Game => Ok(store
                .read_games()
                .await?
                .into_iter()
                .map(StoredRow::Game)
                .collect()),
        }
    }

    pub async fn read_teams(&self) -> Result<Vec<TeamRow>, StoreError> {
        match &self.store {
            Some(store) => store.read_teams().await,
            None => Ok(Vec::new()),
        }
    }

    /// Games with a day in `[start, end]` (end inclusive), ordered by (day, id).
    pub async fn read_between(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<GameRow>, StoreError> {
        match &self.store {
            Some(store) => store.read_games_between(start, end).await,
            None => Ok(Vec::new()),
        }
    }
}

fn normalize_batch<T>(batch: &[Value], kind: RecordKind, normalize: fn(&Value) -> Option<T>) -> Vec<T> {
    let rows: Vec<T> = batch.iter().filter_map(normalize).collect();
    let skipped = batch.len() - rows.len();
    if skipped > 0 {
        warn!("Skipped {} {:?} record(s) without a usable id", skipped, kind);
    }
    rows
}
