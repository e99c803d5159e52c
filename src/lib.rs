//! balldontlie NBA proxy with optional Postgres-backed sync.
//!
//! - `client`: retrying API client (429 / 5xx backoff)
//! - `normalize`: raw records to team and game rows
//! - `store` / `sync`: keyed transactional upserts and ordered reads
//! - `routes`: axum surface, including the token-gated cron trigger

pub mod client;
pub mod config;
pub mod error;
pub mod health;
pub mod normalize;
pub mod routes;
pub mod store;
pub mod sync;

pub use client::{BdlClient, BdlError, RetryPolicy};
pub use config::Config;
pub use error::ApiError;
pub use store::{PgStore, RecordStore, StoreError};
pub use sync::{RecordKind, SyncOutcome, Synchronizer};
