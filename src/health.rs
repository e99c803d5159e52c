use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Outcome history of scheduled syncs, reported by `/health`.
#[derive(Clone, Default)]
pub struct SyncHealth {
    pub last_sync_time: Arc<RwLock<Option<DateTime<Utc>>>>,
    pub last_sync_count: Arc<RwLock<usize>>,
    pub error_count: Arc<RwLock<usize>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unavailable,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Ok => "ok",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unavailable => "unavailable",
        }
    }
}

impl SyncHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_success(&self, count: usize) {
        *self.last_sync_time.write().await = Some(Utc::now());
        *self.last_sync_count.write().await = count;
        *self.error_count.write().await = 0;
    }

    pub async fn record_error(&self) {
        *self.error_count.write().await += 1;
    }

    pub async fn status(&self) -> HealthStatus {
        match *self.error_count.read().await {
            n if n > 10 => HealthStatus::Unavailable,
            n if n > 5 => HealthStatus::Degraded,
            _ => HealthStatus::Ok,
        }
    }
}
