use anyhow::{anyhow, Result};
use std::env;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.balldontlie.io";

/// Process-wide settings, read once at startup and shared read-only.
#[derive(Clone, Debug)]
pub struct Config {
    /// balldontlie credential. `None` is allowed at startup; fetches fail fast without it.
    pub api_key: Option<String>,
    pub base_url: String,
    pub database_url: Option<String>,
    /// Shared secret expected in `X-Task-Token` by the cron endpoint.
    pub task_token: Option<String>,
    pub port: u16,
    /// Client-side pacing quota. `None` disables pacing.
    pub requests_per_minute: Option<u32>,
    pub max_retries: u32,
    pub timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            database_url: None,
            task_token: None,
            port: 8000,
            requests_per_minute: Some(60),
            max_retries: 4,
            timeout: Duration::from_secs(25),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        // API key: BALLDONTLIE_API_KEY takes precedence over BDL_API_KEY
        let api_key = non_empty_var("BALLDONTLIE_API_KEY").or_else(|| non_empty_var("BDL_API_KEY"));

        // Prevent accidental use of sample/placeholder keys
        if let Some(key) = &api_key {
            let key_lower = key.to_lowercase();
            if key_lower.contains("change_me") || key_lower.starts_with("your_") {
                return Err(anyhow!(
                    "BALLDONTLIE_API_KEY appears to be a placeholder value; replace with your real key"
                ));
            }
        }

        let base_url = non_empty_var("BDL_BASE_URL")
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();

        let requests_per_minute = match env::var("BDL_REQUESTS_PER_MINUTE") {
            Ok(v) => match v.trim().parse::<u32>() {
                Ok(0) => None,
                Ok(n) => Some(n),
                Err(_) => return Err(anyhow!("BDL_REQUESTS_PER_MINUTE must be a number, got '{}'", v)),
            },
            Err(_) => defaults.requests_per_minute,
        };

        Ok(Self {
            api_key,
            base_url,
            database_url: non_empty_var("DATABASE_URL"),
            task_token: non_empty_var("TASK_TOKEN"),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8000".to_string())
                .parse()
                .unwrap_or(defaults.port),
            requests_per_minute,
            max_retries: env::var("BDL_MAX_RETRIES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_retries),
            timeout: env::var("BDL_TIMEOUT_SECONDS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
        })
    }

    /// The credential, if one is configured and non-blank.
    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().map(str::trim).filter(|k| !k.is_empty())
    }
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_api_key_is_treated_as_missing() {
        let config = Config {
            api_key: Some("   ".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_key(), None);
    }

    #[test]
    fn api_key_is_trimmed() {
        let config = Config {
            api_key: Some(" abc123 \n".to_string()),
            ..Config::default()
        };
        assert_eq!(config.api_key(), Some("abc123"));
    }

    #[test]
    fn defaults_match_upstream_policy() {
        let config = Config::default();
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(config.max_retries, 4);
        assert!(config.database_url.is_none());
        assert!(config.task_token.is_none());
    }
}
