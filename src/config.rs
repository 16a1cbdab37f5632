// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application configuration loaded from environment variables.
//!
//! Only the Strava credentials are required; everything else has a default
//! tuned for Strava's standard application quota (100 requests per 15 minutes,
//! 1000 per day).

use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://www.strava.com/api/v3";
pub const DEFAULT_OAUTH_URL: &str = "https://www.strava.com/oauth/token";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    // --- Strava credentials ---
    /// Strava OAuth client ID (public)
    pub strava_client_id: String,
    /// Strava OAuth client secret
    pub strava_client_secret: String,
    /// Long-lived refresh token produced by the one-time OAuth bootstrap
    pub strava_refresh_token: String,
    /// Access token carried over from a previous run, if any
    pub strava_access_token: Option<String>,
    /// Expiry (unix seconds) of `strava_access_token`
    pub strava_token_expires_at: i64,
    /// Strava API base URL
    pub strava_api_url: String,
    /// Strava OAuth token endpoint
    pub strava_oauth_url: String,

    // --- Server ---
    /// Server port
    pub port: u16,
    /// GCP project ID; selects the Firestore store when set
    pub gcp_project_id: Option<String>,
    /// Dashboard origin allowed by CORS (localhost is always allowed)
    pub frontend_url: Option<String>,

    // --- Rate limiting ---
    pub rate_limit_short: u32,
    pub rate_limit_daily: u32,
    pub rate_limit_short_window: Duration,
    /// Upper bound on how long a call may wait for quota headroom
    pub max_quota_wait: Duration,

    // --- Client / retry ---
    pub request_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,

    // --- Sync ---
    pub sync_page_size: u32,
    pub sync_max_pages: u32,
    /// Cap on activities visited by one segment or stream job
    pub sync_max_items: u32,
    /// FTP assumed for dates with no FTP history entry
    pub default_ftp: u32,

    // --- Job queue ---
    pub worker_count: usize,
    pub job_retention: Duration,
    pub job_history_limit: usize,
}

impl Default for Config {
    /// Default config for testing only.
    fn default() -> Self {
        Self {
            strava_client_id: "test_client_id".to_string(),
            strava_client_secret: "test_secret".to_string(),
            strava_refresh_token: "test_refresh_token".to_string(),
            strava_access_token: None,
            strava_token_expires_at: 0,
            strava_api_url: DEFAULT_API_URL.to_string(),
            strava_oauth_url: DEFAULT_OAUTH_URL.to_string(),
            port: 8080,
            gcp_project_id: None,
            frontend_url: None,
            rate_limit_short: 100,
            rate_limit_daily: 1000,
            rate_limit_short_window: Duration::from_secs(15 * 60),
            max_quota_wait: Duration::from_secs(15 * 60),
            request_timeout: Duration::from_secs(30),
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(1000),
            retry_max_delay: Duration::from_secs(60),
            sync_page_size: 200,
            sync_max_pages: 50,
            sync_max_items: 100,
            default_ftp: 200,
            worker_count: 3,
            job_retention: Duration::from_secs(24 * 60 * 60),
            job_history_limit: 200,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// A `.env` file in the working directory is honored for local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok(); // Load .env file if present

        let defaults = Self::default();

        Ok(Self {
            strava_client_id: required("STRAVA_CLIENT_ID")?,
            strava_client_secret: required("STRAVA_CLIENT_SECRET")?,
            strava_refresh_token: required("STRAVA_REFRESH_TOKEN")?,
            strava_access_token: env::var("STRAVA_ACCESS_TOKEN")
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty()),
            strava_token_expires_at: parsed("STRAVA_TOKEN_EXPIRES_AT", 0)?,
            strava_api_url: env::var("STRAVA_API_URL")
                .unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            strava_oauth_url: env::var("STRAVA_OAUTH_URL")
                .unwrap_or_else(|_| DEFAULT_OAUTH_URL.to_string()),

            port: parsed("PORT", defaults.port)?,
            gcp_project_id: env::var("GCP_PROJECT_ID").ok().filter(|v| !v.is_empty()),
            frontend_url: env::var("FRONTEND_URL").ok().filter(|v| !v.is_empty()),

            rate_limit_short: parsed("RATE_LIMIT_SHORT", defaults.rate_limit_short)?,
            rate_limit_daily: parsed("RATE_LIMIT_DAILY", defaults.rate_limit_daily)?,
            rate_limit_short_window: Duration::from_secs(parsed(
                "RATE_LIMIT_SHORT_WINDOW_SECS",
                defaults.rate_limit_short_window.as_secs(),
            )?),
            max_quota_wait: Duration::from_secs(parsed(
                "MAX_QUOTA_WAIT_SECS",
                defaults.max_quota_wait.as_secs(),
            )?),

            request_timeout: Duration::from_secs(parsed(
                "REQUEST_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )?),
            retry_max_attempts: parsed("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts)?,
            retry_base_delay: Duration::from_millis(parsed(
                "RETRY_BASE_DELAY_MS",
                defaults.retry_base_delay.as_millis() as u64,
            )?),
            retry_max_delay: Duration::from_millis(parsed(
                "RETRY_MAX_DELAY_MS",
                defaults.retry_max_delay.as_millis() as u64,
            )?),

            sync_page_size: parsed("SYNC_PAGE_SIZE", defaults.sync_page_size)?,
            sync_max_pages: parsed("SYNC_MAX_PAGES", defaults.sync_max_pages)?,
            sync_max_items: parsed("SYNC_MAX_ITEMS", defaults.sync_max_items)?,
            default_ftp: parsed("DEFAULT_FTP", defaults.default_ftp)?,

            worker_count: parsed("WORKER_COUNT", defaults.worker_count)?.max(1),
            job_retention: Duration::from_secs(parsed(
                "JOB_RETENTION_SECS",
                defaults.job_retention.as_secs(),
            )?),
            job_history_limit: parsed("JOB_HISTORY_LIMIT", defaults.job_history_limit)?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name)
        .map(|v| v.trim().to_string())
        .map_err(|_| ConfigError::Missing(name))
}

fn parsed<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid {
            name,
            value: raw,
        }),
        Err(_) => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    // Both cases share one test so they never race on the process environment.
    #[test]
    fn test_config_from_env() {
        env::set_var("STRAVA_CLIENT_ID", "test_id");
        env::set_var("STRAVA_CLIENT_SECRET", " test_secret ");
        env::set_var("STRAVA_REFRESH_TOKEN", "test_refresh");
        env::set_var("RATE_LIMIT_SHORT", "200");

        let config = Config::from_env().expect("Config should load");

        assert_eq!(config.strava_client_id, "test_id");
        assert_eq!(config.strava_client_secret, "test_secret");
        assert_eq!(config.rate_limit_short, 200);
        assert_eq!(config.rate_limit_daily, 1000);
        assert_eq!(config.retry_max_attempts, 5);

        env::set_var("RATE_LIMIT_SHORT", "lots");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                name: "RATE_LIMIT_SHORT",
                ..
            }
        ));
        env::remove_var("RATE_LIMIT_SHORT");
    }
}
