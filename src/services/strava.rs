// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Strava API client for the sync jobs.
//!
//! Handles:
//! - Token refresh when expired (5-minute margin)
//! - Rate-limit budgeting through the shared [`RateLimitTracker`]
//! - Per-call timeout, failure classification and jittered backoff
//! - Activity list, detailed activity and stream fetches

use crate::config::Config;
use crate::error::ApiError;
use crate::services::rate_limit::{RateLimitHeaders, RateLimitTracker, Reservation};
use crate::services::retry::{classify, Outcome, RetryPolicy};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use validator::Validate;

/// Margin before token expiration when we proactively refresh (5 minutes).
const TOKEN_REFRESH_MARGIN_SECS: i64 = 5 * 60;

/// Longest response excerpt kept in an error message.
const MAX_ERROR_BODY: usize = 200;

/// Stream types requested by the stream job.
pub const STREAM_KEYS: &str = "time,watts,heartrate,cadence,velocity_smooth,altitude,distance";

// ─── Token Management ────────────────────────────────────────────────────────

struct TokenState {
    access_token: Option<String>,
    expires_at: DateTime<Utc>,
    refresh_token: String,
}

/// Holds the long-lived refresh token and the current access token.
///
/// The state mutex also serializes refreshes, so concurrent workers never
/// race each other to the token endpoint.
pub struct StravaAuth {
    http: reqwest::Client,
    oauth_url: String,
    client_id: String,
    client_secret: String,
    timeout: Duration,
    state: Mutex<TokenState>,
}

impl StravaAuth {
    pub fn new(http: reqwest::Client, config: &Config) -> Self {
        Self {
            http,
            oauth_url: config.strava_oauth_url.clone(),
            client_id: config.strava_client_id.clone(),
            client_secret: config.strava_client_secret.clone(),
            timeout: config.request_timeout,
            state: Mutex::new(TokenState {
                access_token: config.strava_access_token.clone(),
                expires_at: DateTime::from_timestamp(config.strava_token_expires_at, 0)
                    .unwrap_or_default(),
                refresh_token: config.strava_refresh_token.clone(),
            }),
        }
    }

    /// Get a valid (non-expired) access token, refreshing if needed.
    pub async fn access_token(&self) -> Result<String, ApiError> {
        let mut state = self.state.lock().await;
        let margin = ChronoDuration::seconds(TOKEN_REFRESH_MARGIN_SECS);

        if let Some(token) = &state.access_token {
            if Utc::now() + margin < state.expires_at {
                return Ok(token.clone());
            }
        }

        tracing::info!("Access token missing or expiring, refreshing");
        self.refresh_locked(&mut state).await
    }

    /// Refresh even if the cached token looks valid (after a 401).
    pub async fn force_refresh(&self) -> Result<(), ApiError> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await.map(|_| ())
    }

    async fn refresh_locked(&self, state: &mut TokenState) -> Result<String, ApiError> {
        let response = self
            .http
            .post(&self.oauth_url)
            .timeout(self.timeout)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", state.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Retryable {
                status: None,
                message: format!("token refresh request failed: {e}"),
            })?;

        let status = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status, body = %snippet(&body), "Strava token refresh failed");
            return Err(match classify(status) {
                Outcome::Retryable => ApiError::Retryable {
                    status: Some(status),
                    message: format!("token refresh: {}", snippet(&body)),
                },
                _ => ApiError::FatalAuth(format!(
                    "token refresh rejected (HTTP {status}): {}",
                    snippet(&body)
                )),
            });
        }

        let tokens: TokenRefreshResponse = response
            .json()
            .await
            .map_err(|e| ApiError::FatalAuth(format!("unreadable token response: {e}")))?;

        state.access_token = Some(tokens.access_token.clone());
        state.expires_at = DateTime::from_timestamp(tokens.expires_at, 0).unwrap_or_default();
        state.refresh_token = tokens.refresh_token;

        tracing::info!(expires_at = %state.expires_at, "Token refreshed and cached");
        Ok(tokens.access_token)
    }
}

// ─── API Client ──────────────────────────────────────────────────────────────

/// Notified once per HTTP attempt, retries included.
pub trait CallObserver: Send + Sync {
    fn on_attempt(&self, endpoint: &str, status: Option<u16>);
}

/// Observer that ignores every attempt.
pub struct NoopObserver;

impl CallObserver for NoopObserver {
    fn on_attempt(&self, _endpoint: &str, _status: Option<u16>) {}
}

/// Successful response body plus how many attempts it took.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
    pub attempts: u32,
}

impl ApiResponse {
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        serde_json::from_str(&self.body).map_err(|e| ApiError::Decode(e.to_string()))
    }
}

/// Rate-limited, retrying Strava API client.
#[derive(Clone)]
pub struct StravaClient {
    http: reqwest::Client,
    base_url: String,
    auth: Arc<StravaAuth>,
    tracker: Arc<RateLimitTracker>,
    policy: RetryPolicy,
    timeout: Duration,
    max_quota_wait: Duration,
}

impl StravaClient {
    pub fn new(config: &Config, tracker: Arc<RateLimitTracker>) -> Self {
        let http = reqwest::Client::new();
        let auth = Arc::new(StravaAuth::new(http.clone(), config));
        Self::with_auth(config, http, auth, tracker)
    }

    pub fn with_auth(
        config: &Config,
        http: reqwest::Client,
        auth: Arc<StravaAuth>,
        tracker: Arc<RateLimitTracker>,
    ) -> Self {
        Self {
            http,
            base_url: config.strava_api_url.trim_end_matches('/').to_string(),
            auth,
            tracker,
            policy: RetryPolicy::from_config(config),
            timeout: config.request_timeout,
            max_quota_wait: config.max_quota_wait,
        }
    }

    pub fn auth(&self) -> &Arc<StravaAuth> {
        &self.auth
    }

    pub fn tracker(&self) -> &Arc<RateLimitTracker> {
        &self.tracker
    }

    /// GET `endpoint` with retries.
    pub async fn call(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> Result<ApiResponse, ApiError> {
        self.call_observed(endpoint, params, &NoopObserver).await
    }

    /// GET `endpoint`, reporting every attempt to `observer`.
    ///
    /// Retryable failures back off and try again until the policy's attempt
    /// cap, then become [`ApiError::RetriesExhausted`]. Fatal failures return
    /// immediately.
    pub async fn call_observed(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
        observer: &dyn CallObserver,
    ) -> Result<ApiResponse, ApiError> {
        let url = format!("{}{}", self.base_url, endpoint);
        let mut quota_waited = Duration::ZERO;
        let mut attempt = 0u32;

        loop {
            attempt += 1;

            let result = match self.auth.access_token().await {
                Ok(token) => {
                    self.attempt_once(&url, endpoint, params, &token, &mut quota_waited, observer)
                        .await
                }
                Err(e) => Err(e),
            };

            let err = match result {
                Ok((status, body)) => {
                    return Ok(ApiResponse {
                        status,
                        body,
                        attempts: attempt,
                    })
                }
                Err(e) if e.is_retryable() => e,
                Err(e) => {
                    tracing::warn!(endpoint, attempt, error = %e, "Strava call failed");
                    return Err(e);
                }
            };

            if !self.policy.should_retry(attempt) {
                tracing::error!(endpoint, attempt, error = %err, "Strava retries exhausted");
                return Err(ApiError::RetriesExhausted {
                    attempts: attempt,
                    last_error: err.to_string(),
                });
            }

            let delay = {
                let mut rng = rand::thread_rng();
                self.policy.delay_for(attempt, &mut rng)
            };
            tracing::warn!(
                endpoint,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Retryable Strava failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One budgeted HTTP attempt. Records consumption exactly once.
    async fn attempt_once(
        &self,
        url: &str,
        endpoint: &str,
        params: &[(&str, String)],
        token: &str,
        quota_waited: &mut Duration,
        observer: &dyn CallObserver,
    ) -> Result<(u16, String), ApiError> {
        let reservation = self.wait_for_headroom(quota_waited).await?;

        let sent = self
            .http
            .get(url)
            .bearer_auth(token)
            .query(params)
            .timeout(self.timeout)
            .send()
            .await;

        let response = match sent {
            Ok(r) => r,
            Err(e) => {
                self.tracker.record(reservation, &RateLimitHeaders::default());
                observer.on_attempt(endpoint, None);
                let kind = if e.is_timeout() { "timeout" } else { "transport error" };
                return Err(ApiError::Retryable {
                    status: None,
                    message: format!("{kind}: {e}"),
                });
            }
        };

        let status = response.status().as_u16();
        let headers = RateLimitHeaders::from_headers(response.headers());
        self.tracker.record(reservation, &headers);
        observer.on_attempt(endpoint, Some(status));

        let body = response.text().await.map_err(|e| ApiError::Retryable {
            status: Some(status),
            message: format!("failed to read body: {e}"),
        })?;

        match classify(status) {
            Outcome::Success => Ok((status, body)),
            Outcome::Retryable => {
                if status == 429 {
                    tracing::warn!(endpoint, "Strava rate limit hit (429)");
                }
                Err(ApiError::Retryable {
                    status: Some(status),
                    message: snippet(&body),
                })
            }
            Outcome::FatalAuth => Err(ApiError::FatalAuth(format!(
                "HTTP {status}: {}",
                snippet(&body)
            ))),
            Outcome::FatalRequest => Err(ApiError::FatalRequest {
                status,
                message: snippet(&body),
            }),
        }
    }

    /// Block until the tracker grants one request, bounded by `max_quota_wait`
    /// summed over every wait of this call.
    async fn wait_for_headroom(&self, waited: &mut Duration) -> Result<Reservation, ApiError> {
        loop {
            match self.tracker.reserve(1) {
                Ok(reservation) => return Ok(reservation),
                Err(wait) => {
                    let wait = wait.max(Duration::from_millis(50));
                    if *waited + wait > self.max_quota_wait {
                        tracing::error!(
                            wait_secs = wait.as_secs(),
                            waited_secs = waited.as_secs(),
                            "Rate limit wait exceeds bound"
                        );
                        return Err(ApiError::QuotaExhausted { wait });
                    }
                    tracing::warn!(
                        wait_secs = wait.as_secs(),
                        "Rate limit budget exhausted, waiting for next window"
                    );
                    tokio::time::sleep(wait).await;
                    *waited += wait;
                }
            }
        }
    }

    // ─── API Wrappers ────────────────────────────────────────────────────────

    /// One page of the athlete's activities (raw records, validated by the caller).
    pub async fn list_activities(
        &self,
        after: Option<i64>,
        page: u32,
        per_page: u32,
        observer: &dyn CallObserver,
    ) -> Result<Vec<serde_json::Value>, ApiError> {
        let mut params = vec![
            ("page", page.to_string()),
            ("per_page", per_page.to_string()),
        ];
        if let Some(after) = after {
            params.push(("after", after.to_string()));
        }
        self.call_observed("/athlete/activities", &params, observer)
            .await?
            .json()
    }

    /// Detailed activity including every segment effort.
    pub async fn get_activity_detail(
        &self,
        activity_id: u64,
        observer: &dyn CallObserver,
    ) -> Result<StravaDetailedActivity, ApiError> {
        let endpoint = format!("/activities/{activity_id}");
        self.call_observed(
            &endpoint,
            &[("include_all_efforts", "true".to_string())],
            observer,
        )
        .await?
        .json()
    }

    /// Streams keyed by type.
    pub async fn get_activity_streams(
        &self,
        activity_id: u64,
        observer: &dyn CallObserver,
    ) -> Result<StravaStreams, ApiError> {
        let endpoint = format!("/activities/{activity_id}/streams");
        self.call_observed(
            &endpoint,
            &[
                ("keys", STREAM_KEYS.to_string()),
                ("key_by_type", "true".to_string()),
            ],
            observer,
        )
        .await?
        .json()
    }
}

fn snippet(body: &str) -> String {
    let body = body.trim();
    match body.char_indices().nth(MAX_ERROR_BODY) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

// ─── Response Types ──────────────────────────────────────────────────────────

/// Token refresh response from Strava.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenRefreshResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: i64,
}

/// Summary activity for list endpoints.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StravaActivitySummary {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    #[validate(length(min = 1))]
    pub sport_type: String,
    pub start_date: DateTime<Utc>,
    /// Wall-clock start in the athlete's zone (Strava marks it `Z` regardless)
    pub start_date_local: DateTime<Utc>,
    #[validate(range(min = 0.0))]
    pub distance: f64,
    pub moving_time: u32,
    pub elapsed_time: u32,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub total_elevation_gain: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub average_speed: f64,
    #[serde(default)]
    #[validate(range(min = 0.0))]
    pub max_speed: f64,
}

/// Detailed activity; only the segment efforts are used.
#[derive(Debug, Clone, Deserialize)]
pub struct StravaDetailedActivity {
    pub id: u64,
    /// Raw efforts, validated one by one
    #[serde(default)]
    pub segment_efforts: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StravaSegmentEffort {
    pub id: u64,
    #[serde(default)]
    pub name: String,
    pub elapsed_time: u32,
    pub moving_time: u32,
    pub start_date: DateTime<Utc>,
    #[validate(range(min = 0.0))]
    pub distance: f64,
    pub average_watts: Option<f64>,
    pub average_heartrate: Option<f64>,
    pub max_heartrate: Option<f64>,
    pub pr_rank: Option<u32>,
    pub kom_rank: Option<u32>,
    pub segment: StravaSegment,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StravaSegment {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub distance: f64,
    pub average_grade: Option<f64>,
    pub maximum_grade: Option<f64>,
}

/// One stream; samples may be `null`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StravaStream {
    #[serde(default)]
    pub data: Vec<Option<f64>>,
}

/// Streams response with `key_by_type=true`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StravaStreams {
    pub time: Option<StravaStream>,
    pub watts: Option<StravaStream>,
    pub heartrate: Option<StravaStream>,
    pub cadence: Option<StravaStream>,
    pub velocity_smooth: Option<StravaStream>,
    pub altitude: Option<StravaStream>,
    pub distance: Option<StravaStream>,
}
