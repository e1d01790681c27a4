//! Bounded-retry proxy client for the upstream statistics service.
//!
//! A single logical "get current statistics" (or sessions / config-update)
//! operation: per-attempt timeout, exponential backoff between transport
//! failures, and a structured three-outcome result. Application-level
//! rejections (non-2xx) are never retried; a same-input retry would reproduce
//! the same rejection.

use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use serde::de::DeserializeOwned;
use usagehub_core::config::{ConfigOverride, UsageConfig};
use usagehub_core::stats::{SessionBlock, UsageStats};

/// Default per-attempt timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default retry budget after the first attempt.
const DEFAULT_MAX_RETRIES: u32 = 2;
/// First backoff delay; doubles per attempt.
const DEFAULT_BACKOFF_BASE: Duration = Duration::from_millis(250);
/// Backoff ceiling.
const DEFAULT_BACKOFF_CAP: Duration = Duration::from_secs(2);

/// Tuning knobs for [`StatsFetcher`].
#[derive(Debug, Clone)]
pub struct FetcherConfig {
    /// Upstream base URL, e.g. `http://127.0.0.1:8001`.
    pub base_url: String,
    pub timeout: Duration,
    pub max_retries: u32,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl FetcherConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: DEFAULT_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_cap: DEFAULT_BACKOFF_CAP,
        }
    }
}

/// Outcome of one logical proxy operation.
///
/// Explicit tagged variant so callers are forced to handle all three cases:
/// real data, upstream rejection, and upstream unreachable.
#[derive(Debug, Clone, PartialEq)]
pub enum ProxyOutcome<T> {
    Success { payload: T },
    /// Valid connection, non-2xx response. Surfaced to the direct caller,
    /// never broadcast.
    UpstreamError { status: u16, detail: String },
    /// Retry budget exhausted without a usable response.
    Unavailable,
}

/// Result of one [`StatsFetcher`] invocation. Produced once, never mutated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyResult<T> {
    pub outcome: ProxyOutcome<T>,
    /// Total attempts issued, including the first.
    pub attempts: u32,
}

/// Pure request/response mediator for the upstream statistics service.
///
/// Never raises to its caller; all failure paths are captured in the
/// returned [`ProxyResult`]. Stateless per call, no synchronization needed.
pub struct StatsFetcher {
    client: reqwest::Client,
    config: FetcherConfig,
}

impl StatsFetcher {
    pub fn new(config: FetcherConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// `GET /stats[?overrides]` — current usage statistics.
    pub async fn get_stats(&self, ov: Option<&ConfigOverride>) -> ProxyResult<UsageStats> {
        let query = ov.map(override_query).unwrap_or_default();
        self.request(Method::GET, "/stats", &query, None::<&()>)
            .await
    }

    /// `GET /sessions?session_id&limit&hours_back` — upstream session history.
    pub async fn get_sessions(
        &self,
        session_id: Option<&str>,
        limit: u32,
        hours_back: u32,
    ) -> ProxyResult<Vec<SessionBlock>> {
        let mut query: Vec<(&str, String)> = vec![
            ("limit", limit.to_string()),
            ("hours_back", hours_back.to_string()),
        ];
        if let Some(id) = session_id {
            query.push(("session_id", id.to_string()));
        }
        self.request(Method::GET, "/sessions", &query, None::<&()>)
            .await
    }

    /// `POST /config` — push a new default configuration upstream.
    pub async fn update_config(&self, config: &UsageConfig) -> ProxyResult<UsageConfig> {
        self.request(Method::POST, "/config", &[], Some(config))
            .await
    }

    /// Issue one logical operation with the retry/backoff policy applied.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&impl Serialize>,
    ) -> ProxyResult<T> {
        let url = format!("{}{}", self.config.base_url, path);
        let mut attempts = 0u32;
        let mut delay = self.config.backoff_base;

        loop {
            attempts += 1;

            let mut req = self
                .client
                .request(method.clone(), &url)
                .timeout(self.config.timeout);
            if !query.is_empty() {
                req = req.query(query);
            }
            if let Some(b) = body {
                req = req.json(b);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        // A 2xx body that fails to parse is a transport-level
                        // failure (malformed response) and is retried.
                        match resp.json::<T>().await {
                            Ok(payload) => {
                                return ProxyResult {
                                    outcome: ProxyOutcome::Success { payload },
                                    attempts,
                                };
                            }
                            Err(e) => {
                                tracing::warn!(
                                    %url, attempt = attempts, error = %e,
                                    "upstream returned malformed body"
                                );
                            }
                        }
                    } else {
                        let detail = resp.text().await.unwrap_or_default();
                        tracing::warn!(
                            %url, status = status.as_u16(), attempt = attempts,
                            "upstream rejected request"
                        );
                        return ProxyResult {
                            outcome: ProxyOutcome::UpstreamError {
                                status: status.as_u16(),
                                detail,
                            },
                            attempts,
                        };
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        %url, attempt = attempts, error = %e,
                        "upstream transport failure"
                    );
                }
            }

            if attempts > self.config.max_retries {
                tracing::warn!(%url, attempts, "upstream unavailable, retry budget exhausted");
                return ProxyResult {
                    outcome: ProxyOutcome::Unavailable,
                    attempts,
                };
            }

            tokio::time::sleep(delay).await;
            delay = (delay * 2).min(self.config.backoff_cap);
        }
    }
}

/// Flatten a config override into `GET /stats` query parameters.
fn override_query(ov: &ConfigOverride) -> Vec<(&'static str, String)> {
    let mut query = Vec::new();
    if let Some(plan) = ov.plan {
        query.push(("plan", plan.as_str().to_string()));
    }
    if let Some(limit) = ov.custom_limit_tokens {
        query.push(("custom_limit_tokens", limit.to_string()));
    }
    if let Some(tz) = &ov.timezone {
        query.push(("timezone", tz.clone()));
    }
    if let Some(hour) = ov.reset_hour {
        query.push(("reset_hour", hour.to_string()));
    }
    if let Some(view) = ov.view {
        query.push(("view", view.as_str().to_string()));
    }
    query
}
