//! Usage-statistics payload model.
//!
//! Mirrors the upstream statistics service's response schema. The daemon
//! relays these payloads without interpreting them; the types exist so the
//! fallback generator can produce schema-valid synthetic payloads and so
//! snapshots deserialize cleanly.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::UsageConfig;

/// Token aggregation with per-kind counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenCounts {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
    #[serde(default)]
    pub cache_creation_tokens: u64,
    #[serde(default)]
    pub cache_read_tokens: u64,
}

impl TokenCounts {
    pub fn total(&self) -> u64 {
        self.input_tokens
            + self.output_tokens
            + self.cache_creation_tokens
            + self.cache_read_tokens
    }
}

/// Token consumption rate metrics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BurnRate {
    pub tokens_per_minute: f64,
    pub cost_per_hour: f64,
}

/// Aggregated session block covering a five-hour billing window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionBlock {
    pub id: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    #[serde(default)]
    pub is_active: bool,
    #[serde(default)]
    pub token_counts: TokenCounts,
    #[serde(default)]
    pub cost_usd: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub burn_rate: Option<BurnRate>,
    #[serde(default)]
    pub models: Vec<String>,
    #[serde(default)]
    pub sent_messages_count: u64,
    #[serde(default)]
    pub per_model_stats: HashMap<String, serde_json::Value>,
}

/// Limit-exhaustion predictions computed upstream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsagePredictions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tokens_run_out: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit_resets_at: Option<DateTime<Utc>>,
}

/// Consumption expressed as percentages of the configured limits.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageTotals {
    #[serde(default)]
    pub cost_percentage: f64,
    #[serde(default)]
    pub token_percentage: f64,
    #[serde(default)]
    pub message_percentage: f64,
    #[serde(default)]
    pub time_to_reset_percentage: f64,
}

/// Complete statistics response, real or synthetic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageStats {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_session: Option<SessionBlock>,
    #[serde(default)]
    pub recent_sessions: Vec<SessionBlock>,
    #[serde(default)]
    pub predictions: UsagePredictions,
    #[serde(default)]
    pub burn_rate: BurnRate,
    #[serde(default)]
    pub totals: UsageTotals,
    /// Configuration the producer applied when computing this payload.
    /// Echoed by the fallback generator so clients can see the request was
    /// configured correctly even when the data is synthetic.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_config: Option<UsageConfig>,
}
