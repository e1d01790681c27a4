//! Usage-monitoring configuration model.
//!
//! A persisted [`UsageConfig`] supplies defaults; a per-request
//! [`ConfigOverride`] may replace individual fields. Out-of-range values are
//! rejected, never clamped.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Subscription plan tier used for limit computation upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Pro,
    Max5,
    Max20,
    Custom,
}

impl Plan {
    /// Wire name, matching the serde rename.
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Pro => "pro",
            Plan::Max5 => "max5",
            Plan::Max20 => "max20",
            Plan::Custom => "custom",
        }
    }
}

/// Aggregation window for the statistics view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ViewMode {
    Realtime,
    Daily,
    Monthly,
    Session,
}

impl ViewMode {
    /// Wire name, matching the serde rename.
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewMode::Realtime => "realtime",
            ViewMode::Daily => "daily",
            ViewMode::Monthly => "monthly",
            ViewMode::Session => "session",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeFormat {
    #[serde(rename = "12h")]
    H12,
    #[serde(rename = "24h")]
    H24,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    Classic,
    Auto,
}

/// Full configuration record for usage monitoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageConfig {
    pub plan: Plan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_limit_tokens: Option<u64>,
    pub view: ViewMode,
    pub timezone: String,
    pub time_format: TimeFormat,
    pub theme: Theme,
    /// Refresh cadence in seconds.
    pub refresh_rate: u32,
    /// Display refresh rate per second.
    pub refresh_per_second: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_hour: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for UsageConfig {
    fn default() -> Self {
        Self {
            plan: Plan::Custom,
            custom_limit_tokens: None,
            view: ViewMode::Realtime,
            timezone: "auto".into(),
            time_format: TimeFormat::Auto,
            theme: Theme::Auto,
            refresh_rate: 10,
            refresh_per_second: 0.75,
            reset_hour: None,
            created_at: None,
            updated_at: None,
        }
    }
}

/// Partial configuration carried by a single request. Unset fields fall back
/// to the persisted default configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigOverride {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_limit_tokens: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset_hour: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewMode>,
}

impl ConfigOverride {
    pub fn is_empty(&self) -> bool {
        self.plan.is_none()
            && self.custom_limit_tokens.is_none()
            && self.timezone.is_none()
            && self.reset_hour.is_none()
            && self.view.is_none()
    }
}

impl UsageConfig {
    /// Merge a per-request override on top of this configuration.
    /// Override fields win; everything else is carried over unchanged.
    pub fn merged_with(&self, ov: &ConfigOverride) -> UsageConfig {
        UsageConfig {
            plan: ov.plan.unwrap_or(self.plan),
            custom_limit_tokens: ov.custom_limit_tokens.or(self.custom_limit_tokens),
            timezone: ov.timezone.clone().unwrap_or_else(|| self.timezone.clone()),
            reset_hour: ov.reset_hour.or(self.reset_hour),
            view: ov.view.unwrap_or(self.view),
            ..self.clone()
        }
    }

    /// Bounds checks mirroring the upstream service's accepted ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(limit) = self.custom_limit_tokens {
            if limit == 0 {
                return Err(ConfigError::CustomLimitZero);
            }
        }
        if !(1..=60).contains(&self.refresh_rate) {
            return Err(ConfigError::RefreshRateOutOfRange(self.refresh_rate));
        }
        if !(0.1..=20.0).contains(&self.refresh_per_second) {
            return Err(ConfigError::RefreshPerSecondOutOfRange(
                self.refresh_per_second,
            ));
        }
        if let Some(hour) = self.reset_hour {
            if hour > 23 {
                return Err(ConfigError::ResetHourOutOfRange(hour));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("custom_limit_tokens must be greater than zero")]
    CustomLimitZero,

    #[error("refresh_rate {0} outside accepted range 1..=60")]
    RefreshRateOutOfRange(u32),

    #[error("refresh_per_second {0} outside accepted range 0.1..=20.0")]
    RefreshPerSecondOutOfRange(f64),

    #[error("reset_hour {0} outside accepted range 0..=23")]
    ResetHourOutOfRange(u8),
}
