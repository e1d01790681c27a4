//! Synthetic statistics payloads for when the upstream service is
//! unavailable.
//!
//! The generated payload satisfies the same schema as a real upstream
//! response so every downstream consumer can treat payloads uniformly; it is
//! labeled `fallback` at the snapshot/broadcast layer, never silently
//! substituted.

use chrono::Utc;

use crate::config::{ConfigOverride, UsageConfig};
use crate::stats::{BurnRate, UsagePredictions, UsageStats, UsageTotals};

/// Produce a schema-valid synthetic payload.
///
/// The supplied override is merged onto the base configuration and echoed in
/// `applied_config` so a client can verify the request was configured
/// correctly. All counters are zero; there is no current session and no
/// history. This function cannot fail.
pub fn generate(base: &UsageConfig, ov: Option<&ConfigOverride>) -> UsageStats {
    let applied = match ov {
        Some(ov) => base.merged_with(ov),
        None => base.clone(),
    };

    UsageStats {
        current_session: None,
        recent_sessions: Vec::new(),
        predictions: UsagePredictions {
            tokens_run_out: None,
            limit_resets_at: next_reset(&applied),
        },
        burn_rate: BurnRate::default(),
        totals: UsageTotals::default(),
        applied_config: Some(applied),
    }
}

/// Next limit reset, derived from the configured reset hour when present.
fn next_reset(cfg: &UsageConfig) -> Option<chrono::DateTime<Utc>> {
    use chrono::{Duration, Timelike};

    let hour = cfg.reset_hour? as u32;
    let now = Utc::now();
    let today = now
        .with_hour(hour)?
        .with_minute(0)?
        .with_second(0)?
        .with_nanosecond(0)?;
    Some(if today > now {
        today
    } else {
        today + Duration::days(1)
    })
}
