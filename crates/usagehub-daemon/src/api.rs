//! Parameter bounds for the synchronous request surface.
//!
//! Out-of-range input is rejected at this boundary, never silently clamped
//! by the core. The store and orchestrator assume validated input.

use crate::error::ApiError;

pub const LIMIT_RANGE: std::ops::RangeInclusive<u32> = 1..=1000;
pub const HOURS_BACK_RANGE: std::ops::RangeInclusive<u32> = 1..=720;

/// Validate `sessions` query parameters.
pub fn validate_sessions_params(limit: u32, hours_back: u32) -> Result<(), ApiError> {
    if !LIMIT_RANGE.contains(&limit) {
        return Err(ApiError::InvalidParam(format!(
            "limit {limit} outside accepted range {}..={}",
            LIMIT_RANGE.start(),
            LIMIT_RANGE.end()
        )));
    }
    if !HOURS_BACK_RANGE.contains(&hours_back) {
        return Err(ApiError::InvalidParam(format!(
            "hours_back {hours_back} outside accepted range {}..={}",
            HOURS_BACK_RANGE.start(),
            HOURS_BACK_RANGE.end()
        )));
    }
    Ok(())
}
