//! Error types for the daemon's synchronous request surface.

use thiserror::Error;
use usagehub_core::config::ConfigError;

use crate::store::StoreError;

/// Failure surfaced to a direct caller of the request surface.
///
/// Transport-level upstream failures never appear here: they are absorbed by
/// the fetcher's retry budget and, once exhausted, answered with labeled
/// fallback data instead of an error.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Upstream answered with a non-2xx response. Not retried; a same-input
    /// retry would reproduce the same rejection.
    #[error("upstream rejected request with status {status}: {detail}")]
    UpstreamRejected { status: u16, detail: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),

    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("snapshot store error: {0}")]
    Storage(#[from] StoreError),
}
