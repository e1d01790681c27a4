//! usagehub-core: domain types and policy for the usage observability hub.
//!
//! Pure data crate: inbound agent lifecycle events, the refresh trigger
//! policy, the usage-statistics payload model, the configuration model, and
//! the fallback payload generator. No I/O lives here.

pub mod config;
pub mod fallback;
pub mod policy;
pub mod stats;
pub mod types;
