//! usagehub-daemon: resilient upstream proxy and real-time broadcast hub.
//!
//! Ingests agent lifecycle events, decides which of them warrant a refresh of
//! usage statistics, fetches those statistics from the upstream service under
//! a bounded-retry/fallback policy, persists labeled snapshots, and fans the
//! result out to connected WebSocket subscribers.

pub mod api;
pub mod error;
pub mod fetcher;
pub mod hub;
pub mod ingest;
pub mod orchestrator;
pub mod store;
pub mod ws_server;

#[cfg(test)]
pub(crate) mod testutil;
