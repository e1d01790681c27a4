//! Refresh orchestration: event-triggered and on-demand statistics refreshes.
//!
//! Consumes inbound lifecycle events, applies the trigger policy, invokes the
//! fetcher (falling back to a synthetic payload when the upstream is
//! unavailable), appends labeled snapshots, and publishes the result through
//! the broadcast hub. Also serves the synchronous request surface used by
//! direct callers.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use usagehub_core::config::{ConfigOverride, UsageConfig};
use usagehub_core::stats::UsageStats;
use usagehub_core::types::{InboundEvent, PayloadSource, ServerMessage, Snapshot};
use usagehub_core::{fallback, policy};

use crate::error::ApiError;
use crate::fetcher::{ProxyOutcome, StatsFetcher};
use crate::hub::BroadcastHub;
use crate::store::SnapshotStore;

/// How many recent inbound events are retained for the initial message.
const RECENT_EVENTS_CAP: usize = 50;

/// Session key used for snapshots of payloads with no current session.
const GLOBAL_SESSION: &str = "global";

/// Result of one refresh visible to a direct caller.
#[derive(Debug, Clone, PartialEq)]
pub struct RefreshOutcome {
    pub payload: UsageStats,
    pub source: PayloadSource,
    pub attempts: u32,
}

pub struct Orchestrator {
    fetcher: StatsFetcher,
    store: SnapshotStore,
    hub: Arc<BroadcastHub>,
    config: RwLock<UsageConfig>,
    recent_events: Mutex<VecDeque<InboundEvent>>,
}

impl Orchestrator {
    pub fn new(fetcher: StatsFetcher, store: SnapshotStore, hub: Arc<BroadcastHub>) -> Self {
        Self {
            fetcher,
            store,
            hub,
            config: RwLock::new(UsageConfig::default()),
            recent_events: Mutex::new(VecDeque::with_capacity(RECENT_EVENTS_CAP)),
        }
    }

    /// Trigger policy: does this event warrant a statistics refresh?
    pub fn evaluate(event: &InboundEvent) -> bool {
        policy::evaluate(event)
    }

    /// Ingest one lifecycle event.
    ///
    /// The event is buffered, relayed to subscribers, and — when the trigger
    /// policy matches — a refresh is spawned for its session. Ingestion never
    /// waits on the refresh.
    pub fn on_event(self: &Arc<Self>, event: InboundEvent) {
        {
            let mut recent = self.recent_events.lock().expect("event buffer poisoned");
            if recent.len() == RECENT_EVENTS_CAP {
                recent.pop_front();
            }
            recent.push_back(event.clone());
        }

        self.hub.publish(&ServerMessage::Event {
            data: event.clone(),
        });

        if !Self::evaluate(&event) {
            debug!(
                session_id = %event.session_id,
                event_type = ?event.event_type,
                "event outside trigger set, no refresh"
            );
            return;
        }

        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.refresh(&event.session_id, None).await {
                // An upstream rejection on the event path has no direct
                // caller to answer; it is logged and nothing is broadcast.
                warn!(session_id = %event.session_id, error = %e, "event-triggered refresh failed");
            }
        });
    }

    /// Run one refresh cycle for a session.
    ///
    /// Success publishes upstream data; an unavailable upstream publishes
    /// labeled fallback data (still new data); an upstream rejection is
    /// returned to the caller and nothing is broadcast.
    pub async fn refresh(
        &self,
        session_id: &str,
        ov: Option<ConfigOverride>,
    ) -> Result<RefreshOutcome, ApiError> {
        let base = self.config.read().await.clone();
        let result = self.fetcher.get_stats(ov.as_ref()).await;

        let (payload, source) = match result.outcome {
            ProxyOutcome::Success { payload } => (payload, PayloadSource::Upstream),
            ProxyOutcome::Unavailable => {
                info!(session_id, attempts = result.attempts, "upstream unavailable, using fallback payload");
                (fallback::generate(&base, ov.as_ref()), PayloadSource::Fallback)
            }
            ProxyOutcome::UpstreamError { status, detail } => {
                return Err(ApiError::UpstreamRejected { status, detail });
            }
        };

        let timestamp = Utc::now();

        // Persistence is best-effort: a storage failure is logged and must
        // not block publishing.
        if let Err(e) = self.store.append(session_id, &payload, source, timestamp) {
            warn!(session_id, error = %e, "snapshot append failed");
        }

        let delivered = self.hub.publish(&ServerMessage::UsageUpdate {
            session_id: session_id.to_string(),
            data: payload.clone(),
            timestamp,
        });
        debug!(session_id, delivered, source = source.as_str(), "usage update published");

        Ok(RefreshOutcome {
            payload,
            source,
            attempts: result.attempts,
        })
    }

    /// Synchronous surface: current statistics for a direct caller.
    ///
    /// Persists the snapshot like any other fetch that yields a payload, but
    /// does not broadcast — nothing was pushed at subscribers by their own
    /// request paths.
    pub async fn stats(&self, ov: Option<ConfigOverride>) -> Result<RefreshOutcome, ApiError> {
        let base = self.config.read().await.clone();
        let result = self.fetcher.get_stats(ov.as_ref()).await;

        let (payload, source) = match result.outcome {
            ProxyOutcome::Success { payload } => (payload, PayloadSource::Upstream),
            ProxyOutcome::Unavailable => {
                (fallback::generate(&base, ov.as_ref()), PayloadSource::Fallback)
            }
            ProxyOutcome::UpstreamError { status, detail } => {
                return Err(ApiError::UpstreamRejected { status, detail });
            }
        };

        let session_key = payload
            .current_session
            .as_ref()
            .map(|s| s.id.as_str())
            .unwrap_or(GLOBAL_SESSION)
            .to_string();
        if let Err(e) = self.store.append(&session_key, &payload, source, Utc::now()) {
            warn!(session_id = %session_key, error = %e, "snapshot append failed");
        }

        Ok(RefreshOutcome {
            payload,
            source,
            attempts: result.attempts,
        })
    }

    /// Synchronous surface: persisted snapshot history. Parameter bounds are
    /// validated at the boundary (`api::validate_sessions_params`).
    pub fn sessions(
        &self,
        session_id: Option<&str>,
        limit: u32,
        hours_back: u32,
    ) -> Result<Vec<Snapshot>, ApiError> {
        Ok(self.store.query(session_id, limit, hours_back)?)
    }

    /// Synchronous surface: merge, validate, and apply a configuration
    /// change, pushing it upstream so both sides agree on defaults.
    ///
    /// An unreachable upstream does not block the local update; the new
    /// configuration is applied locally and pushed on the next opportunity.
    pub async fn update_config(&self, partial: ConfigOverride) -> Result<UsageConfig, ApiError> {
        let mut merged = {
            let current = self.config.read().await;
            current.merged_with(&partial)
        };
        merged.validate()?;

        let now = Utc::now();
        merged.updated_at = Some(now);
        if merged.created_at.is_none() {
            merged.created_at = Some(now);
        }

        let result = self.fetcher.update_config(&merged).await;
        let applied = match result.outcome {
            ProxyOutcome::Success { payload } => payload,
            ProxyOutcome::Unavailable => {
                warn!("upstream unreachable during config update, applying locally");
                merged
            }
            ProxyOutcome::UpstreamError { status, detail } => {
                return Err(ApiError::UpstreamRejected { status, detail });
            }
        };

        let mut current = self.config.write().await;
        *current = applied.clone();
        info!(plan = ?applied.plan, view = ?applied.view, "configuration updated");
        Ok(applied)
    }

    /// Current default configuration.
    pub async fn current_config(&self) -> UsageConfig {
        self.config.read().await.clone()
    }

    /// Best-effort initial message for a freshly connected subscriber:
    /// recent buffered events plus the latest known snapshot.
    pub fn initial_message(&self) -> ServerMessage {
        let events: Vec<InboundEvent> = {
            let recent = self.recent_events.lock().expect("event buffer poisoned");
            recent.iter().cloned().collect()
        };
        let snapshot = match self.store.latest(None) {
            Ok(s) => s,
            Err(e) => {
                warn!(error = %e, "could not load latest snapshot for initial message");
                None
            }
        };
        ServerMessage::Initial { events, snapshot }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::SUBSCRIBER_BUFFER;
    use crate::testutil::{Step, scripted_upstream, test_fetcher};
    use std::net::SocketAddr;
    use std::sync::atomic::Ordering;
    use std::time::Duration;
    use tokio::sync::mpsc;
    use usagehub_core::config::Plan;
    use usagehub_core::types::EventType;

    const STATS_BODY: &str = r#"{"totals": {"token_percentage": 42.0}}"#;

    fn make_orchestrator(addr: SocketAddr) -> (Arc<Orchestrator>, Arc<BroadcastHub>) {
        let hub = Arc::new(BroadcastHub::new());
        let orchestrator = Arc::new(Orchestrator::new(
            test_fetcher(addr),
            SnapshotStore::open_in_memory().unwrap(),
            Arc::clone(&hub),
        ));
        (orchestrator, hub)
    }

    fn event(event_type: EventType, session_id: &str) -> InboundEvent {
        InboundEvent {
            source_app: "claude-code".into(),
            session_id: session_id.into(),
            event_type,
            payload: serde_json::json!({"tool": "Bash"}),
            timestamp: Utc::now(),
        }
    }

    async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timeout waiting for message")
            .expect("channel closed")
    }

    async fn assert_silent(rx: &mut mpsc::Receiver<ServerMessage>) {
        let extra = tokio::time::timeout(Duration::from_millis(200), rx.recv()).await;
        assert!(extra.is_err(), "expected no further messages, got {extra:?}");
    }

    #[tokio::test]
    async fn trigger_event_fail_twice_then_succeed() {
        // Scenario: upstream fails twice then succeeds; exactly 3 attempts,
        // one upstream-labeled snapshot, one usage_update broadcast.
        let (addr, hits) =
            scripted_upstream(vec![Step::Hangup, Step::Hangup, Step::Json(STATS_BODY)]).await;
        let (orchestrator, hub) = make_orchestrator(addr);
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        hub.register(tx);

        orchestrator.on_event(event(EventType::PreToolUse, "s1"));

        // Event relay arrives first, then the refresh result.
        let relayed = recv(&mut rx).await;
        assert!(matches!(relayed, ServerMessage::Event { .. }));

        let update = recv(&mut rx).await;
        match update {
            ServerMessage::UsageUpdate { session_id, data, .. } => {
                assert_eq!(session_id, "s1");
                assert_eq!(data.totals.token_percentage, 42.0);
            }
            other => panic!("expected usage_update, got {other:?}"),
        }

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let snaps = orchestrator.sessions(Some("s1"), 10, 24).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].source, PayloadSource::Upstream);
    }

    #[tokio::test]
    async fn exhausted_upstream_broadcasts_fallback() {
        // Scenario: upstream down for every attempt (budget = 2 retries):
        // 3 attempts, fallback payload generated, snapshot labeled fallback,
        // broadcast still occurs.
        let (addr, hits) = scripted_upstream(vec![]).await;
        let (orchestrator, hub) = make_orchestrator(addr);
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        hub.register(tx);

        orchestrator.on_event(event(EventType::Stop, "s1"));

        let relayed = recv(&mut rx).await;
        assert!(matches!(relayed, ServerMessage::Event { .. }));

        let update = recv(&mut rx).await;
        match update {
            ServerMessage::UsageUpdate { session_id, data, .. } => {
                assert_eq!(session_id, "s1");
                // Schema-valid synthetic payload.
                assert!(data.current_session.is_none());
                assert!(data.applied_config.is_some());
            }
            other => panic!("expected usage_update, got {other:?}"),
        }

        assert_eq!(hits.load(Ordering::SeqCst), 3);
        let snaps = orchestrator.sessions(Some("s1"), 10, 24).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_eq!(snaps[0].source, PayloadSource::Fallback);
    }

    #[tokio::test]
    async fn non_trigger_event_never_fetches() {
        // Scenario: a Notification arrives; zero fetch attempts, no
        // usage_update, only the event relay itself.
        let (addr, hits) = scripted_upstream(vec![Step::Json(STATS_BODY)]).await;
        let (orchestrator, hub) = make_orchestrator(addr);
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        hub.register(tx);

        orchestrator.on_event(event(EventType::Notification, "s1"));

        let relayed = recv(&mut rx).await;
        assert!(matches!(relayed, ServerMessage::Event { .. }));
        assert_silent(&mut rx).await;

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(orchestrator.sessions(Some("s1"), 10, 24).unwrap().is_empty());
    }

    #[tokio::test]
    async fn upstream_rejection_propagates_and_is_not_broadcast() {
        let (addr, hits) = scripted_upstream(vec![Step::Status(422, "bad plan")]).await;
        let (orchestrator, hub) = make_orchestrator(addr);
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        hub.register(tx);

        let err = orchestrator.refresh("s1", None).await.unwrap_err();
        match err {
            ApiError::UpstreamRejected { status, detail } => {
                assert_eq!(status, 422);
                assert_eq!(detail, "bad plan");
            }
            other => panic!("expected rejection, got {other:?}"),
        }

        // A rejection is not new data: nothing persisted, nothing broadcast.
        assert_eq!(hits.load(Ordering::SeqCst), 1);
        assert!(orchestrator.sessions(Some("s1"), 10, 24).unwrap().is_empty());
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn on_demand_refresh_echoes_override_in_fallback() {
        let (addr, _) = scripted_upstream(vec![]).await;
        let (orchestrator, _hub) = make_orchestrator(addr);

        let ov = ConfigOverride {
            plan: Some(Plan::Max5),
            ..Default::default()
        };
        let outcome = orchestrator.refresh("s9", Some(ov)).await.unwrap();
        assert_eq!(outcome.source, PayloadSource::Fallback);
        assert_eq!(outcome.attempts, 3);
        let applied = outcome.payload.applied_config.expect("applied config");
        assert_eq!(applied.plan, Plan::Max5);
    }

    #[tokio::test]
    async fn stats_surface_persists_without_broadcast() {
        let (addr, _) = scripted_upstream(vec![Step::Json(STATS_BODY)]).await;
        let (orchestrator, hub) = make_orchestrator(addr);
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        hub.register(tx);

        let outcome = orchestrator.stats(None).await.unwrap();
        assert_eq!(outcome.source, PayloadSource::Upstream);

        // Persisted under the global key (no current session in the body).
        let snaps = orchestrator.sessions(Some("global"), 10, 24).unwrap();
        assert_eq!(snaps.len(), 1);
        assert_silent(&mut rx).await;
    }

    #[tokio::test]
    async fn update_config_rejects_invalid_before_upstream() {
        let (addr, hits) = scripted_upstream(vec![Step::Json("{}")]).await;
        let (orchestrator, _hub) = make_orchestrator(addr);

        let partial = ConfigOverride {
            reset_hour: Some(24),
            ..Default::default()
        };
        let err = orchestrator.update_config(partial).await.unwrap_err();
        assert!(matches!(err, ApiError::InvalidConfig(_)));
        // Rejected at the boundary: the upstream never saw the request.
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn update_config_applies_locally_when_upstream_down() {
        let (addr, _) = scripted_upstream(vec![]).await;
        let (orchestrator, _hub) = make_orchestrator(addr);

        let partial = ConfigOverride {
            plan: Some(Plan::Pro),
            ..Default::default()
        };
        let applied = orchestrator.update_config(partial).await.unwrap();
        assert_eq!(applied.plan, Plan::Pro);
        assert!(applied.updated_at.is_some());
        assert_eq!(orchestrator.current_config().await.plan, Plan::Pro);
    }

    #[tokio::test]
    async fn initial_message_carries_recent_events_and_latest_snapshot() {
        let (addr, _) = scripted_upstream(vec![Step::Json(STATS_BODY)]).await;
        let (orchestrator, hub) = make_orchestrator(addr);
        let (tx, mut rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        hub.register(tx);

        orchestrator.on_event(event(EventType::UserPromptSubmit, "s1"));
        // Wait for the refresh to land before building the initial message.
        let _ = recv(&mut rx).await;
        let _ = recv(&mut rx).await;

        let initial = orchestrator.initial_message();
        match initial {
            ServerMessage::Initial { events, snapshot } => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0].session_id, "s1");
                let snap = snapshot.expect("latest snapshot present");
                assert_eq!(snap.session_id, "s1");
                assert_eq!(snap.source, PayloadSource::Upstream);
            }
            other => panic!("expected initial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn event_buffer_is_bounded() {
        let (addr, _) = scripted_upstream(vec![]).await;
        let (orchestrator, _hub) = make_orchestrator(addr);

        for i in 0..(RECENT_EVENTS_CAP + 10) {
            orchestrator.on_event(event(EventType::Notification, &format!("s{i}")));
        }

        match orchestrator.initial_message() {
            ServerMessage::Initial { events, .. } => {
                assert_eq!(events.len(), RECENT_EVENTS_CAP);
                // Oldest entries were evicted.
                assert_eq!(events[0].session_id, "s10");
            }
            other => panic!("expected initial, got {other:?}"),
        }
    }
}
