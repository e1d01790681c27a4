//! Subscriber registry and broadcast fan-out.
//!
//! The hub is the sole owner of live subscriber send handles. Registration
//! and removal are the only mutations to the subscriber set, and removal is
//! idempotent. Publishing is fire-and-forget through each subscriber's
//! bounded channel: a full or closed channel fails that one send, which
//! immediately deregisters the subscriber. One stalled connection can never
//! starve the others.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use usagehub_core::types::ServerMessage;

/// Per-subscriber outbound buffer depth.
pub const SUBSCRIBER_BUFFER: usize = 64;

/// Opaque handle to a registered subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

struct Subscriber {
    sender: mpsc::Sender<ServerMessage>,
    connected_at: DateTime<Utc>,
}

/// Concurrency-safe registry of live subscribers.
#[derive(Default)]
pub struct BroadcastHub {
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    next_id: AtomicU64,
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber's send handle, returning its id.
    pub fn register(&self, sender: mpsc::Sender<ServerMessage>) -> SubscriberId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut subs = self.subscribers.lock().expect("hub mutex poisoned");
        subs.insert(
            id,
            Subscriber {
                sender,
                connected_at: Utc::now(),
            },
        );
        tracing::debug!(subscriber_id = id, total = subs.len(), "subscriber registered");
        SubscriberId(id)
    }

    /// Remove a subscriber. Idempotent: removing an already-removed id is a
    /// no-op.
    pub fn deregister(&self, id: SubscriberId) {
        let mut subs = self.subscribers.lock().expect("hub mutex poisoned");
        if let Some(sub) = subs.remove(&id.0) {
            let connected_for = Utc::now() - sub.connected_at;
            tracing::debug!(
                subscriber_id = id.0,
                connected_secs = connected_for.num_seconds(),
                total = subs.len(),
                "subscriber deregistered"
            );
        }
    }

    /// Fan a message out to every registered subscriber.
    ///
    /// Sends never block: a subscriber whose buffer is full or whose channel
    /// is closed fails its send and is dropped from the registry. Returns the
    /// number of successful deliveries.
    pub fn publish(&self, message: &ServerMessage) -> usize {
        let mut subs = self.subscribers.lock().expect("hub mutex poisoned");
        let mut broken: Vec<u64> = Vec::new();
        let mut delivered = 0usize;

        for (id, sub) in subs.iter() {
            match sub.sender.try_send(message.clone()) {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::warn!(subscriber_id = id, error = %e, "subscriber send failed, dropping");
                    broken.push(*id);
                }
            }
        }
        for id in broken {
            subs.remove(&id);
        }
        delivered
    }

    /// Number of currently registered subscribers.
    pub fn len(&self) -> usize {
        self.subscribers.lock().expect("hub mutex poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
