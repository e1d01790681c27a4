//! Wire-format types shared by the ingest path, the snapshot store, and the
//! subscriber channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ConfigOverride;
use crate::stats::UsageStats;

/// Lifecycle event emitted by an agent process.
///
/// Immutable once received; the orchestrator only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundEvent {
    /// Name of the application that produced the event.
    pub source_app: String,
    /// Agent session the event belongs to.
    pub session_id: String,
    pub event_type: EventType,
    /// Event-specific data, relayed opaquely.
    #[serde(default)]
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

/// Known agent lifecycle event types.
///
/// Unrecognized types deserialize to [`EventType::Other`] so an upgraded
/// agent cannot break ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventType {
    PreToolUse,
    PostToolUse,
    Stop,
    SubagentStop,
    UserPromptSubmit,
    Notification,
    PreCompact,
    SessionStart,
    SessionEnd,
    Other,
}

impl EventType {
    fn from_name(name: &str) -> Self {
        match name {
            "PreToolUse" => EventType::PreToolUse,
            "PostToolUse" => EventType::PostToolUse,
            "Stop" => EventType::Stop,
            "SubagentStop" => EventType::SubagentStop,
            "UserPromptSubmit" => EventType::UserPromptSubmit,
            "Notification" => EventType::Notification,
            "PreCompact" => EventType::PreCompact,
            "SessionStart" => EventType::SessionStart,
            "SessionEnd" => EventType::SessionEnd,
            _ => EventType::Other,
        }
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(EventType::from_name(&name))
    }
}

/// Provenance of a usage-statistics payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayloadSource {
    Upstream,
    Fallback,
}

impl PayloadSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadSource::Upstream => "upstream",
            PayloadSource::Fallback => "fallback",
        }
    }
}

/// Persisted point-in-time copy of a statistics payload plus its provenance.
/// Append-only; never updated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: i64,
    pub session_id: String,
    pub payload: UsageStats,
    pub source: PayloadSource,
    pub timestamp: DateTime<Utc>,
}

/// Messages a subscriber may send over the duplex channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// On-demand refresh for a session, bypassing the trigger policy.
    RequestUsageUpdate {
        session_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config: Option<ConfigOverride>,
    },
    Ping,
}

/// Messages the hub pushes to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once on connect: recent buffered events plus the latest known
    /// snapshot, if any.
    Initial {
        events: Vec<InboundEvent>,
        snapshot: Option<Snapshot>,
    },
    Event {
        data: InboundEvent,
    },
    UsageUpdate {
        session_id: String,
        data: UsageStats,
        timestamp: DateTime<Utc>,
    },
    Error {
        data: String,
    },
    Pong {
        timestamp: DateTime<Utc>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_event_round_trips() {
        let json = r#"{
            "source_app": "claude-code",
            "session_id": "s1",
            "event_type": "PreToolUse",
            "payload": {"tool": "Bash"},
            "timestamp": "2026-01-15T10:00:00Z"
        }"#;
        let ev: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.source_app, "claude-code");
        assert_eq!(ev.event_type, EventType::PreToolUse);
        assert_eq!(ev.payload["tool"], "Bash");

        let back = serde_json::to_value(&ev).unwrap();
        assert_eq!(back["event_type"], "PreToolUse");
    }

    #[test]
    fn unknown_event_type_maps_to_other() {
        let json = r#"{
            "source_app": "x",
            "session_id": "s",
            "event_type": "SomethingNew",
            "timestamp": "2026-01-15T10:00:00Z"
        }"#;
        let ev: InboundEvent = serde_json::from_str(json).unwrap();
        assert_eq!(ev.event_type, EventType::Other);
        assert_eq!(ev.payload, serde_json::Value::Null);
    }

    #[test]
    fn client_message_tagging() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type": "request_usage_update", "session_id": "s1"}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::RequestUsageUpdate {
                session_id: "s1".into(),
                config: None,
            }
        );

        let ping: ClientMessage = serde_json::from_str(r#"{"type": "ping"}"#).unwrap();
        assert_eq!(ping, ClientMessage::Ping);
    }

    #[test]
    fn server_message_tagging() {
        let msg = ServerMessage::Pong {
            timestamp: Utc::now(),
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "pong");

        let err = ServerMessage::Error {
            data: "boom".into(),
        };
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["type"], "error");
        assert_eq!(v["data"], "boom");
    }

    #[test]
    fn payload_source_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(PayloadSource::Upstream).unwrap(),
            "upstream"
        );
        assert_eq!(
            serde_json::to_value(PayloadSource::Fallback).unwrap(),
            "fallback"
        );
        assert_eq!(PayloadSource::Fallback.as_str(), "fallback");
    }
}
