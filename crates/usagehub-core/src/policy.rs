//! Refresh trigger policy.
//!
//! A fixed table of lifecycle event types that cause a statistics refresh.
//! Kept as a standalone function so the policy is unit-testable away from
//! any transport code.

use crate::types::{EventType, InboundEvent};

/// Event types that trigger a statistics refresh.
const TRIGGER_SET: [EventType; 5] = [
    EventType::PreToolUse,
    EventType::PostToolUse,
    EventType::Stop,
    EventType::SubagentStop,
    EventType::UserPromptSubmit,
];

/// Returns true iff the event's type is in the trigger set.
pub fn evaluate(event: &InboundEvent) -> bool {
    TRIGGER_SET.contains(&event.event_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn event(event_type: EventType) -> InboundEvent {
        InboundEvent {
            source_app: "claude-code".into(),
            session_id: "s1".into(),
            event_type,
            payload: serde_json::Value::Null,
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn trigger_set_members_trigger() {
        for t in [
            EventType::PreToolUse,
            EventType::PostToolUse,
            EventType::Stop,
            EventType::SubagentStop,
            EventType::UserPromptSubmit,
        ] {
            assert!(evaluate(&event(t)), "{t:?} should trigger a refresh");
        }
    }

    #[test]
    fn non_members_never_trigger() {
        for t in [
            EventType::Notification,
            EventType::PreCompact,
            EventType::SessionStart,
            EventType::SessionEnd,
            EventType::Other,
        ] {
            assert!(!evaluate(&event(t)), "{t:?} should not trigger a refresh");
        }
    }
}
