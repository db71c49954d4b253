use serde::Serialize;
use serde_json::Value;

use crate::session::{SessionStatus, StepSet};

/// Event payload sent to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "camelCase")]
pub enum SessionEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        session_id: String,
        percent: u8,
        step_label: String,
        completed_steps: StepSet,
    },
    #[serde(rename_all = "camelCase")]
    Completed {
        session_id: String,
        results: Option<Value>,
    },
    #[serde(rename_all = "camelCase")]
    Failed { session_id: String, error: String },
    /// Controls should reflect a new status (pause, resume, save, restore).
    #[serde(rename_all = "camelCase")]
    StatusChanged {
        session_id: String,
        status: SessionStatus,
    },
    #[serde(rename_all = "camelCase")]
    Results {
        session_id: String,
        results: Value,
        from_cache: bool,
    },
    /// A session's form input should be repopulated.
    #[serde(rename_all = "camelCase")]
    ContextRestored {
        session_id: String,
        context: crate::session::SessionContext,
    },
}

impl SessionEvent {
    pub fn session_id(&self) -> &str {
        match self {
            SessionEvent::Progress { session_id, .. }
            | SessionEvent::Completed { session_id, .. }
            | SessionEvent::Failed { session_id, .. }
            | SessionEvent::StatusChanged { session_id, .. }
            | SessionEvent::Results { session_id, .. }
            | SessionEvent::ContextRestored { session_id, .. } => session_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serializes_with_tag() {
        let event = SessionEvent::Failed {
            session_id: "s1".to_string(),
            error: "gone".to_string(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "failed");
        assert_eq!(value["sessionId"], "s1");
        assert_eq!(event.session_id(), "s1");
    }
}
