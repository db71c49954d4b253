use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Form-field name → value, the input that produced (and can reproduce) a session.
pub type SessionContext = BTreeMap<String, Value>;

/// Step numbers the server has durably recorded as finished.
pub type StepSet = BTreeSet<u8>;

/// Session lifecycle status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Initiated,
    #[serde(alias = "active", alias = "processing", alias = "in_progress")]
    Running,
    Paused,
    #[serde(alias = "complete", alias = "finished")]
    Completed,
    #[serde(alias = "failed")]
    Error,
    Saved,
}

impl SessionStatus {
    /// Completed and error sessions never poll again on their own.
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Initiated => "initiated",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Completed => "completed",
            SessionStatus::Error => "error",
            SessionStatus::Saved => "saved",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server-reported state of one session, already decoded from whichever
/// endpoint produced it.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StatusReport {
    pub status: SessionStatus,
    pub progress_percent: u8,
    pub current_step_label: String,
    pub completed_steps: StepSet,
    pub results: Option<Value>,
    pub error: Option<String>,
}

/// Client-side cached view of a session, persisted by the local store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: String,
    pub status: SessionStatus,
    #[serde(default)]
    pub progress_percent: u8,
    #[serde(default)]
    pub current_step_label: String,
    #[serde(default)]
    pub completed_steps: StepSet,
    #[serde(default)]
    pub context: SessionContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<Value>,
    pub last_saved: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SessionSnapshot {
    pub fn new(session_id: impl Into<String>, context: SessionContext) -> Self {
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Initiated,
            progress_percent: 0,
            current_step_label: String::new(),
            completed_steps: StepSet::new(),
            context,
            results: None,
            last_saved: Utc::now(),
            error: None,
        }
    }

    /// Merge a server report into this snapshot.
    ///
    /// Progress and step labels are taken from the server as-is. Completed
    /// steps are unioned so a step is never un-completed locally, and the
    /// local context is left alone since the server does not own form input.
    pub fn apply_report(&mut self, report: &StatusReport) {
        self.status = report.status;
        self.progress_percent = report.progress_percent.min(100);
        if !report.current_step_label.is_empty() {
            self.current_step_label = report.current_step_label.clone();
        }
        self.completed_steps.extend(report.completed_steps.iter().copied());

        match report.status {
            SessionStatus::Completed => {
                self.progress_percent = 100;
                self.error = None;
                if report.results.is_some() {
                    self.results = report.results.clone();
                }
            }
            SessionStatus::Error => {
                self.error = report
                    .error
                    .clone()
                    .or_else(|| Some("analysis failed".to_string()));
            }
            _ => self.error = None,
        }
    }

    /// Whether results can be presented without asking the server.
    pub fn has_cached_results(&self) -> bool {
        match &self.results {
            None | Some(Value::Null) => false,
            Some(Value::Object(map)) => !map.is_empty(),
            Some(Value::String(s)) => !s.is_empty(),
            Some(_) => true,
        }
    }

    /// Human-facing label: `Session 1a2b3c4d... - fitness`
    pub fn display_name(&self) -> String {
        let short: String = self.session_id.chars().take(8).collect();
        let segment = self
            .context
            .get("segmento")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .unwrap_or("N/A");
        format!("Session {}... - {}", short, segment)
    }

    pub fn touch(&mut self) {
        self.last_saved = Utc::now();
    }
}

/// Build a context from `key=value` pairs. Entries without `=` are ignored.
pub fn context_from_pairs<'a, I>(pairs: I) -> SessionContext
where
    I: IntoIterator<Item = &'a str>,
{
    pairs
        .into_iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.trim().to_string(), Value::String(v.trim().to_string())))
        .collect()
}
