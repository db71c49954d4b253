//! Backend JSON payloads and their conversion into typed replies.

use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Map, Value};

use super::{GatewayError, SessionSummary, StepContinuation};
use crate::session::{SessionContext, SessionSnapshot, SessionStatus, StatusReport, StepSet};

/// Check HTTP status and the `success` flag, returning the JSON body.
pub(super) fn decode_envelope(status: StatusCode, text: &str) -> Result<Value, GatewayError> {
    let body: Option<Value> = serde_json::from_str(text).ok();
    let reason = body.as_ref().and_then(failure_reason);

    if status == StatusCode::NOT_FOUND {
        return Err(GatewayError::NotFound(reason.unwrap_or_else(|| status.to_string())));
    }
    if status.is_server_error() {
        return Err(GatewayError::Transport(format!(
            "{}: {}",
            status,
            reason.unwrap_or_else(|| text.chars().take(200).collect())
        )));
    }
    if status.is_client_error() {
        return Err(GatewayError::Rejected(reason.unwrap_or_else(|| status.to_string())));
    }

    let body = body.ok_or_else(|| GatewayError::Decode(format!("non-JSON body: {}", text.chars().take(200).collect::<String>())))?;
    if body.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(GatewayError::Rejected(
            reason.unwrap_or_else(|| "operation failed".to_string()),
        ));
    }
    Ok(body)
}

fn failure_reason(body: &Value) -> Option<String> {
    ["error", "message"]
        .iter()
        .find_map(|k| body.get(*k).and_then(Value::as_str))
        .map(str::to_string)
}

/// Progress/status payload. Fields vary per endpoint, so everything is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ReportWire {
    percentage: Option<f64>,
    progress_percentage: Option<f64>,
    progress: Option<Value>,
    current_step: Option<Value>,
    current_message: Option<String>,
    completed: Option<bool>,
    is_complete: Option<bool>,
    status: Option<String>,
    completed_steps: Option<Vec<u8>>,
    results: Option<Value>,
    analysis_result: Option<Value>,
    error: Option<String>,
}

fn parse_status(raw: &str) -> Option<SessionStatus> {
    serde_json::from_value(Value::String(raw.trim().to_lowercase())).ok()
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        0
    } else {
        value.round().clamp(0.0, 100.0) as u8
    }
}

impl ReportWire {
    fn into_report(self) -> StatusReport {
        let parsed = self.status.as_deref().and_then(parse_status);
        let completed = self.completed.unwrap_or(false)
            || self.is_complete.unwrap_or(false)
            || parsed == Some(SessionStatus::Completed);

        let status = if completed {
            SessionStatus::Completed
        } else {
            match parsed {
                Some(status) => status,
                None if self.error.is_some() => SessionStatus::Error,
                None => SessionStatus::Running,
            }
        };

        let percent = self
            .percentage
            .or(self.progress_percentage)
            .or_else(|| self.progress.as_ref().and_then(Value::as_f64))
            .map(clamp_percent)
            .unwrap_or(0);

        let label = match self.current_step {
            Some(Value::String(s)) if !s.is_empty() => s,
            other => self.current_message.unwrap_or_else(|| match other {
                Some(Value::Number(n)) => format!("step {}", n),
                _ => String::new(),
            }),
        };

        StatusReport {
            status,
            progress_percent: percent,
            current_step_label: label,
            completed_steps: self.completed_steps.unwrap_or_default().into_iter().collect(),
            results: self.results.or(self.analysis_result),
            error: self.error,
        }
    }
}

/// Decode a progress or status body. Nested `progress` / `session` objects
/// take precedence over top-level fields.
pub(super) fn decode_report(body: Value) -> Result<StatusReport, GatewayError> {
    let inner = ["progress", "session"]
        .iter()
        .find_map(|k| body.get(*k).filter(|v| v.is_object()).cloned());
    let mut wire: ReportWire = match inner {
        Some(inner) => serde_json::from_value(inner),
        None => serde_json::from_value(body.clone()),
    }
    .map_err(|e| GatewayError::Decode(e.to_string()))?;

    if wire.results.is_none() {
        wire.results = body.get("results").filter(|v| !v.is_null()).cloned();
    }
    Ok(wire.into_report())
}

pub(super) fn decode_session_id(body: &Value) -> Result<String, GatewayError> {
    body.get("session_id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Decode("missing session_id".to_string()))
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

fn object_context(value: Option<&Value>) -> SessionContext {
    value
        .and_then(Value::as_object)
        .map(|map| map.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        .unwrap_or_default()
}

fn steps_of(value: Option<&Value>) -> StepSet {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_u64)
                .filter_map(|n| u8::try_from(n).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn summary_from(item: &Map<String, Value>) -> Option<SessionSummary> {
    let session_id = item
        .get("session_id")
        .or_else(|| item.get("id"))
        .and_then(Value::as_str)?
        .to_string();
    let status = item
        .get("status")
        .and_then(Value::as_str)
        .and_then(parse_status)
        .unwrap_or(SessionStatus::Saved);
    let current_step_label = match item.get("current_step") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => format!("step {}", n),
        _ => String::new(),
    };
    let last_updated = item
        .get("last_updated")
        .or_else(|| item.get("created_at"))
        .and_then(Value::as_str)
        .and_then(parse_timestamp);

    Some(SessionSummary {
        session_id,
        status,
        current_step_label,
        completed_steps: steps_of(item.get("completed_steps")),
        context: object_context(item.get("context")),
        last_updated,
    })
}

pub(super) fn decode_summaries(body: &Value) -> Vec<SessionSummary> {
    body.get("sessions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .filter_map(summary_from)
                .collect()
        })
        .unwrap_or_default()
}

/// `session_data` from the load endpoint, as a fresh snapshot.
pub(super) fn decode_loaded(session_id: &str, body: &Value) -> Result<SessionSnapshot, GatewayError> {
    let data = body
        .get("session_data")
        .and_then(Value::as_object)
        .ok_or_else(|| GatewayError::Decode("missing session_data".to_string()))?;

    let mut snapshot = SessionSnapshot::new(session_id, object_context(data.get("context")));
    snapshot.status = data
        .get("status")
        .and_then(Value::as_str)
        .and_then(parse_status)
        .unwrap_or(SessionStatus::Saved);
    // completed steps live under `metadata` in stored sessions
    snapshot.completed_steps = steps_of(
        data.get("completed_steps")
            .or_else(|| data.get("metadata").and_then(|m| m.get("completed_steps"))),
    );
    if let Some(ts) = data
        .get("last_updated")
        .and_then(Value::as_str)
        .and_then(parse_timestamp)
    {
        snapshot.last_saved = ts;
    }
    Ok(snapshot)
}

pub(super) fn decode_continuation(step: u8, body: &Value) -> StepContinuation {
    StepContinuation {
        step: body
            .get("step")
            .and_then(Value::as_u64)
            .and_then(|n| u8::try_from(n).ok())
            .unwrap_or(step),
        context: object_context(body.get("context")),
        previous_data: body.get("previous_data").cloned().unwrap_or(Value::Null),
    }
}

pub(super) fn decode_results(body: Value) -> Result<Value, GatewayError> {
    ["analysis_result", "html_report", "results"]
        .iter()
        .find_map(|k| body.get(*k).filter(|v| !v.is_null()).cloned())
        .ok_or_else(|| GatewayError::Decode("response carries no results".to_string()))
}
