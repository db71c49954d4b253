//! Scripted gateway and notifier for unit tests.

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};

use crate::gateway::{GatewayError, SessionGateway, SessionSummary, StepContinuation};
use crate::notice::{Notifier, Severity};
use crate::session::{SessionContext, SessionSnapshot, SessionStatus, StatusReport};

pub(crate) fn running(percent: u8) -> StatusReport {
    StatusReport {
        status: SessionStatus::Running,
        progress_percent: percent,
        current_step_label: format!("running at {}", percent),
        ..Default::default()
    }
}

pub(crate) fn report(status: SessionStatus, percent: u8, steps: &[u8]) -> StatusReport {
    StatusReport {
        status,
        progress_percent: percent,
        completed_steps: steps.iter().copied().collect(),
        ..Default::default()
    }
}

#[derive(Default)]
struct Script {
    submit: VecDeque<Result<String, GatewayError>>,
    progress: HashMap<String, VecDeque<Result<StatusReport, GatewayError>>>,
    status: HashMap<String, Result<StatusReport, GatewayError>>,
    failures: HashMap<&'static str, GatewayError>,
    continuation: Option<StepContinuation>,
    summaries: Vec<SessionSummary>,
    loaded: HashMap<String, SessionSnapshot>,
    results: HashMap<String, Value>,
    calls: Vec<String>,
}

/// Gateway that replays queued replies and records every call as `op:session`.
#[derive(Default)]
pub(crate) struct ScriptedGateway {
    script: Mutex<Script>,
}

impl ScriptedGateway {
    pub fn queue_submit(&self, reply: Result<String, GatewayError>) {
        self.script.lock().submit.push_back(reply);
    }

    /// Queue a poll reply. The last queued reply repeats once the queue drains.
    pub fn push_progress(&self, session_id: &str, reply: Result<StatusReport, GatewayError>) {
        self.script
            .lock()
            .progress
            .entry(session_id.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn set_status(&self, session_id: &str, reply: Result<StatusReport, GatewayError>) {
        self.script.lock().status.insert(session_id.to_string(), reply);
    }

    /// Make every call of `op` fail with `error`.
    pub fn fail(&self, op: &'static str, error: GatewayError) {
        self.script.lock().failures.insert(op, error);
    }

    pub fn set_continuation(&self, continuation: StepContinuation) {
        self.script.lock().continuation = Some(continuation);
    }

    pub fn set_summaries(&self, summaries: Vec<SessionSummary>) {
        self.script.lock().summaries = summaries;
    }

    pub fn set_loaded(&self, snapshot: SessionSnapshot) {
        self.script
            .lock()
            .loaded
            .insert(snapshot.session_id.clone(), snapshot);
    }

    pub fn set_results(&self, session_id: &str, results: Value) {
        self.script.lock().results.insert(session_id.to_string(), results);
    }

    pub fn calls(&self) -> Vec<String> {
        self.script.lock().calls.clone()
    }

    pub fn call_count(&self, call: &str) -> usize {
        self.script.lock().calls.iter().filter(|c| *c == call).count()
    }

    fn record(&self, op: &'static str, session_id: &str) -> Result<(), GatewayError> {
        let mut script = self.script.lock();
        script.calls.push(format!("{}:{}", op, session_id));
        match script.failures.get(op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }

    fn ready<'a, T: Send + 'a>(value: T) -> BoxFuture<'a, T> {
        futures::future::ready(value).boxed()
    }
}

impl SessionGateway for ScriptedGateway {
    fn submit<'a>(&'a self, _context: &'a SessionContext) -> BoxFuture<'a, Result<String, GatewayError>> {
        let reply = self.record("submit", "").and_then(|_| {
            self.script
                .lock()
                .submit
                .pop_front()
                .unwrap_or_else(|| Ok(ulid::Ulid::new().to_string()))
        });
        Self::ready(reply)
    }

    fn poll_progress<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<StatusReport, GatewayError>> {
        let reply = self.record("poll", session_id).and_then(|_| {
            let mut script = self.script.lock();
            match script.progress.get_mut(session_id) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or_else(|| Ok(running(0))),
                Some(queue) => queue.front().cloned().unwrap_or_else(|| Ok(running(0))),
                None => Ok(running(0)),
            }
        });
        Self::ready(reply)
    }

    fn get_status<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<StatusReport, GatewayError>> {
        let reply = self.record("status", session_id).and_then(|_| {
            self.script
                .lock()
                .status
                .get(session_id)
                .cloned()
                .unwrap_or_else(|| Err(GatewayError::NotFound(session_id.to_string())))
        });
        Self::ready(reply)
    }

    fn pause<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Self::ready(self.record("pause", session_id))
    }

    fn resume<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Self::ready(self.record("resume", session_id))
    }

    fn save<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Self::ready(self.record("save", session_id))
    }

    fn continue_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Self::ready(self.record("continue", session_id))
    }

    fn continue_from_step<'a>(
        &'a self,
        session_id: &'a str,
        step: u8,
    ) -> BoxFuture<'a, Result<StepContinuation, GatewayError>> {
        let reply = self.record("continue_from_step", session_id).map(|_| {
            self.script
                .lock()
                .continuation
                .clone()
                .unwrap_or(StepContinuation {
                    step,
                    ..Default::default()
                })
        });
        Self::ready(reply)
    }

    fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SessionSummary>, GatewayError>> {
        let reply = self
            .record("list", "")
            .map(|_| self.script.lock().summaries.clone());
        Self::ready(reply)
    }

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>> {
        Self::ready(self.record("delete", session_id))
    }

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSnapshot, GatewayError>> {
        let reply = self.record("load", session_id).and_then(|_| {
            self.script
                .lock()
                .loaded
                .get(session_id)
                .cloned()
                .ok_or_else(|| GatewayError::NotFound(session_id.to_string()))
        });
        Self::ready(reply)
    }

    fn fetch_results<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Value, GatewayError>> {
        let reply = self.record("results", session_id).and_then(|_| {
            self.script
                .lock()
                .results
                .get(session_id)
                .cloned()
                .ok_or_else(|| GatewayError::Decode("no results".to_string()))
        });
        Self::ready(reply)
    }

    fn cleanup<'a>(&'a self) -> BoxFuture<'a, Result<(), GatewayError>> {
        Self::ready(self.record("cleanup", ""))
    }
}

/// Notifier that keeps every notice for inspection.
#[derive(Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<(String, Severity)>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<(String, Severity)> {
        self.notices.lock().clone()
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.notices.lock().iter().filter(|(_, s)| *s == severity).count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, severity: Severity) {
        self.notices.lock().push((message.to_string(), severity));
    }
}
