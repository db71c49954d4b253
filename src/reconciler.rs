//! Session Reconciler
//!
//! Owns the tracker's lifecycle: submits analyses, keeps the single active
//! session polled, merges server reports into the local store and turns
//! every outcome into UI events and notices.
//!
//! All writes to a session's snapshot go through this type. The poller never
//! touches the store itself; its ticks land in [`PollSink::on_tick`], which
//! checks the tick's ticket against the live poll before merging.

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, OnceCell};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::events::SessionEvent;
use crate::gateway::{GatewayError, SessionGateway, StepContinuation};
use crate::notice::{Notifier, Severity};
use crate::poller::{PollSink, PollTicket, ProgressPoller, TickControl};
use crate::session::{SessionContext, SessionSnapshot, SessionStatus, StatusReport};
use crate::steps;
use crate::store::{LocalSessionStore, StoreError};

/// Context fields of which at least one must be filled in to submit
const REQUIRED_ANY_OF: [&str; 2] = ["segmento", "produto"];

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Session not found: {0}")]
    NotFound(String),
    #[error("Submission failed: {0}")]
    Submission(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("No active session")]
    NoActiveSession,
}

impl Serialize for SessionError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<GatewayError> for SessionError {
    fn from(e: GatewayError) -> Self {
        match e {
            GatewayError::Transport(msg) | GatewayError::Decode(msg) => SessionError::Transport(msg),
            GatewayError::NotFound(msg) => SessionError::NotFound(msg),
            GatewayError::Rejected(msg) => SessionError::Conflict(msg),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub poll_interval: Duration,
    /// Consecutive failed ticks before one warning notice is raised
    pub transport_warn_after: u32,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        ClientConfig::default().into()
    }
}

impl From<ClientConfig> for TrackerOptions {
    fn from(config: ClientConfig) -> Self {
        Self {
            poll_interval: config.poll_interval(),
            transport_warn_after: config.transport_warn_after.max(1),
        }
    }
}

/// What start-up restoration found for the previously active session.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum RestoreOutcome {
    NothingToRestore,
    #[serde(rename_all = "camelCase")]
    Polling { session_id: String },
    #[serde(rename_all = "camelCase")]
    Paused { session_id: String },
    #[serde(rename_all = "camelCase")]
    Completed { session_id: String },
    #[serde(rename_all = "camelCase")]
    Failed { session_id: String, error: String },
    /// Server unreachable; the marker is kept so the next start retries.
    #[serde(rename_all = "camelCase")]
    Unreachable { session_id: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "camelCase")]
pub enum ContinueOutcome {
    #[serde(rename_all = "camelCase")]
    Results { results: Value, from_cache: bool },
    #[serde(rename_all = "camelCase")]
    Tracking { session_id: String },
}

#[derive(Default)]
struct TrackerState {
    /// Session pause/resume act on; polled unless paused
    active: Option<String>,
    selected: Option<String>,
    selected_step: Option<u8>,
    /// Highest percentage shown per session, so the display never regresses
    shown_percent: HashMap<String, u8>,
    transport_failures: u32,
    storage_warned: bool,
}

/// A merged report whose side effects (notice, progress event) are still pending.
struct MergedReport {
    snapshot: SessionSnapshot,
    shown_percent: u8,
    persisted: Result<(), StoreError>,
}

struct Inner {
    gateway: Arc<dyn SessionGateway>,
    store: LocalSessionStore,
    notifier: Arc<dyn Notifier>,
    events: mpsc::UnboundedSender<SessionEvent>,
    poller: Mutex<ProgressPoller>,
    state: Mutex<TrackerState>,
    restored: OnceCell<RestoreOutcome>,
    options: TrackerOptions,
}

#[derive(Clone)]
pub struct SessionReconciler {
    inner: Arc<Inner>,
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("No event receiver attached, dropping event");
        }
    }

    fn notify(&self, message: impl AsRef<str>, severity: Severity) {
        self.notifier.notify(message.as_ref(), severity);
    }

    /// Report a failed user action once and hand the error back.
    fn surface(&self, action: &str, err: SessionError) -> SessionError {
        self.notify(format!("{} failed: {}", action, err), Severity::Error);
        err
    }

    fn persist(&self, snapshot: &SessionSnapshot) {
        let outcome = self.store.put(snapshot);
        self.report_persist(&snapshot.session_id, outcome);
    }

    /// Log a failed write every time, notify once per failure streak.
    fn report_persist(&self, session_id: &str, outcome: Result<(), StoreError>) {
        match outcome {
            Ok(()) => self.state.lock().storage_warned = false,
            Err(e) => {
                warn!(session_id = %session_id, error = %e, "Failed to persist snapshot");
                let first = {
                    let mut state = self.state.lock();
                    !std::mem::replace(&mut state.storage_warned, true)
                };
                if first {
                    self.notify(
                        format!("Local session history could not be saved: {}", e),
                        Severity::Warning,
                    );
                }
            }
        }
    }

    fn merge_report(&self, session_id: &str, report: &StatusReport) -> SessionSnapshot {
        let merged = self.merge_quietly(session_id, report);
        self.publish(merged)
    }

    /// Merge and persist a report without calling out to the notifier or the
    /// event channel, so it can run under the poller lock.
    fn merge_quietly(&self, session_id: &str, report: &StatusReport) -> MergedReport {
        let mut snapshot = self
            .store
            .get(session_id)
            .unwrap_or_else(|| SessionSnapshot::new(session_id, SessionContext::new()));
        snapshot.apply_report(report);
        snapshot.touch();
        let persisted = self.store.put(&snapshot);

        let shown_percent = {
            let mut state = self.state.lock();
            let shown = state.shown_percent.entry(session_id.to_string()).or_insert(0);
            *shown = (*shown).max(snapshot.progress_percent);
            *shown
        };
        MergedReport {
            snapshot,
            shown_percent,
            persisted,
        }
    }

    fn publish(&self, merged: MergedReport) -> SessionSnapshot {
        let MergedReport {
            snapshot,
            shown_percent,
            persisted,
        } = merged;
        self.report_persist(&snapshot.session_id, persisted);
        self.emit(SessionEvent::Progress {
            session_id: snapshot.session_id.clone(),
            percent: shown_percent,
            step_label: snapshot.current_step_label.clone(),
            completed_steps: snapshot.completed_steps.clone(),
        });
        snapshot
    }

    fn mark_active(&self, session_id: &str) {
        self.state.lock().active = Some(session_id.to_string());
        if let Err(e) = self.store.set_last_active(session_id) {
            warn!(session_id = %session_id, error = %e, "Failed to record last active session");
        }
    }

    /// Forget `session_id` as the active session, if it is.
    fn release_active(&self, session_id: &str) {
        {
            let mut state = self.state.lock();
            if state.active.as_deref() == Some(session_id) {
                state.active = None;
            }
        }
        if self.store.last_active().as_deref() == Some(session_id) {
            if let Err(e) = self.store.clear_last_active() {
                warn!(session_id = %session_id, error = %e, "Failed to clear last active marker");
            }
        }
    }

    fn set_status(&self, session_id: &str, status: SessionStatus) -> SessionSnapshot {
        let mut snapshot = self
            .store
            .get(session_id)
            .unwrap_or_else(|| SessionSnapshot::new(session_id, SessionContext::new()));
        snapshot.status = status;
        if status != SessionStatus::Error {
            snapshot.error = None;
        }
        snapshot.touch();
        self.persist(&snapshot);
        self.emit(SessionEvent::StatusChanged {
            session_id: session_id.to_string(),
            status,
        });
        snapshot
    }

    fn finish_completed(&self, snapshot: &SessionSnapshot) {
        self.release_active(&snapshot.session_id);
        info!(session_id = %snapshot.session_id, "Analysis completed");
        self.emit(SessionEvent::Completed {
            session_id: snapshot.session_id.clone(),
            results: snapshot.results.clone(),
        });
        self.notify(
            format!("{} completed", snapshot.display_name()),
            Severity::Success,
        );
    }

    fn finish_failed(&self, session_id: &str, error: &str) {
        let mut snapshot = self
            .store
            .get(session_id)
            .unwrap_or_else(|| SessionSnapshot::new(session_id, SessionContext::new()));
        snapshot.status = SessionStatus::Error;
        snapshot.error = Some(error.to_string());
        snapshot.touch();
        self.persist(&snapshot);
        self.release_active(session_id);
        warn!(session_id = %session_id, error = %error, "Analysis failed");
        self.emit(SessionEvent::Failed {
            session_id: session_id.to_string(),
            error: error.to_string(),
        });
        self.notify(
            format!("{} failed: {}", snapshot.display_name(), error),
            Severity::Error,
        );
    }

    fn start_polling(self: &Arc<Self>, session_id: &str) {
        let sink: Weak<dyn PollSink> = Arc::downgrade(self) as Weak<dyn PollSink>;
        self.state.lock().transport_failures = 0;
        self.poller
            .lock()
            .start(session_id, Arc::clone(&self.gateway), sink);
    }

    fn stop_polling_if(&self, session_id: &str) {
        let mut poller = self.poller.lock();
        if poller.active_session() == Some(session_id) {
            poller.stop();
        }
    }

    async fn run_restore(self: &Arc<Self>) -> RestoreOutcome {
        let Some(session_id) = self.store.last_active() else {
            debug!("No previously active session to restore");
            return RestoreOutcome::NothingToRestore;
        };

        let report = match self.gateway.get_status(&session_id).await {
            Ok(report) => report,
            Err(GatewayError::NotFound(msg)) => {
                let error = format!("session is no longer known to the server ({})", msg);
                self.release_active(&session_id);
                self.emit(SessionEvent::Failed {
                    session_id: session_id.clone(),
                    error: error.clone(),
                });
                self.notify(
                    format!("Could not restore session {}: {}", session_id, error),
                    Severity::Warning,
                );
                return RestoreOutcome::Failed { session_id, error };
            }
            Err(e) => {
                self.notify(
                    format!("Could not check session {} after restart: {}", session_id, e),
                    Severity::Warning,
                );
                return RestoreOutcome::Unreachable {
                    session_id,
                    error: e.to_string(),
                };
            }
        };

        let snapshot = self.merge_report(&session_id, &report);
        match snapshot.status {
            SessionStatus::Initiated | SessionStatus::Running => {
                self.mark_active(&session_id);
                self.start_polling(&session_id);
                self.emit(SessionEvent::StatusChanged {
                    session_id: session_id.clone(),
                    status: SessionStatus::Running,
                });
                self.notify(
                    format!("Restored {}, progress tracking resumed", snapshot.display_name()),
                    Severity::Info,
                );
                RestoreOutcome::Polling { session_id }
            }
            SessionStatus::Paused | SessionStatus::Saved => {
                self.state.lock().active = Some(session_id.clone());
                self.emit(SessionEvent::StatusChanged {
                    session_id: session_id.clone(),
                    status: snapshot.status,
                });
                self.notify(
                    format!("{} is paused", snapshot.display_name()),
                    Severity::Info,
                );
                RestoreOutcome::Paused { session_id }
            }
            SessionStatus::Completed => {
                self.finish_completed(&snapshot);
                RestoreOutcome::Completed { session_id }
            }
            SessionStatus::Error => {
                let error = snapshot
                    .error
                    .clone()
                    .unwrap_or_else(|| "analysis failed".to_string());
                self.release_active(&session_id);
                self.emit(SessionEvent::Failed {
                    session_id: session_id.clone(),
                    error: error.clone(),
                });
                self.notify(
                    format!("{} ended with an error: {}", snapshot.display_name(), error),
                    Severity::Warning,
                );
                RestoreOutcome::Failed { session_id, error }
            }
        }
    }
}

impl PollSink for Inner {
    fn on_tick(&self, ticket: &PollTicket, outcome: Result<StatusReport, GatewayError>) -> TickControl {
        // Identity check, merge and stop happen under the poller lock; notices
        // and events go out after it is released.
        let mut poller = self.poller.lock();
        if !poller.is_current(ticket) {
            debug!(session_id = %ticket.session_id, generation = ticket.generation, "Discarding stale tick");
            return TickControl::Stop;
        }
        let session_id = ticket.session_id.as_str();

        match outcome {
            Ok(report) => {
                self.state.lock().transport_failures = 0;
                let merged = self.merge_quietly(session_id, &report);
                let finished = merged.snapshot.status.is_terminal();
                if finished {
                    poller.stop();
                }
                drop(poller);

                let snapshot = self.publish(merged);
                match snapshot.status {
                    SessionStatus::Completed => self.finish_completed(&snapshot),
                    SessionStatus::Error => {
                        let error = snapshot
                            .error
                            .clone()
                            .unwrap_or_else(|| "analysis failed".to_string());
                        self.finish_failed(session_id, &error);
                    }
                    _ => {}
                }
                if finished {
                    TickControl::Stop
                } else {
                    TickControl::Continue
                }
            }
            Err(GatewayError::NotFound(msg)) => {
                poller.stop();
                drop(poller);
                self.finish_failed(
                    session_id,
                    &format!("session is no longer known to the server ({})", msg),
                );
                TickControl::Stop
            }
            Err(e) => {
                drop(poller);
                let failures = {
                    let mut state = self.state.lock();
                    state.transport_failures += 1;
                    state.transport_failures
                };
                warn!(session_id = %session_id, failures, error = %e, "Status check failed, retrying on next tick");
                if failures == self.options.transport_warn_after {
                    self.notify(
                        format!(
                            "Still unable to reach the server for session {} after {} attempts; retrying",
                            session_id, failures
                        ),
                        Severity::Warning,
                    );
                }
                TickControl::Continue
            }
        }
    }
}

impl SessionReconciler {
    /// Build a reconciler and the receiving end of its event stream.
    pub fn create(
        gateway: Arc<dyn SessionGateway>,
        store: LocalSessionStore,
        notifier: Arc<dyn Notifier>,
        options: TrackerOptions,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            gateway,
            store,
            notifier,
            events,
            poller: Mutex::new(ProgressPoller::new(options.poll_interval)),
            state: Mutex::new(TrackerState::default()),
            restored: OnceCell::new(),
            options,
        });
        (Self { inner }, receiver)
    }

    /// Stop polling. The reconciler can still be used for one-shot operations.
    pub fn dispose(&self) {
        if let Some(session_id) = self.inner.poller.lock().stop() {
            info!(session_id = %session_id, "Reconciler disposed, polling stopped");
        }
    }

    /// Session pause/resume act on, if any.
    pub fn active_session(&self) -> Option<String> {
        self.inner.state.lock().active.clone()
    }

    /// Session currently being polled, if any.
    pub fn polling_session(&self) -> Option<String> {
        self.inner.poller.lock().active_session().map(str::to_string)
    }

    pub fn snapshot(&self, session_id: &str) -> Option<SessionSnapshot> {
        self.inner.store.get(session_id)
    }

    /// Local history, most recent first.
    pub fn history(&self) -> Vec<SessionSnapshot> {
        self.inner.store.list()
    }

    /// Check the session that was active before the last shutdown and pick
    /// it back up. Runs once per reconciler; later calls return the first result.
    pub async fn restore(&self) -> RestoreOutcome {
        self.inner
            .restored
            .get_or_init(|| self.inner.run_restore())
            .await
            .clone()
    }

    pub async fn submit(&self, context: SessionContext) -> Result<String, SessionError> {
        self.restore().await;

        let has_subject = REQUIRED_ANY_OF.iter().any(|key| {
            context
                .get(*key)
                .and_then(Value::as_str)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false)
        });
        if !has_subject {
            return Err(self.inner.surface(
                "Submission",
                SessionError::Submission("segmento or produto is required".to_string()),
            ));
        }

        let session_id = match self.inner.gateway.submit(&context).await {
            Ok(id) => id,
            Err(e) => {
                return Err(self
                    .inner
                    .surface("Submission", SessionError::Submission(e.to_string())))
            }
        };

        let mut snapshot = SessionSnapshot::new(session_id.as_str(), context);
        snapshot.status = SessionStatus::Running;
        self.inner.persist(&snapshot);
        self.inner.state.lock().shown_percent.remove(&session_id);
        self.inner.mark_active(&session_id);
        self.inner.start_polling(&session_id);

        self.inner.emit(SessionEvent::StatusChanged {
            session_id: session_id.clone(),
            status: SessionStatus::Running,
        });
        self.inner.notify(
            format!("Analysis started ({})", snapshot.display_name()),
            Severity::Info,
        );
        Ok(session_id)
    }

    /// Merge a server report for `session_id`, persist it and emit progress.
    pub fn on_poll_result(&self, session_id: &str, report: &StatusReport) -> SessionSnapshot {
        self.inner.merge_report(session_id, report)
    }

    pub async fn pause_active(&self) -> Result<(), SessionError> {
        self.restore().await;
        let Some(session_id) = self.active_session() else {
            return Err(self.inner.surface("Pause", SessionError::NoActiveSession));
        };
        if let Err(e) = self.inner.gateway.pause(&session_id).await {
            return Err(self.inner.surface("Pause", e.into()));
        }
        self.inner.stop_polling_if(&session_id);
        let snapshot = self.inner.set_status(&session_id, SessionStatus::Paused);
        self.inner
            .notify(format!("{} paused", snapshot.display_name()), Severity::Info);
        Ok(())
    }

    pub async fn resume_active(&self) -> Result<(), SessionError> {
        self.restore().await;
        let Some(session_id) = self.active_session() else {
            return Err(self.inner.surface("Resume", SessionError::NoActiveSession));
        };
        if let Err(e) = self.inner.gateway.resume(&session_id).await {
            return Err(self.inner.surface("Resume", e.into()));
        }
        let snapshot = self.inner.set_status(&session_id, SessionStatus::Running);
        self.inner.mark_active(&session_id);
        self.inner.start_polling(&session_id);
        self.inner
            .notify(format!("{} resumed", snapshot.display_name()), Severity::Info);
        Ok(())
    }

    /// Ask the server to keep the session for later. Stops tracking it.
    pub async fn save(&self, session_id: &str) -> Result<(), SessionError> {
        self.restore().await;
        if let Err(e) = self.inner.gateway.save(session_id).await {
            return Err(self.inner.surface("Save", e.into()));
        }
        self.inner.stop_polling_if(session_id);
        self.inner.release_active(session_id);
        let snapshot = self.inner.set_status(session_id, SessionStatus::Saved);
        self.inner
            .notify(format!("{} saved", snapshot.display_name()), Severity::Success);
        Ok(())
    }

    /// Pick a session back up. Completed sessions present their results,
    /// from the local cache when possible; anything else is continued on the
    /// server and polled.
    pub async fn continue_session(&self, session_id: &str) -> Result<ContinueOutcome, SessionError> {
        self.restore().await;
        if self.polling_session().as_deref() == Some(session_id) {
            return Err(self.inner.surface(
                "Continue",
                SessionError::Conflict(format!("session {} is already being tracked", session_id)),
            ));
        }

        let local = self.inner.store.get(session_id);
        if let Some(snapshot) = local.as_ref().filter(|s| s.status == SessionStatus::Completed) {
            if snapshot.has_cached_results() {
                let results = snapshot.results.clone().unwrap_or(Value::Null);
                debug!(session_id = %session_id, "Presenting cached results");
                self.inner.emit(SessionEvent::Results {
                    session_id: session_id.to_string(),
                    results: results.clone(),
                    from_cache: true,
                });
                return Ok(ContinueOutcome::Results {
                    results,
                    from_cache: true,
                });
            }

            let results = match self.inner.gateway.fetch_results(session_id).await {
                Ok(results) => results,
                Err(e) => return Err(self.inner.surface("Loading results", e.into())),
            };
            let mut cached = snapshot.clone();
            cached.results = Some(results.clone());
            cached.touch();
            self.inner.persist(&cached);
            self.inner.emit(SessionEvent::Results {
                session_id: session_id.to_string(),
                results: results.clone(),
                from_cache: false,
            });
            return Ok(ContinueOutcome::Results {
                results,
                from_cache: false,
            });
        }

        let mut snapshot = match local {
            Some(snapshot) => snapshot,
            None => match self.inner.gateway.load(session_id).await {
                Ok(snapshot) => snapshot,
                Err(e) => return Err(self.inner.surface("Continue", e.into())),
            },
        };
        if let Err(e) = self.inner.gateway.continue_session(session_id).await {
            return Err(self.inner.surface("Continue", e.into()));
        }

        if !snapshot.context.is_empty() {
            self.inner.emit(SessionEvent::ContextRestored {
                session_id: session_id.to_string(),
                context: snapshot.context.clone(),
            });
        }
        snapshot.status = SessionStatus::Running;
        snapshot.error = None;
        snapshot.touch();
        self.inner.persist(&snapshot);
        self.inner.mark_active(session_id);
        self.inner.start_polling(session_id);
        self.inner.emit(SessionEvent::StatusChanged {
            session_id: session_id.to_string(),
            status: SessionStatus::Running,
        });
        self.inner.notify(
            format!("Continuing {}", snapshot.display_name()),
            Severity::Info,
        );
        Ok(ContinueOutcome::Tracking {
            session_id: session_id.to_string(),
        })
    }

    /// Make `session_id` the target of step selection and repopulate its input.
    pub fn select_session(&self, session_id: &str) -> Result<SessionSnapshot, SessionError> {
        let Some(snapshot) = self.inner.store.get(session_id) else {
            return Err(self
                .inner
                .surface("Selecting session", SessionError::NotFound(session_id.to_string())));
        };
        {
            let mut state = self.inner.state.lock();
            state.selected = Some(session_id.to_string());
            state.selected_step = None;
        }
        self.inner.emit(SessionEvent::ContextRestored {
            session_id: session_id.to_string(),
            context: snapshot.context.clone(),
        });
        Ok(snapshot)
    }

    pub fn selected_session(&self) -> Option<String> {
        self.inner.state.lock().selected.clone()
    }

    /// Choose the step to resume the selected session from. Rejected
    /// selections leave the current choice untouched.
    pub fn select_step(&self, step: u8) -> Result<u8, SessionError> {
        let selected = self.selected_session();
        let completed = selected
            .as_deref()
            .and_then(|id| self.inner.store.get(id))
            .map(|s| s.completed_steps);
        match steps::check_selection(step, completed.as_ref()) {
            Ok(step) => {
                self.inner.state.lock().selected_step = Some(step);
                Ok(step)
            }
            Err(rejection) => {
                self.inner.notify(rejection.to_string(), Severity::Warning);
                Err(SessionError::Conflict(rejection.to_string()))
            }
        }
    }

    /// Restart the selected session's workflow from `step` and poll it.
    pub async fn resume_from_step(&self, step: u8) -> Result<StepContinuation, SessionError> {
        self.restore().await;
        let step = self.select_step(step)?;
        let session_id = self.selected_session().ok_or(SessionError::NoActiveSession)?;

        let continuation = match self.inner.gateway.continue_from_step(&session_id, step).await {
            Ok(continuation) => continuation,
            Err(e) => return Err(self.inner.surface(&format!("Continuing from step {}", step), e.into())),
        };

        let mut snapshot = self
            .inner
            .store
            .get(&session_id)
            .unwrap_or_else(|| SessionSnapshot::new(session_id.as_str(), SessionContext::new()));
        for (key, value) in &continuation.context {
            if key != "session_id" {
                snapshot
                    .context
                    .entry(key.clone())
                    .or_insert_with(|| value.clone());
            }
        }
        snapshot.status = SessionStatus::Running;
        snapshot.error = None;
        snapshot.touch();
        self.inner.persist(&snapshot);
        self.inner.state.lock().shown_percent.remove(&session_id);
        self.inner.mark_active(&session_id);
        self.inner.start_polling(&session_id);

        self.inner.emit(SessionEvent::ContextRestored {
            session_id: session_id.clone(),
            context: snapshot.context.clone(),
        });
        self.inner.emit(SessionEvent::StatusChanged {
            session_id: session_id.clone(),
            status: SessionStatus::Running,
        });
        self.inner.notify(
            format!("{} continuing from step {}", snapshot.display_name(), step),
            Severity::Info,
        );
        Ok(continuation)
    }

    /// Delete remotely, then locally. A failed remote delete keeps the local entry.
    pub async fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        self.restore().await;
        if let Err(e) = self.inner.gateway.delete(session_id).await {
            return Err(self.inner.surface("Delete", e.into()));
        }
        self.inner.stop_polling_if(session_id);
        self.inner.release_active(session_id);
        {
            let mut state = self.inner.state.lock();
            if state.selected.as_deref() == Some(session_id) {
                state.selected = None;
                state.selected_step = None;
            }
            state.shown_percent.remove(session_id);
        }
        if let Err(e) = self.inner.store.delete(session_id) {
            return Err(self.inner.surface("Delete", e.into()));
        }
        self.inner
            .notify(format!("Session {} deleted", session_id), Severity::Success);
        Ok(())
    }

    /// Bulk cleanup on the server, then wipe local history.
    pub async fn clear_all(&self) -> Result<usize, SessionError> {
        self.restore().await;
        if let Err(e) = self.inner.gateway.cleanup().await {
            return Err(self.inner.surface("Clearing sessions", e.into()));
        }
        self.inner.poller.lock().stop();
        *self.inner.state.lock() = TrackerState::default();
        let removed = match self.inner.store.clear() {
            Ok(removed) => removed,
            Err(e) => return Err(self.inner.surface("Clearing sessions", e.into())),
        };
        self.inner
            .notify(format!("{} sessions cleared", removed), Severity::Success);
        Ok(removed)
    }

    /// Fold the server's session listing into local history and return it.
    /// The session being polled is left to the poller. If the listing cannot
    /// be fetched, local history is returned as is.
    pub async fn sync_history(&self) -> Vec<SessionSnapshot> {
        self.restore().await;
        let remote = match self.inner.gateway.list().await {
            Ok(remote) => remote,
            Err(e) => {
                warn!(error = %e, "Session listing unavailable, showing local history");
                self.inner.notify(
                    format!("Could not fetch the server's session list: {}", e),
                    Severity::Warning,
                );
                return self.inner.store.list();
            }
        };
        let polling = self.polling_session();

        for summary in remote {
            if polling.as_deref() == Some(summary.session_id.as_str()) {
                continue;
            }
            if crate::store::validate_session_id(&summary.session_id).is_err() {
                warn!(session_id = %summary.session_id, "Skipping remote session with unusable id");
                continue;
            }
            let mut snapshot = match self.inner.store.get(&summary.session_id) {
                Some(snapshot) => snapshot,
                None => {
                    let mut fresh =
                        SessionSnapshot::new(summary.session_id.as_str(), SessionContext::new());
                    if let Some(ts) = summary.last_updated {
                        fresh.last_saved = ts;
                    }
                    fresh
                }
            };
            // Finished sessions stay finished, and a listing never marks a
            // session running when nothing here is polling it.
            if !snapshot.status.is_terminal() {
                snapshot.status = match summary.status {
                    SessionStatus::Initiated | SessionStatus::Running => SessionStatus::Saved,
                    status => status,
                };
            }
            snapshot
                .completed_steps
                .extend(summary.completed_steps.iter().copied());
            if snapshot.context.is_empty() {
                snapshot.context = summary.context;
            }
            if !summary.current_step_label.is_empty() {
                snapshot.current_step_label = summary.current_step_label;
            }
            self.inner.persist(&snapshot);
        }
        self.inner.store.list()
    }
}
