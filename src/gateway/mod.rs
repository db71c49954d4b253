//! Remote Session Gateway
//!
//! The analysis backend is an opaque job processor reached over HTTP. The
//! tracker only depends on the [`SessionGateway`] contract; payloads are
//! decoded into typed replies at this boundary so nothing downstream
//! inspects loose JSON.

pub mod http;
mod wire;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::session::{SessionContext, SessionSnapshot, SessionStatus, StatusReport, StepSet};

pub use http::HttpGateway;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Session not found: {0}")]
    NotFound(String),
    /// The server answered but refused the operation (`success: false`).
    #[error("Rejected by server: {0}")]
    Rejected(String),
    #[error("Deserialization error: {0}")]
    Decode(String),
}

impl Serialize for GatewayError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

/// One entry of the server's session listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub status: SessionStatus,
    pub current_step_label: String,
    pub completed_steps: StepSet,
    pub context: SessionContext,
    pub last_updated: Option<DateTime<Utc>>,
}

/// What the server hands back when a session is continued from a step.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StepContinuation {
    pub step: u8,
    pub context: SessionContext,
    pub previous_data: Value,
}

/// Contract of the remote side. Every call is an independent round trip;
/// there is no ordering guarantee across different session ids.
pub trait SessionGateway: Send + Sync {
    /// Start a new analysis; returns the server-assigned session id.
    fn submit<'a>(&'a self, context: &'a SessionContext) -> BoxFuture<'a, Result<String, GatewayError>>;

    /// Progress endpoint hit on every poll tick.
    fn poll_progress<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<StatusReport, GatewayError>>;

    /// Session status endpoint, used when restoring after a restart.
    fn get_status<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<StatusReport, GatewayError>>;

    fn pause<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn resume<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn save<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn continue_session<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn continue_from_step<'a>(
        &'a self,
        session_id: &'a str,
        step: u8,
    ) -> BoxFuture<'a, Result<StepContinuation, GatewayError>>;

    /// Server-side session listing. Callers decide how to degrade on failure.
    fn list<'a>(&'a self) -> BoxFuture<'a, Result<Vec<SessionSummary>, GatewayError>>;

    fn delete<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<(), GatewayError>>;

    fn load<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<SessionSnapshot, GatewayError>>;

    /// Only meaningful once the session is completed.
    fn fetch_results<'a>(&'a self, session_id: &'a str) -> BoxFuture<'a, Result<Value, GatewayError>>;

    /// Bulk removal of every session the server tracks for this client.
    fn cleanup<'a>(&'a self) -> BoxFuture<'a, Result<(), GatewayError>>;
}
