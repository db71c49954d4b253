// Analysis Sessions Library
// Client-side session tracking for long-running analysis jobs, shared by the CLI

pub mod config;
pub mod events;
pub mod gateway;
pub mod notice;
pub mod poller;
pub mod reconciler;
pub mod session;
pub mod steps;
pub mod store;

#[cfg(test)]
mod testing;

pub use config::{app_data_dir, sessions_dir, ClientConfig, ConfigError};
pub use events::SessionEvent;
pub use gateway::{GatewayError, HttpGateway, SessionGateway, SessionSummary, StepContinuation};
pub use notice::{LogNotifier, Notifier, Severity};
pub use poller::{PollSink, PollTicket, ProgressPoller, TickControl};
pub use reconciler::{ContinueOutcome, RestoreOutcome, SessionError, SessionReconciler, TrackerOptions};
pub use session::{
    context_from_pairs, SessionContext, SessionSnapshot, SessionStatus, StatusReport, StepSet,
};
pub use steps::{can_resume, check_selection, resume_map, StepRejection, TOTAL_STEPS};
pub use store::{LocalSessionStore, StoreError};
