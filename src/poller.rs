//! Progress Poller
//!
//! Drives status checks for at most one session at a time. Each `start`
//! bumps a generation counter; ticks carry the ticket they were issued under,
//! so a reply that lands after `stop` (or after a newer `start`) is
//! recognisable as stale and dropped by the sink.
//!
//! Ticks run on a fixed delay: the next check is scheduled only after the
//! previous one has settled, so a slow reply never overlaps the next tick.

use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::gateway::{GatewayError, SessionGateway};
use crate::session::StatusReport;

/// Identity of one `start` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollTicket {
    pub session_id: String,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickControl {
    Continue,
    Stop,
}

/// Receiver of tick outcomes. Returning [`TickControl::Stop`] ends the loop.
pub trait PollSink: Send + Sync {
    fn on_tick(&self, ticket: &PollTicket, outcome: Result<StatusReport, GatewayError>) -> TickControl;
}

struct ActivePoll {
    ticket: PollTicket,
    handle: JoinHandle<()>,
}

pub struct ProgressPoller {
    interval: Duration,
    generation: u64,
    active: Option<ActivePoll>,
}

impl ProgressPoller {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            generation: 0,
            active: None,
        }
    }

    /// Begin polling `session_id`, stopping whatever was polled before.
    /// The first check is issued immediately. Must be called inside a tokio runtime.
    pub fn start(
        &mut self,
        session_id: &str,
        gateway: Arc<dyn SessionGateway>,
        sink: Weak<dyn PollSink>,
    ) -> PollTicket {
        self.stop();
        self.generation += 1;
        let ticket = PollTicket {
            session_id: session_id.to_string(),
            generation: self.generation,
        };
        let handle = tokio::spawn(run_ticks(ticket.clone(), gateway, sink, self.interval));
        info!(session_id = %session_id, generation = ticket.generation, "Started polling");
        self.active = Some(ActivePoll {
            ticket: ticket.clone(),
            handle,
        });
        ticket
    }

    /// Cancel the scheduled ticks. Idempotent; returns the session that was being polled.
    pub fn stop(&mut self) -> Option<String> {
        let active = self.active.take()?;
        active.handle.abort();
        debug!(session_id = %active.ticket.session_id, generation = active.ticket.generation, "Stopped polling");
        Some(active.ticket.session_id)
    }

    pub fn active_session(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.ticket.session_id.as_str())
    }

    /// Whether `ticket` belongs to the poll that is currently live.
    pub fn is_current(&self, ticket: &PollTicket) -> bool {
        self.active
            .as_ref()
            .map(|a| a.ticket == *ticket)
            .unwrap_or(false)
    }
}

impl Drop for ProgressPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn run_ticks(
    ticket: PollTicket,
    gateway: Arc<dyn SessionGateway>,
    sink: Weak<dyn PollSink>,
    interval: Duration,
) {
    loop {
        let outcome = gateway.poll_progress(&ticket.session_id).await;
        let Some(sink) = sink.upgrade() else {
            debug!(session_id = %ticket.session_id, "Poll sink dropped, ending loop");
            break;
        };
        if sink.on_tick(&ticket, outcome) == TickControl::Stop {
            break;
        }
        drop(sink);
        tokio::time::sleep(interval).await;
    }
}
