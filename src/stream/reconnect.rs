//! Reconnect timer with at most one pending fire per session.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::backoff::{BackoffPolicy, BackoffState};

/// Handle to a scheduled callback. Cancelling or dropping it suppresses the
/// fire if it has not happened yet.
#[derive(Debug)]
pub struct CancelToken {
    handle: JoinHandle<()>,
}

impl CancelToken {
    pub fn cancel(self) {
        drop(self);
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl Drop for CancelToken {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Runs `on_fire` once after `delay` on the current tokio runtime.
pub fn schedule_after<F>(delay: Duration, on_fire: F) -> CancelToken
where
    F: FnOnce() + Send + 'static,
{
    let handle = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        on_fire();
    });
    CancelToken { handle }
}

/// Outcome of [`ReconnectController::schedule`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ScheduledReconnect {
    /// Identifies this fire; stale tickets are rejected by
    /// [`ReconnectController::take_due`].
    pub ticket: u64,
    pub delay: Duration,
}

#[derive(Debug)]
struct PendingReconnect {
    ticket: u64,
    _token: CancelToken,
}

/// Owns the backoff state and the single pending reconnect timer of a session.
#[derive(Debug)]
pub struct ReconnectController {
    backoff: BackoffState,
    pending: Option<PendingReconnect>,
    last_ticket: u64,
}

impl ReconnectController {
    pub fn new(policy: BackoffPolicy) -> Self {
        Self {
            backoff: policy.start(),
            pending: None,
            last_ticket: 0,
        }
    }

    /// Replaces any pending timer with a new one armed for the next backoff
    /// delay. `on_fire` receives the ticket of the new timer.
    pub fn schedule<F>(&mut self, on_fire: F) -> ScheduledReconnect
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.cancel();

        let delay = self.backoff.advance();
        self.last_ticket += 1;
        let ticket = self.last_ticket;
        let token = schedule_after(delay, move || on_fire(ticket));
        self.pending = Some(PendingReconnect {
            ticket,
            _token: token,
        });

        debug!(
            event = "reconnect_scheduled",
            ticket,
            delay_ms = delay.as_millis() as u64
        );
        ScheduledReconnect { ticket, delay }
    }

    /// Claims a fired timer. Returns `false` for tickets that were cancelled
    /// or replaced before their fire was processed.
    pub fn take_due(&mut self, ticket: u64) -> bool {
        match &self.pending {
            Some(pending) if pending.ticket == ticket => {
                self.pending = None;
                true
            }
            _ => false,
        }
    }

    /// Cancels the pending timer, if any. Returns whether one was pending.
    pub fn cancel(&mut self) -> bool {
        self.pending.take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Resets backoff after data arrived on a connection.
    pub fn record_success(&mut self) {
        self.backoff.reset();
    }

    /// Cancels the pending timer and resets backoff.
    pub fn reset(&mut self) {
        self.cancel();
        self.backoff.reset();
    }

    pub fn current_delay(&self) -> Duration {
        self.backoff.current()
    }
}
