//! Command/response correlation for the control connection.
//!
//! Every outgoing command gets a local id, strictly increasing from 1. tmux
//! answers a client's commands in the order it reads them, so each `%begin`
//! binds the oldest in-flight id to the server's command number; the matching
//! `%end`/`%error` resolves it. Waiters are woken through a `Notify` and
//! additionally re-check every `POLL_INTERVAL`.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::TmuxError;

/// Upper bound on how long a waiter sleeps between checks.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Accumulated output of one completed command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResponse {
    /// Local command id, or the wire id for responses nobody was waiting for.
    pub id: u64,
    /// Body lines, each newline-terminated.
    pub output: String,
    /// `false` when the block ended with `%error`.
    pub success: bool,
}

#[derive(Debug, Default)]
struct Tables {
    in_flight: VecDeque<u64>,
    /// wire id -> local id
    bound: HashMap<u64, u64>,
    resolved: HashMap<u64, CommandResponse>,
}

#[derive(Debug)]
pub struct CommandCorrelator {
    next_id: AtomicU64,
    tables: Mutex<Tables>,
    notify: Notify,
}

impl CommandCorrelator {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tables: Mutex::new(Tables::default()),
            notify: Notify::new(),
        }
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Allocate an id for `command` and queue it as in flight. Returns the
    /// newline-terminated wire text; nothing is sent.
    ///
    /// Callers must write commands in the order they were prepared. Text
    /// with an embedded line break is rejected before an id is taken.
    pub fn prepare(&self, command: &str) -> Result<(String, u64), TmuxError> {
        let line = command.trim_end_matches(['\r', '\n']);
        if line.contains(['\r', '\n']) {
            return Err(TmuxError::InvalidCommand(command.to_string()));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.tables().in_flight.push_back(id);
        Ok((format!("{line}\n"), id))
    }

    /// Forget a prepared id whose write failed.
    pub fn cancel(&self, id: u64) {
        self.tables().in_flight.retain(|&queued| queued != id);
    }

    /// Bind the oldest in-flight id to a `%begin` wire id.
    pub fn bind(&self, wire_id: u64) -> Option<u64> {
        let mut tables = self.tables();
        let local = tables.in_flight.pop_front()?;
        tables.bound.insert(wire_id, local);
        Some(local)
    }

    /// Resolve a closed response block. Returns `false` if no local id was
    /// bound to `wire_id`.
    pub fn resolve(&self, wire_id: u64, output: String, success: bool) -> bool {
        {
            let mut tables = self.tables();
            let Some(local) = tables.bound.remove(&wire_id) else {
                return false;
            };
            tables.resolved.insert(
                local,
                CommandResponse {
                    id: local,
                    output,
                    success,
                },
            );
        }
        self.notify.notify_waiters();
        true
    }

    /// Claim a resolved response.
    pub fn take(&self, id: u64) -> Option<CommandResponse> {
        self.tables().resolved.remove(&id)
    }

    /// Wait until `id` resolves or `timeout` elapses. `None` means no
    /// response yet; the command may still complete later, in which case the
    /// late response stays claimable until `reset()`.
    pub async fn await_response(&self, id: u64, timeout: Duration) -> Option<CommandResponse> {
        let deadline = Instant::now() + timeout;
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(response) = self.take(id) {
                return Some(response);
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::debug!(id, ?timeout, "command response timed out");
                return None;
            }
            let wake = deadline.min(now + POLL_INTERVAL);
            let _ = tokio::time::timeout_at(wake, notified).await;
        }
    }

    /// Number of prepared commands that have not seen their `%begin` yet.
    pub fn in_flight(&self) -> usize {
        self.tables().in_flight.len()
    }

    /// Drop all in-flight, bound and resolved state (used on re-attach).
    pub fn reset(&self) {
        let mut tables = self.tables();
        tables.in_flight.clear();
        tables.bound.clear();
        tables.resolved.clear();
    }
}

impl Default for CommandCorrelator {
    fn default() -> Self {
        Self::new()
    }
}
