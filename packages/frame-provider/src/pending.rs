//! Pending-call table.
//!
//! Every outstanding call owns exactly one entry, keyed by its [`CallId`].
//! Three sources race to finish a call: the response classifier, the timeout
//! timer and cancellation (a dropped caller future or provider shutdown).
//! Each of them starts by removing the entry from the map. `DashMap::remove`
//! hands the entry to exactly one of them, and only that one completes the
//! call. The losers find nothing and do nothing.
//!
//! ```text
//! register ──► [entry] ──┬─ resolve / reject (response)  ─► remove, abort timer, send outcome
//!                        ├─ expire (timer)               ─► remove, send Timeout
//!                        └─ cancel / clear               ─► remove, abort timer
//! ```

use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::ProviderError;
use crate::id::CallId;

/// What a settled call delivers to its caller.
pub(crate) type Outcome = Result<Value, ProviderError>;

/// A single outstanding call.
struct PendingCall {
    method: String,
    completer: oneshot::Sender<Outcome>,
    timer: Option<AbortHandle>,
}

impl PendingCall {
    fn abort_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

/// Table of calls awaiting a response.
#[derive(Default)]
pub struct PendingCalls {
    entries: DashMap<CallId, PendingCall>,
}

impl PendingCalls {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a new call under `id`.
    ///
    /// Returns `None` if a call with the same identifier is still live; the
    /// table never holds two entries under one identifier.
    pub(crate) fn register(
        &self,
        id: CallId,
        method: impl Into<String>,
    ) -> Option<oneshot::Receiver<Outcome>> {
        match self.entries.entry(id) {
            Entry::Occupied(occupied) => {
                warn!(id = %occupied.key(), "call identifier already pending");
                None
            }
            Entry::Vacant(vacant) => {
                let (completer, receiver) = oneshot::channel();
                vacant.insert(PendingCall {
                    method: method.into(),
                    completer,
                    timer: None,
                });
                Some(receiver)
            }
        }
    }

    /// Attach the timeout timer to a registered call.
    ///
    /// If the call already finished, the timer is aborted straight away and
    /// `false` is returned.
    pub(crate) fn arm_timer(&self, id: &CallId, timer: AbortHandle) -> bool {
        match self.entries.get_mut(id) {
            Some(mut entry) => {
                entry.timer = Some(timer);
                true
            }
            None => {
                timer.abort();
                false
            }
        }
    }

    /// Settle a call with its result. Returns `false` if no such call is pending.
    pub fn resolve(&self, id: &CallId, result: Value) -> bool {
        self.settle(id, Ok(result))
    }

    /// Settle a call with an error. Returns `false` if no such call is pending.
    pub fn reject(&self, id: &CallId, error: ProviderError) -> bool {
        self.settle(id, Err(error))
    }

    fn settle(&self, id: &CallId, outcome: Outcome) -> bool {
        let Some((id, mut call)) = self.entries.remove(id) else {
            return false;
        };
        call.abort_timer();
        debug!(id = %id, method = %call.method, ok = outcome.is_ok(), "call settled");
        // The caller may have stopped listening; the entry is gone either way.
        let _ = call.completer.send(outcome);
        true
    }

    /// Evict a call whose timer fired.
    ///
    /// Called from the timer task itself, so the timer handle is dropped
    /// rather than aborted. A no-op when the response won the race.
    pub(crate) fn expire(&self, id: &CallId, timeout: Duration) -> bool {
        let Some((id, call)) = self.entries.remove(id) else {
            return false;
        };
        warn!(id = %id, method = %call.method, ?timeout, "call timed out");
        let _ = call.completer.send(Err(ProviderError::Timeout { id, timeout }));
        true
    }

    /// Drop a call without delivering anything.
    ///
    /// Used when the caller has gone away or the send never happened.
    pub(crate) fn cancel(&self, id: &CallId) -> bool {
        let Some((id, mut call)) = self.entries.remove(id) else {
            return false;
        };
        call.abort_timer();
        debug!(id = %id, method = %call.method, "call cancelled");
        true
    }

    /// Reject every pending call with `Cancelled`. Returns how many were live.
    pub fn clear(&self) -> usize {
        let ids: Vec<CallId> = self.entries.iter().map(|e| e.key().clone()).collect();
        ids.into_iter()
            .filter(|id| self.reject(id, ProviderError::Cancelled { id: id.clone() }))
            .count()
    }

    /// Whether a call with this identifier is still outstanding.
    pub fn contains(&self, id: &CallId) -> bool {
        self.entries.contains_key(id)
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no calls are outstanding.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for PendingCalls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingCalls")
            .field("pending", &self.entries.len())
            .finish()
    }
}
