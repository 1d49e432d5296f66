//! Request/response correlation.
//!
//! A context that forwards a request and waits for the answer on a shared
//! channel registers the request here. Replies are matched by request id, so
//! a stray or duplicate message can never complete the wrong request, and
//! each request completes at most once.

use identity_relay_core::RequestId;
use std::collections::HashMap;
use tokio::sync::oneshot;
use tracing::debug;

/// What happened to a value offered to the correlator.
#[derive(Debug, PartialEq, Eq)]
pub enum Resolution<T> {
    /// Delivered to the waiting caller.
    Delivered(RequestId),
    /// Matched a request whose caller had already stopped waiting.
    Abandoned(RequestId),
    /// No pending request matched; the value is handed back.
    Unmatched(T),
}

/// Map of pending requests to their one-shot completions.
///
/// Owned by a single task; not shared.
#[derive(Debug)]
pub struct Correlator<T> {
    pending: HashMap<RequestId, oneshot::Sender<T>>,
}

impl<T> Default for Correlator<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Correlator<T> {
    /// Creates an empty correlator.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pending: HashMap::new(),
        }
    }

    /// Registers a request with the sender half of its completion channel.
    ///
    /// Re-registering an id replaces the previous entry, dropping its sender.
    pub fn register_sender(&mut self, request_id: RequestId, reply: oneshot::Sender<T>) {
        if self.pending.insert(request_id, reply).is_some() {
            debug!(%request_id, "replaced pending request");
        }
    }

    /// Completes the request with the given id.
    ///
    /// With `None`, completes the only pending request if exactly one
    /// exists; replies from older peers carry no id.
    pub fn complete(&mut self, request_id: Option<RequestId>, value: T) -> Resolution<T> {
        let request_id = match request_id {
            Some(id) => id,
            None => match self.sole_pending() {
                Some(id) => id,
                None => return Resolution::Unmatched(value),
            },
        };
        let Some(reply) = self.pending.remove(&request_id) else {
            return Resolution::Unmatched(value);
        };
        match reply.send(value) {
            Ok(()) => Resolution::Delivered(request_id),
            Err(_) => Resolution::Abandoned(request_id),
        }
    }

    /// Removes a pending request without completing it.
    ///
    /// Returns its sender so the caller can complete it differently.
    pub fn take(&mut self, request_id: RequestId) -> Option<oneshot::Sender<T>> {
        self.pending.remove(&request_id)
    }

    /// Removes every pending request, completing each with `make(id)`.
    pub fn drain_with(&mut self, mut make: impl FnMut(RequestId) -> T) {
        for (request_id, reply) in self.pending.drain() {
            let _ = reply.send(make(request_id));
        }
    }

    /// Returns true if the id is pending.
    #[must_use]
    pub fn contains(&self, request_id: RequestId) -> bool {
        self.pending.contains_key(&request_id)
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns true if nothing is pending.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn sole_pending(&self) -> Option<RequestId> {
        if self.pending.len() == 1 {
            self.pending.keys().next().copied()
        } else {
            None
        }
    }
}
