//! Correlation table for outbound requests.
//!
//! Each outbound `do`/`qry` takes the next id and parks a oneshot sender
//! here. An inbound `doret` removes the slot and fires it with the raw
//! reply; closing the table fires every remaining slot with
//! [`RequestError::Disconnected`]. A slot is removed before it is fired, so
//! an id resolves at most once.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::protocol::DecodeError;

/// Failure of an outbound request.
#[derive(Debug, Error)]
pub enum RequestError {
    /// The connection closed before a reply arrived.
    #[error("Connection closed before reply was received")]
    Disconnected,
    /// The reply could not be decoded, or was a remote error marker.
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Receiving half of a pending request.
pub type ReplyReceiver = oneshot::Receiver<Result<serde_json::Value, RequestError>>;

/// An outbound request awaiting its `doret`.
#[derive(Debug)]
pub struct PendingRequest {
    /// Correlation id.
    pub id: u64,
    /// When the request was registered.
    pub created_at: Instant,
    resolve_slot: oneshot::Sender<Result<serde_json::Value, RequestError>>,
}

#[derive(Debug)]
struct Inner {
    next_id: u64,
    slots: HashMap<u64, PendingRequest>,
    closed: bool,
}

/// Connection-scoped id counter and pending-request map.
#[derive(Debug)]
pub struct PendingRequests {
    inner: Mutex<Inner>,
}

impl Default for PendingRequests {
    fn default() -> Self {
        Self::new()
    }
}

impl PendingRequests {
    /// Empty table; the first id handed out is 1.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_id: 1,
                slots: HashMap::new(),
                closed: false,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // Critical sections never panic; recover rather than propagate.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocate the next id and park a slot for it.
    ///
    /// # Errors
    ///
    /// [`RequestError::Disconnected`] once the table is closed.
    pub fn register(&self) -> Result<(u64, ReplyReceiver), RequestError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(RequestError::Disconnected);
        }
        let id = inner.next_id;
        inner.next_id += 1;
        let (tx, rx) = oneshot::channel();
        inner.slots.insert(
            id,
            PendingRequest {
                id,
                created_at: Instant::now(),
                resolve_slot: tx,
            },
        );
        Ok((id, rx))
    }

    /// Deliver a raw reply for `id`.
    ///
    /// Returns `false` if no request with that id is pending; late replies
    /// are expected after abandonment and are not an error.
    pub fn complete(&self, id: u64, reply: serde_json::Value) -> bool {
        let Some(request) = self.lock().slots.remove(&id) else {
            return false;
        };
        // The waiter may have been dropped; the slot is gone either way.
        let _ = request.resolve_slot.send(Ok(reply));
        true
    }

    /// Drop the slot for `id` without resolving it.
    pub fn cancel(&self, id: u64) -> Option<PendingRequest> {
        self.lock().slots.remove(&id)
    }

    /// Close the table and fail every pending request with
    /// [`RequestError::Disconnected`]. Returns how many were abandoned.
    pub fn abandon_all(&self) -> usize {
        let drained: Vec<PendingRequest> = {
            let mut inner = self.lock();
            inner.closed = true;
            inner.slots.drain().map(|(_, request)| request).collect()
        };
        let count = drained.len();
        for request in drained {
            let _ = request.resolve_slot.send(Err(RequestError::Disconnected));
        }
        count
    }

    /// Whether `id` is pending.
    pub fn contains(&self, id: u64) -> bool {
        self.lock().slots.contains_key(&id)
    }

    /// Number of pending requests.
    pub fn len(&self) -> usize {
        self.lock().slots.len()
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether [`abandon_all`](Self::abandon_all) has run.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Age of the oldest pending request.
    pub fn oldest_age(&self) -> Option<std::time::Duration> {
        self.lock()
            .slots
            .values()
            .map(|request| request.created_at.elapsed())
            .max()
    }
}
