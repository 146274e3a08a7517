//! # Connection Lifecycle
//!
//! One [`Session`] per live connection. The [`SessionManager`] hands out
//! sessions on connect and guarantees that a session's room subscriptions are
//! released exactly once on disconnect, whatever the reason.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::registry::RoomRegistry;
use crate::model::ServerEvent;

/// Process-unique session identifier.
pub type SessionId = usize;

/// Default capacity of a session's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Result of handing one event to one session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// Outbound queue full; the event was dropped for this session only.
    Dropped,
    /// The session's receiver is gone.
    Closed,
}

/// Server-side handle of one live connection.
///
/// Cloning is cheap; all clones feed the same bounded outbound queue.
#[derive(Debug, Clone)]
pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<Arc<ServerEvent>>,
}

impl Session {
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Sends an event to this session alone.
    pub fn send(&self, event: ServerEvent) -> Delivery {
        self.deliver(Arc::new(event))
    }

    /// Queues a shared event without waiting on a slow reader.
    pub fn deliver(&self, event: Arc<ServerEvent>) -> Delivery {
        match self.outbound.try_send(event) {
            Ok(()) => Delivery::Delivered,
            Err(TrySendError::Full(_)) => {
                log::warn!("Session {} outbound queue full, dropping event", self.id);
                Delivery::Dropped
            }
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Creates and reclaims sessions.
pub struct SessionManager {
    registry: Arc<RoomRegistry>,
    live: Mutex<HashMap<SessionId, Session>>,
    next_id: AtomicUsize,
    outbound_capacity: usize,
}

impl SessionManager {
    pub fn new(registry: Arc<RoomRegistry>, outbound_capacity: usize) -> Self {
        Self {
            registry,
            live: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            outbound_capacity: outbound_capacity.max(1),
        }
    }

    /// Allocates a session with no subscriptions and returns the receiving
    /// end of its outbound queue.
    pub fn connect(&self) -> (Session, mpsc::Receiver<Arc<ServerEvent>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbound, rx) = mpsc::channel(self.outbound_capacity);
        let session = Session { id, outbound };

        self.live.lock().unwrap_or_else(PoisonError::into_inner).insert(id, session.clone());
        log::info!("Session {} connected", id);
        (session, rx)
    }

    /// Releases every subscription of `id` and forgets the session.
    ///
    /// Returns `false` when the session was already gone; repeated calls are no-ops.
    pub fn disconnect(&self, id: SessionId, reason: &str) -> bool {
        let removed = self.live.lock().unwrap_or_else(PoisonError::into_inner).remove(&id);
        if removed.is_none() {
            return false;
        }
        let rooms = self.registry.leave_all(id);
        log::info!("Session {} disconnected ({}), left {} room(s)", id, reason, rooms.len());
        true
    }

    /// Number of live sessions.
    pub fn live_count(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }
}
