use std::sync::Arc;

use lib_relay::relay::{EventRouter, RoomRegistry, SessionManager};
use lib_relay::store::MessageStore;
use tokio::sync::broadcast;

/// Everything a connection handler needs, shared across all connections.
pub struct ChatState<S> {
    pub router: EventRouter<S>,
    pub sessions: Arc<SessionManager>,
    // Each socket task subscribes to learn about server shutdown.
    pub shutdown: broadcast::Sender<()>,
}

impl<S> Clone for ChatState<S> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            sessions: Arc::clone(&self.sessions),
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: MessageStore> ChatState<S> {
    /// Wires a store into a fresh registry and session manager.
    pub fn new(store: Arc<S>, outbound_queue: usize, shutdown: broadcast::Sender<()>) -> Self {
        let registry = Arc::new(RoomRegistry::new());
        Self {
            router: EventRouter::new(store, Arc::clone(&registry)),
            sessions: Arc::new(SessionManager::new(registry, outbound_queue)),
            shutdown,
        }
    }
}
