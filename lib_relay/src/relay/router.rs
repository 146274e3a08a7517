//! # Event Router
//!
//! Turns inbound client events into registry and store operations and emits
//! the resulting outbound events. The router keeps no state of its own.
//!
//! Failures are reported to the originating session as an `error` event and
//! logged; they never end the session or affect other connections. A message
//! is only broadcast after it has been stored.

use std::sync::Arc;

use thiserror::Error;

use super::registry::{FanOut, RoomRegistry};
use super::session::Session;
use crate::model::{ClientEvent, ErrorNotice, HistoryQuery, Message, ServerEvent};
use crate::store::{MessageStore, StoreError};

/// Acknowledgement text sent after a successful `register`.
pub const REGISTERED_NOTICE: &str = "You successfully registered.";

/// Failures reported back to the originating session.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("malformed event: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("invalid event: {0}")]
    Invalid(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RouteError {
    /// Stable short name carried in the `error` event.
    pub fn kind(&self) -> &'static str {
        match self {
            RouteError::Encoding(_) => "encoding",
            RouteError::Invalid(_) => "invalid",
            RouteError::Store(StoreError::Unavailable(_)) => "unavailable",
            RouteError::Store(StoreError::Serialization(_)) => "encoding",
            RouteError::Store(StoreError::Corrupt { .. }) => "corrupt",
        }
    }

    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error(ErrorNotice { kind: self.kind().to_string(), message: self.to_string() })
    }
}

/// Dispatches client events against a store and the room registry.
pub struct EventRouter<S> {
    store: Arc<S>,
    registry: Arc<RoomRegistry>,
}

impl<S> Clone for EventRouter<S> {
    fn clone(&self) -> Self {
        Self { store: Arc::clone(&self.store), registry: Arc::clone(&self.registry) }
    }
}

impl<S: MessageStore> EventRouter<S> {
    pub fn new(store: Arc<S>, registry: Arc<RoomRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        &self.registry
    }

    /// Handles one raw text frame from `session`. Errors go back to the session.
    pub async fn handle_frame(&self, session: &Session, text: &str) {
        let result = match ClientEvent::from_frame(text) {
            Ok(event) => self.dispatch(session, event).await,
            Err(e) => Err(RouteError::from(e)),
        };
        if let Err(e) = result {
            self.report(session, &e);
        }
    }

    fn report(&self, session: &Session, error: &RouteError) {
        match error {
            RouteError::Store(_) => log::error!("Session {}: {}", session.id(), error),
            _ => log::warn!("Session {}: {}", session.id(), error),
        }
        session.send(error.to_event());
    }

    /// Routes a parsed event.
    pub async fn dispatch(&self, session: &Session, event: ClientEvent) -> Result<(), RouteError> {
        log::debug!("Session {} -> {}", session.id(), event.name());
        match event {
            ClientEvent::Register(key) => self.register(session, &key),
            ClientEvent::GetMessages(query) => self.fetch_history(session, &query).await.map(|_| ()),
            ClientEvent::Message(message) => self.send_message(message).await.map(|_| ()),
            ClientEvent::Leave(room) => self.leave(session, &room),
        }
    }

    /// Joins `session` to the room named by its identity key and acknowledges
    /// to that session alone.
    pub fn register(&self, session: &Session, key: &str) -> Result<(), RouteError> {
        if key.is_empty() {
            return Err(RouteError::Invalid("register requires a non-empty key".into()));
        }
        if self.registry.join(session, key) {
            log::info!("Session {} registered as '{}'", session.id(), key);
        }
        session.send(ServerEvent::Notice(REGISTERED_NOTICE.to_string()));
        Ok(())
    }

    /// Reads the history of `query.id` and sends it to the subscribers of
    /// `query.user_id`. History reads are not gated by subscription.
    pub async fn fetch_history(&self, session: &Session, query: &HistoryQuery) -> Result<FanOut, RouteError> {
        let messages = self.store.list(&query.id).await?;
        let count = messages.len();
        let fan_out = self.registry.broadcast(&query.user_id, ServerEvent::PrevMessages(messages));
        if fan_out.targets() == 0 {
            log::debug!(
                "Session {}: history of '{}' requested into '{}', which has no subscribers",
                session.id(),
                query.id,
                query.user_id
            );
        } else {
            log::debug!("Sent {} message(s) of '{}' to '{}'", count, query.id, query.user_id);
        }
        Ok(fan_out)
    }

    /// Stores `message` and, only once stored, broadcasts it to its room
    /// (sender included).
    pub async fn send_message(&self, message: Message) -> Result<FanOut, RouteError> {
        if message.room.is_empty() {
            return Err(RouteError::Invalid("message requires a non-empty room".into()));
        }
        self.store.append(&message.room, &message).await?;
        let room = message.room.clone();
        Ok(self.registry.broadcast(&room, ServerEvent::Reply(message)))
    }

    pub fn leave(&self, session: &Session, room: &str) -> Result<(), RouteError> {
        if self.registry.leave(session.id(), room) {
            log::info!("Session {} left '{}'", session.id(), room);
        }
        Ok(())
    }
}
