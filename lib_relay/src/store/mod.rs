//! # Message Store
//!
//! Durable, append-only, per-room message history. Each room is one ordered
//! partition keyed `room:<roomId>`; every entry is the serialized [`Message`]
//! plus a strictly increasing ordering key assigned by the backend.
//!
//! Reads are fail-fast: a single undecodable entry fails the whole `list`
//! call with [`StoreError::Corrupt`] rather than returning a partial history.

use std::future::Future;

use thiserror::Error;

use crate::model::Message;

/// In-process backend over a sorted map.
pub mod memory;
/// Redis sorted-set backend.
#[cfg(feature = "connections")]
pub mod redis_store;

pub use memory::MemoryStore;
#[cfg(feature = "connections")]
pub use redis_store::RedisStore;

/// Failures surfaced by a [`MessageStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("message store unavailable: {0}")]
    Unavailable(String),

    #[error("failed to encode message: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("corrupt entry in {key}: {reason}")]
    Corrupt { key: String, reason: String },
}

/// Storage contract used by the event router.
///
/// Implementations must hand out distinct, order-preserving ordering keys to
/// concurrent `append` calls on the same room.
pub trait MessageStore: Send + Sync + 'static {
    /// Appends `message` to the end of `room`'s history.
    fn append(&self, room: &str, message: &Message) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// Returns the full history of `room` in insertion order. Unknown rooms yield an empty list.
    fn list(&self, room: &str) -> impl Future<Output = Result<Vec<Message>, StoreError>> + Send;

    /// Checks that the backing store is reachable.
    fn ping(&self) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Namespaced storage key of a room's history partition.
pub fn room_key(room: &str) -> String {
    format!("room:{room}")
}

pub(crate) fn encode(message: &Message) -> Result<String, StoreError> {
    Ok(serde_json::to_string(message)?)
}

pub(crate) fn decode_all<I, S>(key: &str, entries: I) -> Result<Vec<Message>, StoreError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .map(|raw| {
            serde_json::from_str::<Message>(raw.as_ref()).map_err(|e| StoreError::Corrupt {
                key: key.to_string(),
                reason: e.to_string(),
            })
        })
        .collect()
}
