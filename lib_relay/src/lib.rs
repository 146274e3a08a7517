//! # lib_relay
//!
//! Room-based chat relay core: room membership, ordered per-room message
//! history and broadcast fan-out. Transport, configuration and logging setup
//! live in the `servers` crate.

#![forbid(unsafe_code)]

pub mod model;
pub mod relay;
pub mod store;

#[cfg(feature = "connections")]
pub mod connections;

pub use model::{ClientEvent, HistoryQuery, Message, Sender, ServerEvent};
pub use relay::{EventRouter, RoomRegistry, RouteError, Session, SessionManager};
pub use store::{MemoryStore, MessageStore, StoreError};
#[cfg(feature = "connections")]
pub use store::RedisStore;
