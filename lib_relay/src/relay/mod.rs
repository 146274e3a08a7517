//! # Relay Core
//!
//! The room relay proper, independent of any transport:
//!
//! - **`registry`**: which sessions are subscribed to which rooms, and
//!   best-effort fan-out to a room's current members.
//! - **`session`**: per-connection sessions with bounded outbound queues and
//!   exactly-once cleanup on disconnect.
//! - **`router`**: maps inbound client events onto the registry and the
//!   message store and emits the outbound events.
//!
//! A transport owns the sockets: it calls [`SessionManager::connect`] per
//! connection, feeds text frames to [`EventRouter::handle_frame`], drains the
//! session's outbound queue to the socket and finally calls
//! [`SessionManager::disconnect`].

pub mod registry;
pub mod router;
pub mod session;

pub use registry::{FanOut, RoomRegistry};
pub use router::{EventRouter, RouteError};
pub use session::{Delivery, Session, SessionId, SessionManager};
