//! # Wire Model
//!
//! Records exchanged with chat clients. Field names are part of the wire
//! contract with existing clients and must not change.
//!
//! Every frame on the socket is a JSON object of the form
//! `{"event": "<name>", "data": <payload>}`.

use serde::{Deserialize, Serialize};

/// Denormalized identity snapshot attached to every message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Sender {
    /// Avatar reference (display picture).
    pub dp: String,
    /// Display name.
    pub name: String,
    pub username: String,
}

/// A chat message. Immutable once it has been appended to a room.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub content: String,
    /// Client supplied identifier, opaque and not unique across rooms.
    pub id: String,
    /// Target room; selects both the storage partition and the broadcast scope.
    pub room: String,
    pub sender: Sender,
    /// Client supplied timestamp, never parsed.
    pub time: String,
    pub status: String,
}

/// Payload of a `getMessages` request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryQuery {
    /// Room whose subscribers receive the reply.
    #[serde(rename = "userId")]
    pub user_id: String,
    /// Room whose history is read.
    pub id: String,
}

/// Events a client may send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ClientEvent {
    #[serde(rename = "register")]
    Register(String),
    #[serde(rename = "getMessages", alias = "getMesages")]
    GetMessages(HistoryQuery),
    #[serde(rename = "message")]
    Message(Message),
    #[serde(rename = "leave")]
    Leave(String),
}

impl ClientEvent {
    /// Parses one inbound text frame.
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Short name used in log lines.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Register(_) => "register",
            ClientEvent::GetMessages(_) => "getMessages",
            ClientEvent::Message(_) => "message",
            ClientEvent::Leave(_) => "leave",
        }
    }
}

/// Body of an `error` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorNotice {
    pub kind: String,
    pub message: String,
}

/// Events the relay sends to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    #[serde(rename = "notice")]
    Notice(String),
    #[serde(rename = "prevMessages")]
    PrevMessages(Vec<Message>),
    /// A message accepted into a room, fanned out to its subscribers.
    #[serde(rename = "reply")]
    Reply(Message),
    #[serde(rename = "error")]
    Error(ErrorNotice),
}

impl ServerEvent {
    /// Encodes the event as a single text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
