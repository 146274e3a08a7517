//! # Redis Message Store
//!
//! Each room is a sorted set at `room:<roomId>`; scores are ordering keys.
//! Ordering keys come from a per-room counter at `seq:room:<roomId>`, bumped
//! by the same Lua script that adds the member, so two concurrent appends can
//! never share or invert a score.
//!
//! Members are `<seq>:<message json>`. The prefix keeps every append a
//! distinct member, so identical messages sent twice are stored twice.

use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::{AsyncCommands, RedisError, Script};

use super::{decode_all, encode, room_key, MessageStore, StoreError};
use crate::connections::cache_redis;
use crate::model::Message;

const APPEND_SCRIPT: &str = r"
local seq = redis.call('INCR', KEYS[2])
redis.call('ZADD', KEYS[1], seq, seq .. ':' .. ARGV[1])
return seq
";

/// Message store backed by a shared Redis connection.
pub struct RedisStore {
    conn: ConnectionManager,
    append_script: Script,
    timeout: Duration,
}

impl RedisStore {
    /// Wraps an already opened connection. `timeout` bounds every call.
    pub fn new(conn: ConnectionManager, timeout: Duration) -> Self {
        Self { conn, append_script: Script::new(APPEND_SCRIPT), timeout }
    }

    /// Opens the connection and wraps it.
    pub async fn connect(addr: &str, timeout: Duration) -> Result<Self, StoreError> {
        let conn = cache_redis::connect(addr, timeout).await?;
        Ok(Self::new(conn, timeout))
    }

    async fn bounded<T, F>(&self, op: &str, fut: F) -> Result<T, StoreError>
    where
        F: std::future::Future<Output = Result<T, RedisError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(StoreError::Unavailable(format!("{op}: {e}"))),
            Err(_) => Err(StoreError::Unavailable(format!("{op}: timed out after {}ms", self.timeout.as_millis()))),
        }
    }
}

fn seq_key(room: &str) -> String {
    format!("seq:{}", room_key(room))
}

/// Strips the `<seq>:` prefix off a stored member.
fn member_body<'a>(key: &str, member: &'a str) -> Result<&'a str, StoreError> {
    match member.split_once(':') {
        Some((seq, body)) if !seq.is_empty() && seq.bytes().all(|b| b.is_ascii_digit()) => Ok(body),
        _ => Err(StoreError::Corrupt { key: key.to_string(), reason: "member without ordering prefix".into() }),
    }
}

impl MessageStore for RedisStore {
    async fn append(&self, room: &str, message: &Message) -> Result<(), StoreError> {
        let member = encode(message)?;
        let mut conn = self.conn.clone();
        let mut invocation = self.append_script.key(room_key(room));
        invocation.key(seq_key(room)).arg(member);
        let seq: i64 = self.bounded("append", invocation.invoke_async(&mut conn)).await?;
        log::debug!("Appended message to {} with ordering key {}", room_key(room), seq);
        Ok(())
    }

    async fn list(&self, room: &str) -> Result<Vec<Message>, StoreError> {
        let key = room_key(room);
        let mut conn = self.conn.clone();
        let entries: Vec<String> = self.bounded("list", conn.zrange(&key, 0, -1)).await?;
        let bodies = entries.iter().map(|member| member_body(&key, member)).collect::<Result<Vec<_>, _>>()?;
        decode_all(&key, bodies)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: String = self.bounded("ping", redis::cmd("PING").query_async(&mut conn)).await?;
        Ok(())
    }
}
