use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use super::{decode_all, encode, room_key, MessageStore, StoreError};
use crate::model::Message;

/// Partition: ordering key -> serialized message.
type Partition = BTreeMap<u64, String>;

/// In-process message store.
///
/// Keeps the serialized form, exactly like the Redis backend, so the encode
/// and decode paths behave the same. One counter serves every room, which
/// keeps keys strictly increasing per room as well.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_key: u64,
    rooms: BTreeMap<String, Partition>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut guard = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    #[cfg(test)]
    pub(crate) fn insert_raw(&self, room: &str, raw: &str) {
        self.with_inner(|inner| {
            inner.next_key += 1;
            let key = inner.next_key;
            inner.rooms.entry(room_key(room)).or_default().insert(key, raw.to_string());
        });
    }
}

impl MessageStore for MemoryStore {
    async fn append(&self, room: &str, message: &Message) -> Result<(), StoreError> {
        let member = encode(message)?;
        self.with_inner(|inner| {
            inner.next_key += 1;
            let key = inner.next_key;
            inner.rooms.entry(room_key(room)).or_default().insert(key, member);
        });
        Ok(())
    }

    async fn list(&self, room: &str) -> Result<Vec<Message>, StoreError> {
        let key = room_key(room);
        let entries: Vec<String> =
            self.with_inner(|inner| inner.rooms.get(&key).map(|p| p.values().cloned().collect()).unwrap_or_default());
        decode_all(&key, entries)
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn msg(room: &str, id: &str) -> Message {
        Message { content: format!("body {id}"), id: id.into(), room: room.into(), ..Default::default() }
    }

    #[tokio::test]
    async fn empty_room_lists_nothing() {
        let store = MemoryStore::new();
        assert!(store.list("nowhere").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn keeps_insertion_order() {
        let store = MemoryStore::new();
        for id in ["1", "2", "3"] {
            store.append("lobby", &msg("lobby", id)).await.unwrap();
        }
        let ids: Vec<_> = store.list("lobby").await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["1", "2", "3"]);
    }

    #[tokio::test]
    async fn rooms_are_isolated() {
        let store = MemoryStore::new();
        store.append("a", &msg("a", "1")).await.unwrap();
        store.append("b", &msg("b", "2")).await.unwrap();
        let a = store.list("a").await.unwrap();
        assert_eq!(a.len(), 1);
        assert_eq!(a[0].id, "1");
        assert!(store.list("b").await.unwrap().iter().all(|m| m.room == "b"));
    }

    #[tokio::test]
    async fn concurrent_appends_are_all_kept() {
        let store = Arc::new(MemoryStore::new());
        let mut handles = Vec::new();
        for i in 0..50 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move { store.append("busy", &msg("busy", &i.to_string())).await }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        let mut ids: Vec<u32> = store.list("busy").await.unwrap().iter().map(|m| m.id.parse().unwrap()).collect();
        assert_eq!(ids.len(), 50);
        ids.sort_unstable();
        assert_eq!(ids, (0..50).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn identical_appends_are_each_stored() {
        let store = MemoryStore::new();
        store.append("r", &msg("r", "1")).await.unwrap();
        store.append("r", &msg("r", "2")).await.unwrap();
        store.append("r", &msg("r", "1")).await.unwrap();
        let ids: Vec<_> = store.list("r").await.unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, ["1", "2", "1"]);
    }

    #[tokio::test]
    async fn corrupt_entry_fails_whole_listing() {
        let store = MemoryStore::new();
        store.append("r", &msg("r", "1")).await.unwrap();
        store.insert_raw("r", "not-json");
        store.append("r", &msg("r", "3")).await.unwrap();
        assert!(matches!(store.list("r").await, Err(StoreError::Corrupt { .. })));
    }
}
