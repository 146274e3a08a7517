//! # Room Registry
//!
//! Tracks which sessions are subscribed to which rooms and fans events out to
//! a room's current members.
//!
//! Both directions of the mapping (room -> sessions and session -> rooms) sit
//! behind one lock, so `join`, `leave` and `broadcast` never see one side
//! updated without the other. Broadcast copies the member list under the lock
//! and delivers after releasing it; per-target failures are counted and
//! logged, never returned.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::session::{Delivery, Session, SessionId};
use crate::model::ServerEvent;

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, HashMap<SessionId, Session>>,
    memberships: HashMap<SessionId, HashSet<String>>,
}

/// Outcome counts of one broadcast.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FanOut {
    pub delivered: usize,
    pub dropped: usize,
    pub closed: usize,
}

impl FanOut {
    pub fn targets(&self) -> usize {
        self.delivered + self.dropped + self.closed
    }
}

/// Room membership table shared by every connection handler.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Subscribes `session` to `room`. Returns `false` if it already was.
    pub fn join(&self, session: &Session, room: &str) -> bool {
        let mut inner = self.lock();
        let newly = inner.memberships.entry(session.id()).or_default().insert(room.to_string());
        if newly {
            inner.rooms.entry(room.to_string()).or_default().insert(session.id(), session.clone());
            log::debug!("Session {} joined room '{}'", session.id(), room);
        }
        newly
    }

    /// Unsubscribes session `id` from `room`. Returns `false` if it was not subscribed.
    pub fn leave(&self, id: SessionId, room: &str) -> bool {
        let mut inner = self.lock();
        let removed = match inner.memberships.get_mut(&id) {
            Some(rooms) => {
                let removed = rooms.remove(room);
                if rooms.is_empty() {
                    inner.memberships.remove(&id);
                }
                removed
            }
            None => false,
        };
        if removed {
            Self::drop_member(&mut inner, room, id);
        }
        removed
    }

    /// Unsubscribes session `id` from every room and returns the rooms it left.
    /// Safe for sessions that never joined anything.
    pub fn leave_all(&self, id: SessionId) -> Vec<String> {
        let mut inner = self.lock();
        let rooms: Vec<String> = inner.memberships.remove(&id).map(|set| set.into_iter().collect()).unwrap_or_default();
        for room in &rooms {
            Self::drop_member(&mut inner, room, id);
        }
        rooms
    }

    fn drop_member(inner: &mut Inner, room: &str, id: SessionId) {
        if let Some(members) = inner.rooms.get_mut(room) {
            members.remove(&id);
            if members.is_empty() {
                inner.rooms.remove(room);
            }
        }
    }

    /// Delivers `event` to every session subscribed to `room` at call time.
    pub fn broadcast(&self, room: &str, event: ServerEvent) -> FanOut {
        let targets: Vec<Session> = {
            let inner = self.lock();
            match inner.rooms.get(room) {
                Some(members) => members.values().cloned().collect(),
                None => Vec::new(),
            }
        };

        let event = Arc::new(event);
        let mut fan_out = FanOut::default();
        for target in &targets {
            match target.deliver(Arc::clone(&event)) {
                Delivery::Delivered => fan_out.delivered += 1,
                Delivery::Dropped => fan_out.dropped += 1,
                Delivery::Closed => {
                    log::debug!("Session {} already closed, skipped delivery to room '{}'", target.id(), room);
                    fan_out.closed += 1;
                }
            }
        }
        if fan_out.dropped > 0 {
            log::warn!("Broadcast to room '{}' dropped for {} slow session(s)", room, fan_out.dropped);
        }
        fan_out
    }

    /// Rooms session `id` is subscribed to.
    #[cfg(test)]
    pub(crate) fn rooms_of(&self, id: SessionId) -> Vec<String> {
        self.lock().memberships.get(&id).map(|set| set.iter().cloned().collect()).unwrap_or_default()
    }

    #[cfg(test)]
    pub(crate) fn member_count(&self, room: &str) -> usize {
        self.lock().rooms.get(room).map_or(0, HashMap::len)
    }

    /// Number of rooms with at least one subscriber.
    #[cfg(test)]
    pub(crate) fn room_count(&self) -> usize {
        self.lock().rooms.len()
    }
}
