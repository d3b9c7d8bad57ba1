//! Room membership map owned by the hub.
//!
//! Rooms are created lazily on the first join and removed as soon as their
//! last member leaves, so the map only ever holds non-empty rooms.

use std::{
    collections::{HashMap, hash_map::Entry},
    fmt,
};

use bytes::Bytes;

use crate::session::SessionId;

/// Room name exactly as sent in the handshake payload.
///
/// Names are raw bytes; the empty name is a valid room.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoomId(Bytes);

impl RoomId {
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self(name.into())
    }
}

impl From<&str> for RoomId {
    fn from(name: &str) -> Self {
        Self(Bytes::copy_from_slice(name.as_bytes()))
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Result of removing a member from a room.
#[derive(Debug)]
pub struct Departure<T> {
    pub member: T,
    pub remaining: usize,
}

impl<T> Departure<T> {
    pub fn room_closed(&self) -> bool {
        self.remaining == 0
    }
}

/// Rooms mapped to their members. `T` is whatever the owner keeps per member.
#[derive(Debug)]
pub struct Registry<T> {
    rooms: HashMap<RoomId, HashMap<SessionId, T>>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self {
            rooms: HashMap::new(),
        }
    }
}

impl<T> Registry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `session` to `room`, creating the room if needed. Joining again
    /// replaces the stored member value. Returns the room's member count.
    pub fn join(&mut self, room: RoomId, session: SessionId, member: T) -> usize {
        let members = self.rooms.entry(room).or_default();
        members.insert(session, member);
        members.len()
    }

    /// Removes `session` from `room`, dropping the room once it is empty.
    /// Returns `None` when the room does not exist or the session is not in it.
    pub fn leave(&mut self, room: &RoomId, session: SessionId) -> Option<Departure<T>> {
        let Entry::Occupied(mut entry) = self.rooms.entry(room.clone()) else {
            return None;
        };

        let member = entry.get_mut().remove(&session)?;
        let remaining = entry.get().len();
        if remaining == 0 {
            entry.remove();
        }

        Some(Departure { member, remaining })
    }

    /// Members of `room`; empty when the room does not exist.
    pub fn members<'a>(&'a self, room: &RoomId) -> impl Iterator<Item = (SessionId, &'a T)> + 'a {
        self.rooms
            .get(room)
            .into_iter()
            .flat_map(|members| members.iter().map(|(id, member)| (*id, member)))
    }

    #[cfg(test)]
    pub fn contains(&self, room: &RoomId, session: SessionId) -> bool {
        self.rooms
            .get(room)
            .is_some_and(|members| members.contains_key(&session))
    }

    #[cfg(test)]
    pub fn member_count(&self, room: &RoomId) -> usize {
        self.rooms.get(room).map_or(0, HashMap::len)
    }

    #[cfg(test)]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[cfg(test)]
    pub fn has_room(&self, room: &RoomId) -> bool {
        self.rooms.contains_key(room)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// True when no room in the map has zero members.
    #[cfg(test)]
    pub fn all_rooms_occupied(&self) -> bool {
        self.rooms.values().all(|members| !members.is_empty())
    }
}
