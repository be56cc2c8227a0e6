//! Subscription registry: by-user and by-room indices over live connections.
//!
//! This is plain data with no locking of its own. The hub's command loop is
//! its only owner, which is what serializes every mutation.
//!
//! Invariants (checked by `verify_invariants` in tests):
//! - every connection id in `by_room[room][user]` is live and owned by `user`
//! - `by_room` entries mirror each connection's joined-room set
//! - no room entry, room/user entry, or user entry is ever left empty

use std::collections::{HashMap, HashSet};

use super::{
    connection::Connection,
    value_object::{ConnectionId, RoomId, UserId},
};

/// Result of [`SubscriptionRegistry::insert`]
#[derive(Debug)]
pub struct RegisterOutcome {
    /// `true` when this is the user's first live connection
    pub user_came_online: bool,
    /// A previous registration under the same connection id, overwritten
    pub replaced: Option<UnregisterOutcome>,
}

/// Result of [`SubscriptionRegistry::remove`]
#[derive(Debug)]
pub struct UnregisterOutcome {
    pub connection: Connection,
    /// `true` when the user has no live connection left
    pub user_went_offline: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    AlreadyJoined,
    UnknownConnection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaveOutcome {
    Left,
    NotJoined,
    UnknownConnection,
}

#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    connections: HashMap<ConnectionId, Connection>,
    by_user: HashMap<UserId, HashSet<ConnectionId>>,
    by_room: HashMap<RoomId, HashMap<UserId, HashSet<ConnectionId>>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. Registering an id twice overwrites the old entry.
    pub fn insert(&mut self, connection: Connection) -> RegisterOutcome {
        let user_id = connection.user_id();
        let was_online = self.by_user.contains_key(&user_id);
        let mut replaced = self.remove(connection.id());
        if let Some(old) = replaced.as_mut()
            && old.connection.user_id() == user_id
        {
            // Same owner re-registering: seen from outside the user never left.
            old.user_went_offline = false;
        }

        self.by_user
            .entry(user_id)
            .or_default()
            .insert(connection.id());
        self.connections.insert(connection.id(), connection);

        RegisterOutcome {
            user_came_online: !was_online,
            replaced,
        }
    }

    /// Remove a connection and all of its room subscriptions. `None` if unknown.
    pub fn remove(&mut self, connection_id: ConnectionId) -> Option<UnregisterOutcome> {
        let connection = self.connections.remove(&connection_id)?;
        let user_id = connection.user_id();

        for room_id in connection.rooms() {
            self.detach_from_room(*room_id, user_id, connection_id);
        }

        let mut user_went_offline = false;
        if let Some(ids) = self.by_user.get_mut(&user_id) {
            ids.remove(&connection_id);
            if ids.is_empty() {
                self.by_user.remove(&user_id);
                user_went_offline = true;
            }
        }

        Some(UnregisterOutcome {
            connection,
            user_went_offline,
        })
    }

    pub fn join(&mut self, connection_id: ConnectionId, room_id: RoomId) -> JoinOutcome {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return JoinOutcome::UnknownConnection;
        };
        if !connection.insert_room(room_id) {
            return JoinOutcome::AlreadyJoined;
        }
        self.by_room
            .entry(room_id)
            .or_default()
            .entry(connection.user_id())
            .or_default()
            .insert(connection_id);
        JoinOutcome::Joined
    }

    pub fn leave(&mut self, connection_id: ConnectionId, room_id: RoomId) -> LeaveOutcome {
        let Some(connection) = self.connections.get_mut(&connection_id) else {
            return LeaveOutcome::UnknownConnection;
        };
        if !connection.remove_room(&room_id) {
            return LeaveOutcome::NotJoined;
        }
        let user_id = connection.user_id();
        self.detach_from_room(room_id, user_id, connection_id);
        LeaveOutcome::Left
    }

    fn detach_from_room(&mut self, room_id: RoomId, user_id: UserId, connection_id: ConnectionId) {
        let Some(users) = self.by_room.get_mut(&room_id) else {
            return;
        };
        if let Some(ids) = users.get_mut(&user_id) {
            ids.remove(&connection_id);
            if ids.is_empty() {
                users.remove(&user_id);
            }
        }
        if users.is_empty() {
            self.by_room.remove(&room_id);
        }
    }

    pub fn get(&self, connection_id: &ConnectionId) -> Option<&Connection> {
        self.connections.get(connection_id)
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.connections.contains_key(connection_id)
    }

    /// Live connections of one user
    pub fn connections_of(&self, user_id: &UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Connections subscribed to `room_id`, minus those owned by `exclude_user`
    pub fn room_targets(&self, room_id: &RoomId, exclude_user: Option<UserId>) -> Vec<ConnectionId> {
        let Some(users) = self.by_room.get(room_id) else {
            return Vec::new();
        };
        users
            .iter()
            .filter(|(user_id, _)| Some(**user_id) != exclude_user)
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    /// Connections owned by any of `users`, minus those owned by `exclude_user`
    pub fn user_targets<'a>(
        &self,
        users: impl IntoIterator<Item = &'a UserId>,
        exclude_user: Option<UserId>,
    ) -> Vec<ConnectionId> {
        let mut seen = HashSet::new();
        users
            .into_iter()
            .filter(|user_id| Some(**user_id) != exclude_user && seen.insert(**user_id))
            .filter_map(|user_id| self.by_user.get(user_id))
            .flat_map(|ids| ids.iter().copied())
            .collect()
    }

    pub fn is_user_online(&self, user_id: &UserId) -> bool {
        self.by_user.contains_key(user_id)
    }

    /// Users with at least one connection in the room, sorted
    pub fn online_users(&self, room_id: &RoomId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .by_room
            .get(room_id)
            .map(|users| users.keys().copied().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn room_count(&self) -> usize {
        self.by_room.len()
    }

    /// Check the index invariants, describing the first violation found.
    #[cfg(test)]
    pub(crate) fn verify_invariants(&self) -> Result<(), String> {
        for (user_id, ids) in &self.by_user {
            if ids.is_empty() {
                return Err(format!("empty by-user entry for {user_id}"));
            }
            for id in ids {
                match self.connections.get(id) {
                    Some(c) if c.user_id() == *user_id => {}
                    _ => return Err(format!("by-user {user_id} references dangling {id}")),
                }
            }
        }

        for (id, connection) in &self.connections {
            let indexed = self
                .by_user
                .get(&connection.user_id())
                .is_some_and(|ids| ids.contains(id));
            if !indexed {
                return Err(format!("connection {id} missing from by-user"));
            }
            for room_id in connection.rooms() {
                let subscribed = self
                    .by_room
                    .get(room_id)
                    .and_then(|users| users.get(&connection.user_id()))
                    .is_some_and(|ids| ids.contains(id));
                if !subscribed {
                    return Err(format!("connection {id} joined {room_id} but is not in by-room"));
                }
            }
        }

        for (room_id, users) in &self.by_room {
            if users.is_empty() {
                return Err(format!("empty by-room entry for {room_id}"));
            }
            for (user_id, ids) in users {
                if ids.is_empty() {
                    return Err(format!("empty by-room entry for {room_id}/{user_id}"));
                }
                for id in ids {
                    let in_by_user = self.by_user.get(user_id).is_some_and(|s| s.contains(id));
                    let joined = self
                        .connections
                        .get(id)
                        .is_some_and(|c| c.is_in_room(room_id));
                    if !in_by_user || !joined {
                        return Err(format!("by-room {room_id}/{user_id} references dangling {id}"));
                    }
                }
            }
        }

        Ok(())
    }
}
