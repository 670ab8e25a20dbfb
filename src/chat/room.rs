//! Room table: membership and bounded history, guarded by one mutex
//! following the same coarse-locking idiom as the connection table.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

const HISTORY_CAP: usize = 200;

#[derive(Default)]
struct Room {
    members: HashSet<u32>,
    history: VecDeque<String>,
}

impl Room {
    fn push_history(&mut self, line: String) {
        if self.history.len() == HISTORY_CAP {
            self.history.pop_front();
        }
        self.history.push_back(line);
    }
}

#[derive(Default)]
pub struct RoomManager {
    rooms: Mutex<HashMap<String, Room>>,
}

impl RoomManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn_id` to `room`, creating it if this is the first member,
    /// and returns its history for replay to the joining connection.
    pub fn join(&self, room: &str, conn_id: u32) -> Vec<String> {
        let mut rooms = self.rooms.lock().unwrap();
        let entry = rooms.entry(room.to_string()).or_default();
        entry.members.insert(conn_id);
        entry.history.iter().cloned().collect()
    }

    pub fn leave(&self, room: &str, conn_id: u32) {
        let mut rooms = self.rooms.lock().unwrap();
        if let Some(r) = rooms.get_mut(room) {
            r.members.remove(&conn_id);
        }
    }

    /// Removes `conn_id` from every room it belongs to, for disconnect
    /// cleanup.
    pub fn leave_all(&self, conn_id: u32) {
        let mut rooms = self.rooms.lock().unwrap();
        for room in rooms.values_mut() {
            room.members.remove(&conn_id);
        }
    }

    /// Appends `line` to the room's history and returns the member set to
    /// fan the message out to, excluding the sender.
    pub fn publish(&self, room: &str, from: u32, line: String) -> Vec<u32> {
        let mut rooms = self.rooms.lock().unwrap();
        let entry = rooms.entry(room.to_string()).or_default();
        entry.push_history(line);
        entry
            .members
            .iter()
            .copied()
            .filter(|&id| id != from)
            .collect()
    }
}
