//! Client connection registry: tracks attached sockets, the nickname each is
//! bound to, and their outgoing message queues.

use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

/// Capacity of each connection's outbox. A client slow enough to fill this
/// is treated as disconnected rather than allowed to stall the round.
pub const OUTBOX_CAPACITY: usize = 64;

pub type Outbox = mpsc::Sender<String>;

struct Entry {
    nickname: Option<String>,
    sender: Outbox,
}

/// Tracks every attached connection. Connections and players cross-reference
/// each other purely by `ConnId`; neither side stores the other directly.
pub struct ClientRegistry {
    next_id: u64,
    entries: HashMap<u64, Entry>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entries: HashMap::new(),
        }
    }

    /// Records a freshly accepted, not-yet-registered connection. Returns
    /// the id future calls use to address it.
    pub fn attach(&mut self, sender: Outbox) -> u64 {
        let conn_id = self.next_id;
        self.next_id += 1;
        self.entries.insert(
            conn_id,
            Entry {
                nickname: None,
                sender,
            },
        );
        conn_id
    }

    pub fn bind(&mut self, conn_id: u64, nickname: &str) {
        if let Some(entry) = self.entries.get_mut(&conn_id) {
            entry.nickname = Some(nickname.to_string());
        }
    }

    /// Removes the connection, returning its bound nickname if any.
    pub fn detach(&mut self, conn_id: u64) -> Option<String> {
        self.entries.remove(&conn_id).and_then(|e| e.nickname)
    }

    pub fn is_bound(&self, conn_id: u64) -> bool {
        matches!(self.entries.get(&conn_id), Some(e) if e.nickname.is_some())
    }

    pub fn nickname_of(&self, conn_id: u64) -> Option<String> {
        self.entries.get(&conn_id).and_then(|e| e.nickname.clone())
    }

    /// Drops the nickname binding on every connection without closing the
    /// sockets themselves. Used on game reset.
    pub fn unbind_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.nickname = None;
        }
    }

    /// Enqueues `message` for every bound connection whose nickname is not
    /// in `except`. Non-blocking: a full or closed outbox is simply skipped,
    /// leaving that connection's own read loop to notice the closure.
    pub fn broadcast(&self, message: &str, except: &HashSet<&str>) {
        for entry in self.entries.values() {
            if let Some(nickname) = &entry.nickname {
                if except.contains(nickname.as_str()) {
                    continue;
                }
                let _ = entry.sender.try_send(message.to_string());
            }
        }
    }

    /// Enqueues `message` for a single connection by id, if still attached.
    pub fn unicast(&self, conn_id: u64, message: &str) {
        if let Some(entry) = self.entries.get(&conn_id) {
            let _ = entry.sender.try_send(message.to_string());
        }
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
