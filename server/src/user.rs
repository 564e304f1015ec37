//! Connected users and their per-connection outbound queues
//!
//! This module tracks every live connection on the server side:
//! - Identity allocation for accepted connections
//! - The outbound queue drained by each connection's writer task
//! - Which room a user sits in and which player they control there
//! - Capacity enforcement
//!
//! Nothing in here touches sockets directly. Sending is fire-and-forget into
//! the user's queue; a dead writer simply drops what it is given.

use bytes::Bytes;
use log::{debug, info};
use shared::HashToken;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Server-assigned connection identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserId(pub u64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "user-{}", self.0)
    }
}

/// Thread-safe identity generator shared with the accept loop.
#[derive(Debug)]
pub struct UserIdGenerator {
    next: AtomicU64,
}

impl UserIdGenerator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> UserId {
        UserId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for UserIdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

pub type Outbox = mpsc::UnboundedSender<Bytes>;

/// One connected user
///
/// Each user carries:
/// - The sending half of its connection's outbound queue
/// - The room it currently belongs to, if any
/// - Its player index once that room has started
/// - Whether it has been told the roster size
/// - Whether it still expects per-tick frames
#[derive(Debug)]
pub struct User {
    pub id: UserId,
    outbox: Outbox,
    /// Room the user is waiting in or playing in
    pub lobby: Option<HashToken>,
    /// Player slot assigned when the room started
    pub player_index: Option<usize>,
    /// Set once a negative countdown reply has been sent; frames cannot be
    /// decoded by the client before that
    pub roster_sent: bool,
    /// Cleared once a terminal frame has been delivered
    pub game_connection_alive: bool,
}

impl User {
    pub fn new(id: UserId, outbox: Outbox) -> Self {
        Self {
            id,
            outbox,
            lobby: None,
            player_index: None,
            roster_sent: false,
            game_connection_alive: false,
        }
    }

    /// Queues one physical message for the writer task
    ///
    /// Returns false if the writer has already gone away. The caller does not
    /// need to react: the reader side reports the disconnect on its own.
    pub fn send(&self, message: Bytes) -> bool {
        if self.outbox.send(message).is_err() {
            debug!("Dropping message for {}: writer closed", self.id);
            return false;
        }
        true
    }

    /// Forgets room membership and player assignment
    pub fn clear_room(&mut self) -> Option<HashToken> {
        self.player_index = None;
        self.roster_sent = false;
        self.game_connection_alive = false;
        self.lobby.take()
    }
}

/// Manages all connected users
///
/// Enforces the connection cap and gives the event loop keyed access to
/// each user's state and outbound queue.
#[derive(Debug)]
pub struct UserRegistry {
    users: HashMap<UserId, User>,
    max_users: usize,
}

impl UserRegistry {
    pub fn new(max_users: usize) -> Self {
        Self {
            users: HashMap::new(),
            max_users,
        }
    }

    /// Registers a freshly accepted connection
    ///
    /// Returns false if the server is at capacity or the id is taken. The
    /// rejected outbox is dropped, which closes the connection's writer.
    pub fn add_user(&mut self, id: UserId, outbox: Outbox) -> bool {
        if self.users.len() >= self.max_users || self.users.contains_key(&id) {
            return false;
        }
        self.users.insert(id, User::new(id, outbox));
        info!("{} connected ({} online)", id, self.users.len());
        true
    }

    /// Removes a user, returning its final state
    pub fn remove_user(&mut self, id: UserId) -> Option<User> {
        let user = self.users.remove(&id)?;
        info!("{} disconnected ({} online)", id, self.users.len());
        Some(user)
    }

    pub fn get(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    pub fn get_mut(&mut self, id: UserId) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    pub fn contains(&self, id: UserId) -> bool {
        self.users.contains_key(&id)
    }

    /// Sends to a user by id. Unknown ids are ignored.
    pub fn send(&self, id: UserId, message: Bytes) -> bool {
        self.users.get(&id).is_some_and(|user| user.send(message))
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
