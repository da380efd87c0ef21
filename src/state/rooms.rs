//! Room membership bookkeeping: which players and connections belong to which
//! room code, who hosts it, and when it disappears.

use std::{collections::HashSet, sync::Arc, time::Instant};

use dashmap::DashMap;
use indexmap::{IndexMap, IndexSet};
use rand::Rng;
use tokio::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use crate::{
    dto::validation::validate_room_code,
    error::ServiceError,
    state::{
        game::{GameSession, Player},
        state_machine::GameStateMachine,
        timers::PhaseTimers,
    },
};

/// Random draws attempted before giving up on finding a free code.
const ROOM_CODE_ATTEMPTS: usize = 200;
/// Number of distinct 3-digit codes.
const ROOM_CODE_SPACE: u32 = 1_000;

/// Player and connection sets of a room plus its host.
#[derive(Debug, Default)]
pub struct Membership {
    players: IndexSet<String>,
    clients: HashSet<Uuid>,
    host: Option<String>,
}

impl Membership {
    /// Add a player; the first player in becomes host.
    pub fn add_player(&mut self, player_id: &str) -> bool {
        let inserted = self.players.insert(player_id.to_string());
        if self.host.is_none() {
            self.host = Some(player_id.to_string());
        }
        inserted
    }

    /// Remove a player, handing the host role to the earliest remaining joiner.
    pub fn remove_player(&mut self, player_id: &str) -> bool {
        let removed = self.players.shift_remove(player_id);
        if self.host.as_deref() == Some(player_id) {
            self.host = self.players.first().cloned();
        }
        removed
    }

    /// Add a connection id.
    pub fn add_client(&mut self, connection_id: Uuid) -> bool {
        self.clients.insert(connection_id)
    }

    /// Remove a connection id.
    pub fn remove_client(&mut self, connection_id: &Uuid) -> bool {
        self.clients.remove(connection_id)
    }

    /// Current host.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    /// Connection ids.
    pub fn clients(&self) -> impl Iterator<Item = &Uuid> {
        self.clients.iter()
    }

    /// A room is disposable once both sets are empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty() && self.clients.is_empty()
    }
}

/// Everything guarded by a room's lock.
#[derive(Debug, Default)]
pub struct RoomInner {
    /// Player/connection sets and host.
    pub membership: Membership,
    /// Player records, in join order.
    pub players: IndexMap<String, Player>,
    /// Round data.
    pub session: GameSession,
    /// Phase machine.
    pub machine: GameStateMachine,
    /// Pending phase timers.
    pub timers: PhaseTimers,
    closed: bool,
}

impl RoomInner {
    /// Active players, in join order.
    pub fn active_players(&self) -> impl Iterator<Item = &Player> {
        self.players.values().filter(|player| player.active)
    }

    /// Number of active players.
    pub fn active_count(&self) -> usize {
        self.active_players().count()
    }

    /// Whether the room was torn down after its lock was taken.
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

/// A live room addressed by its code.
#[derive(Debug)]
pub struct Room {
    code: String,
    created_at: Instant,
    inner: Mutex<RoomInner>,
    mirrored_generation: Arc<Mutex<u64>>,
}

impl Room {
    fn new(code: String) -> Self {
        Self {
            code,
            created_at: Instant::now(),
            inner: Mutex::new(RoomInner::default()),
            mirrored_generation: Arc::new(Mutex::new(0)),
        }
    }

    /// Room code.
    pub fn code(&self) -> &str {
        &self.code
    }

    /// Creation instant, used to pick the oldest room for health reports.
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Generation of the last session row written to the mirror.
    ///
    /// Session writes hold this lock while in flight, so they reach the mirror
    /// one at a time and a write older than the last one is dropped.
    pub fn mirrored_generation(&self) -> Arc<Mutex<u64>> {
        self.mirrored_generation.clone()
    }

    /// Take the room lock. Every mutation of the room happens under it.
    pub async fn lock(&self) -> MutexGuard<'_, RoomInner> {
        self.inner.lock().await
    }
}

/// Registry of live rooms.
#[derive(Debug, Default)]
pub struct RoomManager {
    rooms: DashMap<String, Arc<Room>>,
}

impl RoomManager {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Draw a 3-digit code not used by any live room.
    pub fn generate_room_code(&self) -> Result<String, ServiceError> {
        let mut rng = rand::rng();
        for _ in 0..ROOM_CODE_ATTEMPTS {
            let code = format!("{:03}", rng.random_range(0..ROOM_CODE_SPACE));
            if !self.rooms.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(ServiceError::CodeSpaceExhausted)
    }

    /// Return the room for `code`, creating it on first use.
    pub fn ensure_room(&self, code: &str) -> Result<Arc<Room>, ServiceError> {
        validate_room_code(code).map_err(|_| ServiceError::InvalidRoomCode(code.to_string()))?;
        let room = self
            .rooms
            .entry(code.to_string())
            .or_insert_with(|| Arc::new(Room::new(code.to_string())))
            .clone();
        Ok(room)
    }

    /// Look up a live room.
    pub fn get(&self, code: &str) -> Option<Arc<Room>> {
        self.rooms.get(code).map(|entry| entry.value().clone())
    }

    /// Snapshot of every live room.
    pub fn all(&self) -> Vec<Arc<Room>> {
        self.rooms.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Number of live rooms.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether no room is live.
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Delete `room` if both of its sets are empty. Must be called with the room lock held.
    ///
    /// Pending timers are aborted and the room is flagged closed so late lock
    /// holders can tell it is gone.
    pub fn release_if_empty(&self, room: &Arc<Room>, inner: &mut RoomInner) -> bool {
        if !inner.membership.is_empty() || inner.closed {
            return false;
        }
        inner.closed = true;
        inner.timers.cancel_all();
        self.rooms
            .remove_if(room.code(), |_, existing| Arc::ptr_eq(existing, room));
        true
    }
}
