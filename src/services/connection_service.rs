//! Connection lifecycle and room membership: join, leave, reconnect, eviction,
//! plus the fan-out primitives every other service sends through.

use std::sync::Arc;

use axum::extract::ws::Message;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::PlayerEntity,
    dto::{
        common::{PublicGameView, player_summaries},
        now_ms,
        validation::validate_room_code,
        ws::{
            ConnectionEstablished, JoinPayload, JoinSuccess, LeftRoom, OutboundMessage,
            PlayerListUpdate,
        },
    },
    error::{ProtocolError, ServiceError},
    services::{game_service, mirror_service},
    state::{
        SharedState,
        connections::Binding,
        game::Player,
        rooms::{Room, RoomInner},
        state_machine::GamePhase,
    },
};

/// Register a freshly upgraded socket and greet it.
pub fn register_connection(state: &SharedState, tx: mpsc::UnboundedSender<Message>) -> Uuid {
    let connection_id = state.connections().register(tx);
    info!(connection = %connection_id, "client connected");
    send_to_connection(
        state,
        connection_id,
        &OutboundMessage::ConnectionEstablished(ConnectionEstablished {
            connection_id,
            server_time: now_ms(),
        }),
    );
    connection_id
}

/// Queue a frame on one connection. A closed queue schedules the connection's eviction.
fn deliver(
    state: &SharedState,
    connection_id: Uuid,
    tx: &mpsc::UnboundedSender<Message>,
    frame: Message,
) -> bool {
    if tx.send(frame).is_ok() {
        return true;
    }
    warn!(connection = %connection_id, "outbound queue closed; scheduling eviction");
    schedule_eviction(state, connection_id);
    false
}

/// Remove a connection on a separate task, outside any lock the caller holds.
pub fn schedule_eviction(state: &SharedState, connection_id: Uuid) {
    tokio::spawn(remove_connection(state.clone(), connection_id));
}

/// Send `message` to one connection, tagging the envelope with its player id.
pub fn send_to_connection(state: &SharedState, connection_id: Uuid, message: &OutboundMessage) -> bool {
    let Some(tx) = state.connections().sender(&connection_id) else {
        debug!(connection = %connection_id, "dropping message for unknown connection");
        return false;
    };
    let player_id = state
        .connections()
        .binding(&connection_id)
        .map(|binding| binding.player_id);
    let Some(frame) = message.to_frame(player_id.as_deref()) else {
        return false;
    };
    deliver(state, connection_id, &tx, frame)
}

/// Send `message` to the connection currently representing `player_id`.
pub fn send_to_player(
    state: &SharedState,
    inner: &RoomInner,
    player_id: &str,
    message: &OutboundMessage,
) -> bool {
    match inner
        .players
        .get(player_id)
        .and_then(|player| player.connection_id)
    {
        Some(connection_id) => send_to_connection(state, connection_id, message),
        None => false,
    }
}

/// Send `message` to every open connection. Returns how many accepted it.
pub fn broadcast_to_all(state: &SharedState, message: &OutboundMessage) -> usize {
    let Some(frame) = message.to_frame(None) else {
        return 0;
    };
    state
        .connections()
        .senders()
        .into_iter()
        .filter(|(connection_id, tx)| deliver(state, *connection_id, tx, frame.clone()))
        .count()
}

/// Send `message` to every connection of a room. Call with the room lock held.
pub fn broadcast_to_room(state: &SharedState, inner: &RoomInner, message: &OutboundMessage) -> usize {
    let Some(frame) = message.to_frame(None) else {
        return 0;
    };
    let mut delivered = 0;
    for connection_id in inner.membership.clients() {
        let Some(tx) = state.connections().sender(connection_id) else {
            continue;
        };
        if deliver(state, *connection_id, &tx, frame.clone()) {
            delivered += 1;
        }
    }
    delivered
}

fn broadcast_player_list(state: &SharedState, room: &Room, inner: &RoomInner) {
    let players = player_summaries(inner);
    broadcast_to_room(
        state,
        inner,
        &OutboundMessage::PlayerListUpdate(PlayerListUpdate {
            total_players: players.len(),
            players,
            room_code: room.code().to_string(),
        }),
    );
}

fn fresh_player_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Keep the requested id unless it already belongs to a player of another room.
fn resolve_player_id(state: &SharedState, requested: Option<&str>, room_code: &str) -> String {
    match requested.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id)
            if state
                .connections()
                .player_room(id)
                .is_none_or(|room| room == room_code) =>
        {
            id.to_string()
        }
        Some(id) => {
            info!(requested = %id, room = %room_code, "player id lives in another room; issuing a fresh one");
            fresh_player_id()
        }
        None => fresh_player_id(),
    }
}

/// `join`: bind the connection to a player of the requested room, creating both as needed.
///
/// A player id that already has a live connection in the same room is taken
/// over: the previous connection is closed and unbound so its teardown leaves
/// the player alone.
pub async fn add_player(
    state: &SharedState,
    connection_id: Uuid,
    request: JoinPayload,
) -> Result<(), ServiceError> {
    let name = request.player_name.trim();
    if name.is_empty() {
        return Err(ServiceError::InvalidPlayerData(
            "player name must not be blank".into(),
        ));
    }
    validate_room_code(&request.room_code)
        .map_err(|_| ServiceError::InvalidRoomCode(request.room_code.clone()))?;

    if let Some(binding) = state.connections().binding(&connection_id) {
        let same_player = binding.room_code == request.room_code
            && request.player_id.as_deref() == Some(binding.player_id.as_str());
        if !same_player {
            remove_player(state, &binding.player_id).await;
        }
    }

    let player_id = resolve_player_id(state, request.player_id.as_deref(), &request.room_code);

    loop {
        let room = state.rooms().ensure_room(&request.room_code)?;
        let mut inner = room.lock().await;
        if inner.is_closed() {
            // Torn down between lookup and lock; the next lookup creates a fresh room.
            continue;
        }
        admit(state, &room, &mut inner, connection_id, &player_id, name);
        return Ok(());
    }
}

fn admit(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
    connection_id: Uuid,
    player_id: &str,
    name: &str,
) {
    let code = room.code().to_string();

    let previous = inner
        .players
        .get(player_id)
        .and_then(|player| player.connection_id)
        .filter(|previous| *previous != connection_id);
    if let Some(previous) = previous {
        info!(room = %code, player = %player_id, connection = %previous, "superseding previous connection");
        inner.membership.remove_client(&previous);
        state.connections().unbind(&previous);
        if let Some(tx) = state.connections().sender(&previous) {
            let _ = tx.send(Message::Close(None));
        }
    }

    match inner.players.get_mut(player_id) {
        Some(player) => {
            if !player.active {
                player.ready = false;
                player.joined_at = now_ms();
            }
            player.active = true;
            player.name = name.to_string();
            player.connection_id = Some(connection_id);
        }
        None => {
            inner.players.insert(
                player_id.to_string(),
                Player::new(player_id.to_string(), name.to_string(), code.clone(), connection_id),
            );
        }
    }
    inner.membership.add_player(player_id);
    inner.membership.add_client(connection_id);

    if !state.connections().bind(&connection_id, player_id, &code) {
        warn!(room = %code, player = %player_id, "connection closed while joining");
        remove_player_locked(state, room, inner, player_id);
        return;
    }

    if let Some(player) = inner.players.get(player_id) {
        mirror_service::upsert_player(state, PlayerEntity::from(player));
    }
    info!(room = %code, player = %player_id, "player joined");

    send_to_connection(
        state,
        connection_id,
        &OutboundMessage::JoinSuccess(JoinSuccess {
            player_id: player_id.to_string(),
            player_name: name.to_string(),
            room_code: code,
            is_host: inner.membership.host() == Some(player_id),
            game_state: PublicGameView::from_room(inner),
        }),
    );
    broadcast_player_list(state, room, inner);
}

/// `leave`: drop the player but keep the connection open for another join.
pub async fn leave(state: &SharedState, connection_id: Uuid) -> Result<(), ServiceError> {
    let binding = state
        .connections()
        .binding(&connection_id)
        .ok_or_else(|| ProtocolError::AuthenticationRequired("leave".into()))?;
    remove_player(state, &binding.player_id).await;
    send_to_connection(
        state,
        connection_id,
        &OutboundMessage::LeftRoom(LeftRoom {
            room_code: binding.room_code,
        }),
    );
    Ok(())
}

/// Remove a player from its room. Idempotent: returns false if it was already gone.
pub async fn remove_player(state: &SharedState, player_id: &str) -> bool {
    let Some(room_code) = state.connections().player_room(player_id) else {
        return false;
    };
    let Some(room) = state.rooms().get(&room_code) else {
        return false;
    };
    let mut inner = room.lock().await;
    if inner.is_closed() {
        return false;
    }
    remove_player_locked(state, &room, &mut inner, player_id)
}

/// Tear down a connection. Idempotent; removes its player only if the
/// connection still represents it.
pub async fn remove_connection(state: SharedState, connection_id: Uuid) {
    let Some(connection) = state.connections().unregister(&connection_id) else {
        return;
    };
    info!(connection = %connection_id, "connection removed");

    let (Some(player_id), Some(room_code)) = (connection.player_id, connection.room_code) else {
        return;
    };
    let Some(room) = state.rooms().get(&room_code) else {
        return;
    };
    let mut inner = room.lock().await;
    if inner.is_closed() {
        return;
    }

    let represents_player = inner
        .players
        .get(&player_id)
        .is_some_and(|player| player.connection_id == Some(connection_id));
    if represents_player {
        remove_player_locked(&state, &room, &mut inner, &player_id);
    } else {
        inner.membership.remove_client(&connection_id);
        release_room(&state, &room, &mut inner);
    }
}

fn remove_player_locked(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
    player_id: &str,
) -> bool {
    let Some(player) = inner.players.get_mut(player_id) else {
        return false;
    };
    if !player.active {
        return false;
    }
    player.active = false;
    player.ready = false;
    let connection = player.connection_id.take();
    let entity = PlayerEntity::from(&*player);

    inner.membership.remove_player(player_id);
    if let Some(connection_id) = connection {
        inner.membership.remove_client(&connection_id);
        state.connections().unbind(&connection_id);
    }
    mirror_service::upsert_player(state, entity);
    info!(room = %room.code(), player = %player_id, "player left");

    if !release_room(state, room, inner) {
        broadcast_player_list(state, room, inner);
        game_service::on_player_removed(state, room, inner, player_id);
    }
    true
}

/// Delete the room if it has no player and no connection left.
fn release_room(state: &SharedState, room: &Arc<Room>, inner: &mut RoomInner) -> bool {
    if !state.rooms().release_if_empty(room, inner) {
        return false;
    }
    for player_id in inner.players.keys() {
        state.connections().forget_player(player_id);
    }
    info!(room = %room.code(), "room closed");
    true
}

/// `toggle_ready`: flip lobby readiness, then start if everyone is ready.
pub async fn toggle_ready(state: &SharedState, binding: &Binding) -> Result<(), ServiceError> {
    game_service::with_room(state, &binding.room_code, |room, inner| {
        let phase = inner.machine.phase();
        if phase != GamePhase::Waiting {
            return Err(ServiceError::invalid_phase("toggle_ready", phase));
        }
        let player = inner
            .players
            .get_mut(&binding.player_id)
            .filter(|player| player.active)
            .ok_or_else(|| ProtocolError::AuthenticationRequired("toggle_ready".into()))?;
        player.ready = !player.ready;
        debug!(room = %room.code(), player = %player.id, ready = player.ready, "readiness toggled");
        mirror_service::upsert_player(state, PlayerEntity::from(&*player));

        broadcast_player_list(state, room, inner);
        game_service::maybe_auto_start(state, room, inner);
        Ok(())
    })
    .await
}
