use serde::Serialize;
use utoipa::ToSchema;

use crate::state::state_machine::GamePhase;

/// Health response returned by the `/health` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Seconds since the process started.
    pub uptime: u64,
    /// Open client connections.
    pub connections: usize,
    /// Phase of the oldest live room, `waiting` when there is none.
    pub game_phase: GamePhase,
    /// Live rooms.
    pub rooms: usize,
    /// True when no session mirror is reachable.
    pub degraded: bool,
}

/// Payload of `GET /rooms/new`.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct NewRoomResponse {
    /// Unused 3-digit room code.
    pub room_code: String,
}
