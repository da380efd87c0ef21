use axum::{
    Json, Router,
    extract::{Path, State},
    routing::get,
};

use crate::{
    dto::{common::PublicGameView, health::NewRoomResponse},
    error::AppError,
    services::room_service,
    state::SharedState,
};

/// Room code allocation and read-only room state.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/rooms/new", get(new_room))
        .route("/rooms/{code}", get(get_room))
}

#[utoipa::path(
    get,
    path = "/rooms/new",
    tag = "rooms",
    responses(
        (status = 200, description = "Unused room code", body = NewRoomResponse),
        (status = 503, description = "Every room code is taken")
    )
)]
/// Suggest a 3-digit code no live room uses. The room itself is created on first join.
pub async fn new_room(State(state): State<SharedState>) -> Result<Json<NewRoomResponse>, AppError> {
    let payload = room_service::new_room_code(&state)?;
    Ok(Json(payload))
}

#[utoipa::path(
    get,
    path = "/rooms/{code}",
    tag = "rooms",
    params(("code" = String, Path, description = "3-digit room code")),
    responses(
        (status = 200, description = "Public view of the room", body = PublicGameView),
        (status = 400, description = "Malformed room code"),
        (status = 404, description = "No live room with this code")
    )
)]
/// Return the public game view of a live room.
pub async fn get_room(
    State(state): State<SharedState>,
    Path(code): Path<String>,
) -> Result<Json<PublicGameView>, AppError> {
    let payload = room_service::room_view(&state, &code).await?;
    Ok(Json(payload))
}
