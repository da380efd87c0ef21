use crate::{
    dto::{common::PublicGameView, health::NewRoomResponse, validation::validate_room_code},
    error::ServiceError,
    state::SharedState,
};

/// Hand out a room code no live room uses.
pub fn new_room_code(state: &SharedState) -> Result<NewRoomResponse, ServiceError> {
    let room_code = state.rooms().generate_room_code()?;
    Ok(NewRoomResponse { room_code })
}

/// Public view of a live room.
pub async fn room_view(state: &SharedState, room_code: &str) -> Result<PublicGameView, ServiceError> {
    validate_room_code(room_code).map_err(|_| ServiceError::InvalidRoomCode(room_code.to_string()))?;
    let room = state
        .rooms()
        .get(room_code)
        .ok_or_else(|| ServiceError::RoomNotFound(room_code.to_string()))?;
    let inner = room.lock().await;
    Ok(PublicGameView::from_room(&inner))
}
