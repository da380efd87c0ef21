use utoipa::OpenApi;

#[derive(OpenApi)]
/// Aggregated OpenAPI specification for Imposter Back.
#[openapi(
    paths(
        crate::routes::health::healthcheck,
        crate::routes::rooms::new_room,
        crate::routes::rooms::get_room,
        crate::routes::websocket::ws_handler,
    ),
    components(
        schemas(
            crate::dto::health::HealthResponse,
            crate::dto::health::NewRoomResponse,
            crate::dto::common::PublicGameView,
            crate::dto::common::PlayerSummary,
            crate::dto::ws::OutboundMessage,
            crate::dto::ws::JoinPayload,
            crate::dto::ws::ChatPayload,
            crate::dto::ws::VotePayload,
            crate::dto::ws::AnswerPayload,
            crate::dto::ws::ForcePhasePayload,
            crate::state::game::RoundResults,
            crate::state::state_machine::GamePhase,
        )
    ),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "rooms", description = "Room codes and read-only room state"),
        (name = "game", description = "WebSocket game protocol"),
    )
)]
pub struct ApiDoc;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_covers_rooms_and_round_results() {
        let doc = ApiDoc::openapi();
        assert!(doc.paths.paths.contains_key("/rooms/{code}"));
        assert!(doc.paths.paths.contains_key("/health"));

        let json = doc.to_json().unwrap();
        assert!(json.contains("\"RoundResults\""));
        assert!(json.contains("\"PublicGameView\""));
        assert!(json.contains("voteCounts"));
    }
}
