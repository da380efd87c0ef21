//! Inbound envelope pipeline: decode, freshness, catalog lookup, authentication,
//! schema validation, then dispatch to the owning service.

use serde_json::{Map, Value};
use tracing::debug;
use uuid::Uuid;

use crate::{
    config::AppConfig,
    dto::{
        now_ms,
        ws::{EmptyPayload, InboundKind, InboundMessage, OutboundMessage},
    },
    error::{ProtocolError, ServiceError},
    services::{connection_service, game_service},
    state::{SharedState, connections::Binding},
};

/// Decode and validate one text frame.
///
/// `joined` tells whether the sending connection is bound to a player.
pub fn parse_frame(
    state: &SharedState,
    text: &str,
    joined: bool,
) -> Result<InboundMessage, ProtocolError> {
    let value: Value = serde_json::from_str(text)
        .map_err(|err| ProtocolError::MalformedPayload(err.to_string()))?;
    let Value::Object(mut envelope) = value else {
        return Err(ProtocolError::MalformedPayload(
            "expected a JSON object".into(),
        ));
    };

    let kind_name = match envelope.remove("type") {
        Some(Value::String(name)) => name,
        _ => {
            return Err(ProtocolError::MalformedPayload(
                "missing string field `type`".into(),
            ));
        }
    };
    let payload = match envelope.remove("payload") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(payload)) => payload,
        Some(_) => {
            return Err(ProtocolError::MalformedPayload(
                "`payload` must be an object".into(),
            ));
        }
    };

    check_timestamp(&state.config(), envelope.get("timestamp"), now_ms())?;

    let kind = InboundKind::parse(&kind_name)
        .ok_or_else(|| ProtocolError::UnknownMessageType(kind_name.clone()))?;
    let schema = state.catalog().schema(kind);
    if schema.requires_player && !joined {
        return Err(ProtocolError::AuthenticationRequired(kind_name));
    }
    schema.validate(&payload)?;

    InboundMessage::decode(kind, payload)
}

/// Accept timestamps within `[now - max_age, now + max_skew]`, in epoch milliseconds.
fn check_timestamp(config: &AppConfig, value: Option<&Value>, now: u64) -> Result<(), ProtocolError> {
    let stamp = value
        .and_then(Value::as_f64)
        .ok_or(ProtocolError::StaleOrInvalidTimestamp)?;
    let now = now as f64;
    let oldest = now - config.timestamp_max_age.as_millis() as f64;
    let newest = now + config.timestamp_max_skew.as_millis() as f64;
    if (oldest..=newest).contains(&stamp) {
        Ok(())
    } else {
        Err(ProtocolError::StaleOrInvalidTimestamp)
    }
}

/// Process one text frame from `connection_id`.
///
/// Any failure is answered with a single `error` envelope to the sender; the
/// connection stays open.
pub async fn handle_frame(state: &SharedState, connection_id: Uuid, text: &str) {
    let binding = state.connections().binding(&connection_id);
    let result = match parse_frame(state, text, binding.is_some()) {
        Ok(message) => {
            state.connections().touch(&connection_id);
            dispatch(state, connection_id, binding, message).await
        }
        Err(err) => Err(err.into()),
    };

    if let Err(err) = result {
        debug!(connection = %connection_id, code = err.code(), error = %err, "inbound message rejected");
        connection_service::send_to_connection(
            state,
            connection_id,
            &OutboundMessage::error(err.to_string(), err.code()),
        );
    }
}

fn joined(binding: &Option<Binding>, kind: InboundKind) -> Result<&Binding, ServiceError> {
    binding
        .as_ref()
        .ok_or_else(|| ProtocolError::AuthenticationRequired(kind.as_str().into()).into())
}

async fn dispatch(
    state: &SharedState,
    connection_id: Uuid,
    binding: Option<Binding>,
    message: InboundMessage,
) -> Result<(), ServiceError> {
    match message {
        InboundMessage::Ping => {
            connection_service::send_to_connection(
                state,
                connection_id,
                &OutboundMessage::Pong(EmptyPayload {}),
            );
            Ok(())
        }
        InboundMessage::Pong => Ok(()),
        InboundMessage::Join(request) => {
            connection_service::add_player(state, connection_id, request).await
        }
        InboundMessage::Leave => connection_service::leave(state, connection_id).await,
        InboundMessage::ToggleReady => {
            let player = joined(&binding, InboundKind::ToggleReady)?;
            connection_service::toggle_ready(state, player).await
        }
        InboundMessage::StartGame => {
            let player = joined(&binding, InboundKind::StartGame)?;
            game_service::start_game(state, &player.room_code).await
        }
        InboundMessage::Chat(chat) => {
            let player = joined(&binding, InboundKind::Chat)?;
            game_service::chat(state, player, chat.message).await
        }
        InboundMessage::Vote(vote) => {
            let player = joined(&binding, InboundKind::Vote)?;
            game_service::handle_vote(state, player, &vote.target_id).await
        }
        InboundMessage::SubmitAnswer(answer) => {
            let player = joined(&binding, InboundKind::SubmitAnswer)?;
            game_service::submit_answer(state, player, answer.answer).await
        }
        InboundMessage::NewGame => {
            let player = joined(&binding, InboundKind::NewGame)?;
            game_service::new_game(state, &player.room_code).await
        }
        InboundMessage::ForcePhaseTransition(force) => {
            let player = joined(&binding, InboundKind::ForcePhaseTransition)?;
            game_service::force_phase(state, &player.room_code, force.phase).await
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use axum::extract::ws::Message;
    use futures::future::BoxFuture;
    use serde_json::json;
    use tokio::{sync::mpsc, time::sleep};

    use super::*;
    use crate::{
        dao::{
            mirror::SessionMirror,
            models::{ChatEntity, PlayerEntity, SessionEntity, VoteEntity},
            storage::StorageResult,
        },
        services::heartbeat,
        state::{AppState, state_machine::GamePhase},
    };

    struct Client {
        id: Uuid,
        rx: mpsc::UnboundedReceiver<Message>,
    }

    impl Client {
        fn connect(state: &SharedState) -> Self {
            let (tx, rx) = mpsc::unbounded_channel();
            let id = connection_service::register_connection(state, tx);
            Self { id, rx }
        }

        async fn send(&self, state: &SharedState, kind: &str, payload: Value) {
            let frame = json!({"type": kind, "payload": payload, "timestamp": now_ms()});
            handle_frame(state, self.id, &frame.to_string()).await;
        }

        async fn join(&self, state: &SharedState, player_id: &str, room_code: &str) {
            self.send(
                state,
                "join",
                json!({"playerName": player_id.to_uppercase(), "roomCode": room_code, "playerId": player_id}),
            )
            .await;
        }

        /// Every envelope received so far, oldest first. Close frames show up as `{"type": "close"}`.
        fn drain(&mut self) -> Vec<Value> {
            let mut received = Vec::new();
            while let Ok(frame) = self.rx.try_recv() {
                match frame {
                    Message::Text(text) => received.push(serde_json::from_str(text.as_str()).unwrap()),
                    Message::Close(_) => received.push(json!({"type": "close"})),
                    _ => {}
                }
            }
            received
        }

        fn of_type(&mut self, kind: &str) -> Vec<Value> {
            self.drain()
                .into_iter()
                .filter(|envelope| envelope["type"] == kind)
                .collect()
        }

        fn last_error_code(&mut self) -> Option<String> {
            self.of_type("error")
                .last()
                .and_then(|envelope| envelope["payload"]["code"].as_str().map(str::to_string))
        }
    }

    fn test_state() -> SharedState {
        AppState::new(AppConfig {
            start_countdown: Duration::ZERO,
            ..AppConfig::default()
        })
    }

    async fn phase_of(state: &SharedState, room_code: &str) -> GamePhase {
        let room = state.rooms().get(room_code).expect("room exists");
        let inner = room.lock().await;
        inner.machine.phase()
    }

    async fn generation_of(state: &SharedState, room_code: &str) -> u64 {
        let room = state.rooms().get(room_code).expect("room exists");
        let inner = room.lock().await;
        inner.machine.version()
    }

    async fn lobby(state: &SharedState, ids: &[&str]) -> Vec<Client> {
        let mut clients = Vec::new();
        for id in ids {
            let client = Client::connect(state);
            client.join(state, id, "123").await;
            clients.push(client);
        }
        for client in clients.iter_mut() {
            client.drain();
        }
        clients
    }

    #[tokio::test(start_paused = true)]
    async fn full_round_in_room_123() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b", "c"]).await;

        for client in &clients {
            client.send(&state, "toggle_ready", json!({})).await;
        }
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
        let imposter = state.rooms().get("123").unwrap().lock().await.session.imposter_id.clone().unwrap();

        // Each player learns their own role only.
        let mut imposters_told = 0;
        for client in clients.iter_mut() {
            let roles = client.of_type("role_assignment");
            assert_eq!(roles.len(), 1);
            if roles[0]["payload"]["isImposter"] == true {
                imposters_told += 1;
            }
        }
        assert_eq!(imposters_told, 1);

        for (client, answer) in clients.iter().zip(["blue", "green", "red"]) {
            client.send(&state, "submit_answer", json!({"answer": answer})).await;
        }
        assert_eq!(phase_of(&state, "123").await, GamePhase::Discussion);

        clients[0].send(&state, "chat", json!({"message": "hello"})).await;
        for client in clients[1..].iter_mut() {
            let chat = client.of_type("chat_message");
            assert_eq!(chat.len(), 1);
            assert_eq!(chat[0]["payload"]["message"], "hello");
            assert_eq!(chat[0]["payload"]["playerId"], "a");
            assert_eq!(chat[0]["payload"]["playerName"], "A");
        }

        sleep(state.config().discussion_duration + Duration::from_millis(500)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Voting);
        for client in clients.iter_mut() {
            client.drain();
        }

        clients[0].send(&state, "vote", json!({"targetId": "b"})).await;
        clients[2].send(&state, "vote", json!({"targetId": "b"})).await;
        let progress = clients[1].of_type("vote_progress");
        assert_eq!(progress.last().unwrap()["payload"]["votesReceived"], 2);
        assert_eq!(progress.last().unwrap()["payload"]["totalPlayers"], 3);
        assert!(progress.iter().all(|p| p["payload"].get("targetId").is_none()));

        clients[1].send(&state, "vote", json!({"targetId": "a"})).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Results);

        let changes = clients[0].of_type("phase_change");
        let results = &changes.last().unwrap()["payload"]["gameState"]["results"];
        assert_eq!(results["mostVotedPlayer"], "b");
        assert_eq!(results["voteCounts"]["b"], 2);
        assert_eq!(results["voteCounts"]["a"], 1);
        assert_eq!(results["totalVotes"], 3);
        assert_eq!(results["imposterId"], imposter.as_str());
        assert_eq!(results["playersWin"], imposter == "b");

        sleep(state.config().results_duration + Duration::from_millis(500)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Waiting);
        let room = state.rooms().get("123").unwrap();
        let inner = room.lock().await;
        assert!(inner.active_players().all(|player| !player.ready));
        assert!(inner.session.imposter_id.is_none());
    }

    #[tokio::test]
    async fn malformed_room_code_creates_nothing() {
        let state = test_state();
        let mut client = Client::connect(&state);
        client.join(&state, "a", "12").await;

        assert_eq!(client.last_error_code().as_deref(), Some("INVALID_ROOM_CODE"));
        assert!(state.rooms().is_empty());
        assert!(state.connections().binding(&client.id).is_none());
    }

    #[tokio::test]
    async fn pipeline_rejections_use_stable_codes() {
        let state = test_state();
        let mut client = Client::connect(&state);
        client.drain();

        handle_frame(&state, client.id, "not json").await;
        assert_eq!(client.last_error_code().as_deref(), Some("MALFORMED_PAYLOAD"));

        handle_frame(&state, client.id, r#"{"type": "ping"}"#).await;
        assert_eq!(client.last_error_code().as_deref(), Some("STALE_OR_INVALID_TIMESTAMP"));

        let stale = json!({"type": "ping", "payload": {}, "timestamp": now_ms() - 600_000});
        handle_frame(&state, client.id, &stale.to_string()).await;
        assert_eq!(client.last_error_code().as_deref(), Some("STALE_OR_INVALID_TIMESTAMP"));

        client.send(&state, "dance", json!({})).await;
        assert_eq!(client.last_error_code().as_deref(), Some("UNKNOWN_MESSAGE_TYPE"));

        client.send(&state, "chat", json!({"message": "hi"})).await;
        assert_eq!(client.last_error_code().as_deref(), Some("AUTHENTICATION_REQUIRED"));

        client.send(&state, "join", json!({"roomCode": "123"})).await;
        assert_eq!(client.last_error_code().as_deref(), Some("SCHEMA_VIOLATION"));

        let long_name = "x".repeat(state.config().max_name_length + 1);
        client
            .send(&state, "join", json!({"playerName": long_name, "roomCode": "123"}))
            .await;
        assert_eq!(client.last_error_code().as_deref(), Some("MESSAGE_TOO_LONG"));

        client.send(&state, "ping", json!({})).await;
        let replies = client.drain();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0]["type"], "pong");
        assert!(state.rooms().is_empty());
    }

    #[tokio::test]
    async fn phase_gates_are_enforced() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b"]).await;

        clients[0].send(&state, "chat", json!({"message": "hi"})).await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("INVALID_PHASE"));

        clients[0].send(&state, "vote", json!({"targetId": "b"})).await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("INVALID_PHASE"));

        clients[0].send(&state, "new_game", json!({})).await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("INVALID_PHASE"));

        clients[0].send(&state, "start_game", json!({})).await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("INSUFFICIENT_PLAYERS"));
        assert_eq!(phase_of(&state, "123").await, GamePhase::Waiting);
        assert!(clients[1].of_type("chat_message").is_empty());
    }

    #[tokio::test]
    async fn duplicate_and_unknown_votes_are_refused() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b", "c"]).await;
        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "voting"}))
            .await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Voting);

        clients[0].send(&state, "vote", json!({"targetId": "zed"})).await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("SCHEMA_VIOLATION"));

        clients[0].send(&state, "vote", json!({"targetId": "b"})).await;
        clients[0].send(&state, "vote", json!({"targetId": "c"})).await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("DUPLICATE_VOTE"));

        let room = state.rooms().get("123").unwrap();
        assert_eq!(room.lock().await.session.votes.len(), 1);
    }

    #[tokio::test]
    async fn forced_transitions_bypass_the_cycle() {
        let state = test_state();
        let mut clients = lobby(&state, &["a"]).await;
        let before = generation_of(&state, "123").await;

        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "results"}))
            .await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Results);
        let change = clients[0].of_type("phase_change");
        assert_eq!(change[0]["payload"]["phase"], "results");
        assert_eq!(change[0]["payload"]["previousPhase"], "waiting");
        assert_eq!(generation_of(&state, "123").await, before + 1);

        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "question"}))
            .await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
        {
            let room = state.rooms().get("123").unwrap();
            let inner = room.lock().await;
            assert_eq!(inner.session.imposter_id.as_deref(), Some("a"));
        }

        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "lobby"}))
            .await;
        assert_eq!(clients[0].last_error_code().as_deref(), Some("SCHEMA_VIOLATION"));
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn stale_question_timer_does_not_skip_discussion() {
        let state = test_state();
        let clients = lobby(&state, &["a", "b", "c"]).await;
        clients[0].send(&state, "start_game", json!({})).await;
        for client in &clients {
            client.send(&state, "submit_answer", json!({"answer": "x"})).await;
        }
        assert_eq!(phase_of(&state, "123").await, GamePhase::Discussion);

        // Past the question timeout but well inside the discussion.
        sleep(state.config().question_duration + Duration::from_secs(1)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Discussion);
    }

    #[tokio::test(start_paused = true)]
    async fn countdown_start_rechecks_readiness() {
        let state = AppState::new(AppConfig::default());
        let mut clients = lobby(&state, &["a", "b", "c"]).await;
        for client in &clients {
            client.send(&state, "toggle_ready", json!({})).await;
        }
        let starting = clients[1].of_type("game_starting");
        assert_eq!(starting.len(), 1);
        assert_eq!(starting[0]["payload"]["countdown"], 3);
        assert_eq!(phase_of(&state, "123").await, GamePhase::Waiting);

        // Someone backs out before the countdown ends.
        clients[2].send(&state, "toggle_ready", json!({})).await;
        sleep(Duration::from_secs(4)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Waiting);

        clients[2].send(&state, "toggle_ready", json!({})).await;
        sleep(Duration::from_secs(4)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn readiness_change_restarts_the_countdown() {
        let state = AppState::new(AppConfig::default());
        let mut clients = lobby(&state, &["a", "b", "c"]).await;
        for client in &clients {
            client.send(&state, "toggle_ready", json!({})).await;
        }

        sleep(Duration::from_secs(2)).await;
        clients[2].send(&state, "toggle_ready", json!({})).await;
        clients[2].send(&state, "toggle_ready", json!({})).await;
        assert_eq!(clients[0].of_type("game_starting").len(), 2);

        // The first countdown would have fired at 3s; the round follows the last announcement.
        sleep(Duration::from_secs(2)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Waiting);
        sleep(Duration::from_millis(1_500)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
        assert_eq!(clients[1].of_type("phase_change").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn departure_keeps_the_running_countdown() {
        let state = AppState::new(AppConfig::default());
        let mut clients = lobby(&state, &["a", "b", "c", "d"]).await;
        for client in &clients {
            client.send(&state, "toggle_ready", json!({})).await;
        }

        sleep(Duration::from_secs(1)).await;
        connection_service::remove_connection(state.clone(), clients[3].id).await;
        assert_eq!(clients[0].of_type("game_starting").len(), 1);

        sleep(Duration::from_millis(2_100)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
    }

    #[tokio::test(start_paused = true)]
    async fn voting_timeout_scores_partial_ballots() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b", "c"]).await;
        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "voting"}))
            .await;
        clients[0].send(&state, "vote", json!({"targetId": "b"})).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Voting);

        sleep(state.config().voting_duration + Duration::from_secs(1)).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Results);

        let changes = clients[1].of_type("phase_change");
        let results = &changes.last().unwrap()["payload"]["gameState"]["results"];
        assert_eq!(results["voteCounts"], json!({"b": 1}));
        assert_eq!(results["totalVotes"], 1);
        assert_eq!(results["mostVotedPlayer"], "b");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_evicts_only_that_connection() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b", "c"]).await;
        let gone = clients.pop().unwrap();
        let gone_id = gone.id;
        drop(gone);

        clients[0].send(&state, "toggle_ready", json!({})).await;
        sleep(Duration::from_millis(10)).await;

        assert!(!state.connections().contains(&gone_id));
        assert!(state.connections().contains(&clients[1].id));

        let updates = clients[1].of_type("player_list_update");
        assert_eq!(updates.len(), 2);
        assert_eq!(updates[0]["payload"]["totalPlayers"], 3);
        assert_eq!(updates[0]["payload"]["players"][0]["ready"], true);
        assert_eq!(updates[1]["payload"]["totalPlayers"], 2);
    }

    #[tokio::test(start_paused = true)]
    async fn discussion_countdown_ticks_until_voting() {
        let state = test_state();
        let mut clients = lobby(&state, &["a"]).await;
        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "discussion"}))
            .await;
        let ends_at = {
            let room = state.rooms().get("123").unwrap();
            let inner = room.lock().await;
            inner.session.discussion_ends_at.unwrap()
        };

        sleep(Duration::from_millis(3_500)).await;
        let ticks = clients[0].of_type("discussion_timer");
        assert_eq!(ticks.len(), 3);
        for tick in &ticks {
            assert_eq!(tick["payload"]["discussionEndsAt"], ends_at);
            let remaining = tick["payload"]["timeRemaining"].as_u64().unwrap();
            assert!(remaining > 0 && remaining <= 120);
        }

        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "voting"}))
            .await;
        clients[0].drain();
        sleep(Duration::from_secs(3)).await;
        assert!(clients[0].of_type("discussion_timer").is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_sweep_evicts_silent_connections() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b", "c"]).await;

        sleep(Duration::from_secs(40)).await;
        clients[0].send(&state, "pong", json!({})).await;
        clients[1].send(&state, "pong", json!({})).await;
        sleep(Duration::from_secs(30)).await;

        assert_eq!(heartbeat::sweep_stale_connections(&state).await, 1);
        assert!(!state.connections().contains(&clients[2].id));

        let updates = clients[0].of_type("player_list_update");
        let last = &updates.last().unwrap()["payload"];
        assert_eq!(last["totalPlayers"], 2);
        assert!(
            last["players"]
                .as_array()
                .unwrap()
                .iter()
                .all(|player| player["id"] != "c")
        );
        assert_eq!(clients[2].drain().last().unwrap()["type"], "close");
    }

    #[tokio::test]
    async fn removing_a_player_twice_is_harmless() {
        let state = test_state();
        let mut clients = lobby(&state, &["a", "b"]).await;

        assert!(connection_service::remove_player(&state, "a").await);
        assert!(!connection_service::remove_player(&state, "a").await);

        assert_eq!(clients[1].of_type("player_list_update").len(), 1);
        let room = state.rooms().get("123").unwrap();
        let inner = room.lock().await;
        assert_eq!(inner.active_count(), 1);
        assert_eq!(inner.membership.host(), Some("b"));
    }

    #[tokio::test]
    async fn last_departure_closes_the_room() {
        let state = test_state();
        let clients = lobby(&state, &["a"]).await;
        clients[0].send(&state, "leave", json!({})).await;
        assert!(state.rooms().get("123").is_none());
        assert!(state.connections().contains(&clients[0].id));
        assert!(state.connections().binding(&clients[0].id).is_none());
    }

    #[tokio::test]
    async fn reconnect_supersedes_the_previous_connection() {
        let state = test_state();
        let mut first = Client::connect(&state);
        first.join(&state, "a", "123").await;
        let mut second = Client::connect(&state);
        second.join(&state, "a", "123").await;

        assert_eq!(first.drain().last().unwrap()["type"], "close");
        let joined = second.of_type("join_success");
        assert_eq!(joined[0]["payload"]["playerId"], "a");
        assert_eq!(joined[0]["playerId"], "a");

        // The superseded socket going away leaves the player in place.
        connection_service::remove_connection(state.clone(), first.id).await;
        let room = state.rooms().get("123").unwrap();
        let inner = room.lock().await;
        assert_eq!(inner.active_count(), 1);
        assert_eq!(inner.players["a"].connection_id, Some(second.id));
    }

    #[tokio::test]
    async fn player_id_from_another_room_is_not_reused() {
        let state = test_state();
        let first = Client::connect(&state);
        first.join(&state, "a", "123").await;
        let mut other = Client::connect(&state);
        other.join(&state, "a", "456").await;

        let joined = other.of_type("join_success");
        assert_ne!(joined[0]["payload"]["playerId"], "a");
        assert_eq!(state.connections().player_room("a").as_deref(), Some("123"));
    }

    #[tokio::test]
    async fn departing_voter_ballot_is_withdrawn() {
        let state = test_state();
        let clients = lobby(&state, &["a", "b", "c"]).await;
        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "voting"}))
            .await;
        clients[0].send(&state, "vote", json!({"targetId": "b"})).await;
        clients[1].send(&state, "vote", json!({"targetId": "a"})).await;

        connection_service::remove_connection(state.clone(), clients[0].id).await;
        {
            let room = state.rooms().get("123").unwrap();
            let inner = room.lock().await;
            assert_eq!(inner.machine.phase(), GamePhase::Voting);
            assert_eq!(inner.session.votes.len(), 1);
        }

        // The remaining two ballots complete the vote.
        clients[2].send(&state, "vote", json!({"targetId": "b"})).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Results);
    }

    struct StuckMirror;

    impl SessionMirror for StuckMirror {
        fn upsert_session(&self, _: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(futures::future::pending())
        }
        fn upsert_player(&self, _: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(futures::future::pending())
        }
        fn record_vote(&self, _: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(futures::future::pending())
        }
        fn record_chat(&self, _: ChatEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(futures::future::pending())
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(futures::future::pending())
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(futures::future::pending())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stuck_mirror_never_blocks_transitions() {
        let state = test_state();
        state.install_mirror(Arc::new(StuckMirror)).await;
        let mut clients = lobby(&state, &["a", "b", "c"]).await;

        clients[0].send(&state, "start_game", json!({})).await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Question);
        assert_eq!(clients[1].of_type("phase_change").len(), 1);

        // Writes time out in the background; the room keeps going.
        sleep(state.config().mirror_timeout * 2).await;
        clients[0]
            .send(&state, "force_phase_transition", json!({"phase": "voting"}))
            .await;
        assert_eq!(phase_of(&state, "123").await, GamePhase::Voting);
    }

    #[test]
    fn timestamp_window_is_inclusive() {
        let config = AppConfig::default();
        let now = 1_000_000_000;
        let age = config.timestamp_max_age.as_millis() as u64;
        let skew = config.timestamp_max_skew.as_millis() as u64;

        assert!(check_timestamp(&config, Some(&json!(now)), now).is_ok());
        assert!(check_timestamp(&config, Some(&json!(now - age)), now).is_ok());
        assert!(check_timestamp(&config, Some(&json!(now + skew)), now).is_ok());
        assert!(check_timestamp(&config, Some(&json!(now - age - 1)), now).is_err());
        assert!(check_timestamp(&config, Some(&json!(now + skew + 1)), now).is_err());
        assert!(check_timestamp(&config, Some(&json!("now")), now).is_err());
        assert!(check_timestamp(&config, None, now).is_err());
    }
}
