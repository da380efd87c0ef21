//! Per-room session coordination: rounds, phase timers, answers, votes and results.
//!
//! Every function that mutates a room runs with the room lock held and is
//! synchronous, so a phase transition and its broadcast can never interleave
//! with another step on the same room. Timers re-acquire the lock when they
//! fire and only act if the phase generation they were armed under is still
//! current.

use std::sync::Arc;

use rand::{Rng, seq::IndexedRandom};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{ChatEntity, SessionEntity, VoteEntity},
    dto::{
        common::PublicGameView,
        now_ms,
        ws::{
            AnswerProgress, ChatBroadcast, DiscussionTimer, GameStarting, OutboundMessage,
            PhaseChange, RoleAssignment, VoteProgress,
        },
    },
    error::{ProtocolError, ServiceError},
    services::{connection_service, mirror_service},
    state::{
        SharedState,
        connections::Binding,
        game::Vote,
        rooms::{Room, RoomInner},
        state_machine::{GameEvent, GamePhase, Transition},
    },
};

/// Run `f` with the lock of a live room held.
pub async fn with_room<R>(
    state: &SharedState,
    room_code: &str,
    f: impl FnOnce(&Arc<Room>, &mut RoomInner) -> Result<R, ServiceError>,
) -> Result<R, ServiceError> {
    let room = state
        .rooms()
        .get(room_code)
        .ok_or_else(|| ServiceError::RoomNotFound(room_code.to_string()))?;
    let mut inner = room.lock().await;
    if inner.is_closed() {
        return Err(ServiceError::RoomNotFound(room_code.to_string()));
    }
    f(&room, &mut inner)
}

/// `start_game`: begin a round without waiting for everyone to be ready.
pub async fn start_game(state: &SharedState, room_code: &str) -> Result<(), ServiceError> {
    with_room(state, room_code, |room, inner| {
        start_round(state, room, inner).map(|_| ())
    })
    .await
}

/// Leave the lobby for a fresh question, drawing the imposter and the prompt.
pub fn start_round(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
) -> Result<Transition, ServiceError> {
    let phase = inner.machine.phase();
    if phase != GamePhase::Waiting {
        return Err(ServiceError::invalid_phase("start_game", phase));
    }

    let config = state.config();
    let active = inner.active_count();
    if active < config.min_players {
        return Err(ServiceError::InsufficientPlayers {
            required: config.min_players,
            actual: active,
        });
    }

    let seed = draw_round(inner, config.question_pool_size)?;
    let transition = inner.machine.apply(GameEvent::StartRound)?;
    enter_phase(state, room, inner, transition, Some(seed));
    Ok(transition)
}

/// Pick a question and an imposter uniformly among the active players.
fn draw_round(inner: &RoomInner, question_pool_size: u32) -> Result<(u32, String), ServiceError> {
    let mut rng = rand::rng();
    let candidates: Vec<&str> = inner
        .active_players()
        .map(|player| player.id.as_str())
        .collect();
    let imposter = candidates
        .choose(&mut rng)
        .ok_or(ServiceError::InsufficientPlayers {
            required: 1,
            actual: 0,
        })?;
    let question_id = rng.random_range(0..question_pool_size.max(1));
    Ok((question_id, imposter.to_string()))
}

/// Apply `event` to the room's machine and run the setup of the phase it leads to.
pub fn transition_phase(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
    event: GameEvent,
) -> Result<Transition, ServiceError> {
    let transition = inner.machine.apply(event)?;
    enter_phase(state, room, inner, transition, None);
    Ok(transition)
}

/// Jump straight to `phase`, bypassing the cycle.
///
/// Forcing the phase that is already current does nothing. Forcing `question`
/// always seeds a new round.
pub async fn force_phase(
    state: &SharedState,
    room_code: &str,
    phase: GamePhase,
) -> Result<(), ServiceError> {
    with_room(state, room_code, |room, inner| {
        let current = inner.machine.phase();
        if current == phase {
            debug!(room = %room.code(), %phase, "forced transition to the current phase ignored");
            return Ok(());
        }

        let seed = match phase {
            GamePhase::Question => Some(draw_round(inner, state.config().question_pool_size)?),
            _ => None,
        };
        let transition = inner.machine.force(phase);
        info!(room = %room.code(), from = %current, to = %phase, "phase transition forced");
        enter_phase(state, room, inner, transition, seed);
        Ok(())
    })
    .await
}

/// Cancel what the previous phase armed, set the new one up and tell the room.
fn enter_phase(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
    transition: Transition,
    seed: Option<(u32, String)>,
) {
    inner.timers.cancel_all();

    let config = state.config();
    let code = room.code().to_string();
    let generation = transition.version;

    match transition.to {
        GamePhase::Waiting => {
            inner.session.reset();
            for player in inner.players.values_mut() {
                player.ready = false;
            }
        }
        GamePhase::Question => {
            if let Some((question_id, imposter_id)) = seed {
                inner.session.begin_round(question_id, imposter_id);
            }
            inner.timers.after(
                config.question_duration,
                on_phase_timer(
                    state.clone(),
                    code.clone(),
                    generation,
                    GameEvent::QuestionElapsed,
                ),
            );
        }
        GamePhase::Discussion => {
            let ends_at = now_ms() + config.discussion_duration.as_millis() as u64;
            inner.session.discussion_ends_at = Some(ends_at);
            inner.timers.after(
                config.discussion_duration,
                on_phase_timer(
                    state.clone(),
                    code.clone(),
                    generation,
                    GameEvent::DiscussionElapsed,
                ),
            );
            let (tick_state, tick_code) = (state.clone(), code.clone());
            inner.timers.every(config.timer_tick_interval, move || {
                discussion_tick(tick_state.clone(), tick_code.clone(), generation)
            });
        }
        GamePhase::Voting => {
            inner.session.discussion_ends_at = None;
            inner.session.votes.clear();
            inner.session.results = None;
            inner.timers.after(
                config.voting_duration,
                on_phase_timer(
                    state.clone(),
                    code.clone(),
                    generation,
                    GameEvent::VotingElapsed,
                ),
            );
        }
        GamePhase::Results => {
            inner.session.discussion_ends_at = None;
            inner.session.results = Some(inner.session.calculate_results());
            inner.timers.after(
                config.results_duration,
                on_phase_timer(
                    state.clone(),
                    code.clone(),
                    generation,
                    GameEvent::ResultsElapsed,
                ),
            );
        }
    }

    info!(
        room = %code,
        from = %transition.from,
        to = %transition.to,
        generation,
        "phase changed"
    );

    mirror_service::upsert_session(state, room, SessionEntity::from_room(&code, inner));
    connection_service::broadcast_to_room(
        state,
        inner,
        &OutboundMessage::PhaseChange(PhaseChange {
            phase: transition.to,
            previous_phase: transition.from,
            game_state: PublicGameView::from_room(inner),
        }),
    );

    if transition.to == GamePhase::Question {
        send_role_assignments(state, inner);
    }
}

/// Tell each active player privately whether they are the imposter.
fn send_role_assignments(state: &SharedState, inner: &RoomInner) {
    let Some(question_id) = inner.session.question_id else {
        return;
    };
    let imposter = inner.session.imposter_id.as_deref();
    for player in inner.active_players() {
        let message = OutboundMessage::RoleAssignment(RoleAssignment {
            question_id,
            is_imposter: imposter == Some(player.id.as_str()),
        });
        connection_service::send_to_player(state, inner, &player.id, &message);
    }
}

/// Timer body: advance the room with `event` unless the phase moved on meanwhile.
async fn on_phase_timer(state: SharedState, room_code: String, generation: u64, event: GameEvent) {
    let Some(room) = state.rooms().get(&room_code) else {
        return;
    };
    let mut inner = room.lock().await;
    if inner.is_closed() || inner.machine.version() != generation {
        debug!(room = %room_code, generation, ?event, "ignoring stale phase timer");
        return;
    }
    if let Err(err) = transition_phase(&state, &room, &mut inner, event) {
        warn!(room = %room_code, error = %err, "phase timer could not advance the room");
    }
}

/// Broadcast the discussion countdown. Returns false once the ticker should stop.
async fn discussion_tick(state: SharedState, room_code: String, generation: u64) -> bool {
    let Some(room) = state.rooms().get(&room_code) else {
        return false;
    };
    let inner = room.lock().await;
    if inner.is_closed() || inner.machine.version() != generation {
        return false;
    }
    let Some(ends_at) = inner.session.discussion_ends_at else {
        return false;
    };

    let time_remaining = ends_at.saturating_sub(now_ms()).div_ceil(1_000);
    connection_service::broadcast_to_room(
        &state,
        &inner,
        &OutboundMessage::DiscussionTimer(DiscussionTimer {
            time_remaining,
            discussion_ends_at: ends_at,
        }),
    );
    time_remaining > 0
}

/// Whether the lobby is full of ready players.
fn ready_to_start(state: &SharedState, inner: &RoomInner) -> bool {
    inner.machine.phase() == GamePhase::Waiting
        && inner.active_count() >= state.config().min_players
        && inner.active_players().all(|player| player.ready)
}

/// Start a round once every active player is ready, after the configured countdown.
///
/// A lobby that stops being ready loses its countdown; one that stays ready
/// keeps the countdown already announced.
pub fn maybe_auto_start(state: &SharedState, room: &Arc<Room>, inner: &mut RoomInner) {
    if !ready_to_start(state, inner) {
        if inner.timers.cancel_countdown() {
            info!(room = %room.code(), "lobby no longer ready; countdown cancelled");
        }
        return;
    }
    if inner.timers.countdown_pending() {
        return;
    }

    let countdown = state.config().start_countdown;
    if countdown.is_zero() {
        if let Err(err) = start_round(state, room, inner) {
            warn!(room = %room.code(), error = %err, "automatic start failed");
        }
        return;
    }

    let seconds = countdown.as_secs_f64().ceil() as u64;
    info!(room = %room.code(), seconds, "all players ready; starting countdown");
    connection_service::broadcast_to_room(
        state,
        inner,
        &OutboundMessage::GameStarting(GameStarting {
            message: format!("All players are ready. The game starts in {seconds} seconds."),
            countdown: seconds,
        }),
    );

    let generation = inner.machine.version();
    inner.timers.arm_countdown(
        countdown,
        auto_start(state.clone(), room.code().to_string(), generation),
    );
}

async fn auto_start(state: SharedState, room_code: String, generation: u64) {
    let Some(room) = state.rooms().get(&room_code) else {
        return;
    };
    let mut inner = room.lock().await;
    if inner.is_closed() || inner.machine.version() != generation {
        return;
    }
    if !ready_to_start(&state, &inner) {
        debug!(room = %room_code, "countdown elapsed but the lobby is no longer ready");
        return;
    }
    if let Err(err) = start_round(&state, &room, &mut inner) {
        warn!(room = %room_code, error = %err, "automatic start failed");
    }
}

/// Record a ballot; results follow as soon as every active player voted.
pub async fn handle_vote(
    state: &SharedState,
    voter: &Binding,
    target_id: &str,
) -> Result<(), ServiceError> {
    with_room(state, &voter.room_code, |room, inner| {
        let phase = inner.machine.phase();
        if phase != GamePhase::Voting {
            return Err(ServiceError::invalid_phase("vote", phase));
        }
        if inner.session.has_voted(&voter.player_id) {
            return Err(ServiceError::DuplicateVote);
        }
        if !inner
            .players
            .get(target_id)
            .is_some_and(|player| player.active)
        {
            return Err(ProtocolError::schema("targetId", "not an active player of this room").into());
        }

        let vote = Vote {
            voter_id: voter.player_id.clone(),
            target_id: target_id.to_string(),
            timestamp: now_ms(),
        };
        inner.session.record_vote(vote.clone())?;
        debug!(room = %room.code(), voter = %vote.voter_id, "vote recorded");

        mirror_service::record_vote(state, VoteEntity::new(room.code(), &vote));
        broadcast_vote_progress(state, inner);
        close_voting_if_complete(state, room, inner)?;
        Ok(())
    })
    .await
}

fn broadcast_vote_progress(state: &SharedState, inner: &RoomInner) {
    let votes_received = inner.session.votes.len();
    let total_players = inner.active_count();
    connection_service::broadcast_to_room(
        state,
        inner,
        &OutboundMessage::VoteProgress(VoteProgress {
            votes_received,
            total_players,
            all_votes_received: total_players > 0 && votes_received >= total_players,
        }),
    );
}

fn close_voting_if_complete(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
) -> Result<(), ServiceError> {
    let total = inner.active_count();
    if total > 0 && inner.session.votes.len() >= total {
        transition_phase(state, room, inner, GameEvent::VotesCollected)?;
    }
    Ok(())
}

/// Store a player's answer; discussion opens once every active player answered.
pub async fn submit_answer(
    state: &SharedState,
    player: &Binding,
    answer: String,
) -> Result<(), ServiceError> {
    with_room(state, &player.room_code, |room, inner| {
        let phase = inner.machine.phase();
        if !matches!(phase, GamePhase::Question | GamePhase::Discussion) {
            return Err(ServiceError::invalid_phase("submit_answer", phase));
        }

        inner
            .session
            .answers
            .insert(player.player_id.clone(), answer);
        broadcast_answer_progress(state, inner);

        if phase == GamePhase::Question {
            close_question_if_complete(state, room, inner)?;
        }
        Ok(())
    })
    .await
}

fn answered_count(inner: &RoomInner) -> usize {
    inner
        .active_players()
        .filter(|player| inner.session.answers.contains_key(&player.id))
        .count()
}

fn broadcast_answer_progress(state: &SharedState, inner: &RoomInner) {
    connection_service::broadcast_to_room(
        state,
        inner,
        &OutboundMessage::AnswerProgress(AnswerProgress {
            answers_received: answered_count(inner),
            total_players: inner.active_count(),
        }),
    );
}

fn close_question_if_complete(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
) -> Result<(), ServiceError> {
    let total = inner.active_count();
    if total > 0 && answered_count(inner) >= total {
        transition_phase(state, room, inner, GameEvent::AnswersCollected)?;
    }
    Ok(())
}

/// Fan a chat line out to the room. Chat is open during discussion only.
pub async fn chat(state: &SharedState, author: &Binding, message: String) -> Result<(), ServiceError> {
    with_room(state, &author.room_code, |room, inner| {
        let phase = inner.machine.phase();
        if phase != GamePhase::Discussion {
            return Err(ServiceError::invalid_phase("chat", phase));
        }
        let player_name = inner
            .players
            .get(&author.player_id)
            .filter(|player| player.active)
            .map(|player| player.name.clone())
            .ok_or_else(|| ProtocolError::AuthenticationRequired("chat".into()))?;

        let line = ChatBroadcast {
            id: Uuid::new_v4(),
            player_id: author.player_id.clone(),
            player_name,
            message,
            timestamp: now_ms(),
        };

        mirror_service::record_chat(
            state,
            ChatEntity {
                id: line.id,
                room_code: room.code().to_string(),
                player_id: line.player_id.clone(),
                player_name: line.player_name.clone(),
                message: line.message.clone(),
                created_at: crate::dto::format_epoch_ms(line.timestamp),
            },
        );
        connection_service::broadcast_to_room(state, inner, &OutboundMessage::ChatMessage(line));
        Ok(())
    })
    .await
}

/// Leave the results screen for a fresh lobby.
pub async fn new_game(state: &SharedState, room_code: &str) -> Result<(), ServiceError> {
    with_room(state, room_code, |room, inner| {
        let phase = inner.machine.phase();
        if phase != GamePhase::Results {
            return Err(ServiceError::invalid_phase("new_game", phase));
        }
        transition_phase(state, room, inner, GameEvent::NewGame).map(|_| ())
    })
    .await
}

/// Keep the round consistent after `player_id` left the room.
///
/// Their ballot is withdrawn so the vote count never exceeds the active count,
/// and completion is re-checked since the remaining players may all be done.
pub fn on_player_removed(
    state: &SharedState,
    room: &Arc<Room>,
    inner: &mut RoomInner,
    player_id: &str,
) {
    let outcome = match inner.machine.phase() {
        GamePhase::Voting => {
            inner.session.withdraw_vote(player_id);
            broadcast_vote_progress(state, inner);
            close_voting_if_complete(state, room, inner)
        }
        GamePhase::Question => {
            broadcast_answer_progress(state, inner);
            close_question_if_complete(state, room, inner)
        }
        GamePhase::Waiting => {
            maybe_auto_start(state, room, inner);
            Ok(())
        }
        GamePhase::Discussion | GamePhase::Results => Ok(()),
    };

    if let Err(err) = outcome {
        warn!(room = %room.code(), player = %player_id, error = %err, "could not settle round after departure");
    }
}
