//! Fire-and-forget writes to the session mirror.
//!
//! Every write runs on its own task bounded by `mirror_timeout`; callers never
//! wait for it and failures only produce a warning. Session rows of one room
//! are written in generation order; player, vote and chat rows carry no
//! ordering guarantee.

use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::{
    dao::{
        mirror::SessionMirror,
        models::{ChatEntity, PlayerEntity, SessionEntity, VoteEntity},
        storage::{StorageError, StorageResult},
    },
    state::{SharedState, rooms::Room},
};

/// Mirror the session row of a room, skipping it if a newer generation already landed.
pub fn upsert_session(state: &SharedState, room: &Room, session: SessionEntity) {
    let gate = room.mirrored_generation();
    spawn_write(state, "upsert_session", move |mirror| -> BoxFuture<'static, StorageResult<()>> {
        Box::pin(async move {
            let mut last = gate.lock().await;
            if session.generation < *last {
                debug!(
                    room = %session.room_code,
                    generation = session.generation,
                    latest = *last,
                    "dropping out of date session row"
                );
                return Ok(());
            }
            let generation = session.generation;
            let result = mirror.upsert_session(session).await;
            if result.is_ok() {
                *last = generation;
            }
            result
        })
    });
}

/// Mirror a player's presence.
pub fn upsert_player(state: &SharedState, player: PlayerEntity) {
    spawn_write(state, "upsert_player", move |mirror| mirror.upsert_player(player));
}

/// Record a ballot.
pub fn record_vote(state: &SharedState, vote: VoteEntity) {
    spawn_write(state, "record_vote", move |mirror| mirror.record_vote(vote));
}

/// Record a chat line.
pub fn record_chat(state: &SharedState, chat: ChatEntity) {
    spawn_write(state, "record_chat", move |mirror| mirror.record_chat(chat));
}

fn spawn_write<F>(state: &SharedState, operation: &'static str, write: F)
where
    F: FnOnce(Arc<dyn SessionMirror>) -> BoxFuture<'static, StorageResult<()>> + Send + 'static,
{
    let state = state.clone();
    tokio::spawn(async move {
        let Some(mirror) = state.mirror().await else {
            debug!(operation, "no session mirror installed; skipping write");
            return;
        };

        let limit = state.config().mirror_timeout;
        let result = match tokio::time::timeout(limit, write(mirror)).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout {
                operation,
                elapsed: limit,
            }),
        };

        if let Err(err) = result {
            warn!(operation, error = %err, "session mirror write failed");
        }
    });
}
