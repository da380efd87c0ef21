use tracing::{debug, warn};

use crate::{
    dto::health::HealthResponse,
    state::{SharedState, state_machine::GamePhase},
};

/// Build the health payload, pinging the session mirror on the way.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.mirror().await {
        Some(mirror) => {
            match tokio::time::timeout(state.config().mirror_timeout, mirror.health_check()).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "session mirror health check failed"),
                Err(_) => warn!("session mirror health check timed out"),
            }
        }
        None => debug!("no session mirror installed (degraded mode)"),
    }

    let degraded = state.is_degraded();
    HealthResponse {
        status: if degraded { "degraded" } else { "ok" }.to_string(),
        uptime: state.started_at().elapsed().as_secs(),
        connections: state.connections().len(),
        game_phase: oldest_room_phase(state).await,
        rooms: state.rooms().len(),
        degraded,
    }
}

/// Phase of the longest-lived room, `waiting` when no room is live.
async fn oldest_room_phase(state: &SharedState) -> GamePhase {
    let Some(room) = state
        .rooms()
        .all()
        .into_iter()
        .min_by_key(|room| room.created_at())
    else {
        return GamePhase::Waiting;
    };
    let inner = room.lock().await;
    inner.machine.phase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test]
    async fn empty_server_reports_waiting_and_degraded() {
        let state = AppState::new(AppConfig::default());
        let health = health_status(&state).await;
        assert_eq!(health.status, "degraded");
        assert!(health.degraded);
        assert_eq!(health.game_phase, GamePhase::Waiting);
        assert_eq!(health.rooms, 0);
        assert_eq!(health.connections, 0);
    }

    #[tokio::test]
    async fn phase_comes_from_the_oldest_room() {
        let state = AppState::new(AppConfig::default());
        let first = state.rooms().ensure_room("100").unwrap();
        first.lock().await.machine.force(GamePhase::Voting);
        std::thread::sleep(std::time::Duration::from_millis(2));
        state.rooms().ensure_room("200").unwrap();

        let health = health_status(&state).await;
        assert_eq!(health.game_phase, GamePhase::Voting);
        assert_eq!(health.rooms, 2);
    }
}
