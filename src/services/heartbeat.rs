//! Process-wide liveness loop: probe every connection, evict the silent ones.

use axum::extract::ws::Message;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::info;

use crate::{
    dto::ws::{EmptyPayload, OutboundMessage},
    services::connection_service,
    state::SharedState,
};

/// Run forever, probing and sweeping every `heartbeat_interval`.
pub async fn run(state: SharedState) {
    let period = state.config().heartbeat_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        probe(&state);
        let evicted = sweep_stale_connections(&state).await;
        if evicted > 0 {
            info!(evicted, remaining = state.connections().len(), "heartbeat sweep evicted connections");
        }
    }
}

/// Send a `ping` envelope to every open connection.
pub fn probe(state: &SharedState) -> usize {
    connection_service::broadcast_to_all(state, &OutboundMessage::Ping(EmptyPayload {}))
}

/// Close and remove every connection whose last heartbeat is older than `heartbeat_timeout`.
pub async fn sweep_stale_connections(state: &SharedState) -> usize {
    let stale = state.connections().stale(state.config().heartbeat_timeout);
    for connection_id in &stale {
        info!(connection = %connection_id, "evicting unresponsive connection");
        if let Some(tx) = state.connections().sender(connection_id) {
            let _ = tx.send(Message::Close(None));
        }
        connection_service::remove_connection(state.clone(), *connection_id).await;
    }
    stale.len()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::{sync::mpsc, time::sleep};

    use super::*;
    use crate::{config::AppConfig, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn probe_reaches_every_connection_and_loop_sweeps() {
        let state = AppState::new(AppConfig::default());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = connection_service::register_connection(&state, tx);
        while rx.try_recv().is_ok() {}

        assert_eq!(probe(&state), 1);
        match rx.try_recv() {
            Ok(Message::Text(text)) => assert!(text.as_str().contains("\"type\":\"ping\"")),
            other => panic!("expected a ping, got {other:?}"),
        }

        let looper = tokio::spawn(run(state.clone()));
        // The 90s sweep is the first one past the 60s timeout.
        sleep(Duration::from_secs(61)).await;
        assert!(state.connections().contains(&id));
        sleep(Duration::from_secs(30)).await;
        assert!(!state.connections().contains(&id));
        looper.abort();
    }
}
