use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{mirror::SessionMirror, storage::StorageError},
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Keep a session mirror installed, flipping degraded mode as it comes and goes.
///
/// `connect` is retried with exponential backoff. Once a mirror is installed
/// it is polled; after a failed health check a few reconnects are attempted
/// before the mirror is dropped and `connect` starts over.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionMirror>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        let mirror = match connect().await {
            Ok(mirror) => mirror,
            Err(err) => {
                warn!(error = %err, "session mirror connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
                continue;
            }
        };

        state.install_mirror(mirror.clone()).await;
        info!("session mirror connected; leaving degraded mode");
        delay = INITIAL_DELAY;

        while watch_health(&state, mirror.as_ref()).await {
            sleep(HEALTH_POLL_INTERVAL).await;
        }

        warn!("session mirror lost; staying in degraded mode until it reconnects");
        state.clear_mirror().await;
        sleep(delay).await;
        delay = (delay * 2).min(MAX_DELAY);
    }
}

/// One health poll. Returns false once the mirror is considered gone.
async fn watch_health(state: &SharedState, mirror: &dyn SessionMirror) -> bool {
    if mirror.health_check().await.is_ok() {
        if state.is_degraded() {
            info!("session mirror healthy again; leaving degraded mode");
            state.update_degraded(false);
        }
        return true;
    }

    let mut reconnect_delay = INITIAL_DELAY;
    for attempt in 0..MAX_RECONNECT_ATTEMPTS {
        match mirror.try_reconnect().await {
            Ok(()) => {
                info!(attempt, "session mirror reconnected after failed health check");
                state.update_degraded(false);
                return true;
            }
            Err(err) => {
                if attempt == 0 {
                    warn!(attempt, error = %err, "session mirror reconnect failed; entering degraded mode");
                    state.update_degraded(true);
                } else {
                    warn!(attempt, error = %err, "session mirror reconnect attempt failed");
                }
                sleep(reconnect_delay).await;
                reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use futures::future::BoxFuture;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::{
            models::{ChatEntity, PlayerEntity, SessionEntity, VoteEntity},
            storage::StorageResult,
        },
        state::AppState,
    };

    #[derive(Default)]
    struct FlakyMirror {
        healthy: AtomicBool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("down")]
    struct Down;

    impl FlakyMirror {
        fn status(&self) -> StorageResult<()> {
            if self.healthy.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(StorageError::unavailable("flaky", Down))
            }
        }
    }

    impl SessionMirror for FlakyMirror {
        fn upsert_session(&self, _: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn upsert_player(&self, _: PlayerEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn record_vote(&self, _: VoteEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn record_chat(&self, _: ChatEntity) -> BoxFuture<'static, StorageResult<()>> {
            Box::pin(async { Ok(()) })
        }
        fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
            let status = self.status();
            Box::pin(async move { status })
        }
        fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
            self.health_check()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn degraded_flag_follows_mirror_health() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded());

        let mirror = Arc::new(FlakyMirror::default());
        mirror.healthy.store(true, Ordering::SeqCst);
        let connects = Arc::new(AtomicUsize::new(0));

        let handle = {
            let mirror = mirror.clone();
            let connects = connects.clone();
            tokio::spawn(run(state.clone(), move || {
                let mirror = mirror.clone();
                connects.fetch_add(1, Ordering::SeqCst);
                async move { Ok(mirror as Arc<dyn SessionMirror>) }
            }))
        };

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());
        assert!(state.mirror().await.is_some());

        mirror.healthy.store(false, Ordering::SeqCst);
        sleep(HEALTH_POLL_INTERVAL + Duration::from_millis(10)).await;
        assert!(state.is_degraded());

        mirror.healthy.store(true, Ordering::SeqCst);
        sleep(MAX_DELAY * 3).await;
        assert!(!state.is_degraded());
        assert!(connects.load(Ordering::SeqCst) >= 1);

        handle.abort();
    }
}
