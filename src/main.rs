//! Imposter Back binary entrypoint wiring the REST routes, the game WebSocket and the session mirror.

use std::{env, net::SocketAddr};

use anyhow::Context;
use axum::Router;
use tokio::net::TcpListener;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use imposter_back::{
    config::AppConfig,
    routes,
    services::heartbeat,
    state::{AppState, SharedState},
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let app_state = AppState::new(AppConfig::load());

    tokio::spawn(heartbeat::run(app_state.clone()));
    spawn_mirror_supervisor(&app_state);

    // Build the HTTP router once the shared state is ready.
    let app = build_router(app_state);

    let port = env::var("PORT")
        .or_else(|_| env::var("SERVER_PORT"))
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(8080);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(%addr, "starting server");

    let listener = TcpListener::bind(addr).await.context("binding server")?;
    let service = app.into_make_service();
    axum::serve(listener, service)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving axum")?;

    Ok(())
}

/// Start the session mirror supervisor when a mirror endpoint is configured.
#[cfg(feature = "rest-mirror")]
fn spawn_mirror_supervisor(state: &SharedState) {
    use std::sync::Arc;

    use imposter_back::{
        dao::{
            mirror::{
                SessionMirror,
                rest::{RestMirror, RestMirrorConfig},
            },
            storage::StorageError,
        },
        services::storage_supervisor,
    };

    if !RestMirrorConfig::is_configured() {
        info!("no session mirror configured; running in degraded mode");
        return;
    }
    let config = match RestMirrorConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            info!(error = %err, "no session mirror configured; running in degraded mode");
            return;
        }
    };

    tokio::spawn(storage_supervisor::run(state.clone(), move || {
        let config = config.clone();
        async move {
            let mirror = RestMirror::connect(config).await?;
            Ok::<_, StorageError>(Arc::new(mirror) as Arc<dyn SessionMirror>)
        }
    }));
}

#[cfg(not(feature = "rest-mirror"))]
fn spawn_mirror_supervisor(_state: &SharedState) {
    info!("built without a session mirror; running in degraded mode");
}

/// Build the top-level router and attach cross-cutting middleware layers.
fn build_router(state: SharedState) -> Router<()> {
    routes::router(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// Configure tracing subscribers so logs include spans by default.
fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=debug".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wait for Ctrl+C or SIGTERM and shut the server down gracefully.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut term = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
