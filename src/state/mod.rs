pub mod connections;
pub mod game;
pub mod rooms;
pub mod state_machine;
pub mod timers;

use std::{sync::Arc, time::Instant};

use tokio::sync::{RwLock, watch};

use crate::{config::AppConfig, dao::mirror::SessionMirror, dto::schema::ProtocolCatalog};

use self::{connections::ConnectionRegistry, rooms::RoomManager};

pub type SharedState = Arc<AppState>;

/// Central application state: rooms, connections and the optional durable mirror.
pub struct AppState {
    config: Arc<AppConfig>,
    catalog: ProtocolCatalog,
    rooms: RoomManager,
    connections: ConnectionRegistry,
    mirror: RwLock<Option<Arc<dyn SessionMirror>>>,
    degraded: watch::Sender<bool>,
    started_at: Instant,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a mirror is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        let catalog = ProtocolCatalog::new(&config);
        Arc::new(Self {
            config: Arc::new(config),
            catalog,
            rooms: RoomManager::new(),
            connections: ConnectionRegistry::new(),
            mirror: RwLock::new(None),
            degraded: degraded_tx,
            started_at: Instant::now(),
        })
    }

    /// Runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Inbound message catalog built from the configuration.
    pub fn catalog(&self) -> &ProtocolCatalog {
        &self.catalog
    }

    /// Live rooms.
    pub fn rooms(&self) -> &RoomManager {
        &self.rooms
    }

    /// Live connections.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    /// Process start, for uptime reporting.
    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    /// Obtain a handle to the current mirror, if one is installed.
    pub async fn mirror(&self) -> Option<Arc<dyn SessionMirror>> {
        let guard = self.mirror.read().await;
        guard.as_ref().cloned()
    }

    /// Install a mirror implementation and leave degraded mode.
    pub async fn install_mirror(&self, mirror: Arc<dyn SessionMirror>) {
        {
            let mut guard = self.mirror.write().await;
            *guard = Some(mirror);
        }
        self.update_degraded(false);
    }

    /// Remove the current mirror and enter degraded mode.
    pub async fn clear_mirror(&self) {
        {
            let mut guard = self.mirror.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }
}
