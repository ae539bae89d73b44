/// Per-coordinate commit ordering.
pub mod commit_gate;
/// Presence registry.
pub mod presence;
/// Cached full grid.
pub mod snapshot_cache;

use std::sync::{Arc, OnceLock};

use axum::extract::ws::Message;
use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, watch};
use uuid::Uuid;

use crate::{config::AppConfig, dao::cell_store::CellStore, error::ServiceError};

pub use self::commit_gate::CommitGates;
pub use self::presence::{PresenceEntry, PresenceRegistry, UserRecordUpdate};
pub use self::snapshot_cache::SnapshotCache;

/// Shared handle on the application state.
pub type SharedState = Arc<AppState>;
/// Transient identifier of one transport session.
pub type ConnectionId = Uuid;

#[derive(Clone)]
/// Handle used to push messages to a connected client.
pub struct ClientConnection {
    /// Identifier of the connection.
    pub id: ConnectionId,
    /// Outbound queue drained by the connection's writer task.
    pub tx: mpsc::UnboundedSender<Message>,
}

/// Central application state: the store handle, the snapshot cache, the presence registry and
/// the live connections. Built once at startup and shared by every connection task.
pub struct AppState {
    config: AppConfig,
    cell_store: RwLock<Option<Arc<dyn CellStore>>>,
    snapshot_cache: SnapshotCache,
    presence: RwLock<PresenceRegistry>,
    connections: DashMap<ConnectionId, ClientConnection>,
    commit_gates: CommitGates,
    degraded: watch::Sender<bool>,
    user_records: OnceLock<mpsc::UnboundedSender<UserRecordUpdate>>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            snapshot_cache: SnapshotCache::new(config.snapshot_ttl),
            config,
            cell_store: RwLock::new(None),
            presence: RwLock::new(PresenceRegistry::new()),
            connections: DashMap::new(),
            commit_gates: CommitGates::new(),
            degraded: degraded_tx,
            user_records: OnceLock::new(),
        })
    }

    /// Effective configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Obtain a handle to the current cell store, if one is installed.
    pub async fn cell_store(&self) -> Option<Arc<dyn CellStore>> {
        let guard = self.cell_store.read().await;
        guard.as_ref().cloned()
    }

    /// Obtain the current cell store or fail when running degraded.
    pub async fn require_cell_store(&self) -> Result<Arc<dyn CellStore>, ServiceError> {
        if *self.degraded.borrow() {
            return Err(ServiceError::Degraded);
        }
        self.cell_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new cell store implementation and leave degraded mode.
    pub async fn install_cell_store(&self, store: Arc<dyn CellStore>) {
        {
            let mut guard = self.cell_store.write().await;
            *guard = Some(store);
        }
        // Whatever was cached came from the previous backend.
        self.snapshot_cache.invalidate().await;
        self.update_degraded(false);
    }

    /// Remove the current cell store and enter degraded mode.
    pub async fn clear_cell_store(&self) {
        {
            let mut guard = self.cell_store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                false
            } else {
                *current = value;
                true
            }
        });
    }

    /// Cached grid served to joining connections.
    pub fn snapshot_cache(&self) -> &SnapshotCache {
        &self.snapshot_cache
    }

    /// Registry of registered connections.
    pub fn presence(&self) -> &RwLock<PresenceRegistry> {
        &self.presence
    }

    /// Live connections keyed by their identifier.
    pub fn connections(&self) -> &DashMap<ConnectionId, ClientConnection> {
        &self.connections
    }

    /// Per-coordinate locks ordering commits and their broadcasts.
    pub fn commit_gates(&self) -> &CommitGates {
        &self.commit_gates
    }

    /// Queue feeding the durable user-record writer, once it has been started.
    pub fn user_records(&self) -> &OnceLock<mpsc::UnboundedSender<UserRecordUpdate>> {
        &self.user_records
    }
}
