//! Presence lifecycle: registration, disconnect and idle sweeping.
//!
//! Every change to the registry is followed by a `usersList` broadcast issued while the
//! registry write lock is still held, so connections observe lists in mutation order. The
//! durable user record is derived under the same lock and written by a single background
//! task, so record writes land in registry order.

use std::{
    sync::{Arc, Weak},
    time::{Duration, SystemTime},
};

use axum::extract::ws::Message;
use tokio::{
    sync::{RwLockWriteGuard, mpsc},
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};
use validator::Validate;

use crate::{
    dao::{
        cell_store::CellStore,
        models::UserEntity,
        storage::{StorageError, with_timeout},
    },
    dto::ws::{RegisterUserRequest, ServerMessage, UserDto},
    error::ServiceError,
    services::broadcast::{self, ConnectionClosed, send_message_to_websocket},
    state::{AppState, ConnectionId, PresenceEntry, PresenceRegistry, SharedState, UserRecordUpdate},
};

/// Enqueue the current list for one connection. The read lock is held while enqueuing so the
/// list cannot overtake a newer broadcast.
pub async fn send_users_list(
    state: &SharedState,
    tx: &mpsc::UnboundedSender<Message>,
) -> Result<(), ConnectionClosed> {
    let presence = state.presence().read().await;
    let users = presence.list_all().into_iter().map(UserDto::from).collect();
    send_message_to_websocket(tx, &ServerMessage::UsersList(users))
}

/// Register (or re-register) the presence of `connection_id` and announce the new list.
pub async fn register_user(
    state: &SharedState,
    connection_id: ConnectionId,
    request: RegisterUserRequest,
) -> Result<PresenceEntry, ServiceError> {
    request.validate()?;
    let RegisterUserRequest {
        id,
        nickname,
        color,
    } = request;
    let nickname = nickname.trim().to_string();
    let color = color.to_ascii_uppercase();

    let entry = {
        let mut presence = state.presence().write().await;
        let replaced = presence.register(connection_id, id, nickname, color);
        let entry = presence
            .get(&connection_id)
            .cloned()
            .ok_or_else(|| ServiceError::InvalidInput("registration was lost".into()))?;
        announce(state, &presence);
        // Re-registering under another id releases the previous one.
        if let Some(replaced) = replaced.filter(|replaced| replaced.user_id != entry.user_id) {
            release_user(state, &presence, replaced.user_id);
        }
        queue_user_record(state, UserRecordUpdate::Online(user_record(&entry)));
        entry
    };
    info!(%connection_id, user_id = %entry.user_id, nickname = %entry.nickname, "user registered");
    Ok(entry)
}

/// Drop the presence of a closed connection. Returns the removed entry, if it was registered.
pub async fn disconnect(state: &SharedState, connection_id: &ConnectionId) -> Option<PresenceEntry> {
    let removed = {
        let mut presence = state.presence().write().await;
        let removed = presence.remove(connection_id);
        if let Some(entry) = removed.as_ref() {
            announce(state, &presence);
            release_user(state, &presence, entry.user_id.clone());
        }
        removed
    };

    if let Some(entry) = removed.as_ref() {
        info!(%connection_id, user_id = %entry.user_id, "user left");
    }
    removed
}

/// Evict idle entries once and announce the resulting list, evictions or not. The
/// connections themselves stay open and may register again.
pub async fn sweep_once(state: &SharedState) -> Vec<PresenceEntry> {
    let max_idle = state.config().presence_max_idle;
    let evicted = {
        let mut presence = state.presence().write().await;
        let evicted = presence.sweep(max_idle);
        announce(state, &presence);
        for entry in &evicted {
            release_user(state, &presence, entry.user_id.clone());
        }
        evicted
    };

    for entry in &evicted {
        info!(user_id = %entry.user_id, nickname = %entry.nickname, "evicted idle user");
    }
    evicted
}

/// Periodically run [`sweep_once`] for the lifetime of the process.
pub async fn run_sweeper(state: SharedState) {
    let mut interval = tokio::time::interval(state.config().presence_sweep_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; nothing can be idle yet.
    interval.tick().await;

    loop {
        interval.tick().await;
        let evicted = sweep_once(&state).await;
        debug!(evicted = evicted.len(), "presence sweep completed");
    }
}

fn announce(state: &SharedState, presence: &RwLockWriteGuard<'_, PresenceRegistry>) {
    let users = presence.list_all().into_iter().map(UserDto::from).collect();
    broadcast::broadcast(state, &ServerMessage::UsersList(users));
}

/// Mark `user_id` offline unless another connection still carries it.
fn release_user(
    state: &SharedState,
    presence: &RwLockWriteGuard<'_, PresenceRegistry>,
    user_id: String,
) {
    if presence.has_user(&user_id) {
        debug!(user_id = %user_id, "user still present on another connection");
        return;
    }
    queue_user_record(state, UserRecordUpdate::Offline { user_id });
}

fn user_record(entry: &PresenceEntry) -> UserEntity {
    UserEntity {
        user_id: entry.user_id.clone(),
        nickname: entry.nickname.clone(),
        color: entry.color.clone(),
        last_activity: SystemTime::now(),
        is_online: true,
    }
}

/// Hand a record update to the writer task, starting it on first use.
fn queue_user_record(state: &SharedState, update: UserRecordUpdate) {
    let queue = state.user_records().get_or_init(|| {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(run_user_records(Arc::downgrade(state), rx));
        tx
    });
    if let Err(err) = queue.send(update) {
        debug!(user_id = %err.0.user_id(), "user record writer stopped; update dropped");
    }
}

/// Apply record updates one at a time, in queue order. Best effort: failures and degraded
/// periods are logged and never reach the realtime path.
async fn run_user_records(
    state: Weak<AppState>,
    mut updates: mpsc::UnboundedReceiver<UserRecordUpdate>,
) {
    while let Some(update) = updates.recv().await {
        let Some(state) = state.upgrade() else {
            break;
        };
        if state.is_degraded() {
            debug!(user_id = %update.user_id(), "storage degraded; user record not written");
            continue;
        }
        let Some(store) = state.cell_store().await else {
            continue;
        };
        let limit = state.config().store_timeout;
        drop(state);

        let user_id = update.user_id().to_string();
        if let Err(err) = persist_user(store, update, limit).await {
            warn!(user_id = %user_id, error = %err, "failed to mirror user record");
        }
    }
}

async fn persist_user(
    store: Arc<dyn CellStore>,
    update: UserRecordUpdate,
    limit: Duration,
) -> Result<(), StorageError> {
    match update {
        UserRecordUpdate::Online(user) => {
            with_timeout("save_user", limit, store.save_user(user)).await
        }
        UserRecordUpdate::Offline { user_id } => {
            with_timeout("mark_user_offline", limit, store.mark_user_offline(user_id)).await
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::cell_store::memory::MemoryCellStore,
        state::ClientConnection,
    };

    async fn users_list(state: &SharedState) -> Vec<UserDto> {
        let presence = state.presence().read().await;
        presence.list_all().into_iter().map(UserDto::from).collect()
    }

    async fn setup() -> (SharedState, MemoryCellStore) {
        let state = AppState::new(AppConfig {
            presence_max_idle: Duration::from_secs(600),
            ..AppConfig::default()
        });
        let store = MemoryCellStore::new();
        state.install_cell_store(Arc::new(store.clone())).await;
        (state, store)
    }

    fn connect(state: &SharedState) -> (ConnectionId, mpsc::UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.connections().insert(id, ClientConnection { id, tx });
        (id, rx)
    }

    fn last_users_list(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<Vec<UserDto>> {
        let mut last = None;
        while let Ok(Message::Text(text)) = rx.try_recv() {
            if let Ok(ServerMessage::UsersList(users)) = serde_json::from_str(text.as_str()) {
                last = Some(users);
            }
        }
        last
    }

    fn request(id: &str, nickname: &str) -> RegisterUserRequest {
        RegisterUserRequest {
            id: id.into(),
            nickname: nickname.into(),
            color: "#00aaff".into(),
        }
    }

    async fn wait_for_user(store: &MemoryCellStore, user_id: &str, online: bool) -> UserEntity {
        for _ in 0..50 {
            if let Some(user) = store.user(user_id).filter(|user| user.is_online == online) {
                return user;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("user {user_id} never reached online={online}");
    }

    #[tokio::test]
    async fn registration_is_announced_to_every_connection() {
        let (state, store) = setup().await;
        let (a, mut rx_a) = connect(&state);
        let (_b, mut rx_b) = connect(&state);

        let entry = register_user(&state, a, request("user-a", "  alice  ")).await.unwrap();
        assert_eq!(entry.nickname, "alice");
        assert_eq!(entry.color, "#00AAFF");

        for rx in [&mut rx_a, &mut rx_b] {
            let users = last_users_list(rx).unwrap();
            assert_eq!(users.len(), 1);
            assert_eq!(users[0].id, "user-a");
            assert_eq!(users[0].nickname, "alice");
        }

        let user = wait_for_user(&store, "user-a", true).await;
        assert_eq!(user.nickname, "alice");
    }

    #[tokio::test]
    async fn invalid_nickname_leaves_registry_untouched() {
        let (state, _store) = setup().await;
        let (a, mut rx_a) = connect(&state);

        for nickname in ["   ", "a", "a-very-long-nickname"] {
            let err = register_user(&state, a, request("user-a", nickname)).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)));
        }
        assert!(state.presence().read().await.is_empty());
        assert!(last_users_list(&mut rx_a).is_none());
    }

    #[tokio::test]
    async fn re_registration_keeps_a_single_entry() {
        let (state, _store) = setup().await;
        let (a, _rx) = connect(&state);
        register_user(&state, a, request("user-a", "alice")).await.unwrap();
        register_user(&state, a, request("user-a", "alicia")).await.unwrap();

        let users = users_list(&state).await;
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].nickname, "alicia");
    }

    #[tokio::test]
    async fn disconnect_removes_entry_and_marks_user_offline() {
        let (state, store) = setup().await;
        let (a, _rx_a) = connect(&state);
        let (b, mut rx_b) = connect(&state);
        register_user(&state, a, request("user-a", "alice")).await.unwrap();
        register_user(&state, b, request("user-b", "bob")).await.unwrap();
        wait_for_user(&store, "user-a", true).await;
        last_users_list(&mut rx_b);

        let removed = disconnect(&state, &a).await.unwrap();
        assert_eq!(removed.user_id, "user-a");

        let users = last_users_list(&mut rx_b).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "user-b");
        wait_for_user(&store, "user-a", false).await;
    }

    #[tokio::test]
    async fn disconnect_of_unregistered_connection_is_silent() {
        let (state, _store) = setup().await;
        let (a, _rx_a) = connect(&state);
        let (_b, mut rx_b) = connect(&state);

        assert!(disconnect(&state, &a).await.is_none());
        assert!(last_users_list(&mut rx_b).is_none());
    }

    #[tokio::test]
    async fn sweep_evicts_idle_users_and_announces() {
        let (state, _store) = setup().await;
        let (a, _rx_a) = connect(&state);
        let (b, mut rx_b) = connect(&state);
        {
            let mut presence = state.presence().write().await;
            let long_ago = SystemTime::now() - Duration::from_secs(3600);
            presence.register_at(a, "user-a".into(), "alice".into(), "#000000".into(), long_ago);
            presence.register(b, "user-b".into(), "bob".into(), "#FFFFFF".into());
        }

        let evicted = sweep_once(&state).await;
        assert_eq!(evicted.len(), 1);
        assert_eq!(evicted[0].user_id, "user-a");

        let users = last_users_list(&mut rx_b).unwrap();
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].id, "user-b");
        // The evicted connection is still live.
        assert!(state.connections().contains_key(&a));
    }

    #[tokio::test]
    async fn sweep_announces_even_without_evictions() {
        let (state, _store) = setup().await;
        let (a, mut rx_a) = connect(&state);
        register_user(&state, a, request("user-a", "alice")).await.unwrap();
        let before = last_users_list(&mut rx_a).unwrap();

        assert!(sweep_once(&state).await.is_empty());

        let after = last_users_list(&mut rx_a).expect("sweep must announce the list");
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn user_stays_online_while_another_connection_carries_it() {
        let (state, store) = setup().await;
        let (a, _rx_a) = connect(&state);
        let (b, _rx_b) = connect(&state);
        let (c, _rx_c) = connect(&state);
        register_user(&state, a, request("user-1", "alice")).await.unwrap();
        register_user(&state, b, request("user-1", "alice")).await.unwrap();

        disconnect(&state, &a).await.unwrap();
        // Record writes are applied in order: once this one lands, the disconnect has been
        // handled too.
        register_user(&state, c, request("user-2", "bob")).await.unwrap();
        wait_for_user(&store, "user-2", true).await;
        assert!(store.user("user-1").unwrap().is_online);

        disconnect(&state, &b).await.unwrap();
        wait_for_user(&store, "user-1", false).await;
    }

    #[tokio::test]
    async fn re_registering_under_another_id_releases_the_old_one() {
        let (state, store) = setup().await;
        let (a, _rx) = connect(&state);
        register_user(&state, a, request("user-old", "alice")).await.unwrap();
        register_user(&state, a, request("user-new", "alice")).await.unwrap();

        wait_for_user(&store, "user-new", true).await;
        assert!(!store.user("user-old").unwrap().is_online);
    }

    #[tokio::test]
    async fn registration_works_without_storage() {
        let state = AppState::new(AppConfig::default());
        let (a, _rx) = connect(&state);
        register_user(&state, a, request("user-a", "alice")).await.unwrap();
        assert_eq!(users_list(&state).await.len(), 1);
    }
}
