//! End-to-end tests driving a real server over WebSocket and HTTP.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use futures::StreamExt;
use pixel_canvas_back::{
    build_router,
    client::{ClientSession, ConnectionStatus, MirrorEvent, SessionConfig, SessionEvent},
    config::AppConfig,
    dao::cell_store::{CellStore, memory::MemoryCellStore},
    dto::ws::UserDto,
    services::canvas_service,
    state::{AppState, SharedState},
};
use axum::extract::ws::Message;
use tokio::{net::TcpListener, time::sleep};
use tokio_stream::wrappers::BroadcastStream;

const WAIT: Duration = Duration::from_secs(5);
const SECRET: &str = "let-me-reset";

struct TestServer {
    addr: SocketAddr,
    state: SharedState,
    store: MemoryCellStore,
}

impl TestServer {
    async fn start() -> Self {
        let state = AppState::new(AppConfig {
            width: 4,
            height: 4,
            admin_secret: Some(SECRET.into()),
            ..AppConfig::default()
        });
        let store = MemoryCellStore::new();
        state.install_cell_store(Arc::new(store.clone())).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = build_router(state.clone());
        tokio::spawn(async move {
            axum::serve(listener, app.into_make_service()).await.unwrap();
        });

        Self { addr, state, store }
    }

    async fn client(&self) -> ClientSession {
        self.client_with(SessionConfig::new(format!("ws://{}/ws", self.addr)))
            .await
    }

    async fn client_with(&self, config: SessionConfig) -> ClientSession {
        let session = ClientSession::start(config);
        let mut status = session.status();
        tokio::time::timeout(WAIT, status.wait_for(|status| *status == ConnectionStatus::Synced))
            .await
            .expect("client never synced")
            .unwrap();
        session
    }

    async fn reset(&self, secret: &str) -> reqwest::Response {
        reqwest::Client::new()
            .post(format!("http://{}/api/reset-pixels", self.addr))
            .json(&serde_json::json!({ "secretKey": secret }))
            .send()
            .await
            .unwrap()
    }
}

/// Close every server-side socket, as a restarting server would.
fn drop_all_connections(server: &TestServer) {
    for connection in server.state.connections().iter() {
        let _ = connection.tx.send(Message::Close(None));
    }
}

async fn wait_for_color(session: &ClientSession, x: i32, y: i32, expected: Option<&str>) {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let grid = session.current_grid().await;
        let current = grid.get(&(x, y)).map(String::as_str);
        if current == expected {
            return;
        }
        if tokio::time::Instant::now() >= deadline {
            panic!("({x}, {y}) shows {current:?}, expected {expected:?}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

async fn next_event(events: &mut BroadcastStream<SessionEvent>) -> SessionEvent {
    tokio::time::timeout(WAIT, events.next())
        .await
        .expect("no event in time")
        .expect("event stream ended")
        .expect("event stream lagged")
}

/// Next grid change, skipping presence lists.
async fn next_grid_event(events: &mut BroadcastStream<SessionEvent>) -> MirrorEvent {
    loop {
        if let SessionEvent::Grid(event) = next_event(events).await {
            return event;
        }
    }
}

/// Next presence list matching `accept`; the initial list of a fresh connection may still be
/// in flight when a test subscribes.
async fn next_users(
    events: &mut BroadcastStream<SessionEvent>,
    accept: impl Fn(&[UserDto]) -> bool,
) -> Vec<UserDto> {
    loop {
        if let SessionEvent::Users(users) = next_event(events).await {
            if accept(&users) {
                return users;
            }
        }
    }
}

#[tokio::test]
async fn late_joiner_sees_committed_pixel() {
    let server = TestServer::start().await;
    let a = server.client().await;
    let b = server.client().await;

    a.submit_update(1, 1, "#FF0000").await.unwrap();

    wait_for_color(&a, 1, 1, Some("#FF0000")).await;
    wait_for_color(&b, 1, 1, Some("#FF0000")).await;

    let c = server.client().await;
    let grid = c.current_grid().await;
    assert_eq!(grid.len(), 1);
    assert_eq!(grid.get(&(1, 1)).map(String::as_str), Some("#FF0000"));

    for session in [a, b, c] {
        session.shutdown().await;
    }
}

#[tokio::test]
async fn concurrent_writes_to_one_cell_converge() {
    let server = TestServer::start().await;
    let a = server.client().await;
    let b = server.client().await;
    let observer = server.client().await;
    let mut observed = observer.subscribe();

    let (first, second) = tokio::join!(
        a.submit_update(2, 2, "#AA0000"),
        b.submit_update(2, 2, "#00BB00"),
    );
    first.unwrap();
    second.unwrap();

    // Both writes are committed once the observer has seen two broadcasts.
    for _ in 0..2 {
        assert!(matches!(
            next_grid_event(&mut observed).await,
            MirrorEvent::Committed(_)
        ));
    }

    let stored = server.store.load_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    let winner = stored[0].color.as_str();

    for session in [&a, &b, &observer] {
        wait_for_color(session, 2, 2, Some(winner)).await;
    }

    let late = server.client().await;
    wait_for_color(&late, 2, 2, Some(winner)).await;

    for session in [a, b, observer, late] {
        session.shutdown().await;
    }
}

#[tokio::test]
async fn rejected_write_is_reverted_and_reported_only_to_sender() {
    let server = TestServer::start().await;
    let a = server.client().await;
    let b = server.client().await;
    let mut a_events = a.subscribe();
    let mut b_events = b.subscribe();

    a.submit_update(4, 0, "#123456").await.unwrap();

    assert_eq!(
        next_grid_event(&mut a_events).await,
        MirrorEvent::Hinted {
            x: 4,
            y: 0,
            color: "#123456".into()
        }
    );
    assert_eq!(
        next_grid_event(&mut a_events).await,
        MirrorEvent::Reverted {
            x: 4,
            y: 0,
            color: None
        }
    );
    assert!(a.current_grid().await.is_empty());
    assert!(server.store.is_empty());

    // The next thing B sees is a later valid write, never the rejected one.
    a.submit_update(0, 0, "#654321").await.unwrap();
    match next_grid_event(&mut b_events).await {
        MirrorEvent::Committed(pixel) => assert_eq!((pixel.x, pixel.y), (0, 0)),
        other => panic!("unexpected event {other:?}"),
    }

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn presence_follows_registration_and_disconnect() {
    let server = TestServer::start().await;
    let a = server.client().await;
    let b = server.client().await;
    let mut b_events = b.subscribe();

    a.register("user-a", "  alice ", "#00FF00").await.unwrap();

    let users = next_users(&mut b_events, |users| !users.is_empty()).await;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].id, "user-a");
    assert_eq!(users[0].nickname, "alice");

    a.submit_update(3, 3, "#00FF00").await.unwrap();
    wait_for_color(&b, 3, 3, Some("#00FF00")).await;
    let cell = server.store.load_all().await.unwrap().pop().unwrap();
    assert_eq!(cell.writer_id.as_deref(), Some("user-a"));

    a.shutdown().await;
    next_users(&mut b_events, |users| users.is_empty()).await;
    assert!(server.state.presence().read().await.is_empty());

    b.shutdown().await;
}

#[tokio::test]
async fn dropped_client_reconnects_reregisters_and_resyncs() {
    let server = TestServer::start().await;
    let a = server
        .client_with(SessionConfig {
            reconnect_delay: Duration::from_millis(300),
            ..SessionConfig::new(format!("ws://{}/ws", server.addr))
        })
        .await;
    a.register("user-a", "alice", "#112233").await.unwrap();
    let first_connection = loop {
        let presence = server.state.presence().read().await;
        if let Some(entry) = presence.list_all().first() {
            assert_eq!(entry.user_id, "user-a");
            break server
                .state
                .connections()
                .iter()
                .map(|connection| connection.id)
                .find(|id| presence.get(id).is_some())
                .unwrap();
        }
        drop(presence);
        sleep(Duration::from_millis(10)).await;
    };

    let mut status = a.status();
    drop_all_connections(&server);
    tokio::time::timeout(
        WAIT,
        status.wait_for(|status| matches!(status, ConnectionStatus::Reconnecting { .. })),
    )
    .await
    .expect("client never noticed the drop")
    .unwrap();

    // Written while A is offline; A only learns about it from the next snapshot.
    let b = server.client().await;
    b.submit_update(2, 1, "#ABCDEF").await.unwrap();
    wait_for_color(&b, 2, 1, Some("#ABCDEF")).await;

    tokio::time::timeout(WAIT, status.wait_for(|status| *status == ConnectionStatus::Synced))
        .await
        .expect("client never resynced")
        .unwrap();
    wait_for_color(&a, 2, 1, Some("#ABCDEF")).await;

    // The identity was sent again on the new connection.
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let presence = server.state.presence().read().await;
        let users = presence.list_all();
        if users.len() == 1 && presence.get(&first_connection).is_none() {
            assert_eq!(users[0].user_id, "user-a");
            assert_eq!(users[0].nickname, "alice");
            break;
        }
        drop(presence);
        assert!(tokio::time::Instant::now() < deadline, "user-a never re-registered");
        sleep(Duration::from_millis(10)).await;
    }

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn admin_reset_requires_the_secret() {
    let server = TestServer::start().await;
    for (x, y) in [(0, 0), (1, 2), (3, 3)] {
        server
            .store
            .upsert(x, y, "#FFFFFF".into(), None)
            .await
            .unwrap();
    }
    let a = server.client().await;
    assert_eq!(a.current_grid().await.len(), 3);

    for guess in ["not-the-secret", ""] {
        let refused = server.reset(guess).await;
        assert_eq!(refused.status(), reqwest::StatusCode::UNAUTHORIZED);
    }
    assert_eq!(server.store.len(), 3);
    assert_eq!(canvas_service::snapshot(&server.state).await.unwrap().len(), 3);

    let accepted = server.reset(SECRET).await;
    assert_eq!(accepted.status(), reqwest::StatusCode::OK);
    let body: serde_json::Value = accepted.json().await.unwrap();
    assert_eq!(body["deletedCount"], 3);
    assert!(canvas_service::snapshot(&server.state).await.unwrap().is_empty());

    // Connected clients catch up on their next snapshot.
    a.request_snapshot().await.unwrap();
    wait_for_color(&a, 1, 2, None).await;
    assert!(a.current_grid().await.is_empty());

    a.shutdown().await;
}

#[tokio::test]
async fn healthcheck_reports_storage_state() {
    let server = TestServer::start().await;
    let url = format!("http://{}/healthcheck", server.addr);

    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "ok");

    server.state.clear_cell_store().await;
    let body: serde_json::Value = reqwest::get(&url).await.unwrap().json().await.unwrap();
    assert_eq!(body["status"], "degraded");
}
