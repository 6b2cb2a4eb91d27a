//! End-to-end tests against a real loopback WebSocket server.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dirasa_core::{Locale, SessionId, Topic};
use dirasa_live::{
    AuthState, ConnectionConfig, ConnectionStatus, InMemoryQueryCache, LiveSupervisor,
    MemoryAlertSink, NotificationDispatcher, SessionEvent, SessionEvents,
    SocketManager, SupervisorConfig, regions, spawn_live_session,
};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

struct ServerConn {
    ws: WebSocketStream<TcpStream>,
    path: String,
    authorization: Option<String>,
}

impl ServerConn {
    async fn send_json(&mut self, value: serde_json::Value) {
        self.ws.send(Message::Text(value.to_string().into())).await.unwrap();
    }

    async fn send_raw(&mut self, text: &str) {
        self.ws.send(Message::Text(text.into())).await.unwrap();
    }

    /// Read until the client's close completes. Returns once the stream ends.
    async fn drain(mut self) -> WebSocketStream<TcpStream> {
        while let Some(Ok(_)) = self.ws.next().await {}
        self.ws
    }
}

struct TestServer {
    url: String,
    accepted: Arc<AtomicUsize>,
    conns: mpsc::UnboundedReceiver<ServerConn>,
}

impl TestServer {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, conns) = mpsc::unbounded_channel();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);

        let _accept_loop = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let captured = Arc::new(Mutex::new((String::new(), None::<String>)));
                let slot = Arc::clone(&captured);
                let callback =
                    move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
                        let auth = req
                            .headers()
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(str::to_owned);
                        *slot.lock() = (req.uri().path().to_owned(), auth);
                        Ok(resp)
                    };
                let Ok(ws) = accept_hdr_async(stream, callback).await else {
                    continue;
                };
                let _ = counter.fetch_add(1, Ordering::SeqCst);
                let (path, authorization) = captured.lock().clone();
                if tx
                    .send(ServerConn {
                        ws,
                        path,
                        authorization,
                    })
                    .is_err()
                {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            accepted,
            conns,
        }
    }

    async fn next_conn(&mut self) -> ServerConn {
        timeout(TIMEOUT, self.conns.recv())
            .await
            .expect("no connection in time")
            .expect("accept loop ended")
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }
}

fn config(base_url: &str) -> ConnectionConfig {
    ConnectionConfig {
        base_url: base_url.to_string(),
        auth_token: Some("tok".into()),
        send_queue_size: 8,
        connect_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_secs(1),
    }
}

fn topic() -> Option<Topic> {
    Some(Topic::for_feature("notifications"))
}

async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let waited = timeout(TIMEOUT, async {
        while !check() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {what}");
}

async fn wait_status(manager: &SocketManager, status: ConnectionStatus) {
    eventually(&format!("status {status}"), || manager.status() == status).await;
}

fn last_kind(manager: &SocketManager) -> Option<String> {
    manager.last_message().map(|m| m.kind.clone())
}

#[tokio::test]
async fn open_receive_and_dispatch() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    let sink = Arc::new(MemoryAlertSink::new());
    let cache = Arc::new(InMemoryQueryCache::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(sink.clone(), cache.clone(), Locale::En));
    let _dispatch = Arc::clone(&dispatcher).spawn(manager.subscribe_messages());

    manager.set_inputs(topic(), true);
    assert_eq!(manager.status(), ConnectionStatus::Connecting);

    let mut conn = server.next_conn().await;
    assert_eq!(conn.path, "/ws/notifications/");
    assert_eq!(conn.authorization.as_deref(), Some("Bearer tok"));
    wait_status(&manager, ConnectionStatus::Open).await;

    conn.send_json(json!({
        "type": "new_challenge_invite",
        "payload": {"challenger": {"username": "sara"}}
    }))
    .await;

    eventually("invite alert", || sink.len() == 1).await;
    let alert = &sink.alerts()[0];
    assert_eq!(alert.text, "sara challenged you to a quiz");
    assert_eq!(alert.kind, "new_challenge_invite");
    assert!(cache.is_stale(&regions::CHALLENGES));

    manager.send_json(&json!({"type": "ack"}));
    let frame = timeout(TIMEOUT, conn.ws.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(frame.into_text().unwrap().as_str(), r#"{"type":"ack"}"#);
    assert_eq!(manager.dropped_sends(), 0);

    manager.shutdown().await;
}

#[tokio::test]
async fn last_message_is_latest_write() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    manager.set_inputs(topic(), true);
    let mut conn = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;

    for n in 1..=3 {
        conn.send_json(json!({"type": "tick", "payload": {"n": n}})).await;
    }

    eventually("third tick", || {
        manager
            .last_message()
            .is_some_and(|m| m.payload.get("n") == Some(&json!(3)))
    })
    .await;

    manager.shutdown().await;
}

#[tokio::test]
async fn malformed_frames_are_dropped() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    let sink = Arc::new(MemoryAlertSink::new());
    let cache = Arc::new(InMemoryQueryCache::new());
    let dispatcher = Arc::new(NotificationDispatcher::new(sink.clone(), cache, Locale::En));
    let _dispatch = Arc::clone(&dispatcher).spawn(manager.subscribe_messages());

    manager.set_inputs(topic(), true);
    let mut conn = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;

    conn.send_raw("not json").await;
    conn.send_raw(r#"["new_challenge_invite"]"#).await;
    conn.send_raw(r#"{"payload":{}}"#).await;
    // Frames are handled in order, so seeing this one means the rest were processed.
    conn.send_json(json!({"type": "marker"})).await;

    eventually("marker", || last_kind(&manager).as_deref() == Some("marker")).await;
    assert_eq!(manager.status(), ConnectionStatus::Open);
    assert!(sink.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn binary_frames_decode_like_text() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    manager.set_inputs(topic(), true);
    let mut conn = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;

    let frame = json!({"type": "binary_hello", "payload": {"n": 1}}).to_string();
    conn.ws.send(Message::Binary(frame.into_bytes().into())).await.unwrap();
    eventually("binary frame", || last_kind(&manager).as_deref() == Some("binary_hello")).await;
    assert_eq!(manager.last_message().unwrap().payload.get("n"), Some(&json!(1)));

    conn.ws.send(Message::Binary(vec![0xff, 0xfe].into())).await.unwrap();
    conn.send_json(json!({"type": "marker"})).await;
    eventually("marker", || last_kind(&manager).as_deref() == Some("marker")).await;
    assert_eq!(manager.status(), ConnectionStatus::Open);

    manager.shutdown().await;
}

#[tokio::test]
async fn disconnect_goes_closing_then_closed() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    let mut transitions = manager.subscribe_transitions();

    manager.set_inputs(topic(), true);
    let mut conn = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;
    conn.send_json(json!({"type": "first"})).await;
    eventually("first message", || last_kind(&manager).as_deref() == Some("first")).await;

    manager.set_inputs(topic(), false);
    let mut ws = timeout(TIMEOUT, conn.drain()).await.expect("client never closed");
    wait_status(&manager, ConnectionStatus::Closed).await;

    // The socket is gone; whatever the server tries now must not surface.
    let _ = ws.send(Message::Text(r#"{"type":"late"}"#.into())).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(last_kind(&manager).as_deref(), Some("first"));

    let mut seen = Vec::new();
    while let Ok(status) = transitions.try_recv() {
        seen.push(status);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
            ConnectionStatus::Closing,
            ConnectionStatus::Closed,
        ]
    );
    assert!(manager.connection_id().is_none());
}

#[tokio::test]
async fn switching_topics_replaces_connection() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    let mut transitions = manager.subscribe_transitions();

    manager.set_inputs(topic(), true);
    let first = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;
    let first_id = manager.connection_id();

    manager.set_inputs(Some(Topic::for_feature("alerts")), true);
    let second = server.next_conn().await;
    assert_eq!(second.path, "/ws/alerts/");
    let _ = timeout(TIMEOUT, first.drain()).await.expect("old socket never closed");
    wait_status(&manager, ConnectionStatus::Open).await;
    // The old socket has wound down by now; its end must not reach callers.
    sleep(Duration::from_millis(50)).await;

    let mut seen = Vec::new();
    while let Ok(status) = transitions.try_recv() {
        seen.push(status);
    }
    assert_eq!(
        seen,
        vec![
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
            ConnectionStatus::Closing,
            ConnectionStatus::Connecting,
            ConnectionStatus::Open,
        ]
    );
    assert_eq!(manager.status(), ConnectionStatus::Open);
    assert_eq!(manager.topic(), Some(Topic::for_feature("alerts")));
    assert_ne!(manager.connection_id(), first_id);
    assert_eq!(server.accepted(), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn repeated_inputs_keep_one_connection() {
    let mut server = TestServer::start().await;
    let manager = SocketManager::new(config(&server.url));
    manager.set_inputs(topic(), true);
    manager.set_inputs(topic(), true);
    let _conn = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;
    let id = manager.connection_id();

    manager.set_inputs(topic(), true);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepted(), 1);
    assert_eq!(manager.connection_id(), id);

    manager.shutdown().await;
}

#[tokio::test]
async fn send_while_connecting_is_dropped() {
    // Accepts TCP but never answers the upgrade.
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let mut config = config(&url);
    config.connect_timeout = Duration::from_millis(300);
    let manager = SocketManager::new(config);

    manager.set_inputs(topic(), true);
    assert_eq!(manager.status(), ConnectionStatus::Connecting);
    manager.send_text(r#"{"type":"hello"}"#);
    assert_eq!(manager.dropped_sends(), 1);

    wait_status(&manager, ConnectionStatus::Error).await;
    drop(listener);
}

#[tokio::test]
async fn auth_changes_drive_the_socket() {
    let mut server = TestServer::start().await;
    let manager = Arc::new(SocketManager::new(config(&server.url)));
    let auth = AuthState::new(true);
    let cancel = CancellationToken::new();
    let session = spawn_live_session(
        Arc::clone(&manager),
        auth.clone(),
        "notifications".into(),
        None,
        cancel.clone(),
    );

    let first = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;

    auth.set_authenticated(false);
    let _ = timeout(TIMEOUT, first.drain()).await.expect("first socket not closed");
    wait_status(&manager, ConnectionStatus::Closed).await;
    assert!(manager.topic().is_none());

    auth.set_authenticated(true);
    let _second = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;
    assert_eq!(server.accepted(), 2);

    cancel.cancel();
    timeout(TIMEOUT, session).await.unwrap().unwrap();
    wait_status(&manager, ConnectionStatus::Closed).await;
}

#[tokio::test]
async fn signed_out_event_closes_socket() {
    let mut server = TestServer::start().await;
    let manager = Arc::new(SocketManager::new(config(&server.url)));
    let auth = AuthState::new(true);
    let events = SessionEvents::default();
    let cancel = CancellationToken::new();
    let session = spawn_live_session(
        Arc::clone(&manager),
        auth.clone(),
        "notifications".into(),
        Some(events.clone()),
        cancel.clone(),
    );

    let conn = server.next_conn().await;
    wait_status(&manager, ConnectionStatus::Open).await;

    assert_eq!(events.publish(SessionEvent::SignedOut), 1);
    let _ = timeout(TIMEOUT, conn.drain()).await.expect("socket not closed on sign-out");
    wait_status(&manager, ConnectionStatus::Closed).await;
    assert!(!auth.is_authenticated());
    assert!(manager.topic().is_none());

    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepted(), 1);

    cancel.cancel();
    timeout(TIMEOUT, session).await.unwrap().unwrap();
}

fn supervisor(
    url: &str,
    events: SessionEvents,
) -> (LiveSupervisor, Arc<MemoryAlertSink>, Arc<InMemoryQueryCache>) {
    let sink = Arc::new(MemoryAlertSink::new());
    let cache = Arc::new(InMemoryQueryCache::new());
    let config = SupervisorConfig {
        connection: config(url),
        feature: "notifications".into(),
        locale: Locale::En,
    };
    let supervisor = LiveSupervisor::new(config, sink.clone(), cache.clone(), events);
    (supervisor, sink, cache)
}

#[tokio::test]
async fn supervisor_shares_one_socket_per_session() {
    let mut server = TestServer::start().await;
    let (supervisor, sink, cache) = supervisor(&server.url, SessionEvents::default());
    let id = SessionId::new();

    let a = supervisor.acquire(&id);
    let b = supervisor.acquire(&id);
    let mut conn = server.next_conn().await;
    wait_status(a.manager(), ConnectionStatus::Open).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepted(), 1);

    conn.send_json(json!({
        "type": "challenge_accepted_notification",
        "payload": {"accepted_by": "lina"}
    }))
    .await;
    eventually("accepted alert", || sink.len() == 1).await;
    assert_eq!(b.manager().last_message(), a.manager().last_message());
    assert!(cache.is_stale(&regions::ACTIVE_CHALLENGES));

    drop(a);
    sleep(Duration::from_millis(50)).await;
    assert_eq!(b.manager().status(), ConnectionStatus::Open);

    drop(b);
    let _ = timeout(TIMEOUT, conn.drain()).await.expect("socket outlived last handle");
    assert!(supervisor.active_sessions().is_empty());
}

#[tokio::test]
async fn auth_close_code_expires_session() {
    let mut server = TestServer::start().await;
    let events = SessionEvents::default();
    let mut listener = events.subscribe();
    let (supervisor, _, _) = supervisor(&server.url, events);
    let channel = supervisor.acquire(&SessionId::new());

    let mut conn = server.next_conn().await;
    wait_status(channel.manager(), ConnectionStatus::Open).await;

    conn.ws
        .close(Some(CloseFrame {
            code: CloseCode::from(4001),
            reason: "token expired".into(),
        }))
        .await
        .unwrap();

    let event = timeout(TIMEOUT, listener.recv()).await.unwrap().unwrap();
    assert!(matches!(event, SessionEvent::Expired { .. }));
    eventually("auth dropped", || !channel.auth().is_authenticated()).await;
    wait_status(channel.manager(), ConnectionStatus::Closed).await;

    sleep(Duration::from_millis(50)).await;
    assert_eq!(server.accepted(), 1);
}

#[tokio::test]
async fn rejected_handshake_expires_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let _server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let reject = |_: &Request, _: Response| -> Result<Response, ErrorResponse> {
            let mut response = ErrorResponse::new(Some("unauthorized".into()));
            *response.status_mut() = tokio_tungstenite::tungstenite::http::StatusCode::UNAUTHORIZED;
            Err(response)
        };
        let _ = accept_hdr_async(stream, reject).await;
    });

    let events = SessionEvents::default();
    let mut rx = events.subscribe();
    let manager = SocketManager::with_session_events(config(&url), events);
    manager.set_inputs(topic(), true);

    let event = timeout(TIMEOUT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(
        event,
        SessionEvent::Expired {
            reason: "handshake rejected with HTTP 401".into()
        }
    );
    wait_status(&manager, ConnectionStatus::Error).await;
}
