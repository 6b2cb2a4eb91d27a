//! Socket connection manager.
//!
//! Owns at most one live WebSocket for a topic. Callers drive it with
//! [`SocketManager::set_inputs`]; the manager never reconnects on its own.
//!
//! Every connection runs as one task that owns both halves of the socket, so
//! frames from one socket are handled strictly one at a time. State shared
//! with callers lives behind a single mutex that also carries a generation
//! number: a task may only publish status while its generation is current,
//! and may only publish messages while it is still the active connection.
//! That is what keeps a closing or superseded socket from leaking updates.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dirasa_core::{ConnectionId, InboundMessage, Topic, decode_frame};
use dirasa_settings::LiveSettings;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::error::{LiveError, is_auth_close_code};
use crate::events::{SessionEvent, SessionEvents};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Most recently decoded message. Replaced, never queued.
pub type LastMessage = Option<Arc<InboundMessage>>;

/// Lifecycle of the managed connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionStatus {
    /// Handshake in progress.
    Connecting,
    /// Frames flow both ways.
    Open,
    /// Close requested, waiting for the socket to wind down.
    Closing,
    /// No connection.
    Closed,
    /// The last connection failed.
    Error,
}

impl ConnectionStatus {
    /// Whether a connection exists or is being set up.
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }

    /// Lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Connection parameters.
#[derive(Clone, Debug)]
pub struct ConnectionConfig {
    /// Base WebSocket URL; the topic path is appended.
    pub base_url: String,
    /// Bearer token for the upgrade request.
    pub auth_token: Option<String>,
    /// Outbound queue capacity.
    pub send_queue_size: usize,
    /// Handshake deadline.
    pub connect_timeout: Duration,
    /// How long to wait for the server's close reply.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self::from(&LiveSettings::default())
    }
}

impl From<&LiveSettings> for ConnectionConfig {
    fn from(settings: &LiveSettings) -> Self {
        Self {
            base_url: settings.base_url.clone(),
            auth_token: settings.auth_token.clone(),
            send_queue_size: settings.send_queue_size.max(1),
            connect_timeout: Duration::from_millis(settings.connect_timeout_ms),
            close_timeout: Duration::from_millis(settings.close_timeout_ms),
        }
    }
}

struct ActiveConnection {
    id: ConnectionId,
    generation: u64,
    topic: Topic,
    outbound: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct ManagerState {
    /// Generation of the most recently opened connection.
    generation: u64,
    active: Option<ActiveConnection>,
    /// Tasks of connections asked to close that may still be running.
    closing: Vec<JoinHandle<()>>,
}

struct Shared {
    config: ConnectionConfig,
    state: Mutex<ManagerState>,
    status: watch::Sender<ConnectionStatus>,
    transitions: broadcast::Sender<ConnectionStatus>,
    last_message: watch::Sender<LastMessage>,
    dropped_sends: AtomicU64,
    session_events: Option<SessionEvents>,
}

impl Shared {
    /// Callers hold the state lock, so status changes are ordered with
    /// respect to connection bookkeeping.
    fn publish_status(&self, status: ConnectionStatus) {
        let _ = self.status.send_replace(status);
        let _ = self.transitions.send(status);
    }

    fn mark_open(&self, generation: u64) -> bool {
        let state = self.state.lock();
        let current = state.active.as_ref().is_some_and(|a| a.generation == generation);
        if current {
            self.publish_status(ConnectionStatus::Open);
        }
        current
    }

    fn publish_message(&self, generation: u64, message: InboundMessage) -> bool {
        let state = self.state.lock();
        if !state.active.as_ref().is_some_and(|a| a.generation == generation) {
            return false;
        }
        let _ = self.last_message.send_replace(Some(Arc::new(message)));
        true
    }

    fn finish(&self, generation: u64, status: ConnectionStatus) {
        let mut state = self.state.lock();
        if state.generation != generation {
            return;
        }
        if state.active.as_ref().is_some_and(|a| a.generation == generation) {
            state.active = None;
        }
        self.publish_status(status);
    }

    fn session_expired(&self, reason: String) {
        if let Some(events) = &self.session_events {
            let _ = events.publish(SessionEvent::Expired { reason });
        }
    }
}

/// Manages the lifetime of a single live-channel socket.
///
/// Must be used from within a tokio runtime. Dropping the manager closes the
/// socket.
pub struct SocketManager {
    shared: Arc<Shared>,
}

impl SocketManager {
    /// Manager with no connection yet; status starts at `Closed`.
    pub fn new(config: ConnectionConfig) -> Self {
        Self::build(config, None)
    }

    /// Manager that reports auth failures as [`SessionEvent::Expired`].
    pub fn with_session_events(config: ConnectionConfig, events: SessionEvents) -> Self {
        Self::build(config, Some(events))
    }

    fn build(config: ConnectionConfig, session_events: Option<SessionEvents>) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Closed);
        let (transitions, _) = broadcast::channel(64);
        let (last_message, _) = watch::channel(None);
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(ManagerState::default()),
                status,
                transitions,
                last_message,
                dropped_sends: AtomicU64::new(0),
                session_events,
            }),
        }
    }

    /// Reconcile the connection with the caller's inputs.
    ///
    /// With a topic and `should_connect`, ensures exactly one connection to
    /// that topic exists; repeating the same inputs while it is connecting or
    /// open does nothing. Otherwise closes whatever is open. A connection that
    /// ended on its own is only replaced when this is called again.
    pub fn set_inputs(&self, topic: Option<Topic>, should_connect: bool) {
        let desired = topic.filter(|_| should_connect);
        let mut state = self.shared.state.lock();

        if let Some(active) = &state.active {
            let live = self.shared.status.borrow().is_live();
            if live && desired.as_ref() == Some(&active.topic) {
                trace!(topic = %active.topic, "inputs unchanged, keeping connection");
                return;
            }
        }

        state.closing.retain(|task| !task.is_finished());
        if let Some(active) = state.active.take() {
            self.begin_close(&mut state, active);
        }

        if let Some(topic) = desired {
            self.open(&mut state, topic);
        }
    }

    /// Close any connection. Same as `set_inputs(None, false)`.
    pub fn close(&self) {
        self.set_inputs(None, false);
    }

    /// Close and wait for every connection task to finish.
    pub async fn shutdown(&self) {
        self.close();
        let tasks = std::mem::take(&mut self.shared.state.lock().closing);
        for task in tasks {
            let _ = task.await;
        }
    }

    fn begin_close(&self, state: &mut ManagerState, active: ActiveConnection) {
        let ActiveConnection {
            id,
            generation,
            topic,
            outbound,
            cancel,
            task,
        } = active;
        info!(connection_id = %id, topic = %topic, "closing live channel");
        if state.generation == generation && self.shared.status.borrow().is_live() {
            self.shared.publish_status(ConnectionStatus::Closing);
        }
        cancel.cancel();
        drop(outbound);
        state.closing.push(task);
    }

    fn open(&self, state: &mut ManagerState, topic: Topic) {
        state.generation += 1;
        let generation = state.generation;
        let id = ConnectionId::new();
        let url = topic.url(&self.shared.config.base_url);
        let (outbound, outbound_rx) = mpsc::channel(self.shared.config.send_queue_size);
        let cancel = CancellationToken::new();

        info!(connection_id = %id, %url, "opening live channel");
        self.shared.publish_status(ConnectionStatus::Connecting);

        let task = tokio::spawn(run_connection(
            Arc::clone(&self.shared),
            id.clone(),
            generation,
            url,
            outbound_rx,
            cancel.clone(),
        ));

        state.active = Some(ActiveConnection {
            id,
            generation,
            topic,
            outbound,
            cancel,
            task,
        });
    }

    /// Queue a text frame. Best effort: when the connection is not open the
    /// frame is dropped, an error is logged, and the dropped-send counter goes up.
    pub fn send_text(&self, text: impl Into<String>) {
        let text = text.into();
        let state = self.shared.state.lock();
        let status = *self.shared.status.borrow();
        let Some(active) = state.active.as_ref().filter(|_| status == ConnectionStatus::Open)
        else {
            self.count_dropped_send();
            error!(%status, len = text.len(), "send while connection is not open, frame dropped");
            return;
        };
        match active.outbound.try_send(text) {
            Ok(()) => trace!(connection_id = %active.id, "frame queued"),
            Err(e) => {
                self.count_dropped_send();
                let reason = match e {
                    mpsc::error::TrySendError::Full(_) => "queue full",
                    mpsc::error::TrySendError::Closed(_) => "connection task gone",
                };
                error!(connection_id = %active.id, reason, "send failed, frame dropped");
            }
        }
    }

    /// Serialize a value and queue it as a text frame. Same contract as
    /// [`send_text`](Self::send_text).
    pub fn send_json<T: Serialize>(&self, value: &T) {
        match serde_json::to_string(value) {
            Ok(text) => self.send_text(text),
            Err(e) => {
                self.count_dropped_send();
                error!(error = %e, "failed to serialize outbound frame");
            }
        }
    }

    fn count_dropped_send(&self) {
        let _ = self.shared.dropped_sends.fetch_add(1, Ordering::Relaxed);
    }

    /// Frames dropped by `send_*` since creation.
    pub fn dropped_sends(&self) -> u64 {
        self.shared.dropped_sends.load(Ordering::Relaxed)
    }

    /// Current status.
    pub fn status(&self) -> ConnectionStatus {
        *self.shared.status.borrow()
    }

    /// Watch the current status. Intermediate states may be skipped.
    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    /// Every status transition, in order.
    pub fn subscribe_transitions(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.shared.transitions.subscribe()
    }

    /// Most recently decoded message.
    pub fn last_message(&self) -> LastMessage {
        self.shared.last_message.borrow().clone()
    }

    /// Watch the last message. Only the latest value is ever visible.
    pub fn subscribe_messages(&self) -> watch::Receiver<LastMessage> {
        self.shared.last_message.subscribe()
    }

    /// Topic of the active connection, if any.
    pub fn topic(&self) -> Option<Topic> {
        self.shared.state.lock().active.as_ref().map(|a| a.topic.clone())
    }

    /// ID of the active connection, if any.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.shared.state.lock().active.as_ref().map(|a| a.id.clone())
    }
}

impl Drop for SocketManager {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if let Some(active) = state.active.take() {
            active.cancel.cancel();
        }
    }
}

fn build_request(url: &str, token: Option<&str>) -> Result<Request, LiveError> {
    let mut request = url.into_client_request().map_err(|e| LiveError::InvalidUrl {
        url: url.to_string(),
        reason: e.to_string(),
    })?;
    if let Some(token) = token {
        let value =
            HeaderValue::from_str(&format!("Bearer {token}")).map_err(|_| LiveError::InvalidToken)?;
        let _ = request.headers_mut().insert(AUTHORIZATION, value);
    }
    Ok(request)
}

#[instrument(skip_all, fields(connection_id = %id))]
async fn run_connection(
    shared: Arc<Shared>,
    id: ConnectionId,
    generation: u64,
    url: String,
    outbound: mpsc::Receiver<String>,
    cancel: CancellationToken,
) {
    let ws = match connect(&shared, &url, &cancel).await {
        Ok(Some(ws)) => ws,
        Ok(None) => {
            debug!("close requested during handshake");
            shared.finish(generation, ConnectionStatus::Closed);
            return;
        }
        Err(e) => {
            warn!(error = %e, kind = e.error_kind(), %url, "live channel connect failed");
            if e.is_auth_failure() {
                shared.session_expired(e.to_string());
            }
            shared.finish(generation, ConnectionStatus::Error);
            return;
        }
    };

    let (mut sink, mut source) = ws.split();
    if !shared.mark_open(generation) {
        close_gracefully(&mut sink, &mut source, shared.config.close_timeout).await;
        shared.finish(generation, ConnectionStatus::Closed);
        return;
    }
    info!(%url, "live channel open");

    let outcome = pump(&shared, generation, &mut sink, &mut source, outbound, &cancel).await;
    info!(status = %outcome, "live channel ended");
    shared.finish(generation, outcome);
}

/// `Ok(None)` means the close was requested before the handshake finished.
async fn connect(
    shared: &Shared,
    url: &str,
    cancel: &CancellationToken,
) -> Result<Option<WsStream>, LiveError> {
    let request = build_request(url, shared.config.auth_token.as_deref())?;
    let timeout = shared.config.connect_timeout;
    tokio::select! {
        biased;
        () = cancel.cancelled() => Ok(None),
        result = tokio::time::timeout(timeout, connect_async(request)) => match result {
            Ok(Ok((ws, _response))) => Ok(Some(ws)),
            Ok(Err(e)) => Err(LiveError::from_handshake(e, url)),
            Err(_) => Err(LiveError::ConnectTimeout(timeout)),
        },
    }
}

async fn pump(
    shared: &Shared,
    generation: u64,
    sink: &mut WsSink,
    source: &mut WsSource,
    mut outbound: mpsc::Receiver<String>,
    cancel: &CancellationToken,
) -> ConnectionStatus {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                close_gracefully(sink, source, shared.config.close_timeout).await;
                return ConnectionStatus::Closed;
            }
            next = outbound.recv() => {
                let Some(text) = next else {
                    close_gracefully(sink, source, shared.config.close_timeout).await;
                    return ConnectionStatus::Closed;
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "failed to write frame");
                    return ConnectionStatus::Error;
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => handle_text(shared, generation, text.as_str()),
                Some(Ok(Message::Binary(data))) => match std::str::from_utf8(&data) {
                    Ok(text) => handle_text(shared, generation, text),
                    Err(_) => warn!(len = data.len(), "dropping non-UTF8 binary frame"),
                },
                Some(Ok(Message::Close(frame))) => {
                    let code = frame.as_ref().map(|f| u16::from(f.code));
                    info!(?code, "server closed live channel");
                    if let Some(code) = code.filter(|c| is_auth_close_code(*c)) {
                        shared.session_expired(format!("live channel closed with code {code}"));
                    }
                    // Pushes out the close reply tungstenite queued for us.
                    let _ = sink.flush().await;
                    return ConnectionStatus::Closed;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "live channel transport error");
                    return ConnectionStatus::Error;
                }
                None => {
                    info!("live channel stream ended");
                    return ConnectionStatus::Closed;
                }
            },
        }
    }
}

fn handle_text(shared: &Shared, generation: u64, text: &str) {
    match decode_frame(text) {
        Ok(message) => {
            let kind = message.kind.clone();
            if shared.publish_message(generation, message) {
                debug!(kind, "message received");
            } else {
                debug!(kind, "message arrived after close request, dropped");
            }
        }
        Err(e) => warn!(error = %e, kind = e.error_kind(), "dropping malformed frame"),
    }
}

async fn close_gracefully(sink: &mut WsSink, source: &mut WsSource, wait: Duration) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "client closing".into(),
    };
    if let Err(e) = sink.send(Message::Close(Some(frame))).await {
        debug!(error = %e, "close frame not sent");
        return;
    }
    // Frames still in flight are discarded; the server's close reply ends the stream.
    let drained = tokio::time::timeout(wait, async {
        while let Some(Ok(_)) = source.next().await {}
    })
    .await;
    if drained.is_err() {
        debug!(?wait, "server did not acknowledge close in time");
    }
}
