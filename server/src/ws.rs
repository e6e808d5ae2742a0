//! One `/ws` connection = one registry of sessions plus one tmux monitor.
//! A single receive loop dispatches every inbound frame; that loop (not a
//! second task) is what drives bytes from the socket into whichever session
//! they target, since several sessions can share this one connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use muxcore::collector::CollectorRegistry;
use muxcore::config::Config;
use muxcore::error::SessionError;
use muxcore::protocol::{ClientMessage, ServerMessage};
use muxcore::pty;
use muxcore::registry::SessionRegistry;
use muxcore::session::{OutboundSink, Session, SessionId};
use muxcore::tmux_monitor::{TmuxMonitor, TmuxMonitorSink};

/// Wraps the WebSocket's write half behind a lock so every `Session` and the
/// tmux monitor marshal-and-send through one serialized path, never held
/// across PTY or tmux I/O.
struct WsSink {
    writer: Mutex<SplitSink<WebSocket, Message>>,
}

#[async_trait::async_trait]
impl OutboundSink for WsSink {
    async fn send(&self, msg: ServerMessage) -> Result<(), SessionError> {
        let json = serde_json::to_string(&msg)
            .map_err(|_| SessionError::NotFound("unserializable message".to_string()))?;
        let mut writer = self.writer.lock().await;
        writer
            .send(Message::Text(json.into()))
            .await
            .map_err(|_| SessionError::NotFound("socket closed".to_string()))
    }
}

struct WsTmuxSink {
    sink: Arc<WsSink>,
}

#[async_trait::async_trait]
impl TmuxMonitorSink for WsTmuxSink {
    async fn attachment_changed(&self, changes: HashMap<SessionId, String>) {
        let _ = self.sink.send(ServerMessage::TmuxStatus { changes }).await;
    }

    async fn sessions_changed(&self, sessions: Vec<muxcore::tmux::TmuxSessionInfo>) {
        let _ = self.sink.send(ServerMessage::TmuxSessions { sessions }).await;
    }
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Owns everything scoped to one connection: its sessions, its tmux monitor,
/// and the shared outbound sink.
struct Connection {
    owner: String,
    registry: Arc<SessionRegistry>,
    sink: Arc<WsSink>,
    tmux_monitor: Arc<TmuxMonitor>,
    collectors: Arc<CollectorRegistry>,
    config: &'static Config,
    cancel: CancellationToken,
}

pub async fn handle_socket(
    socket: WebSocket,
    owner: String,
    registry: Arc<SessionRegistry>,
    config: &'static Config,
) {
    let (write_half, mut read_half) = socket.split();
    let sink = Arc::new(WsSink {
        writer: Mutex::new(write_half),
    });
    let tmux_monitor = Arc::new(TmuxMonitor::new(
        registry.clone(),
        Arc::new(WsTmuxSink { sink: sink.clone() }),
        config.tmux_poll_interval,
        config.probe_timeout,
    ));
    let collectors = CollectorRegistry::new();
    collectors.register(Arc::new(muxcore::collector::ProcessInfoCollector));
    let collectors = Arc::new(collectors);
    let cancel = CancellationToken::new();

    let conn = Arc::new(Connection {
        owner,
        registry,
        sink,
        tmux_monitor: tmux_monitor.clone(),
        collectors,
        config,
        cancel: cancel.clone(),
    });

    let monitor_handle = tokio::spawn({
        let monitor = tmux_monitor.clone();
        let cancel = cancel.clone();
        async move { monitor.run(cancel).await }
    });

    while let Some(Ok(msg)) = read_half.next().await {
        let Message::Text(text) = msg else { continue };
        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(client_msg) => dispatch(&conn, client_msg).await,
            Err(err) => {
                let _ = conn
                    .sink
                    .send(ServerMessage::Error {
                        session_id: None,
                        error: format!("malformed message: {err}"),
                    })
                    .await;
            }
        }
    }

    cancel.cancel();
    let _ = monitor_handle.await;
    // A dropped socket is neither a close nor a detach, but closer to the
    // latter: the connection vanished, it didn't ask to kill anything.
    for session in conn.registry.list_by_owner(&conn.owner) {
        session.close_gracefully(false);
    }
    info!(owner = %conn.owner, "connection closed, sessions torn down");
}

async fn dispatch(conn: &Arc<Connection>, msg: ClientMessage) {
    match msg {
        ClientMessage::Create {
            session_id: _,
            tmux_session,
            tmux_window,
            cwd,
        } => create_session(conn, tmux_session, tmux_window, cwd).await,
        ClientMessage::Input { session_id, data } => {
            with_session(conn, session_id, |session| {
                if let Err(err) = session.write_input(data.as_bytes()) {
                    warn!(error = %err, "pty write failed");
                }
            })
            .await;
        }
        ClientMessage::Resize {
            session_id,
            cols,
            rows,
        } => {
            with_session(conn, session_id, |session| {
                let _ = session.resize(cols, rows);
            })
            .await;
        }
        ClientMessage::Close { session_id } => {
            // close kills any tmux session this PTY was attached to.
            with_session(conn, session_id, |session| {
                session.close_gracefully(true);
            })
            .await;
        }
        ClientMessage::Detach { session_id } => {
            // detach tears down the PTY but leaves a tmux session running.
            with_session(conn, session_id, |session| {
                session.close_gracefully(false);
            })
            .await;
        }
        ClientMessage::TmuxConfig { interval_ms } => {
            conn.tmux_monitor
                .set_interval(Duration::from_millis(interval_ms));
        }
        ClientMessage::ListTmuxSessions {} => {
            let sessions = conn.tmux_monitor.last_known_sessions();
            let _ = conn.sink.send(ServerMessage::TmuxSessions { sessions }).await;
        }
    }
}

/// Resolves a frame's target session. A missing `session_id` is only an
/// error when it's ambiguous: with exactly one session owned by this
/// connection, a legacy/no-id frame routes to it unambiguously.
async fn with_session(conn: &Arc<Connection>, session_id: Option<SessionId>, f: impl FnOnce(&Session)) {
    let id = match session_id {
        Some(id) => id,
        None => {
            let mut owned = conn.registry.list_by_owner(&conn.owner).into_iter();
            match (owned.next(), owned.next()) {
                (Some(only), None) => only.id,
                _ => {
                    let _ = conn
                        .sink
                        .send(ServerMessage::Error {
                            session_id: None,
                            error: "missing session_id".to_string(),
                        })
                        .await;
                    return;
                }
            }
        }
    };
    match conn.registry.get(id) {
        Some(session) if session.owner == conn.owner => f(&session),
        Some(_) => {
            let _ = conn
                .sink
                .send(ServerMessage::Error {
                    session_id: Some(id),
                    error: format!("session {id} is not owned by this connection"),
                })
                .await;
        }
        None => {
            let _ = conn
                .sink
                .send(ServerMessage::Error {
                    session_id: Some(id),
                    error: format!("unknown session id {id}"),
                })
                .await;
        }
    }
}

async fn create_session(
    conn: &Arc<Connection>,
    tmux_session: Option<String>,
    tmux_window: Option<u32>,
    cwd: Option<String>,
) {
    let id = conn.registry.allocate_id();
    let tmux_target = tmux_session
        .as_deref()
        .map(|s| muxcore::tmux::attach_target(s, tmux_window));
    let (pty, output_rx, exit_rx) = match pty::open_pty(
        &conn.config.shell,
        cwd.as_deref(),
        tmux_target.as_deref(),
    ) {
        Ok(handle) => handle,
        Err(err) => {
            let _ = conn
                .sink
                .send(ServerMessage::Error {
                    session_id: None,
                    error: format!("failed to start session: {err}"),
                })
                .await;
            return;
        }
    };

    let shell_tag = if tmux_target.is_some() {
        "tmux".to_string()
    } else {
        conn.config.shell.program.clone()
    };

    let session = Arc::new(Session::new(
        id,
        conn.owner.clone(),
        shell_tag.clone(),
        now_secs(),
        cwd.clone(),
        tmux_session.clone(),
        pty,
        conn.sink.clone(),
    ));
    conn.registry.insert(session.clone());

    let pump_handle = muxcore::session::spawn_read_pump(session.clone(), output_rx, exit_rx);
    tokio::spawn({
        let registry = conn.registry.clone();
        async move {
            let _ = pump_handle.await;
            registry.remove(id);
        }
    });
    tokio::spawn(muxcore::plugin_loop::run(
        session.clone(),
        conn.collectors.clone(),
        conn.config.plugin_poll_interval,
        conn.cancel.clone(),
    ));

    let _ = conn
        .sink
        .send(ServerMessage::SessionCreated {
            session_id: id,
            shell: shell_tag,
            tmux_session,
            tmux_window,
            cwd,
            status: session.status(),
        })
        .await;
}
