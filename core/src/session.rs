//! A session pairs one PTY with one outbound sink. `SessionId` is the wire
//! identifier; `LifecycleState` is the internal run state machine, kept
//! separate from any user-facing status string (see protocol::ServerMessage).

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::{PtyError, SessionError};
use crate::protocol::ServerMessage;
use crate::pty::Pty;
use crate::tmux;

/// Bound on the fire-and-forget `tmux kill-session` issued from a `close`
/// (not a `detach`); matches the default probe timeout in `config::Config`.
const TMUX_KILL_TIMEOUT: Duration = Duration::from_secs(2);

/// Session identifier. Wire format is `s` followed by the monotonic counter
/// value, e.g. `s7` — never a UUID, so ids double as a human-readable ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionId(u64);

impl SessionId {
    pub fn from_raw(id: u64) -> Self {
        Self(id)
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

impl Serialize for SessionId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

struct SessionIdVisitor;

impl<'de> Visitor<'de> for SessionIdVisitor {
    type Value = SessionId;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a string of the form s<integer>")
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<SessionId, E> {
        let digits = v.strip_prefix('s').ok_or_else(|| {
            de::Error::invalid_value(de::Unexpected::Str(v), &"a string starting with 's'")
        })?;
        let id = digits
            .parse::<u64>()
            .map_err(|_| de::Error::invalid_value(de::Unexpected::Str(v), &self))?;
        Ok(SessionId(id))
    }
}

impl<'de> Deserialize<'de> for SessionId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_str(SessionIdVisitor)
    }
}

/// Forward-only run state. Transitions are CAS'd so a racing close and exit
/// can't un-close a session: once `Closed`, `try_advance` never succeeds again.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleStep {
    Running = 0,
    Closing = 1,
    Closed = 2,
}

pub struct LifecycleState(AtomicU8);

impl LifecycleState {
    pub fn new() -> Self {
        Self(AtomicU8::new(LifecycleStep::Running as u8))
    }

    pub fn current(&self) -> LifecycleStep {
        match self.0.load(Ordering::Acquire) {
            0 => LifecycleStep::Running,
            1 => LifecycleStep::Closing,
            _ => LifecycleStep::Closed,
        }
    }

    /// Advance to `next` only if `next` is strictly further along than the
    /// current step. Returns whether this call performed the transition.
    pub fn try_advance(&self, next: LifecycleStep) -> bool {
        loop {
            let current = self.0.load(Ordering::Acquire);
            if next as u8 <= current {
                return false;
            }
            if self
                .0
                .compare_exchange(current, next as u8, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return true;
            }
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::new()
    }
}

/// User-facing status, kept separate from `LifecycleState`: the lifecycle
/// state machine's only job is making shutdown idempotent, while this is
/// what a client sees reported for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Connecting,
    Active,
    Exited,
}

/// The outbound half of a connection. One `OutboundSink` is shared by every
/// session a connection owns; `core` stays agnostic to the transport (axum's
/// WebSocket in `muxd`, an in-memory channel in tests).
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn send(&self, msg: ServerMessage) -> Result<(), SessionError>;
}

/// Everything the registry and protocol dispatch need to know about one
/// live session. `tty_path` and `pid` are fixed at creation; `attached_tmux`
/// is updated by the tmux monitor whenever attachment changes.
pub struct Session {
    pub id: SessionId,
    pub owner: String,
    pub shell_tag: String,
    pub created_at: u64,
    pub cwd: Option<String>,
    attached_tmux: RwLock<Option<String>>,
    status: RwLock<SessionStatus>,
    pty: Arc<dyn Pty>,
    sink: Arc<dyn OutboundSink>,
    lifecycle: LifecycleState,
    pub cancel: CancellationToken,
}

impl Session {
    pub fn new(
        id: SessionId,
        owner: String,
        shell_tag: String,
        created_at: u64,
        cwd: Option<String>,
        attached_tmux: Option<String>,
        pty: Arc<dyn Pty>,
        sink: Arc<dyn OutboundSink>,
    ) -> Self {
        Self {
            id,
            owner,
            shell_tag,
            created_at,
            cwd,
            attached_tmux: RwLock::new(attached_tmux),
            status: RwLock::new(SessionStatus::Connecting),
            pty,
            sink,
            lifecycle: LifecycleState::new(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn status(&self) -> SessionStatus {
        *self.status.read()
    }

    /// Called once the read pump has actually started bridging PTY output.
    /// A no-op once the session has moved past `Connecting`.
    pub fn mark_active(&self) {
        let mut status = self.status.write();
        if *status == SessionStatus::Connecting {
            *status = SessionStatus::Active;
        }
    }

    pub fn tty_path(&self) -> &str {
        self.pty.tty_path()
    }

    pub fn pid(&self) -> u32 {
        self.pty.pid()
    }

    pub fn attached_tmux(&self) -> Option<String> {
        self.attached_tmux.read().clone()
    }

    pub fn set_attached_tmux(&self, name: Option<String>) {
        *self.attached_tmux.write() = name;
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.current() == LifecycleStep::Closed
    }

    /// Writes/resizes are only allowed while `Running`: once a close has
    /// been accepted (`Closing`), a racing writer must not still reach the
    /// PTY while teardown is in flight.
    fn is_running(&self) -> bool {
        self.lifecycle.current() == LifecycleStep::Running
    }

    pub async fn emit(&self, msg: ServerMessage) {
        if let Err(err) = self.sink.send(msg).await {
            warn!(session = %self.id, error = %err, "failed to deliver outbound message");
        }
    }

    pub fn write_input(&self, data: &[u8]) -> Result<(), PtyError> {
        if !self.is_running() {
            return Ok(());
        }
        self.pty.write(data).map_err(PtyError::Write)?;
        Ok(())
    }

    pub fn resize(&self, cols: u16, rows: u16) -> Result<(), PtyError> {
        if !self.is_running() {
            return Ok(());
        }
        self.pty.resize(cols, rows).map_err(PtyError::Resize)
    }

    /// Idempotent: a session may be closed by client request and, racing,
    /// by the read pump observing EOF. Only the first caller tears anything
    /// down. `kill_tmux` distinguishes `close` (tear down any attached tmux
    /// session too) from `detach` (leave the tmux session running).
    pub fn close_gracefully(&self, kill_tmux: bool) {
        if !self.lifecycle.try_advance(LifecycleStep::Closing) {
            return;
        }
        self.cancel.cancel();
        if kill_tmux {
            if let Some(name) = self.attached_tmux() {
                let session_id = self.id;
                tokio::spawn(async move {
                    if let Err(err) = tmux::kill_session(&name, TMUX_KILL_TIMEOUT).await {
                        warn!(session = %session_id, error = %err, "failed to kill attached tmux session");
                    }
                });
            }
        }
        if let Err(err) = self.pty.close() {
            warn!(session = %self.id, error = %err, "pty close failed");
        }
        *self.status.write() = SessionStatus::Exited;
        self.lifecycle.try_advance(LifecycleStep::Closed);
        info!(session = %self.id, "session closed");
    }
}

/// Spawn the read pump: forwards PTY output to the sink as `Output` envelopes
/// until the reader channel closes (EOF) or the exit channel fires, then
/// emits `Exit` and tears the session down. This is the only pump owned by a
/// session — the socket-to-session direction is handled by the connection
/// handler's single receive loop, since one socket may carry many sessions.
pub fn spawn_read_pump(
    session: Arc<Session>,
    mut output_rx: tokio::sync::mpsc::Receiver<Vec<u8>>,
    mut exit_rx: tokio::sync::mpsc::Receiver<i32>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        session.mark_active();
        let exit_code = loop {
            tokio::select! {
                _ = session.cancel.cancelled() => break 0,
                chunk = output_rx.recv() => {
                    match chunk {
                        Some(bytes) => {
                            let data = String::from_utf8_lossy(&bytes).into_owned();
                            session
                                .emit(ServerMessage::Output {
                                    session_id: session.id,
                                    shell: session.shell_tag.clone(),
                                    data,
                                })
                                .await;
                        }
                        None => break 0,
                    }
                }
                code = exit_rx.recv() => {
                    break code.unwrap_or(0);
                }
            }
        };
        session
            .emit(ServerMessage::Exit {
                session_id: session.id,
                code: exit_code,
            })
            .await;
        // Natural exit (EOF or shell termination), not an explicit close:
        // leave any attached tmux session running.
        session.close_gracefully(false);
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::fake::FakePty;
    use std::sync::Mutex;

    #[test]
    fn session_id_roundtrips_through_json() {
        let id = SessionId::from_raw(42);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, "\"s42\"");
        let back: SessionId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn session_id_rejects_malformed_string() {
        let result: Result<SessionId, _> = serde_json::from_str("\"banana\"");
        assert!(result.is_err());
    }

    #[test]
    fn lifecycle_is_forward_only() {
        let state = LifecycleState::new();
        assert!(state.try_advance(LifecycleStep::Closing));
        assert!(state.try_advance(LifecycleStep::Closed));
        // Closed cannot return to Closing, and re-advancing to Closed is a no-op.
        assert!(!state.try_advance(LifecycleStep::Closing));
        assert!(!state.try_advance(LifecycleStep::Closed));
        assert_eq!(state.current(), LifecycleStep::Closed);
    }

    #[test]
    fn lifecycle_rejects_skipping_backwards_after_concurrent_advance() {
        let state = LifecycleState::new();
        assert!(state.try_advance(LifecycleStep::Closed));
        assert!(!state.try_advance(LifecycleStep::Running));
    }

    struct RecordingSink {
        sent: Mutex<Vec<ServerMessage>>,
    }

    #[async_trait]
    impl OutboundSink for RecordingSink {
        async fn send(&self, msg: ServerMessage) -> Result<(), SessionError> {
            self.sent.lock().unwrap().push(msg);
            Ok(())
        }
    }

    fn make_session(pty: Arc<dyn Pty>, sink: Arc<RecordingSink>) -> Arc<Session> {
        Arc::new(Session::new(
            SessionId::from_raw(1),
            "owner-1".to_string(),
            "bash".to_string(),
            0,
            None,
            None,
            pty,
            sink,
        ))
    }

    #[test]
    fn write_input_forwards_to_pty() {
        let pty = Arc::new(FakePty::new("/dev/pts/1", 100));
        let sink = Arc::new(RecordingSink { sent: Mutex::new(vec![]) });
        let session = make_session(pty.clone(), sink);
        session.write_input(b"ls\n").unwrap();
        assert_eq!(pty.written(), b"ls\n");
    }

    #[test]
    fn closed_session_drops_input_silently() {
        let pty = Arc::new(FakePty::new("/dev/pts/1", 100));
        let sink = Arc::new(RecordingSink { sent: Mutex::new(vec![]) });
        let session = make_session(pty.clone(), sink);
        session.close_gracefully(false);
        session.write_input(b"ls\n").unwrap();
        assert!(pty.written().is_empty());
    }

    #[test]
    fn close_gracefully_is_idempotent() {
        let pty = Arc::new(FakePty::new("/dev/pts/1", 100));
        let sink = Arc::new(RecordingSink { sent: Mutex::new(vec![]) });
        let session = make_session(pty.clone(), sink);
        session.close_gracefully(false);
        session.close_gracefully(false);
        assert!(pty.is_closed());
        assert_eq!(session.lifecycle.current(), LifecycleStep::Closed);
        assert_eq!(session.status(), SessionStatus::Exited);
    }

    #[test]
    fn closing_session_rejects_racing_writes_before_pty_close_completes() {
        let pty = Arc::new(FakePty::new("/dev/pts/1", 100));
        let sink = Arc::new(RecordingSink { sent: Mutex::new(vec![]) });
        let session = make_session(pty.clone(), sink);
        // Simulate the Closing window directly: a write arriving after the
        // CAS to Closing but before is_closed() would become true must still
        // be rejected, since the spec's gate is "Running", not "not yet Closed".
        assert!(session.lifecycle.try_advance(LifecycleStep::Closing));
        session.write_input(b"ls\n").unwrap();
        assert!(pty.written().is_empty());
    }

    #[tokio::test]
    async fn read_pump_forwards_output_bytes_as_output_envelope() {
        let pty = Arc::new(FakePty::new("/dev/pts/1", 100));
        let output_rx = pty.take_output_rx();
        let exit_rx = pty.take_exit_rx();
        let sink = Arc::new(RecordingSink { sent: Mutex::new(vec![]) });
        let session = make_session(pty.clone(), sink.clone());

        pty.push_output(b"hello\n".to_vec());
        pty.close_output();

        spawn_read_pump(session.clone(), output_rx, exit_rx)
            .await
            .unwrap();

        let sent = sink.sent.lock().unwrap();
        assert!(matches!(
            &sent[0],
            ServerMessage::Output { data, .. } if data == "hello\n"
        ));
        assert!(matches!(
            sent.last().unwrap(),
            ServerMessage::Exit { code: 0, .. }
        ));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn read_pump_emits_exit_code_and_closes_session() {
        let pty = Arc::new(FakePty::new("/dev/pts/1", 100));
        let output_rx = pty.take_output_rx();
        let exit_rx = pty.take_exit_rx();
        let sink = Arc::new(RecordingSink { sent: Mutex::new(vec![]) });
        let session = make_session(pty.clone(), sink.clone());

        pty.push_exit(7);

        spawn_read_pump(session.clone(), output_rx, exit_rx)
            .await
            .unwrap();

        let sent = sink.sent.lock().unwrap();
        assert!(matches!(
            sent.last().unwrap(),
            ServerMessage::Exit { code: 7, .. }
        ));
        assert!(session.is_closed());
    }
}
