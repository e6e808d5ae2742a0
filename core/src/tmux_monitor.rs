//! Periodic poller that diffs the host tmux state against the registry and
//! the monitor's own cache, emitting `tmux_status`/`tmux_sessions` deltas.
//! The polling interval is a `watch` channel: `tmux_config` updates it at
//! runtime, and since `watch` only keeps the latest value, a burst of
//! updates collapses to the last one rather than queuing.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::registry::SessionRegistry;
use crate::tmux::{self, TmuxSessionInfo};

/// Receives attachment deltas (`session_id -> new tmux name`) and full
/// session-list snapshots. Implemented by whatever owns the outbound socket.
#[async_trait::async_trait]
pub trait TmuxMonitorSink: Send + Sync {
    async fn attachment_changed(&self, changes: HashMap<crate::session::SessionId, String>);
    async fn sessions_changed(&self, sessions: Vec<TmuxSessionInfo>);
}

pub struct TmuxMonitor {
    registry: Arc<SessionRegistry>,
    sink: Arc<dyn TmuxMonitorSink>,
    probe_timeout: Duration,
    interval_tx: watch::Sender<Duration>,
    interval_rx: watch::Receiver<Duration>,
    last_sessions: RwLock<Vec<TmuxSessionInfo>>,
}

impl TmuxMonitor {
    pub fn new(
        registry: Arc<SessionRegistry>,
        sink: Arc<dyn TmuxMonitorSink>,
        initial_interval: Duration,
        probe_timeout: Duration,
    ) -> Self {
        let (interval_tx, interval_rx) = watch::channel(initial_interval);
        Self {
            registry,
            sink,
            probe_timeout,
            interval_tx,
            interval_rx,
            last_sessions: RwLock::new(Vec::new()),
        }
    }

    /// Last successful session-list probe, for one-shot `list_tmux_sessions` replies.
    pub fn last_known_sessions(&self) -> Vec<TmuxSessionInfo> {
        self.last_sessions.read().clone()
    }

    /// `tmux_config` handler: the next tick picks up the new interval.
    pub fn set_interval(&self, interval: Duration) {
        let _ = self.interval_tx.send(interval);
    }

    async fn poll_attachment(&self) {
        let candidates = self.registry.list_with_tty();
        if candidates.is_empty() {
            return;
        }
        let clients = match tmux::list_clients(self.probe_timeout).await {
            Ok(map) => map,
            Err(err) => {
                debug!(error = %err, "tmux client probe failed");
                return;
            }
        };

        let mut changes = HashMap::new();
        for session in candidates {
            let observed = clients.get(session.tty_path()).cloned().unwrap_or_default();
            if session.attached_tmux().unwrap_or_default() != observed {
                session.set_attached_tmux(if observed.is_empty() {
                    None
                } else {
                    Some(observed.clone())
                });
                changes.insert(session.id, observed);
            }
        }
        if !changes.is_empty() {
            self.sink.attachment_changed(changes).await;
        }
    }

    async fn poll_session_list(&self) {
        let sessions = match tmux::list_sessions(self.probe_timeout).await {
            Ok(sessions) => sessions,
            Err(err) => {
                debug!(error = %err, "tmux session-list probe failed");
                return;
            }
        };
        let changed = *self.last_sessions.read() != sessions;
        if changed {
            *self.last_sessions.write() = sessions.clone();
            self.sink.sessions_changed(sessions).await;
        }
    }

    /// Runs until `cancel` fires. Attachment updates are polled before the
    /// session list within each tick, matching the wire ordering guarantee.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval_rx = self.interval_rx.clone();
        let mut ticker = tokio::time::interval(*interval_rx.borrow());
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.poll_attachment().await;
                    self.poll_session_list().await;
                }
                Ok(()) = interval_rx.changed() => {
                    ticker = tokio::time::interval(*interval_rx.borrow());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pty::fake::FakePty;
    use crate::session::{OutboundSink, Session, SessionId};
    use std::sync::Mutex;

    struct NullSink;
    #[async_trait::async_trait]
    impl OutboundSink for NullSink {
        async fn send(&self, _msg: crate::protocol::ServerMessage) -> Result<(), crate::error::SessionError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct RecordingMonitorSink {
        attachment_calls: Mutex<Vec<HashMap<SessionId, String>>>,
        session_calls: Mutex<Vec<Vec<TmuxSessionInfo>>>,
    }

    #[async_trait::async_trait]
    impl TmuxMonitorSink for RecordingMonitorSink {
        async fn attachment_changed(&self, changes: HashMap<SessionId, String>) {
            self.attachment_calls.lock().unwrap().push(changes);
        }
        async fn sessions_changed(&self, sessions: Vec<TmuxSessionInfo>) {
            self.session_calls.lock().unwrap().push(sessions);
        }
    }

    fn make_registry_with_session(id: u64, tty: &str) -> Arc<SessionRegistry> {
        let registry = Arc::new(SessionRegistry::new());
        let session = Arc::new(Session::new(
            SessionId::from_raw(id),
            "owner".to_string(),
            "bash".to_string(),
            0,
            None,
            None,
            Arc::new(FakePty::new(tty, 1)),
            Arc::new(NullSink),
        ));
        registry.insert(session);
        registry
    }

    #[tokio::test]
    async fn unchanged_session_list_emits_nothing() {
        let registry = make_registry_with_session(1, "/dev/pts/1");
        let sink = Arc::new(RecordingMonitorSink::default());
        let monitor = TmuxMonitor::new(
            registry,
            sink.clone(),
            Duration::from_secs(1),
            Duration::from_millis(200),
        );
        // Seed the cache so an empty-result probe counts as "unchanged". This
        // assumes no real tmux server is reachable in the test environment;
        // an empty probe result matches the seeded empty cache either way.
        *monitor.last_sessions.write() = Vec::new();
        monitor.poll_session_list().await;
        assert!(sink.session_calls.lock().unwrap().is_empty());
    }

    #[test]
    fn session_list_diff_detects_attached_count_change() {
        let a = vec![TmuxSessionInfo {
            name: "work".to_string(),
            windows: 1,
            attached: 1,
        }];
        let b = vec![TmuxSessionInfo {
            name: "work".to_string(),
            windows: 1,
            attached: 2,
        }];
        assert_ne!(a, b);
    }

    #[test]
    fn last_known_sessions_reflects_cache() {
        let registry = Arc::new(SessionRegistry::new());
        let sink = Arc::new(RecordingMonitorSink::default());
        let monitor = TmuxMonitor::new(
            registry,
            sink,
            Duration::from_secs(1),
            Duration::from_millis(200),
        );
        *monitor.last_sessions.write() = vec![TmuxSessionInfo {
            name: "work".to_string(),
            windows: 3,
            attached: 1,
        }];
        let snapshot = monitor.last_known_sessions();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "work");
    }
}
