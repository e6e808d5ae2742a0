//! Pluggable per-session data collectors. A collector matches a session by
//! the command names running under its PTY (e.g. only report when `node` is
//! a descendant) and produces an opaque JSON payload on request.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

/// One source of per-session structured data.
pub trait Collector: Send + Sync {
    /// Stable identifier sent back to the client in `plugin_data`.
    fn id(&self) -> &str;

    /// Whether this collector has anything to say for a session whose
    /// descendant processes are named `command_names`.
    fn matches(&self, command_names: &[String]) -> bool;

    /// One-shot collection not tied to any session (rarely used directly;
    /// most collectors implement `collect_for_session` instead).
    fn collect(&self) -> Option<serde_json::Value> {
        None
    }

    /// Collect for a specific session's child process. `None` means "nothing
    /// to report this round", not an error.
    fn collect_for_session(&self, pid: u32, cwd: Option<&str>) -> Option<serde_json::Value>;

    /// Minimum time between collections for one session, to bound overhead.
    fn min_interval(&self) -> Duration {
        Duration::from_secs(2)
    }
}

/// Registry of known collectors, consulted by the plugin loop each tick.
/// Thread-safe upsert by id: registering the same id twice replaces the
/// previous collector rather than accumulating a duplicate.
#[derive(Default)]
pub struct CollectorRegistry {
    collectors: RwLock<HashMap<String, Arc<dyn Collector>>>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, collector: Arc<dyn Collector>) {
        self.collectors
            .write()
            .insert(collector.id().to_string(), collector);
    }

    /// Snapshot of every collector whose `matches` predicate holds for
    /// `command_names`, copied out from under the lock.
    pub fn matching(&self, command_names: &[String]) -> Vec<Arc<dyn Collector>> {
        self.collectors
            .read()
            .values()
            .filter(|c| c.matches(command_names))
            .cloned()
            .collect()
    }
}

/// Built-in collector: always matches, reports pid/cwd as-is. Grounds the
/// framework in something real without requiring any particular tool to be
/// installed on the host.
pub struct ProcessInfoCollector;

impl Collector for ProcessInfoCollector {
    fn id(&self) -> &str {
        "process_info"
    }

    fn matches(&self, _command_names: &[String]) -> bool {
        true
    }

    fn collect_for_session(&self, pid: u32, cwd: Option<&str>) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "pid": pid,
            "cwd": cwd,
        }))
    }

    fn min_interval(&self) -> Duration {
        Duration::from_secs(2)
    }
}
