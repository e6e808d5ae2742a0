//! Global config singleton. `ensure_loaded()` reads env vars once; later
//! callers get the same instance. No on-disk config — the session registry
//! and every probe interval are process-lifetime only (see Non-goals).

use std::sync::OnceLock;
use std::time::Duration;

/// Shell command to spawn for a new PTY.
#[derive(Debug, Clone)]
pub struct ShellSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl ShellSpec {
    /// `MUXCORE_SHELL` overrides the program; falls back to a login shell
    /// on Unix (`bash -l`) or `cmd.exe` on Windows.
    fn from_env() -> Self {
        let program = std::env::var("MUXCORE_SHELL").unwrap_or_else(|_| default_shell());
        #[cfg(unix)]
        let args = vec!["-l".to_string()];
        #[cfg(windows)]
        let args = vec![];
        Self { program, args }
    }
}

#[cfg(unix)]
fn default_shell() -> String {
    "bash".to_string()
}

#[cfg(windows)]
fn default_shell() -> String {
    "cmd.exe".to_string()
}

/// Cached runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub shell: ShellSpec,
    /// Tmux monitor polling cadence; updatable at runtime via a watch channel.
    pub tmux_poll_interval: Duration,
    /// Per-session plugin loop / cwd / process-tree probe cadence.
    pub plugin_poll_interval: Duration,
    /// Bound on any single tmux/ps invocation.
    pub probe_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            shell: ShellSpec::from_env(),
            tmux_poll_interval: Duration::from_secs(1),
            plugin_poll_interval: Duration::from_secs(2),
            probe_timeout: Duration::from_secs(2),
        }
    }
}

static CONFIG: OnceLock<Config> = OnceLock::new();

/// Ensure config is loaded (idempotent): the first caller reads env vars,
/// later callers get the same instance.
pub fn ensure_loaded() -> &'static Config {
    CONFIG.get_or_init(Config::default)
}
