//! Host `tmux` client probes. Exit code 1 from `tmux list-*` means "no
//! server running", which is an empty result, not an error — only a spawn
//! failure or a genuine non-1 exit is surfaced as `TmuxError`.

use std::collections::HashMap;
use std::process::Output;
use std::time::Duration;

use serde::Serialize;
use tokio::process::Command;
use tokio::time::timeout;

use crate::error::TmuxError;

/// One entry of `tmux list-sessions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TmuxSessionInfo {
    pub name: String,
    pub windows: u32,
    /// Number of clients currently attached, not just whether any are —
    /// a change from 1 to 2 attached clients is a real update to relay.
    pub attached: u32,
}

/// Builds the `-t` target string for `tmux attach-session`: a bare session
/// name, or `session:window` when a specific window index was requested.
pub fn attach_target(session: &str, window: Option<u32>) -> String {
    match window {
        Some(w) => format!("{session}:{w}"),
        None => session.to_string(),
    }
}

async fn run_tmux(args: &[&str], probe_timeout: Duration) -> Result<Output, TmuxError> {
    let fut = Command::new("tmux").args(args).output();
    match timeout(probe_timeout, fut).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(err)) => Err(TmuxError::Spawn(err)),
        Err(_) => Err(TmuxError::Timeout),
    }
}

fn is_empty_result(output: &Output) -> bool {
    output.status.code() == Some(1)
}

/// Per-client tty-path -> attached tmux session name.
pub async fn list_clients(probe_timeout: Duration) -> Result<HashMap<String, String>, TmuxError> {
    let output = run_tmux(
        &["list-clients", "-F", "#{client_tty}\t#{client_session}"],
        probe_timeout,
    )
    .await?;

    if is_empty_result(&output) {
        return Ok(HashMap::new());
    }
    if !output.status.success() {
        return Err(TmuxError::NonZeroExit(output.status.code().unwrap_or(-1)));
    }

    let mut map = HashMap::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let mut parts = line.splitn(2, '\t');
        if let (Some(tty), Some(session)) = (parts.next(), parts.next()) {
            if !tty.is_empty() {
                map.insert(tty.to_string(), session.to_string());
            }
        }
    }
    Ok(map)
}

/// All tmux sessions with window count and attached flag.
pub async fn list_sessions(probe_timeout: Duration) -> Result<Vec<TmuxSessionInfo>, TmuxError> {
    let output = run_tmux(
        &[
            "list-sessions",
            "-F",
            "#{session_name}\t#{session_windows}\t#{session_attached}",
        ],
        probe_timeout,
    )
    .await?;

    if is_empty_result(&output) {
        return Ok(Vec::new());
    }
    if !output.status.success() {
        return Err(TmuxError::NonZeroExit(output.status.code().unwrap_or(-1)));
    }

    let mut sessions = Vec::new();
    for line in String::from_utf8_lossy(&output.stdout).lines() {
        let mut parts = line.splitn(3, '\t');
        let (Some(name), Some(windows), Some(attached)) =
            (parts.next(), parts.next(), parts.next())
        else {
            continue;
        };
        let Ok(windows) = windows.parse::<u32>() else {
            continue;
        };
        let Ok(attached) = attached.parse::<u32>() else {
            continue;
        };
        sessions.push(TmuxSessionInfo {
            name: name.to_string(),
            windows,
            attached,
        });
    }
    Ok(sessions)
}

/// Kill the named tmux session server-side. A session that's already gone
/// (exit code 1, tmux's "no such session") is treated as success, not an error.
pub async fn kill_session(name: &str, probe_timeout: Duration) -> Result<(), TmuxError> {
    let output = run_tmux(&["kill-session", "-t", name], probe_timeout).await?;
    if output.status.success() || is_empty_result(&output) {
        Ok(())
    } else {
        Err(TmuxError::NonZeroExit(output.status.code().unwrap_or(-1)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_well_formed_client_line() {
        let map_line = "/dev/pts/5\twork";
        let mut parts = map_line.splitn(2, '\t');
        let tty = parts.next().unwrap();
        let session = parts.next().unwrap();
        assert_eq!(tty, "/dev/pts/5");
        assert_eq!(session, "work");
    }

    #[test]
    fn session_attached_count_parses_as_u32() {
        assert_eq!("2".parse::<u32>().unwrap(), 2);
    }

    #[tokio::test]
    async fn list_clients_against_missing_binary_times_out_or_errors() {
        // Can't assume tmux is installed in the test environment; just assert
        // the call resolves one way or another within the bound.
        let result = list_clients(Duration::from_millis(500)).await;
        let _ = result;
    }
}
