//! Per-session plugin loop: on the same cadence as the CWD/process-tree
//! probes, find which collectors match the session's descendant processes
//! and push `plugin_data` for any payload that differs from what was last
//! published — dedup prevents flooding the client with unchanged state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::collector::CollectorRegistry;
use crate::cwd;
use crate::process_tree;
use crate::protocol::ServerMessage;
use crate::session::Session;

/// Runs until the session closes or `cancel` fires. `interval` is the shared
/// plugin/CWD/process-tree polling cadence from config.
pub async fn run(
    session: Arc<Session>,
    registry: Arc<CollectorRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut last_payloads: HashMap<String, serde_json::Value> = HashMap::new();
    let mut last_cwd: Option<String> = None;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = session.cancel.cancelled() => break,
            _ = ticker.tick() => {
                if session.is_closed() {
                    break;
                }
                let pid = session.pid();
                // sysinfo's refresh is blocking; run it off the async worker like the
                // collectors below so a slow process table never stalls the runtime.
                let command_names = tokio::task::spawn_blocking(move || {
                    process_tree::descendant_command_names(pid)
                })
                .await
                .unwrap_or_default();
                let observed_cwd = tokio::task::spawn_blocking(move || cwd::current_directory(pid))
                    .await
                    .unwrap_or(None);

                if observed_cwd != last_cwd {
                    if let Some(dir) = observed_cwd.clone() {
                        session
                            .emit(ServerMessage::CwdUpdate {
                                session_id: session.id,
                                cwd: dir,
                            })
                            .await;
                    }
                    last_cwd = observed_cwd.clone();
                }

                for collector in registry.matching(&command_names) {
                    let Some(payload) = collector.collect_for_session(pid, observed_cwd.as_deref()) else {
                        continue;
                    };
                    let changed = last_payloads.get(collector.id()) != Some(&payload);
                    if changed {
                        last_payloads.insert(collector.id().to_string(), payload.clone());
                        session
                            .emit(ServerMessage::PluginData {
                                session_id: session.id,
                                plugin_id: collector.id().to_string(),
                                payload,
                            })
                            .await;
                    }
                }
            }
        }
    }
}
