//! The two JSON envelope shapes that cross the WebSocket. Every field is
//! optional; absence means "the zero value of the field's type" and is
//! communicated by omission on the wire (`skip_serializing_if`).

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::session::{SessionId, SessionStatus};
use crate::tmux::TmuxSessionInfo;

/// One message from client to server.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    Create {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        tmux_session: Option<String>,
        #[serde(default)]
        tmux_window: Option<u32>,
        #[serde(default)]
        cwd: Option<String>,
    },
    Input {
        #[serde(default)]
        session_id: Option<SessionId>,
        #[serde(default)]
        data: String,
    },
    Resize {
        #[serde(default)]
        session_id: Option<SessionId>,
        cols: u16,
        rows: u16,
    },
    Close {
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    Detach {
        #[serde(default)]
        session_id: Option<SessionId>,
    },
    TmuxConfig {
        interval_ms: u64,
    },
    ListTmuxSessions {},
}

/// One message from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    SessionCreated {
        session_id: SessionId,
        shell: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        tmux_session: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tmux_window: Option<u32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        cwd: Option<String>,
        status: SessionStatus,
    },
    Output {
        session_id: SessionId,
        shell: String,
        data: String,
    },
    Error {
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
        error: String,
    },
    Exit {
        session_id: SessionId,
        code: i32,
    },
    TmuxStatus {
        /// session id -> attached tmux name, empty string means detached.
        changes: HashMap<SessionId, String>,
    },
    TmuxSessions {
        sessions: Vec<TmuxSessionInfo>,
    },
    CwdUpdate {
        session_id: SessionId,
        cwd: String,
    },
    PluginData {
        session_id: SessionId,
        plugin_id: String,
        payload: serde_json::Value,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_without_session_id_decodes() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"input","data":"hi"}"#).unwrap();
        match msg {
            ClientMessage::Input { session_id, data } => {
                assert_eq!(session_id, None);
                assert_eq!(data, "hi");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn create_with_tmux_attach_fields_decodes() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"create","tmux_session":"work","tmux_window":2,"cwd":"/tmp"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::Create {
                tmux_session,
                tmux_window,
                cwd,
                ..
            } => {
                assert_eq!(tmux_session.as_deref(), Some("work"));
                assert_eq!(tmux_window, Some(2));
                assert_eq!(cwd.as_deref(), Some("/tmp"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn bare_create_decodes() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"create"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Create { .. }));
    }

    #[test]
    fn error_without_session_id_omits_field() {
        let msg = ServerMessage::Error {
            session_id: None,
            error: "boom".to_string(),
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("session_id").is_none());
        assert_eq!(json["error"], "boom");
    }

    #[test]
    fn exit_envelope_carries_session_id_and_code() {
        let msg = ServerMessage::Exit {
            session_id: SessionId::from_raw(7),
            code: 0,
        };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "exit");
        assert_eq!(json["session_id"], "s7");
        assert_eq!(json["code"], 0);
    }

    #[test]
    fn tmux_status_serializes_changes_map() {
        let mut changes = HashMap::new();
        changes.insert(SessionId::from_raw(1), "work".to_string());
        let msg = ServerMessage::TmuxStatus { changes };
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["changes"]["s1"], "work");
    }
}
