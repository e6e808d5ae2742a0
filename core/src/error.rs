//! Typed errors per component boundary. Each variant maps to one branch of
//! the error taxonomy: transient externals are never an error (empty result
//! instead), these types exist for the failures that *are* errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PtyError {
    #[error("failed to open pty: {0}")]
    Open(#[source] std::io::Error),
    #[error("failed to spawn shell: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("pty write failed: {0}")]
    Write(#[source] std::io::Error),
    #[error("pty resize failed: {0}")]
    Resize(#[source] std::io::Error),
}

#[derive(Debug, Error)]
pub enum TmuxError {
    #[error("failed to invoke tmux: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("tmux exited with status {0}")]
    NonZeroExit(i32),
    #[error("tmux invocation timed out")]
    Timeout,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session id {0}")]
    NotFound(String),
    #[error("session {0} is not owned by this connection")]
    Unauthorized(String),
}
