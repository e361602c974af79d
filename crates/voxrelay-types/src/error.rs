use thiserror::Error;

use crate::session::SessionState;

/// Errors from session state machine operations.
///
/// Protocol violations (an event in the wrong state) are logged and ignored;
/// they never change session state or reach the transport.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("event '{event}' not valid in state '{state}'")]
    InvalidEvent {
        event: &'static str,
        state: SessionState,
    },

    #[error("unknown persona: '{0}'")]
    UnknownPersona(String),
}

/// Errors from session registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("setup event carried no session identifier")]
    MissingSessionId,

    #[error("no session with id '{0}'")]
    NotFound(String),

    #[error("session '{0}' event queue is full")]
    QueueFull(String),

    #[error("session '{0}' worker is gone")]
    WorkerGone(String),
}

/// Errors from the tool backend.
#[derive(Debug, Error)]
pub enum ToolError {
    #[error("tool backend timed out")]
    Timeout,

    #[error("tool backend error: {0}")]
    Backend(String),

    #[error("tool backend is disabled")]
    Disabled,
}
