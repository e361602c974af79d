//! Conversation-log sink seam.
//!
//! Every appended turn is offered to an external conversation-persistence
//! collaborator, fire-and-forget: the session worker spawns the returned
//! future and never waits on it, and a sink that is down must only cost a
//! log line.

use voxrelay_types::session::{SessionId, SetupInfo};
use voxrelay_types::turn::ConversationTurn;

use std::future::Future;
use std::pin::Pin;

/// Boxed `'static` future so sinks are object-safe and spawnable.
pub type SinkFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// External conversation persistence, keyed by session id.
///
/// Implementations must be infallible from the caller's point of view:
/// errors are logged inside the returned future and swallowed.
pub trait TranscriptSink: Send + Sync {
    /// Called once when a session becomes active.
    fn session_started(&self, session: &SessionId, setup: &SetupInfo) -> SinkFuture;

    /// Called for every turn appended to a session's history.
    fn record_turn(&self, session: &SessionId, turn: &ConversationTurn) -> SinkFuture;
}

/// Sink used when conversation logging is disabled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTranscriptSink;

impl TranscriptSink for NoopTranscriptSink {
    fn session_started(&self, _session: &SessionId, _setup: &SetupInfo) -> SinkFuture {
        Box::pin(async {})
    }

    fn record_turn(&self, _session: &SessionId, _turn: &ConversationTurn) -> SinkFuture {
        Box::pin(async {})
    }
}
