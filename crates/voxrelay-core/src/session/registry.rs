//! Session registry.
//!
//! Concurrency-safe map from session id to session handle: create-if-absent
//! on setup, reconnect-or-ignore for an id that already exists, removal by
//! the worker when a session closes. `setup` and `end` race freely across
//! different sessions; the DashMap discipline keeps each key consistent.
//!
//! The registry is also the interrupt fast path: an `interrupt` (or `end`)
//! cancels the session's current turn token *before* the event is enqueued,
//! so cancellation reaches a mid-stream model call ahead of any queued work.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use voxrelay_types::error::RegistryError;
use voxrelay_types::event::{RelayMessage, TransportEvent};
use voxrelay_types::session::{SessionId, SetupInfo};

use super::machine::SessionMachine;
use super::{worker, SessionCommand, SessionDeps};

/// Handle to a live session worker.
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    turn_cancel: Arc<Mutex<CancellationToken>>,
}

impl SessionHandle {
    fn send(&self, id: &SessionId, command: SessionCommand) -> Result<(), RegistryError> {
        self.commands.try_send(command).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => RegistryError::QueueFull(id.to_string()),
            mpsc::error::TrySendError::Closed(_) => RegistryError::WorkerGone(id.to_string()),
        })
    }

    /// Cancel the session's in-flight model turn, if any.
    pub fn cancel_turn(&self) {
        self.turn_cancel.lock().expect("turn cancel lock").cancel();
    }
}

/// Owner of all live sessions.
pub struct SessionRegistry {
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
    deps: SessionDeps,
}

impl SessionRegistry {
    pub fn new(deps: SessionDeps) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            deps,
        }
    }

    /// Handle a transport `setup`: create the session if the id is new, or
    /// treat the new connection as a reconnect for an existing one.
    pub fn attach(
        &self,
        setup: SetupInfo,
        outbound: mpsc::Sender<RelayMessage>,
    ) -> Result<SessionId, RegistryError> {
        let id = setup
            .session_key()
            .ok_or(RegistryError::MissingSessionId)?;

        if let Some(handle) = self.sessions.get(&id) {
            debug!(session_id = %id, "setup for known session, rebinding transport");
            handle.send(&id, SessionCommand::Reconnect { outbound })?;
            return Ok(id);
        }

        let (tx, rx) = mpsc::channel(self.deps.config.session.event_queue_capacity);
        let turn_cancel = Arc::new(Mutex::new(CancellationToken::new()));
        let machine = SessionMachine::new(id.clone(), self.deps.clone(), turn_cancel.clone(), outbound);
        let handle = SessionHandle {
            commands: tx.clone(),
            turn_cancel,
        };
        self.sessions.insert(id.clone(), handle);
        tokio::spawn(worker::run(machine, rx, self.sessions.clone()));

        // The queue is freshly created; this cannot fail.
        if tx
            .try_send(SessionCommand::Transport(TransportEvent::Setup(setup)))
            .is_err()
        {
            warn!(session_id = %id, "failed to enqueue setup event");
        }
        Ok(id)
    }

    /// Route a transport event to its session, in arrival order.
    pub fn dispatch(&self, id: &SessionId, event: TransportEvent) -> Result<(), RegistryError> {
        let handle = self
            .sessions
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        if matches!(event, TransportEvent::Interrupt { .. }) {
            // Interrupt wins any race with a completing turn: cancel before
            // the event is even queued.
            handle.cancel_turn();
        }
        handle.send(id, SessionCommand::Transport(event))
    }

    /// The transport connection for a session dropped.
    pub fn disconnect(&self, id: &SessionId) -> Result<(), RegistryError> {
        let handle = self
            .sessions
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        handle.send(id, SessionCommand::Disconnect)
    }

    /// Tear a session down explicitly.
    pub fn end(&self, id: &SessionId) -> Result<(), RegistryError> {
        let handle = self
            .sessions
            .get(id)
            .ok_or_else(|| RegistryError::NotFound(id.to_string()))?;
        handle.cancel_turn();
        handle.send(id, SessionCommand::End)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
