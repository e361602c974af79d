//! Per-session worker task.
//!
//! Drains the session's command queue in strict arrival order and forwards
//! each command to the state machine; no two commands for one session are
//! ever processed concurrently. While the session is suspended the worker
//! also arms the reconnect-grace deadline and forces `End` when it expires.
//! On exit the worker removes its session from the registry map.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, info};

use voxrelay_types::session::{SessionId, SessionState};

use super::machine::{Flow, SessionMachine};
use super::registry::SessionHandle;
use super::SessionCommand;

pub(crate) async fn run(
    mut machine: SessionMachine,
    mut commands: mpsc::Receiver<SessionCommand>,
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
) {
    let id = machine.id().clone();
    loop {
        let command = if machine.state() == SessionState::Suspended {
            let deadline = machine
                .suspend_deadline()
                .unwrap_or_else(tokio::time::Instant::now);
            tokio::select! {
                command = commands.recv() => command,
                _ = tokio::time::sleep_until(deadline) => {
                    info!(session_id = %id, "reconnect grace expired");
                    Some(SessionCommand::End)
                }
            }
        } else {
            commands.recv().await
        };

        match command {
            None => {
                // Registry dropped the handle; tear down.
                let _ = machine.handle(SessionCommand::End).await;
                break;
            }
            Some(command) => {
                if machine.handle(command).await == Flow::Closed {
                    break;
                }
            }
        }
    }
    sessions.remove(&id);
    debug!(session_id = %id, "session worker stopped");
}
