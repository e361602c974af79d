//! Per-session state machines, the worker tasks that drive them, and the
//! registry that owns them.
//!
//! One session = one call = one worker task. All mutations to a session's
//! state happen inside its worker, which drains a private command queue in
//! strict arrival order; different sessions share nothing mutable.

pub mod buffer;
pub mod machine;
pub mod registry;
pub mod worker;

use std::sync::Arc;

use tokio::sync::mpsc;

use voxrelay_types::config::RelayConfig;
use voxrelay_types::event::{RelayMessage, TransportEvent};

use crate::hub::BroadcastHub;
use crate::llm::LlmProvider;
use crate::persona::AgentDirectory;
use crate::tool::ToolBackend;
use crate::transcript::TranscriptSink;

pub use machine::{Flow, SessionMachine};
pub use registry::{SessionHandle, SessionRegistry};

/// A command on a session's private queue.
///
/// Transport events arrive in wire order; the connection-level commands are
/// synthesized by the transport handler (socket closed, new socket bound) and
/// the registry (teardown).
#[derive(Debug)]
pub enum SessionCommand {
    /// An inbound transport event.
    Transport(TransportEvent),
    /// The transport connection dropped; suspend and start the grace clock.
    Disconnect,
    /// A new transport connection presented this session's id; rebind and
    /// flush buffered output.
    Reconnect { outbound: mpsc::Sender<RelayMessage> },
    /// Tear the session down.
    End,
}

/// The shared collaborators every session machine composes.
#[derive(Clone)]
pub struct SessionDeps {
    pub provider: Arc<dyn LlmProvider>,
    pub directory: Arc<AgentDirectory>,
    pub tool: Arc<dyn ToolBackend>,
    pub transcript: Arc<dyn TranscriptSink>,
    pub hub: BroadcastHub,
    pub config: Arc<RelayConfig>,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted collaborators for session tests.

    use super::*;

    use std::sync::Mutex;
    use std::time::Duration;

    use futures_util::StreamExt;

    use voxrelay_types::error::ToolError;
    use voxrelay_types::lang::LanguageTag;
    use voxrelay_types::llm::{CompletionRequest, LlmError, StreamEvent};

    use crate::llm::TokenStream;
    use crate::tool::{ToolFuture, ToolIntent};
    use crate::transcript::NoopTranscriptSink;

    /// One step of a scripted model response.
    #[derive(Debug, Clone)]
    pub enum Step {
        /// Yield a text delta.
        Token(&'static str),
        /// Sleep before the next step (virtual time in tests).
        Wait(u64),
        /// Fail the stream.
        Error(&'static str),
        /// Never yield again (drives the timeout path).
        Hang,
    }

    /// An [`LlmProvider`] that replays scripted turns, one script per call.
    pub struct ScriptedProvider {
        scripts: Mutex<Vec<Vec<Step>>>,
    }

    impl ScriptedProvider {
        pub fn new(scripts: Vec<Vec<Step>>) -> Self {
            Self {
                scripts: Mutex::new(scripts),
            }
        }

        pub fn single(script: Vec<Step>) -> Self {
            Self::new(vec![script])
        }
    }

    impl LlmProvider for ScriptedProvider {
        fn name(&self) -> &str {
            "scripted"
        }

        fn stream(&self, _request: CompletionRequest) -> TokenStream {
            let script = {
                let mut scripts = self.scripts.lock().unwrap();
                if scripts.is_empty() {
                    Vec::new()
                } else {
                    scripts.remove(0)
                }
            };
            let stream = async_stream::stream! {
                yield Ok(StreamEvent::Connected);
                for step in script {
                    match step {
                        Step::Token(text) => {
                            yield Ok(StreamEvent::TextDelta { text: text.to_string() });
                        }
                        Step::Wait(ms) => tokio::time::sleep(Duration::from_millis(ms)).await,
                        Step::Error(message) => {
                            yield Err(LlmError::Stream(message.to_string()));
                            return;
                        }
                        Step::Hang => {
                            std::future::pending::<()>().await;
                        }
                    }
                }
                yield Ok(StreamEvent::Done);
            };
            stream.boxed()
        }
    }

    /// A tool backend returning a fixed answer or a fixed failure.
    pub struct StubToolBackend {
        pub response: Result<&'static str, &'static str>,
        /// Delay before answering; lets tests exercise the timeout path.
        pub delay_ms: u64,
    }

    impl StubToolBackend {
        pub fn answering(answer: &'static str) -> Self {
            Self {
                response: Ok(answer),
                delay_ms: 0,
            }
        }

        pub fn failing(message: &'static str) -> Self {
            Self {
                response: Err(message),
                delay_ms: 0,
            }
        }
    }

    impl ToolBackend for StubToolBackend {
        fn name(&self) -> &str {
            "stub"
        }

        fn invoke(
            &self,
            _intent: ToolIntent,
            _caller: Option<String>,
            _language: LanguageTag,
        ) -> ToolFuture {
            let response = self.response;
            let delay = Duration::from_millis(self.delay_ms);
            Box::pin(async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                response
                    .map(str::to_string)
                    .map_err(|m| ToolError::Backend(m.to_string()))
            })
        }
    }

    /// Deps wired with scripted collaborators and a small test config.
    pub fn deps(provider: Arc<dyn LlmProvider>, tool: Arc<dyn ToolBackend>) -> SessionDeps {
        let mut config = RelayConfig::default();
        // Short timings so paused-time tests stay readable.
        config.chunker.grace_ms = 500;
        config.chunker.min_flush_chars = 8;
        config.session.reconnect_grace_ms = 5_000;
        config.model.request_timeout_ms = 2_000;
        config.tool.timeout_ms = 1_000;
        SessionDeps {
            provider,
            directory: Arc::new(AgentDirectory::default()),
            tool,
            transcript: Arc::new(NoopTranscriptSink),
            hub: BroadcastHub::new(64),
            config: Arc::new(config),
        }
    }
}
