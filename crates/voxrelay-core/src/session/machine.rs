//! The per-session state machine.
//!
//! Owns one call's lifecycle: transport events in, chunked speech and control
//! messages out. Composes the utterance chunker, language detector, directive
//! filter, agent directory, tool backend, and streaming model client. Driven
//! exclusively by its worker task, so nothing here needs interior locking --
//! except the turn cancellation slot, which the registry cancels from outside
//! so an `interrupt` reaches a mid-stream turn before the next token is
//! forwarded.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use voxrelay_types::error::SessionError;
use voxrelay_types::event::{RelayMessage, SessionEvent, TransportEvent};
use voxrelay_types::lang::LanguageTag;
use voxrelay_types::llm::{CompletionRequest, LlmError, Message, StreamEvent};
use voxrelay_types::persona::{HandoffContext, HandoffReason};
use voxrelay_types::session::{SessionId, SessionState, SetupInfo};
use voxrelay_types::turn::{ConversationTurn, SpeakerRole, TurnKind};

use crate::chunker::UtteranceChunker;
use crate::language::LanguageDetector;
use crate::persona::DirectiveFilter;
use crate::tool;

use super::buffer::PendingOutputBuffer;
use super::{SessionCommand, SessionDeps};

/// History marker appended when a response is cut short by an interrupt.
const TRUNCATION_MARKER: &str =
    "The customer interrupted the previous response; it was cut short.";

/// Whether the worker should keep running after a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Closed,
}

/// How a model turn ended.
enum TurnOutcome {
    /// Stream completed; `text` is everything actually spoken.
    Completed {
        text: String,
        directive: Option<String>,
    },
    /// Cancelled mid-stream; un-emitted chunks were discarded.
    Interrupted { spoken: String },
    /// Backend failure; the caller speaks the localized fallback.
    Failed { error: LlmError, spoken: String },
}

enum LoopEnd {
    Cancelled,
    StreamDone,
    Failed(LlmError),
}

/// One call's conversational state and behavior.
pub struct SessionMachine {
    id: SessionId,
    state: SessionState,
    setup: Option<SetupInfo>,
    history: Vec<ConversationTurn>,
    next_seq: u64,
    active_persona: String,
    language: LanguageTag,
    outbound: Option<mpsc::Sender<RelayMessage>>,
    pending: PendingOutputBuffer,
    suspend_deadline: Option<Instant>,
    /// Shared with the registry handle; cancelled to interrupt the current
    /// model turn, replaced at the start of every turn.
    turn_cancel: Arc<Mutex<CancellationToken>>,
    /// Set when the last turn was cancelled; consumed by the `interrupt`
    /// event to append the truncation marker exactly once.
    turn_truncated: bool,
    detector: LanguageDetector,
    deps: SessionDeps,
}

impl SessionMachine {
    pub fn new(
        id: SessionId,
        deps: SessionDeps,
        turn_cancel: Arc<Mutex<CancellationToken>>,
        outbound: mpsc::Sender<RelayMessage>,
    ) -> Self {
        let session_cfg = &deps.config.session;
        let pending = PendingOutputBuffer::new(
            session_cfg.output_buffer_capacity,
            session_cfg.overflow_policy,
        );
        let detector = LanguageDetector::new(&deps.config.language);
        let language = deps.config.language.default;
        let active_persona = deps.directory.default_persona().id.clone();
        Self {
            id,
            state: SessionState::AwaitingSetup,
            setup: None,
            history: Vec::new(),
            next_seq: 0,
            active_persona,
            language,
            outbound: Some(outbound),
            pending,
            suspend_deadline: None,
            turn_cancel,
            turn_truncated: false,
            detector,
            deps,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.history
    }

    pub fn active_persona(&self) -> &str {
        &self.active_persona
    }

    pub fn language(&self) -> LanguageTag {
        self.language
    }

    /// Deadline for the suspended-grace timer, while suspended.
    pub fn suspend_deadline(&self) -> Option<Instant> {
        self.suspend_deadline
    }

    /// Process one command. All session state mutation happens here, on the
    /// worker task.
    pub async fn handle(&mut self, command: SessionCommand) -> Flow {
        match command {
            SessionCommand::Transport(event) => self.handle_transport(event).await,
            SessionCommand::Disconnect => {
                self.handle_disconnect();
                Flow::Continue
            }
            SessionCommand::Reconnect { outbound } => {
                self.handle_reconnect(outbound).await;
                Flow::Continue
            }
            SessionCommand::End => self.close("end requested").await,
        }
    }

    /// Single dispatcher over the closed transport-event set.
    async fn handle_transport(&mut self, event: TransportEvent) -> Flow {
        match (self.state, event) {
            (_, TransportEvent::Info { data }) => {
                debug!(session_id = %self.id, payload = ?data, "info event");
            }
            (_, TransportEvent::Debug { data }) => {
                debug!(session_id = %self.id, payload = ?data, "debug event");
            }
            (SessionState::AwaitingSetup, TransportEvent::Setup(info)) => {
                self.handle_setup(info).await;
            }
            (SessionState::Active, TransportEvent::Setup(_)) => {
                // Replayed setup is a no-op so transports may retry it safely.
                debug!(session_id = %self.id, "duplicate setup ignored");
            }
            (SessionState::Active, TransportEvent::Prompt { voice_prompt, .. }) => {
                if voice_prompt.trim().is_empty() {
                    debug!(session_id = %self.id, "empty prompt ignored");
                } else {
                    self.handle_prompt(voice_prompt, TurnKind::Speech).await;
                }
            }
            (SessionState::Active, TransportEvent::Dtmf { digit }) => {
                self.handle_prompt(format!("User pressed {digit}"), TurnKind::Keypad)
                    .await;
            }
            (SessionState::Active, TransportEvent::Interrupt { .. }) => {
                self.handle_interrupt();
            }
            (state, event) => {
                let err = SessionError::InvalidEvent {
                    event: event.kind(),
                    state,
                };
                warn!(session_id = %self.id, %err, "protocol violation ignored");
            }
        }
        Flow::Continue
    }

    async fn handle_setup(&mut self, info: SetupInfo) {
        let language = self.deps.config.language.default;
        let directory = self.deps.directory.clone();
        let persona = directory.resolve_initial(&info);
        self.active_persona = persona.id.clone();
        self.language = language;
        let greeting = persona.greeting(language).map(str::to_string);
        self.setup = Some(info.clone());
        self.state = SessionState::Active;
        info!(
            session_id = %self.id,
            persona = %self.active_persona,
            language = %self.language,
            "session active"
        );
        self.deps.hub.publish(SessionEvent::SessionStarted {
            session_id: self.id.clone(),
            persona: self.active_persona.clone(),
            language: self.language,
        });
        tokio::spawn(self.deps.transcript.session_started(&self.id, &info));

        if let Some(greeting) = greeting {
            self.send_chunk(greeting.clone(), true).await;
            let persona_id = self.active_persona.clone();
            self.append_turn(SpeakerRole::Agent, TurnKind::Speech, greeting, Some(persona_id));
        }
    }

    fn handle_interrupt(&mut self) {
        // The registry already cancelled the turn token before enqueueing
        // this event; by the time it is processed the turn has unwound.
        if self.turn_truncated {
            self.turn_truncated = false;
            let persona_id = self.active_persona.clone();
            self.append_turn(
                SpeakerRole::System,
                TurnKind::Truncation,
                TRUNCATION_MARKER,
                Some(persona_id),
            );
            info!(session_id = %self.id, "response truncated by customer interrupt");
        } else {
            debug!(session_id = %self.id, "interrupt with no in-flight turn");
        }
    }

    fn handle_disconnect(&mut self) {
        if self.state != SessionState::Active {
            debug!(session_id = %self.id, state = %self.state, "disconnect ignored");
            return;
        }
        self.state = SessionState::Suspended;
        self.outbound = None;
        let grace = Duration::from_millis(self.deps.config.session.reconnect_grace_ms);
        self.suspend_deadline = Some(Instant::now() + grace);
        info!(session_id = %self.id, grace_ms = grace.as_millis() as u64, "transport dropped, session suspended");
    }

    async fn handle_reconnect(&mut self, outbound: mpsc::Sender<RelayMessage>) {
        match self.state {
            SessionState::Suspended => {
                self.outbound = Some(outbound);
                self.suspend_deadline = None;
                self.state = SessionState::Active;
                let buffered = self.pending.drain();
                let count = buffered.len();
                for message in buffered {
                    self.send_outbound(message).await;
                }
                info!(session_id = %self.id, flushed = count, "transport reconnected");
            }
            SessionState::Active => {
                // The transport replaced its connection before we saw the old
                // one drop; rebind.
                self.outbound = Some(outbound);
                debug!(session_id = %self.id, "transport rebound while active");
            }
            state => {
                debug!(session_id = %self.id, %state, "reconnect ignored");
            }
        }
    }

    async fn close(&mut self, reason: &str) -> Flow {
        if self.state == SessionState::Closed {
            return Flow::Closed;
        }
        self.turn_cancel.lock().expect("turn cancel lock").cancel();
        self.state = SessionState::Closed;
        info!(session_id = %self.id, reason, "session closed");
        self.deps.hub.publish(SessionEvent::SessionClosed {
            session_id: self.id.clone(),
            reason: reason.to_string(),
        });
        Flow::Closed
    }

    async fn handle_prompt(&mut self, text: String, kind: TurnKind) {
        self.append_turn(SpeakerRole::Customer, kind, text.clone(), None);

        // Language gate runs before any chunk of this turn so TTS parameters
        // are correct when the agent speaks.
        if let Some(new_lang) = self.detector.should_switch(self.language, &text) {
            let old = self.language;
            self.language = new_lang;
            info!(session_id = %self.id, from = %old, to = %new_lang, "language switched");
            self.send_outbound(RelayMessage::language(new_lang)).await;
            self.deps.hub.publish(SessionEvent::LanguageChanged {
                session_id: self.id.clone(),
                from: old,
                to: new_lang,
            });
        }

        if self.deps.config.tool.enabled {
            if let Some(intent) = tool::detect_intent(&text) {
                if !self.run_tool(intent).await {
                    // Degraded to the spoken unavailable line; the
                    // conversation continues on the next prompt.
                    return;
                }
            }
        }

        let outcome = self.run_model_turn().await;
        match outcome {
            TurnOutcome::Completed { text, directive } => {
                if !text.is_empty() {
                    let persona_id = self.active_persona.clone();
                    self.append_turn(SpeakerRole::Agent, TurnKind::Speech, text.clone(), Some(persona_id));
                }
                self.route_after_turn(directive, &text).await;
            }
            TurnOutcome::Interrupted { spoken } => {
                if !spoken.is_empty() {
                    let persona_id = self.active_persona.clone();
                    self.append_turn(SpeakerRole::Agent, TurnKind::Speech, spoken, Some(persona_id));
                }
                self.turn_truncated = true;
                debug!(session_id = %self.id, "model turn cancelled");
            }
            TurnOutcome::Failed { error, spoken } => {
                warn!(session_id = %self.id, %error, "model turn failed, speaking fallback");
                if !spoken.is_empty() {
                    let persona_id = self.active_persona.clone();
                    self.append_turn(SpeakerRole::Agent, TurnKind::Speech, spoken, Some(persona_id));
                }
                let fallback = fallback_message(self.language);
                self.send_chunk(fallback.to_string(), true).await;
                let persona_id = self.active_persona.clone();
                self.append_turn(SpeakerRole::Agent, TurnKind::Speech, fallback, Some(persona_id));
            }
        }
    }

    /// Invoke the tool backend for a recognized intent. Returns false when
    /// the turn already degraded to the spoken unavailable line.
    async fn run_tool(&mut self, intent: tool::ToolIntent) -> bool {
        let caller = self.setup.as_ref().and_then(|s| s.from.clone());
        let call_timeout = Duration::from_millis(self.deps.config.tool.timeout_ms);
        let future = self.deps.tool.invoke(intent, caller, self.language);
        let result = match tokio::time::timeout(call_timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(voxrelay_types::error::ToolError::Timeout),
        };
        match result {
            Ok(answer) => {
                info!(session_id = %self.id, %intent, "tool backend answered");
                self.deps.hub.publish(SessionEvent::ToolInvoked {
                    session_id: self.id.clone(),
                    intent: intent.to_string(),
                    success: true,
                });
                let persona_id = self.active_persona.clone();
                self.append_turn(
                    SpeakerRole::System,
                    TurnKind::ToolResult,
                    answer,
                    Some(persona_id),
                );
                true
            }
            Err(error) => {
                warn!(session_id = %self.id, %intent, %error, "tool backend failed");
                self.deps.hub.publish(SessionEvent::ToolInvoked {
                    session_id: self.id.clone(),
                    intent: intent.to_string(),
                    success: false,
                });
                let line = tool::unavailable_message(self.language);
                self.send_chunk(line.to_string(), true).await;
                let persona_id = self.active_persona.clone();
                self.append_turn(SpeakerRole::Agent, TurnKind::Speech, line, Some(persona_id));
                false
            }
        }
    }

    /// Stream one model turn through the directive filter and the chunker.
    async fn run_model_turn(&mut self) -> TurnOutcome {
        let token = CancellationToken::new();
        *self.turn_cancel.lock().expect("turn cancel lock") = token.clone();

        let request = self.build_request();
        let mut stream = self.deps.provider.stream(request);

        let call_timeout = Duration::from_millis(self.deps.config.model.request_timeout_ms);
        let grace = Duration::from_millis(self.deps.config.chunker.grace_ms);

        let mut filter = DirectiveFilter::new();
        let mut chunker = UtteranceChunker::new(&self.deps.config.chunker);
        // Chunks are sent one behind so the last one can carry `last: true`.
        let mut held: Option<String> = None;
        let mut spoken = String::new();
        let mut grace_deadline = Instant::now() + grace;

        let end = loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break LoopEnd::Cancelled,
                result = tokio::time::timeout(call_timeout, stream.next()) => match result {
                    Err(_) => break LoopEnd::Failed(LlmError::Timeout),
                    Ok(None) => break LoopEnd::StreamDone,
                    Ok(Some(Ok(StreamEvent::TextDelta { text }))) => {
                        let clean = filter.push(&text);
                        if !clean.is_empty() {
                            for chunk in chunker.push(&clean) {
                                self.emit_chunk(&mut held, &mut spoken, chunk).await;
                                grace_deadline = Instant::now() + grace;
                            }
                        }
                    }
                    Ok(Some(Ok(StreamEvent::Connected | StreamEvent::Done))) => {}
                    Ok(Some(Err(error))) => break LoopEnd::Failed(error),
                },
                _ = tokio::time::sleep_until(grace_deadline), if chunker.has_pending() => {
                    if let Some(chunk) = chunker.flush_stale() {
                        self.emit_chunk(&mut held, &mut spoken, chunk).await;
                    }
                    grace_deadline = Instant::now() + grace;
                }
            }
        };

        match end {
            LoopEnd::Cancelled => TurnOutcome::Interrupted { spoken },
            LoopEnd::Failed(error) => TurnOutcome::Failed { error, spoken },
            LoopEnd::StreamDone => {
                let (tail, directive) = filter.finish();
                if !tail.is_empty() {
                    for chunk in chunker.push(&tail) {
                        self.emit_chunk(&mut held, &mut spoken, chunk).await;
                    }
                }
                if let Some(rest) = chunker.finish() {
                    self.emit_chunk(&mut held, &mut spoken, rest).await;
                }
                if let Some(last_chunk) = held.take() {
                    spoken.push_str(&last_chunk);
                    self.send_chunk(last_chunk, true).await;
                }
                if spoken.is_empty() && directive.is_none() {
                    return TurnOutcome::Failed {
                        error: LlmError::EmptyResponse,
                        spoken,
                    };
                }
                TurnOutcome::Completed {
                    text: spoken,
                    directive,
                }
            }
        }
    }

    /// Send the previously held chunk (never final) and hold the new one.
    async fn emit_chunk(&mut self, held: &mut Option<String>, spoken: &mut String, chunk: String) {
        if let Some(prev) = held.replace(chunk) {
            spoken.push_str(&prev);
            self.send_chunk(prev, false).await;
        }
    }

    /// Perform a handoff signaled by the completed turn, directive first,
    /// then directory trigger phrases over the spoken text.
    async fn route_after_turn(&mut self, directive: Option<String>, spoken: &str) {
        if let Some(target) = directive {
            if target == self.active_persona {
                debug!(session_id = %self.id, %target, "directive routes to active persona");
            } else if self.deps.directory.contains(&target) {
                self.perform_handoff(target, HandoffReason::Directive).await;
                return;
            } else {
                let err = SessionError::UnknownPersona(target);
                warn!(session_id = %self.id, %err, "routing directive ignored");
            }
        }
        if spoken.is_empty() {
            return;
        }
        let directory = self.deps.directory.clone();
        if let Some((persona, phrase)) = directory.find_route(spoken, &self.active_persona) {
            let target = persona.id.clone();
            self.perform_handoff(target, HandoffReason::Trigger { phrase })
                .await;
        }
    }

    async fn perform_handoff(&mut self, target: String, reason: HandoffReason) {
        let from = std::mem::replace(&mut self.active_persona, target.clone());
        let context = HandoffContext {
            from: from.clone(),
            to: target.clone(),
            reason,
            turn_seq: self.next_seq.saturating_sub(1),
            language: self.language,
        };
        info!(session_id = %self.id, %from, to = %target, "persona handoff");
        self.append_turn(
            SpeakerRole::System,
            TurnKind::Handoff,
            context.briefing(),
            Some(target.clone()),
        );
        self.send_outbound(RelayMessage::Handoff {
            from: from.clone(),
            to: target.clone(),
        })
        .await;
        self.deps.hub.publish(SessionEvent::PersonaHandoff {
            session_id: self.id.clone(),
            from,
            to: target,
        });
    }

    fn build_request(&self) -> CompletionRequest {
        let personalization = self
            .setup
            .as_ref()
            .and_then(|setup| setup.personalization_block());
        let directory = &self.deps.directory;
        let persona = directory
            .get(&self.active_persona)
            .unwrap_or_else(|| directory.default_persona());
        let system = directory.system_prompt(persona, self.language, personalization.as_deref());

        let messages = self
            .history
            .iter()
            .map(|turn| match turn.role {
                SpeakerRole::Customer => Message::user(turn.text.as_str()),
                SpeakerRole::Agent => Message::assistant(turn.text.as_str()),
                SpeakerRole::System => Message::system(turn.text.as_str()),
            })
            .collect();

        let model_cfg = &self.deps.config.model;
        CompletionRequest {
            model: model_cfg.model.clone(),
            messages,
            system: Some(system),
            max_tokens: model_cfg.max_tokens,
            temperature: Some(model_cfg.temperature),
        }
    }

    fn append_turn(
        &mut self,
        role: SpeakerRole,
        kind: TurnKind,
        text: impl Into<String>,
        agent_id: Option<String>,
    ) {
        let turn = ConversationTurn::new(self.next_seq, role, kind, text, agent_id, self.language);
        self.next_seq += 1;
        self.deps.hub.publish(SessionEvent::TurnAppended {
            session_id: self.id.clone(),
            seq: turn.seq,
            role: turn.role,
            kind: turn.kind,
            text: turn.text.clone(),
            language: turn.language,
        });
        tokio::spawn(self.deps.transcript.record_turn(&self.id, &turn));
        self.history.push(turn);
    }

    async fn send_chunk(&mut self, text: String, last: bool) {
        self.send_outbound(RelayMessage::chunk(text, last)).await;
    }

    async fn send_outbound(&mut self, message: RelayMessage) {
        if let Some(tx) = &self.outbound {
            if tx.send(message.clone()).await.is_err() {
                // Transport went away before we saw the disconnect; buffer
                // until the grace period resolves it one way or the other.
                debug!(session_id = %self.id, "outbound channel gone, buffering");
                self.outbound = None;
                self.buffer_message(message);
            }
        } else {
            self.buffer_message(message);
        }
    }

    fn buffer_message(&mut self, message: RelayMessage) {
        use super::buffer::PushOutcome;
        match self.pending.push(message) {
            PushOutcome::Stored => {}
            PushOutcome::DroppedOldest => {
                warn!(session_id = %self.id, dropped = self.pending.dropped(), "pending buffer full, oldest chunk dropped");
            }
            PushOutcome::Rejected => {
                warn!(session_id = %self.id, dropped = self.pending.dropped(), "pending buffer full, chunk rejected");
            }
        }
    }
}

/// Spoken fallback when the model backend fails.
fn fallback_message(language: LanguageTag) -> &'static str {
    match language {
        LanguageTag::PtBr => "Desculpe, ocorreu um erro. Pode repetir, por favor?",
        LanguageTag::EnUs => "Sorry, something went wrong. Could you say that again?",
        LanguageTag::EsUs => "Lo siento, ocurrió un error. ¿Puede repetirlo, por favor?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::session::testing::{deps, ScriptedProvider, Step, StubToolBackend};

    use tokio::sync::mpsc::Receiver;

    struct Harness {
        machine: SessionMachine,
        outbound: Receiver<RelayMessage>,
        turn_cancel: Arc<Mutex<CancellationToken>>,
        events: tokio::sync::broadcast::Receiver<SessionEvent>,
    }

    fn harness(provider: ScriptedProvider, tool: StubToolBackend) -> Harness {
        let deps = deps(Arc::new(provider), Arc::new(tool));
        let events = deps.hub.subscribe();
        let turn_cancel = Arc::new(Mutex::new(CancellationToken::new()));
        let (tx, rx) = mpsc::channel(64);
        let machine = SessionMachine::new(
            SessionId::from("CA1"),
            deps,
            turn_cancel.clone(),
            tx,
        );
        Harness {
            machine,
            outbound: rx,
            turn_cancel,
            events,
        }
    }

    fn setup_event() -> SessionCommand {
        SessionCommand::Transport(TransportEvent::Setup(SetupInfo {
            call_sid: Some("CA1".to_string()),
            from: Some("+5511999990000".to_string()),
            ..Default::default()
        }))
    }

    fn prompt(text: &str) -> SessionCommand {
        SessionCommand::Transport(TransportEvent::Prompt {
            voice_prompt: text.to_string(),
            lang: None,
            last: true,
        })
    }

    fn drain_outbound(rx: &mut Receiver<RelayMessage>) -> Vec<RelayMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    fn drain_events(
        rx: &mut tokio::sync::broadcast::Receiver<SessionEvent>,
    ) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    fn texts(messages: &[RelayMessage]) -> Vec<(String, bool)> {
        messages
            .iter()
            .filter_map(|m| match m {
                RelayMessage::Text { token, last, .. } => Some((token.clone(), *last)),
                _ => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn setup_activates_and_greets() {
        let mut h = harness(ScriptedProvider::new(vec![]), StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;

        assert_eq!(h.machine.state(), SessionState::Active);
        assert_eq!(h.machine.active_persona(), "olli");

        let messages = drain_outbound(&mut h.outbound);
        let chunks = texts(&messages);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.contains("Olli"));
        assert!(chunks[0].1, "greeting must be a final chunk");

        let history = h.machine.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].role, SpeakerRole::Agent);

        let events = drain_events(&mut h.events);
        assert!(matches!(events[0], SessionEvent::SessionStarted { .. }));
    }

    #[tokio::test]
    async fn replayed_setup_is_a_no_op() {
        let mut h = harness(ScriptedProvider::new(vec![]), StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        let history_len = h.machine.history().len();
        drain_outbound(&mut h.outbound);

        h.machine.handle(setup_event()).await;

        assert_eq!(h.machine.state(), SessionState::Active);
        assert_eq!(h.machine.history().len(), history_len);
        assert!(drain_outbound(&mut h.outbound).is_empty());
    }

    #[tokio::test]
    async fn events_before_setup_are_ignored() {
        let mut h = harness(ScriptedProvider::new(vec![]), StubToolBackend::answering("x"));
        h.machine.handle(prompt("hello")).await;
        h.machine
            .handle(SessionCommand::Transport(TransportEvent::Interrupt {
                utterance_until_interrupt: None,
                duration_until_interrupt_ms: None,
            }))
            .await;

        assert_eq!(h.machine.state(), SessionState::AwaitingSetup);
        assert!(h.machine.history().is_empty());
        assert!(drain_outbound(&mut h.outbound).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn prompt_streams_chunks_and_appends_turns() {
        let provider = ScriptedProvider::single(vec![
            Step::Token("Tudo certo. "),
            Step::Token("Posso ajudar?"),
        ]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("oi, tudo bem?")).await;

        let chunks = texts(&drain_outbound(&mut h.outbound));
        assert!(!chunks.is_empty());
        assert!(chunks.iter().rev().skip(1).all(|(_, last)| !*last));
        assert!(chunks.last().unwrap().1, "turn must end with a final chunk");
        let rebuilt: String = chunks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(rebuilt, "Tudo certo. Posso ajudar?");

        let history = h.machine.history();
        // greeting, customer, agent
        assert_eq!(history.len(), 3);
        assert_eq!(history[1].role, SpeakerRole::Customer);
        assert_eq!(history[2].role, SpeakerRole::Agent);
        assert_eq!(history[2].text, "Tudo certo. Posso ajudar?");

        // Sequence indices are strictly increasing and gapless.
        for (i, turn) in history.iter().enumerate() {
            assert_eq!(turn.seq, i as u64);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn balance_prompt_invokes_tool_before_model() {
        let provider = ScriptedProvider::single(vec![Step::Token(
            "Você tem dez reais na conta corrente. ",
        )]);
        let tool = StubToolBackend::answering("Current balance: R$ 10.00.");
        let mut h = harness(provider, tool);
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);
        drain_events(&mut h.events);

        h.machine.handle(prompt("what is my balance")).await;

        let history = h.machine.history();
        // greeting, customer, tool result, agent
        assert_eq!(history.len(), 4);
        assert_eq!(history[2].role, SpeakerRole::System);
        assert_eq!(history[2].kind, TurnKind::ToolResult);
        assert!(history[2].text.contains("R$ 10.00"));
        assert_eq!(history[3].role, SpeakerRole::Agent);

        let events = drain_events(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::ToolInvoked { success: true, .. }
        )));

        let chunks = texts(&drain_outbound(&mut h.outbound));
        assert!(chunks.last().unwrap().1);
    }

    #[tokio::test(start_paused = true)]
    async fn tool_failure_degrades_to_unavailable_line() {
        let provider = ScriptedProvider::single(vec![Step::Token("never reached.")]);
        let tool = StubToolBackend::failing("backend down");
        let mut h = harness(provider, tool);
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("qual é o meu saldo?")).await;

        let chunks = texts(&drain_outbound(&mut h.outbound));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.contains("temporariamente indisponível"));
        assert!(chunks[0].1);

        // Session still active; the model was never called for this turn.
        assert_eq!(h.machine.state(), SessionState::Active);
        let history = h.machine.history();
        assert_eq!(history.last().unwrap().role, SpeakerRole::Agent);
        assert!(!history.iter().any(|t| t.text.contains("never reached")));
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_cancels_turn_and_marks_history() {
        let provider = ScriptedProvider::new(vec![
            vec![Step::Token("Investments are"), Step::Wait(10_000), Step::Token(" great.")],
            vec![Step::Token("Olá de novo.")],
        ]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        // Cancel the in-flight turn shortly after it starts, the same way
        // the registry does when an interrupt frame arrives.
        let cancel = h.turn_cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1_000)).await;
            cancel.lock().unwrap().cancel();
        });

        h.machine.handle(prompt("tell me about investments")).await;

        // Nothing (or at most a stale flush) was spoken before the cancel;
        // nothing at all may arrive after it.
        let after_cancel = texts(&drain_outbound(&mut h.outbound));
        assert!(!after_cancel.iter().any(|(t, _)| t.contains("great")));

        h.machine
            .handle(SessionCommand::Transport(TransportEvent::Interrupt {
                utterance_until_interrupt: None,
                duration_until_interrupt_ms: None,
            }))
            .await;

        let history = h.machine.history();
        let marker = history
            .iter()
            .find(|t| t.kind == TurnKind::Truncation)
            .expect("truncation marker appended");
        assert_eq!(marker.role, SpeakerRole::System);

        // The next prompt proceeds normally.
        h.machine.handle(prompt("hello")).await;
        let chunks = texts(&drain_outbound(&mut h.outbound));
        let rebuilt: String = chunks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(rebuilt, "Olá de novo.");
        assert_eq!(h.machine.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn language_switch_precedes_agent_chunks() {
        let provider = ScriptedProvider::single(vec![Step::Token("Of course, happy to help. ")]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);
        drain_events(&mut h.events);

        h.machine.handle(prompt("do you speak english")).await;

        let messages = drain_outbound(&mut h.outbound);
        match &messages[0] {
            RelayMessage::Language {
                tts_language,
                transcription_language,
            } => {
                assert_eq!(*tts_language, LanguageTag::EnUs);
                assert_eq!(*transcription_language, LanguageTag::EnUs);
            }
            other => panic!("expected language change first, got {other:?}"),
        }
        assert!(matches!(messages[1], RelayMessage::Text { .. }));
        assert_eq!(h.machine.language(), LanguageTag::EnUs);

        let events = drain_events(&mut h.events);
        assert!(events.iter().any(|e| matches!(
            e,
            SessionEvent::LanguageChanged {
                from: LanguageTag::PtBr,
                to: LanguageTag::EnUs,
                ..
            }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn routing_directive_hands_off_and_is_never_spoken() {
        let provider = ScriptedProvider::single(vec![
            Step::Token("Claro, vou te passar para a equipe certa. "),
            Step::Token("#route_to:sunny"),
        ]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);
        drain_events(&mut h.events);

        h.machine.handle(prompt("preciso de ajuda")).await;

        assert_eq!(h.machine.active_persona(), "sunny");

        let messages = drain_outbound(&mut h.outbound);
        for (text, _) in texts(&messages) {
            assert!(!text.contains("#route_to"), "directive leaked into speech: {text}");
        }
        assert!(messages
            .iter()
            .any(|m| matches!(m, RelayMessage::Handoff { to, .. } if to == "sunny")));

        let history = h.machine.history();
        let brief = history
            .iter()
            .find(|t| t.kind == TurnKind::Handoff)
            .expect("handoff briefing appended");
        assert!(brief.text.contains("olli"));
        assert!(brief.text.contains("sunny"));

        let events = drain_events(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::PersonaHandoff { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_directive_target_is_ignored() {
        let provider =
            ScriptedProvider::single(vec![Step::Token("Um momento. #route_to:ghost")]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("oi")).await;

        assert_eq!(h.machine.active_persona(), "olli");
    }

    #[tokio::test(start_paused = true)]
    async fn trigger_phrase_in_reply_routes_to_specialist() {
        let provider = ScriptedProvider::single(vec![Step::Token(
            "Our investments team can walk you through the funds. ",
        )]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("how do I grow my savings?")).await;

        assert_eq!(h.machine.active_persona(), "io");
    }

    #[tokio::test(start_paused = true)]
    async fn model_timeout_speaks_fallback_and_session_survives() {
        let provider = ScriptedProvider::new(vec![
            vec![Step::Hang],
            vec![Step::Token("De volta ao normal. ")],
        ]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("x")).await;

        let chunks = texts(&drain_outbound(&mut h.outbound));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.starts_with("Desculpe"));
        assert!(chunks[0].1);
        assert_eq!(h.machine.state(), SessionState::Active);

        // The next prompt works normally.
        h.machine.handle(prompt("oi")).await;
        let chunks = texts(&drain_outbound(&mut h.outbound));
        let rebuilt: String = chunks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(rebuilt, "De volta ao normal. ");
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_speaks_fallback() {
        let provider = ScriptedProvider::single(vec![Step::Error("connection reset")]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("oi")).await;

        let chunks = texts(&drain_outbound(&mut h.outbound));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.starts_with("Desculpe"));
        assert_eq!(h.machine.state(), SessionState::Active);
    }

    #[tokio::test(start_paused = true)]
    async fn empty_response_speaks_fallback() {
        let provider = ScriptedProvider::single(vec![]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine.handle(prompt("oi")).await;

        let chunks = texts(&drain_outbound(&mut h.outbound));
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0.starts_with("Desculpe"));
    }

    #[tokio::test(start_paused = true)]
    async fn dtmf_is_a_keypad_prompt() {
        let provider = ScriptedProvider::single(vec![Step::Token("Você pressionou quatro. ")]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        h.machine
            .handle(SessionCommand::Transport(TransportEvent::Dtmf {
                digit: "4".to_string(),
            }))
            .await;

        let history = h.machine.history();
        let keypad = history
            .iter()
            .find(|t| t.kind == TurnKind::Keypad)
            .expect("keypad turn");
        assert_eq!(keypad.role, SpeakerRole::Customer);
        assert_eq!(keypad.text, "User pressed 4");
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_generated_without_transport_flush_in_order_on_reconnect() {
        let provider = ScriptedProvider::single(vec![
            Step::Token("One. "),
            Step::Token("Two. "),
            Step::Token("Three."),
        ]);
        let mut h = harness(provider, StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_outbound(&mut h.outbound);

        // Transport dies without a clean disconnect: sends fail, chunks land
        // in the pending buffer.
        drop(h.outbound);
        h.machine.handle(prompt("go on")).await;

        h.machine.handle(SessionCommand::Disconnect).await;
        assert_eq!(h.machine.state(), SessionState::Suspended);

        let (tx, mut rx) = mpsc::channel(64);
        h.machine
            .handle(SessionCommand::Reconnect { outbound: tx })
            .await;
        assert_eq!(h.machine.state(), SessionState::Active);

        let mut flushed = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            flushed.push(msg);
        }
        let chunks = texts(&flushed);
        assert_eq!(chunks.len(), 3);
        let rebuilt: String = chunks.iter().map(|(t, _)| t.as_str()).collect();
        assert_eq!(rebuilt, "One. Two. Three.");
        assert!(chunks.last().unwrap().1);
    }

    #[tokio::test]
    async fn end_closes_session_and_publishes() {
        let mut h = harness(ScriptedProvider::new(vec![]), StubToolBackend::answering("x"));
        h.machine.handle(setup_event()).await;
        drain_events(&mut h.events);

        let flow = h.machine.handle(SessionCommand::End).await;
        assert_eq!(flow, Flow::Closed);
        assert_eq!(h.machine.state(), SessionState::Closed);

        let events = drain_events(&mut h.events);
        assert!(events
            .iter()
            .any(|e| matches!(e, SessionEvent::SessionClosed { .. })));
    }
}
