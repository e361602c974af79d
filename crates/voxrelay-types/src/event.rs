//! Wire and observer event types.
//!
//! Three closed sets:
//! - [`TransportEvent`] -- inbound JSON frames from the voice relay
//!   transport, dispatched by the session state machine with a single
//!   exhaustive match.
//! - [`RelayMessage`] -- outbound frames to the transport (chunked speech
//!   plus control messages).
//! - [`SessionEvent`] -- best-effort observer notifications fanned out by
//!   the broadcast hub.
//!
//! All variants are Clone + Send + Sync for use with tokio channels.

use serde::{Deserialize, Serialize};

use crate::lang::LanguageTag;
use crate::session::{SessionId, SetupInfo};
use crate::turn::{SpeakerRole, TurnKind};

/// Inbound transport events, tagged by `type` on the wire.
///
/// Unknown event types and malformed payloads fail deserialization; the
/// transport handler logs and ignores them without touching session state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TransportEvent {
    /// First event of a connection; carries session identity and metadata.
    Setup(SetupInfo),

    /// A completed customer utterance from the transport's STT.
    #[serde(rename_all = "camelCase")]
    Prompt {
        voice_prompt: String,
        /// STT language as reported by the transport; informational only.
        #[serde(default)]
        lang: Option<String>,
        #[serde(default = "default_true")]
        last: bool,
    },

    /// The customer spoke over the agent; playback was stopped.
    #[serde(rename_all = "camelCase")]
    Interrupt {
        #[serde(default)]
        utterance_until_interrupt: Option<String>,
        #[serde(default)]
        duration_until_interrupt_ms: Option<u64>,
    },

    /// A keypad press.
    Dtmf { digit: String },

    /// Informational frame; logged only.
    Info {
        #[serde(flatten)]
        data: serde_json::Map<String, serde_json::Value>,
    },

    /// Debug frame; logged only.
    Debug {
        #[serde(flatten)]
        data: serde_json::Map<String, serde_json::Value>,
    },
}

impl TransportEvent {
    /// Short name used in logs and invalid-state diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportEvent::Setup(_) => "setup",
            TransportEvent::Prompt { .. } => "prompt",
            TransportEvent::Interrupt { .. } => "interrupt",
            TransportEvent::Dtmf { .. } => "dtmf",
            TransportEvent::Info { .. } => "info",
            TransportEvent::Debug { .. } => "debug",
        }
    }
}

fn default_true() -> bool {
    true
}

/// Outbound frames to the transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum RelayMessage {
    /// A speakable token chunk. `last` marks the end of a turn.
    Text {
        token: String,
        last: bool,
        interruptible: bool,
        preemptible: bool,
    },

    /// Switch the transport's TTS and transcription language.
    #[serde(rename_all = "camelCase")]
    Language {
        tts_language: LanguageTag,
        transcription_language: LanguageTag,
    },

    /// Notice that the active persona changed.
    Handoff { from: String, to: String },
}

impl RelayMessage {
    /// A partial speech chunk with the relay's standard playback flags.
    pub fn chunk(token: impl Into<String>, last: bool) -> Self {
        RelayMessage::Text {
            token: token.into(),
            last,
            interruptible: true,
            preemptible: true,
        }
    }

    /// A language switch applying to both TTS and transcription.
    pub fn language(tag: LanguageTag) -> Self {
        RelayMessage::Language {
            tts_language: tag,
            transcription_language: tag,
        }
    }
}

/// Session lifecycle and content events for observers.
///
/// Delivery is best-effort; a slow observer lags and drops, never blocking
/// session processing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    SessionStarted {
        session_id: SessionId,
        persona: String,
        language: LanguageTag,
    },

    SessionClosed {
        session_id: SessionId,
        reason: String,
    },

    TurnAppended {
        session_id: SessionId,
        seq: u64,
        role: SpeakerRole,
        kind: TurnKind,
        text: String,
        language: LanguageTag,
    },

    LanguageChanged {
        session_id: SessionId,
        from: LanguageTag,
        to: LanguageTag,
    },

    PersonaHandoff {
        session_id: SessionId,
        from: String,
        to: String,
    },

    ToolInvoked {
        session_id: SessionId,
        intent: String,
        success: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_event_parses() {
        let json = r#"{"type":"setup","sessionId":"VX1","callSid":"CA1","from":"+551199","customParameters":{}}"#;
        let event: TransportEvent = serde_json::from_str(json).unwrap();
        match event {
            TransportEvent::Setup(info) => {
                assert_eq!(info.session_key().unwrap().as_str(), "VX1");
            }
            other => panic!("expected setup, got {other:?}"),
        }
    }

    #[test]
    fn test_prompt_event_parses() {
        let json = r#"{"type":"prompt","voicePrompt":"qual é meu saldo","lang":"pt-BR"}"#;
        let event: TransportEvent = serde_json::from_str(json).unwrap();
        match event {
            TransportEvent::Prompt {
                voice_prompt, last, ..
            } => {
                assert_eq!(voice_prompt, "qual é meu saldo");
                assert!(last);
            }
            other => panic!("expected prompt, got {other:?}"),
        }
    }

    #[test]
    fn test_dtmf_event_parses() {
        let json = r#"{"type":"dtmf","digit":"4"}"#;
        let event: TransportEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.kind(), "dtmf");
    }

    #[test]
    fn test_unknown_event_is_error() {
        let json = r#"{"type":"reboot"}"#;
        assert!(serde_json::from_str::<TransportEvent>(json).is_err());
    }

    #[test]
    fn test_info_event_keeps_payload() {
        let json = r#"{"type":"info","description":"media started"}"#;
        let event: TransportEvent = serde_json::from_str(json).unwrap();
        match event {
            TransportEvent::Info { data } => {
                assert_eq!(data["description"], "media started");
            }
            other => panic!("expected info, got {other:?}"),
        }
    }

    #[test]
    fn test_text_message_wire_shape() {
        let msg = RelayMessage::chunk("Olá.", false);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"text\""));
        assert!(json.contains("\"token\":\"Olá.\""));
        assert!(json.contains("\"interruptible\":true"));
    }

    #[test]
    fn test_language_message_wire_shape() {
        let msg = RelayMessage::language(LanguageTag::EnUs);
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"ttsLanguage\":\"en-US\""));
        assert!(json.contains("\"transcriptionLanguage\":\"en-US\""));
    }

    #[test]
    fn test_session_event_tag() {
        let event = SessionEvent::LanguageChanged {
            session_id: SessionId::from("VX1"),
            from: LanguageTag::PtBr,
            to: LanguageTag::EnUs,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"language_changed\""));
    }
}
