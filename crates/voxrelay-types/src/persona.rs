//! Agent personas and the persona-handoff payload.
//!
//! A persona is a named configuration of identity, tone, and specialization
//! that can be active for a session. Personas are immutable after load; the
//! directory in voxrelay-core owns lookup and routing.

use serde::{Deserialize, Serialize};

use crate::lang::LanguageTag;

use std::collections::HashMap;

/// A named agent persona.
///
/// Loaded from the `[[personas]]` tables of the relay config, or from the
/// built-in Owl Bank defaults when none are configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentPersona {
    /// Stable identifier used in routing directives (e.g. `"olli"`).
    pub id: String,
    /// Display name spoken to the customer (e.g. `"Olli"`).
    pub name: String,
    /// Short specialization descriptor (e.g. `"generalist"`).
    pub role: String,
    /// System-prompt fragment describing knowledge and behavior.
    pub prompt: String,
    /// Greeting per language tag (e.g. `"pt-BR"`); [`AgentPersona::greeting`]
    /// falls back when the active language has none.
    #[serde(default)]
    pub greetings: HashMap<String, String>,
    /// Phrases that route a conversation *to* this persona.
    #[serde(default)]
    pub triggers: Vec<String>,
}

impl AgentPersona {
    /// Greeting for the given language, falling back to Portuguese and then
    /// to any configured greeting.
    pub fn greeting(&self, language: LanguageTag) -> Option<&str> {
        self.greetings
            .get(language.as_str())
            .or_else(|| self.greetings.get(LanguageTag::PtBr.as_str()))
            .or_else(|| self.greetings.values().next())
            .map(String::as_str)
    }
}

/// Why a handoff happened.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HandoffReason {
    /// The model emitted an explicit routing directive.
    Directive,
    /// A routing trigger phrase matched the model's reply.
    Trigger { phrase: String },
}

/// Structured context recorded when the active persona changes.
///
/// Rendered into a system turn so the incoming persona is briefed without
/// resetting the conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffContext {
    pub from: String,
    pub to: String,
    pub reason: HandoffReason,
    /// Sequence index of the last turn before the handoff.
    pub turn_seq: u64,
    pub language: LanguageTag,
}

impl HandoffContext {
    /// Render the briefing text appended to history as a system turn.
    pub fn briefing(&self) -> String {
        let cause = match &self.reason {
            HandoffReason::Directive => "a routing directive".to_string(),
            HandoffReason::Trigger { phrase } => format!("the topic \"{phrase}\""),
        };
        format!(
            "Conversation handed off from {} to {} after turn {} because of {}. \
             Continue in {} and keep the conversation context above.",
            self.from, self.to, self.turn_seq, cause, self.language
        )
    }
}
