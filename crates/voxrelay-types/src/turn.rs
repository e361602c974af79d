//! Conversation turns -- the per-session transcript entries.
//!
//! A turn is immutable once appended. Sequence indices are assigned by the
//! session state machine and are strictly increasing and gapless within a
//! session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::lang::LanguageTag;

use std::fmt;
use std::str::FromStr;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeakerRole {
    Customer,
    Agent,
    System,
}

impl fmt::Display for SpeakerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpeakerRole::Customer => write!(f, "customer"),
            SpeakerRole::Agent => write!(f, "agent"),
            SpeakerRole::System => write!(f, "system"),
        }
    }
}

impl FromStr for SpeakerRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "customer" => Ok(SpeakerRole::Customer),
            "agent" => Ok(SpeakerRole::Agent),
            "system" => Ok(SpeakerRole::System),
            other => Err(format!("invalid speaker role: '{other}'")),
        }
    }
}

/// What kind of content a turn carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    /// Ordinary spoken text.
    Speech,
    /// A DTMF keypad press, rendered as text.
    Keypad,
    /// Marker recording that the agent's response was cut short.
    Truncation,
    /// Briefing appended when the active persona changes.
    Handoff,
    /// Natural-language result of a tool backend call.
    ToolResult,
}

impl Default for TurnKind {
    fn default() -> Self {
        TurnKind::Speech
    }
}

/// One entry in a session's conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub id: Uuid,
    /// Monotonic, gapless index within the session.
    pub seq: u64,
    pub role: SpeakerRole,
    #[serde(default)]
    pub kind: TurnKind,
    pub text: String,
    /// The persona that was active when this turn was produced
    /// (agent and system turns only).
    pub agent_id: Option<String>,
    pub language: LanguageTag,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    /// Build a turn with a fresh id and the current timestamp.
    pub fn new(
        seq: u64,
        role: SpeakerRole,
        kind: TurnKind,
        text: impl Into<String>,
        agent_id: Option<String>,
        language: LanguageTag,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            seq,
            role,
            kind,
            text: text.into(),
            agent_id,
            language,
            timestamp: Utc::now(),
        }
    }
}
