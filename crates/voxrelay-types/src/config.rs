//! Relay configuration.
//!
//! `RelayConfig` represents the top-level `voxrelay.toml`. Every field has a
//! default so an empty file (or no file) yields a working configuration; the
//! timing defaults are the values the voice line was tuned with.

use serde::{Deserialize, Serialize};

use crate::lang::LanguageTag;
use crate::persona::AgentPersona;

/// Top-level configuration for the relay.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub language: LanguageConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub tool: ToolConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    /// Persona directory; the built-in Owl Bank set is used when empty.
    #[serde(default)]
    pub personas: Vec<AgentPersona>,
}

/// Utterance chunker timings and limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Grace period without a sentence terminal before a partial flush.
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,
    /// Minimum buffered length for a grace-timer flush; shorter fragments
    /// keep waiting for a terminal.
    #[serde(default = "default_min_flush_chars")]
    pub min_flush_chars: usize,
    /// Hard cap; the buffer is flushed outright when it grows past this.
    #[serde(default = "default_max_buffer_chars")]
    pub max_buffer_chars: usize,
}

fn default_grace_ms() -> u64 {
    1500
}

fn default_min_flush_chars() -> usize {
    32
}

fn default_max_buffer_chars() -> usize {
    1000
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            min_flush_chars: default_min_flush_chars(),
            max_buffer_chars: default_max_buffer_chars(),
        }
    }
}

/// Session lifecycle and reconnect-buffering settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// How long a suspended session waits for a reconnect before it is ended.
    #[serde(default = "default_reconnect_grace_ms")]
    pub reconnect_grace_ms: u64,
    /// Capacity of the pending-output buffer while suspended.
    #[serde(default = "default_output_buffer_capacity")]
    pub output_buffer_capacity: usize,
    #[serde(default)]
    pub overflow_policy: OverflowPolicy,
    /// Capacity of the per-session event queue.
    #[serde(default = "default_event_queue_capacity")]
    pub event_queue_capacity: usize,
}

fn default_reconnect_grace_ms() -> u64 {
    60_000
}

fn default_output_buffer_capacity() -> usize {
    64
}

fn default_event_queue_capacity() -> usize {
    32
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            reconnect_grace_ms: default_reconnect_grace_ms(),
            output_buffer_capacity: default_output_buffer_capacity(),
            overflow_policy: OverflowPolicy::default(),
            event_queue_capacity: default_event_queue_capacity(),
        }
    }
}

/// What to do when the pending-output buffer is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Drop the oldest buffered chunk to make room (default: stale speech
    /// is worthless after a reconnect).
    DropOldest,
    /// Reject the incoming chunk and keep what is already buffered.
    RejectNew,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::DropOldest
    }
}

/// Language detection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageConfig {
    #[serde(default)]
    pub default: LanguageTag,
    /// Minimum detection confidence before a language switch is honored.
    #[serde(default = "default_confidence_threshold")]
    pub confidence_threshold: f32,
}

fn default_confidence_threshold() -> f32 {
    0.8
}

impl Default for LanguageConfig {
    fn default() -> Self {
        Self {
            default: LanguageTag::default(),
            confidence_threshold: default_confidence_threshold(),
        }
    }
}

/// Model backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default = "default_model")]
    pub model: String,
    /// Override the provider base URL (any OpenAI-compatible endpoint).
    #[serde(default)]
    pub base_url: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    /// Per-call budget; waiting longer than this for the next token degrades
    /// to the spoken fallback.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_model() -> String {
    "gpt-4o-2024-11-20".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_max_tokens() -> u32 {
    1024
}

fn default_temperature() -> f64 {
    0.7
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

/// Banking tool backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_tool_base_url")]
    pub base_url: String,
    #[serde(default = "default_tool_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_tool_base_url() -> String {
    "https://owl-bank-finserv-demo-1-1-8657.twil.io".to_string()
}

fn default_tool_timeout_ms() -> u64 {
    5_000
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_tool_base_url(),
            timeout_ms: default_tool_timeout_ms(),
        }
    }
}

/// Conversation-log sink settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_transcript_base_url")]
    pub base_url: String,
}

fn default_transcript_base_url() -> String {
    "http://localhost:3001/api".to_string()
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: default_transcript_base_url(),
        }
    }
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_toml_yields_defaults() {
        let config: RelayConfig = toml::from_str("").unwrap();
        assert_eq!(config.chunker.grace_ms, 1500);
        assert_eq!(config.chunker.max_buffer_chars, 1000);
        assert_eq!(config.session.overflow_policy, OverflowPolicy::DropOldest);
        assert_eq!(config.language.default, LanguageTag::PtBr);
        assert!((config.language.confidence_threshold - 0.8).abs() < f32::EPSILON);
        assert_eq!(config.model.model, "gpt-4o-2024-11-20");
        assert!(config.tool.enabled);
        assert!(!config.transcript.enabled);
        assert!(config.personas.is_empty());
    }

    #[test]
    fn test_partial_toml_overrides() {
        let toml_str = r#"
[chunker]
grace_ms = 900

[session]
overflow_policy = "reject_new"
output_buffer_capacity = 8

[language]
default = "en-US"

[model]
model = "gpt-4o-mini"
request_timeout_ms = 10000
"#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.chunker.grace_ms, 900);
        assert_eq!(config.chunker.min_flush_chars, 32);
        assert_eq!(config.session.overflow_policy, OverflowPolicy::RejectNew);
        assert_eq!(config.session.output_buffer_capacity, 8);
        assert_eq!(config.language.default, LanguageTag::EnUs);
        assert_eq!(config.model.model, "gpt-4o-mini");
        assert_eq!(config.model.request_timeout_ms, 10_000);
    }

    #[test]
    fn test_personas_in_toml() {
        let toml_str = r#"
[[personas]]
id = "olli"
name = "Olli"
role = "generalist"
prompt = "You answer general questions."
triggers = []

[personas.greetings]
"pt-BR" = "Olá!"
"#;
        let config: RelayConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.personas.len(), 1);
        assert_eq!(config.personas[0].id, "olli");
    }

    #[test]
    fn test_config_serde_roundtrip() {
        let config = RelayConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: RelayConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session.reconnect_grace_ms, 60_000);
        assert_eq!(parsed.tool.timeout_ms, 5_000);
    }
}
