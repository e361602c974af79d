//! Core session relay engine: per-session state machines, token-to-utterance
//! chunking, persona routing, language switching, and observer fan-out.
//!
//! This crate is transport- and backend-agnostic. The traits at its seams
//! ([`llm::provider::LlmProvider`], [`tool::ToolBackend`],
//! [`transcript::TranscriptSink`]) are implemented in voxrelay-infra; the
//! axum transport lives in voxrelay-api.

pub mod chunker;
pub mod hub;
pub mod language;
pub mod llm;
pub mod persona;
pub mod session;
pub mod tool;
pub mod transcript;
