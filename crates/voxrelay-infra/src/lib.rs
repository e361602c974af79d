//! Infrastructure implementations for the voxrelay session engine: the
//! OpenAI-compatible streaming model provider, the Owl Bank tool backend,
//! and the HTTP conversation-log sink.

pub mod llm;
pub mod tool;
pub mod transcript;
