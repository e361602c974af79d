//! Conversation-log sink implementations.

pub mod conversations;

pub use conversations::HttpTranscriptSink;
