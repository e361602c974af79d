//! LlmProvider trait definition.
//!
//! The single seam between the session engine and the model backend. The
//! stream is boxed so providers stay object-safe behind
//! `Arc<dyn LlmProvider>`; cancellation is driven from the outside by the
//! session worker dropping the stream when its turn token fires.

use std::pin::Pin;

use futures_util::Stream;

use voxrelay_types::llm::{CompletionRequest, LlmError, StreamEvent};

/// An ordered stream of model events for one completion call.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, LlmError>> + Send + 'static>>;

/// Trait for streaming model backends.
///
/// Implementations live in voxrelay-infra (e.g. the OpenAI-compatible
/// provider). A provider must have no side effects beyond the tokens it has
/// already yielded: dropping the stream mid-flight is the cancellation path
/// and must be safe at any point.
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. "openai").
    fn name(&self) -> &str;

    /// Open a streaming completion call for the given request.
    fn stream(&self, request: CompletionRequest) -> TokenStream;
}
