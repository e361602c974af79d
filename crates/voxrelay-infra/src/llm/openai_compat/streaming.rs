//! OpenAI SSE stream to [`StreamEvent`] adapter.
//!
//! Maps `async-openai`'s [`ChatCompletionResponseStream`] chunks to the
//! relay's provider-agnostic stream event enum. The relay only consumes text
//! deltas; routing is an in-band text directive handled downstream, so tool
//! call deltas and usage chunks are not surfaced.

use async_openai::types::chat::ChatCompletionResponseStream;
use futures_util::StreamExt;

use voxrelay_core::llm::TokenStream;
use voxrelay_types::llm::{LlmError, StreamEvent};

/// Map an async-openai response stream to a stream of [`StreamEvent`]s.
///
/// The returned stream emits events in this order:
/// 1. `Connected` -- immediately on entry
/// 2. `TextDelta` -- for each non-empty text content chunk
/// 3. `Done` -- at the end of the stream
pub fn map_openai_stream(stream: ChatCompletionResponseStream) -> TokenStream {
    Box::pin(async_stream::try_stream! {
        yield StreamEvent::Connected;

        let mut stream = stream;
        while let Some(result) = stream.next().await {
            let chunk = result.map_err(|e| LlmError::Stream(e.to_string()))?;
            for choice in &chunk.choices {
                if let Some(content) = &choice.delta.content {
                    if !content.is_empty() {
                        yield StreamEvent::TextDelta {
                            text: content.clone(),
                        };
                    }
                }
            }
        }

        yield StreamEvent::Done;
    })
}
