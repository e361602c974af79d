//! OpenAI-compatible LLM provider implementation.
//!
//! A single [`OpenAiCompatibleProvider`] serves any endpoint speaking the
//! OpenAI chat-completions protocol via a configurable base URL. Uses
//! [`async_openai`] for type-safe request/response handling and built-in SSE
//! streaming; the stream adapter in [`streaming`] maps provider chunks to
//! the relay's [`StreamEvent`] enum.

pub mod streaming;

use async_openai::config::OpenAIConfig;
use async_openai::types::chat::{
    ChatCompletionRequestAssistantMessage, ChatCompletionRequestAssistantMessageContent,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage,
    ChatCompletionRequestSystemMessageContent, ChatCompletionRequestUserMessage,
    ChatCompletionRequestUserMessageContent, CreateChatCompletionRequest,
};
use async_openai::Client;
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};

use voxrelay_core::llm::{LlmProvider, TokenStream};
use voxrelay_types::config::ModelConfig;
use voxrelay_types::llm::{CompletionRequest, LlmError, MessageRole};

use self::streaming::map_openai_stream;

/// Default OpenAI API base URL.
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Unified provider for any OpenAI-compatible API.
///
/// # API Key Security
///
/// Does NOT derive Debug to prevent accidental exposure of the API key
/// stored inside the `async_openai::Client`.
pub struct OpenAiCompatibleProvider {
    client: Client<OpenAIConfig>,
    provider_name: String,
    model: String,
}

impl OpenAiCompatibleProvider {
    /// Create a provider against an arbitrary OpenAI-compatible base URL.
    pub fn new(
        provider_name: impl Into<String>,
        base_url: &str,
        api_key: SecretString,
        model: impl Into<String>,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key.expose_secret())
            .with_api_base(base_url);
        Self {
            client: Client::with_config(config),
            provider_name: provider_name.into(),
            model: model.into(),
        }
    }

    /// Create an OpenAI provider with the default base URL.
    pub fn openai(api_key: SecretString, model: impl Into<String>) -> Self {
        Self::new("openai", OPENAI_BASE_URL, api_key, model)
    }

    /// Build a provider from the relay's model configuration.
    pub fn from_config(config: &ModelConfig, api_key: SecretString) -> Self {
        let base_url = config.base_url.as_deref().unwrap_or(OPENAI_BASE_URL);
        Self::new("openai", base_url, api_key, config.model.clone())
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Build a [`CreateChatCompletionRequest`] from a generic
    /// [`CompletionRequest`].
    fn build_request(&self, request: &CompletionRequest) -> CreateChatCompletionRequest {
        let mut messages: Vec<ChatCompletionRequestMessage> = Vec::new();

        if let Some(ref system) = request.system {
            messages.push(ChatCompletionRequestMessage::System(
                ChatCompletionRequestSystemMessage {
                    content: ChatCompletionRequestSystemMessageContent::Text(system.clone()),
                    name: None,
                },
            ));
        }

        for msg in &request.messages {
            let oai_msg = match msg.role {
                MessageRole::System => ChatCompletionRequestMessage::System(
                    ChatCompletionRequestSystemMessage {
                        content: ChatCompletionRequestSystemMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    },
                ),
                MessageRole::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessage {
                        content: ChatCompletionRequestUserMessageContent::Text(
                            msg.content.clone(),
                        ),
                        name: None,
                    },
                ),
                MessageRole::Assistant => {
                    #[allow(deprecated)]
                    ChatCompletionRequestMessage::Assistant(
                        ChatCompletionRequestAssistantMessage {
                            content: Some(ChatCompletionRequestAssistantMessageContent::Text(
                                msg.content.clone(),
                            )),
                            refusal: None,
                            name: None,
                            audio: None,
                            tool_calls: None,
                            function_call: None,
                        },
                    )
                }
            };
            messages.push(oai_msg);
        }

        let model = if request.model.is_empty() {
            self.model.clone()
        } else {
            request.model.clone()
        };

        CreateChatCompletionRequest {
            model,
            messages,
            max_completion_tokens: Some(request.max_tokens),
            temperature: request.temperature.map(|t| t as f32),
            stream: Some(true),
            ..Default::default()
        }
    }
}

// OpenAiCompatibleProvider intentionally does NOT derive Debug to prevent
// accidental exposure of internal state including the API key inside the
// async-openai Client.

impl LlmProvider for OpenAiCompatibleProvider {
    fn name(&self) -> &str {
        &self.provider_name
    }

    fn stream(&self, request: CompletionRequest) -> TokenStream {
        let oai_request = self.build_request(&request);

        // Field names follow the OTel GenAI semantic conventions
        // (voxrelay-observe::genai_attrs).
        tracing::debug!(
            "gen_ai.operation.name" = "chat",
            "gen_ai.provider.name" = self.provider_name.as_str(),
            "gen_ai.request.model" = oai_request.model.as_str(),
            "gen_ai.request.max_tokens" = request.max_tokens,
            "streaming completion opened"
        );

        // Clone the client for the 'static stream closure.
        let client = self.client.clone();

        Box::pin(async_stream::try_stream! {
            let oai_stream = client
                .chat()
                .create_stream(oai_request)
                .await
                .map_err(map_openai_error)?;

            let mut inner = map_openai_stream(oai_stream);
            while let Some(event) = inner.next().await {
                match event {
                    Ok(ev) => yield ev,
                    Err(e) => Err(e)?,
                }
            }
        })
    }
}

/// Map an `async_openai::error::OpenAIError` to an [`LlmError`].
fn map_openai_error(err: async_openai::error::OpenAIError) -> LlmError {
    use async_openai::error::OpenAIError;

    match &err {
        OpenAIError::ApiError(api_err) => {
            let code = api_err.code.as_deref().unwrap_or("");
            let error_type = api_err.r#type.as_deref().unwrap_or("");

            if code == "authentication_error"
                || error_type == "authentication_error"
                || api_err.message.contains("Incorrect API key")
                || api_err.message.contains("Invalid API key")
            {
                LlmError::AuthenticationFailed
            } else if code == "rate_limit_exceeded" || error_type == "rate_limit_error" {
                LlmError::RateLimited {
                    retry_after_ms: None,
                }
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::Reqwest(reqwest_err) => {
            if reqwest_err.is_timeout() {
                LlmError::Timeout
            } else if let Some(status) = reqwest_err.status() {
                match status.as_u16() {
                    401 => LlmError::AuthenticationFailed,
                    429 => LlmError::RateLimited {
                        retry_after_ms: None,
                    },
                    _ => LlmError::Provider {
                        message: err.to_string(),
                    },
                }
            } else {
                LlmError::Provider {
                    message: err.to_string(),
                }
            }
        }
        OpenAIError::JSONDeserialize(_, content) => {
            LlmError::Deserialization(format!("failed to parse response: {content}"))
        }
        OpenAIError::StreamError(stream_err) => LlmError::Stream(stream_err.to_string()),
        _ => LlmError::Provider {
            message: err.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxrelay_types::llm::Message;

    fn provider() -> OpenAiCompatibleProvider {
        OpenAiCompatibleProvider::openai(SecretString::from("sk-test-not-real"), "gpt-4o-2024-11-20")
    }

    fn request() -> CompletionRequest {
        CompletionRequest {
            model: "gpt-4o-2024-11-20".to_string(),
            messages: vec![Message::user("Olá"), Message::assistant("Oi! Como posso ajudar?")],
            system: Some("Be helpful".to_string()),
            max_tokens: 1024,
            temperature: Some(0.7),
        }
    }

    #[test]
    fn test_provider_name_and_model() {
        let provider = provider();
        assert_eq!(provider.name(), "openai");
        assert_eq!(provider.model(), "gpt-4o-2024-11-20");
    }

    #[test]
    fn test_from_config_uses_overrides() {
        let config = ModelConfig {
            base_url: Some("http://localhost:8080/v1".to_string()),
            model: "local-model".to_string(),
            ..ModelConfig::default()
        };
        let provider = OpenAiCompatibleProvider::from_config(&config, SecretString::from("k"));
        assert_eq!(provider.model(), "local-model");
    }

    #[test]
    fn test_build_request_messages() {
        let provider = provider();
        let oai_req = provider.build_request(&request());
        // 1 system + 2 conversation = 3 messages
        assert_eq!(oai_req.messages.len(), 3);
        assert_eq!(oai_req.model, "gpt-4o-2024-11-20");
        assert_eq!(oai_req.max_completion_tokens, Some(1024));
        assert_eq!(oai_req.stream, Some(true));
    }

    #[test]
    fn test_build_request_empty_model_uses_default() {
        let provider = provider();
        let mut req = request();
        req.model = String::new();
        let oai_req = provider.build_request(&req);
        assert_eq!(oai_req.model, "gpt-4o-2024-11-20");
    }

    #[test]
    fn test_map_openai_error_auth() {
        use async_openai::error::{ApiError, OpenAIError};
        let api_err = ApiError {
            message: "Incorrect API key provided".to_string(),
            r#type: Some("authentication_error".to_string()),
            param: None,
            code: None,
        };
        let err = map_openai_error(OpenAIError::ApiError(api_err));
        assert!(matches!(err, LlmError::AuthenticationFailed));
    }

    #[test]
    fn test_map_openai_error_rate_limit() {
        use async_openai::error::{ApiError, OpenAIError};
        let api_err = ApiError {
            message: "Rate limit exceeded".to_string(),
            r#type: Some("rate_limit_error".to_string()),
            param: None,
            code: None,
        };
        let err = map_openai_error(OpenAIError::ApiError(api_err));
        assert!(matches!(err, LlmError::RateLimited { .. }));
    }

    #[test]
    fn test_genai_field_names_match_conventions() {
        use voxrelay_observe::genai_attrs;
        // The literal field names used in `stream` must stay in sync with
        // the shared constants.
        assert_eq!(genai_attrs::GEN_AI_OPERATION_NAME, "gen_ai.operation.name");
        assert_eq!(genai_attrs::GEN_AI_PROVIDER_NAME, "gen_ai.provider.name");
        assert_eq!(genai_attrs::GEN_AI_REQUEST_MODEL, "gen_ai.request.model");
        assert_eq!(
            genai_attrs::GEN_AI_REQUEST_MAX_TOKENS,
            "gen_ai.request.max_tokens"
        );
        assert_eq!(genai_attrs::OP_CHAT, "chat");
    }
}
