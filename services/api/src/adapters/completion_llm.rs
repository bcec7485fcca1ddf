//! services/api/src/adapters/completion_llm.rs
//!
//! This module contains the adapter for the drafting assistant's language model.
//! It implements the `TextCompletionService` port from the core crate using the
//! OpenAI chat completions API.

use async_openai::{
    config::OpenAIConfig,
    types::chat::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, FinishReason,
    },
    Client,
};
use async_trait::async_trait;
use exam_paper_core::domain::Role;
use exam_paper_core::ports::{
    Completion, CompletionRequest, PortError, PortResult, TextCompletionService,
};
use tracing::{debug, warn};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `TextCompletionService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiCompletionAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiCompletionAdapter {
    /// Creates a new `OpenAiCompletionAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    fn messages(request: &CompletionRequest) -> PortResult<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(request.history.len() + 1);
        messages.push(ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(request.system_prompt.clone())
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?,
        ));

        for turn in &request.history {
            let message = match turn.role {
                Role::User => ChatCompletionRequestMessage::User(
                    ChatCompletionRequestUserMessageArgs::default()
                        .content(turn.content.clone())
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                ),
                Role::Assistant => ChatCompletionRequestMessage::Assistant(
                    ChatCompletionRequestAssistantMessageArgs::default()
                        .content(turn.content.clone())
                        .build()
                        .map_err(|e| PortError::Unexpected(e.to_string()))?,
                ),
            };
            messages.push(message);
        }
        Ok(messages)
    }
}

//=========================================================================================
// `TextCompletionService` Trait Implementation
//=========================================================================================

#[async_trait]
impl TextCompletionService for OpenAiCompletionAdapter {
    /// Sends the system prompt and conversation; a content-filter stop is reported
    /// as `Completion::Blocked` rather than an error.
    async fn complete(&self, request: &CompletionRequest) -> PortResult<Completion> {
        let chat_request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(Self::messages(request)?)
            .temperature(0.4)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(chat_request)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let choice = response
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| PortError::Unexpected("No completion choices returned".to_string()))?;

        if matches!(choice.finish_reason, Some(FinishReason::ContentFilter)) {
            warn!(model = %self.model, "completion stopped by the content filter");
            return Ok(Completion::Blocked {
                reason: "content filter".to_string(),
            });
        }

        let text = choice.message.content.unwrap_or_default();
        debug!(model = %self.model, chars = text.len(), "completion received");
        Ok(Completion::Text(text))
    }
}
