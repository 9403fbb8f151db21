use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{ChatCompletionRequestMessage, CreateChatCompletionRequestArgs},
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

/// A stream of text chunks from the model.
pub type TokenStream = Pin<Box<dyn Stream<Item = Result<String, OpenAIError>> + Send>>;

/// A generic text-generation client. The coach, the roleplay customer and
/// the evaluator all speak through this trait.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Makes a single, non-streaming call and returns the full response.
    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<String>;

    /// Makes a streaming call; the stream yields raw token text.
    async fn stream(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<TokenStream>;
}

/// An implementation of `TextGenerator` for any OpenAI-compatible API.
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - Client configuration, including API key and base URL.
    /// * `model` - The model identifier to use for chat completions.
    pub fn new(config: OpenAIConfig, model: String) -> Self {
        Self {
            client: Client::with_config(config),
            model,
        }
    }
}

#[async_trait]
impl TextGenerator for OpenAICompatibleClient {
    async fn complete(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<String> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .build()?;

        let response = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("model response contained no choices"))?;
        choice
            .message
            .content
            .clone()
            .ok_or_else(|| anyhow!("model response had no text content"))
    }

    async fn stream(&self, messages: Vec<ChatCompletionRequestMessage>) -> Result<TokenStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => {
                    let choice = response.choices.first()?;
                    if let Some(content) = &choice.delta.content {
                        if !content.is_empty() {
                            return Some(Ok(content.clone()));
                        }
                    }
                    None
                }
                Err(e) => Some(Err(e)),
            }
        })))
    }
}
