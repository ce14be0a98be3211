//! DI "Interfaces"

use crate::config::Settings;
use crate::core::prompt::ExchangePair;
use crate::error::{ServiceError, ValidationError};
use crate::infrastructure::entities::{ConversationStats, StoredMessage};
use crate::infrastructure::store::{NewMessage, SearchHit, StoreHealth};
use crate::infrastructure::traits::{ChunkStream, GenerationParams};
use async_trait::async_trait;
use serde::Serialize;

/// Optional generation settings as sent by a client.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerationOverrides {
    pub max_tokens: Option<i64>,
    pub temperature: Option<f64>,
}

impl GenerationOverrides {
    /// Applies the configured defaults and checks the ranges.
    pub fn resolve(&self, settings: &Settings) -> Result<GenerationParams, ValidationError> {
        let max_tokens = match self.max_tokens {
            None => settings.default_max_tokens,
            Some(n) if n >= 1 => u32::try_from(n).map_err(|_| ValidationError::InvalidMaxTokens)?,
            Some(_) => return Err(ValidationError::InvalidMaxTokens),
        };

        let temperature = match self.temperature {
            None => settings.default_temperature,
            Some(t) if (0.0..=2.0).contains(&t) => t as f32,
            Some(_) => return Err(ValidationError::InvalidTemperature),
        };

        Ok(GenerationParams {
            max_tokens,
            temperature,
        })
    }
}

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub conversation_id: String,
    pub message: String,
    pub overrides: GenerationOverrides,
}

/// Result of one stored chat turn.
#[derive(Debug, Clone, Serialize)]
pub struct ChatOutcome {
    pub conversation_id: String,
    pub user_message_id: String,
    pub ai_message_id: String,
    pub ai_response: String,
    pub is_first_message: bool,
    pub total_messages: usize,
    pub context_used: String,
}

/// A chat turn whose reply is still being generated. The user message is
/// already stored; the reply is stored through [`ChatService::record_reply`].
pub struct ChatStream {
    pub conversation_id: String,
    pub user_message_id: String,
    pub is_first_message: bool,
    pub total_messages: usize,
    pub context_used: String,
    pub chunks: ChunkStream,
}

#[derive(Debug, Clone, Serialize)]
pub struct Generation {
    pub response: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct InferenceHealth {
    pub status: &'static str,
    pub ai_service: &'static str,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

#[async_trait]
pub trait ConversationService: Send + Sync {
    /// Stores a single message and returns its id.
    async fn post_message(&self, message: NewMessage) -> Result<String, ServiceError>;

    /// Lists the messages of a conversation, oldest first.
    ///
    /// An unknown conversation yields an empty list.
    async fn list_messages(&self, conversation_id: &str)
    -> Result<Vec<StoredMessage>, ServiceError>;

    async fn delete_conversation(&self, conversation_id: &str) -> Result<(), ServiceError>;

    async fn conversation_stats(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationStats, ServiceError>;

    /// Semantic search within one conversation, best match first.
    async fn search(
        &self,
        conversation_id: &str,
        query: &str,
        n_results: i64,
    ) -> Result<Vec<SearchHit>, ServiceError>;

    async fn store_health(&self) -> StoreHealth;
}

#[async_trait]
pub trait ChatService: Send + Sync {
    /// Runs one full turn: history lookup, prompt, inference and persistence of
    /// both sides.
    async fn chat(&self, request: ChatRequest) -> Result<ChatOutcome, ServiceError>;

    /// Stores the user message and starts streaming the reply.
    async fn start_stream(&self, request: ChatRequest) -> Result<ChatStream, ServiceError>;

    /// Stores a finished streamed reply and returns its id.
    async fn record_reply(&self, conversation_id: &str, reply: &str)
    -> Result<String, ServiceError>;

    /// Raw completion of a caller supplied prompt.
    async fn generate(
        &self,
        prompt: &str,
        overrides: GenerationOverrides,
    ) -> Result<Generation, ServiceError>;

    /// Streams a first-turn tutor reply to `prompt`. Nothing is stored.
    async fn generate_stream(
        &self,
        prompt: &str,
        overrides: GenerationOverrides,
    ) -> Result<ChunkStream, ServiceError>;

    /// Tutor reply for history held by the client. Nothing is stored.
    async fn stateless_chat(
        &self,
        message: &str,
        history: &[ExchangePair],
        overrides: GenerationOverrides,
    ) -> Result<String, ServiceError>;

    async fn inference_health(&self) -> InferenceHealth;
}
