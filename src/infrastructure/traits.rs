//! Infrastructure traits, used for DI on higher levels

use crate::error::{InferenceError, StoreError};
use crate::infrastructure::entities::{MessageRecord, StoredMessage};
use async_trait::async_trait;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;

/// Lazy sequence of generated text fragments. Ends when generation is done.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, InferenceError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Storage backend behind the conversation store.
///
/// Implementations only persist and fetch; validation, ordering and capping
/// happen in [`crate::infrastructure::store::ConversationStore`].
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert(&self, record: MessageRecord) -> Result<(), StoreError>;

    /// Fetches up to `limit` messages of a conversation, in no particular order.
    async fn fetch(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError>;

    /// Nearest neighbours of `query` within a conversation, with their distance.
    async fn nearest(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(StoredMessage, f64)>, StoreError>;

    /// Removes every message of a conversation and returns how many were removed,
    /// when the backend knows.
    async fn remove(&self, conversation_id: &str) -> Result<Option<usize>, StoreError>;

    /// Checks the backend is reachable. Returns a short human readable detail.
    async fn ping(&self) -> Result<String, StoreError>;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, StoreError>;
}

#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Model name reported in health checks.
    fn model(&self) -> &str;

    /// Streams generated fragments for a flattened prompt.
    async fn stream(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<ChunkStream, InferenceError>;

    /// Generates the full response by concatenating the stream in arrival order.
    async fn complete(
        &self,
        prompt: &str,
        params: GenerationParams,
    ) -> Result<String, InferenceError> {
        let mut chunks = self.stream(prompt, params).await?;
        let mut response = String::new();
        while let Some(chunk) = chunks.next().await {
            response.push_str(&chunk?);
        }
        Ok(response)
    }
}
