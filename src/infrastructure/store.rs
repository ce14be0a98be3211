//! Conversation store: validation, ids, ordering and fallback selection on top of
//! a [`MessageStore`] backend.

use crate::config::Settings;
use crate::error::{StoreError, ValidationError};
use crate::infrastructure::chroma::ChromaStore;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::embeddings::OllamaEmbedder;
use crate::infrastructure::entities::{
    ConversationStats, MessageRecord, RESERVED_METADATA_KEYS, Role, StoredMessage, now_timestamp,
    order_and_cap, parse_timestamp,
};
use crate::infrastructure::memory::InMemoryStore;
use crate::infrastructure::repositories::DbMessageStore;
use crate::infrastructure::traits::MessageStore;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

/// Which backend is serving requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreMode {
    Remote,
    Local,
    InMemory,
}

#[derive(Debug, Clone, Copy)]
pub struct StoreLimits {
    pub max_message_length: usize,
    pub max_conversation_messages: usize,
}

impl From<&Settings> for StoreLimits {
    fn from(settings: &Settings) -> Self {
        StoreLimits {
            max_message_length: settings.max_message_length,
            max_conversation_messages: settings.max_conversation_messages,
        }
    }
}

/// A message as submitted by a caller, not yet validated.
#[derive(Debug, Clone, Default)]
pub struct NewMessage {
    pub conversation_id: String,
    pub role: String,
    pub content: String,
    pub timestamp: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub is_first_message: bool,
}

impl NewMessage {
    pub fn new(
        conversation_id: impl Into<String>,
        role: impl Into<String>,
        content: impl Into<String>,
    ) -> NewMessage {
        NewMessage {
            conversation_id: conversation_id.into(),
            role: role.into(),
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn with_timestamp(mut self, timestamp: Option<String>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_metadata(mut self, metadata: Option<Map<String, Value>>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn first_in_conversation(mut self, is_first_message: bool) -> Self {
        self.is_first_message = is_first_message;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    #[serde(flatten)]
    pub message: StoredMessage,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreHealth {
    pub status: &'static str,
    pub backend: StoreMode,
    pub degraded: bool,
    pub persistent: bool,
    pub collection: String,
    pub detail: String,
}

impl StoreHealth {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct ConversationStore {
    backend: Box<dyn MessageStore>,
    mode: StoreMode,
    collection: String,
    limits: StoreLimits,
}

fn conversation_key(conversation_id: &str) -> Result<&str, ValidationError> {
    let key = conversation_id.trim();
    if key.is_empty() {
        Err(ValidationError::EmptyConversationId)
    } else {
        Ok(key)
    }
}

impl ConversationStore {
    pub fn new(
        backend: Box<dyn MessageStore>,
        mode: StoreMode,
        collection: &str,
        limits: StoreLimits,
    ) -> ConversationStore {
        ConversationStore {
            backend,
            mode,
            collection: collection.to_owned(),
            limits,
        }
    }

    pub fn in_memory(collection: &str, limits: StoreLimits) -> ConversationStore {
        Self::new(
            Box::new(InMemoryStore::new(collection)),
            StoreMode::InMemory,
            collection,
            limits,
        )
    }

    /// Opens the best available backend: Chroma, then the local SQLite file, then
    /// memory. Every fallback is logged and later reported by [`Self::health`].
    pub async fn connect(settings: &Settings) -> ConversationStore {
        let limits = StoreLimits::from(settings);
        let collection = settings.collection_name.as_str();

        match Self::connect_remote(settings).await {
            Ok(chroma) => {
                info!("Vector store connected at {}", settings.chroma_url());
                return Self::new(Box::new(chroma), StoreMode::Remote, collection, limits);
            }
            Err(e) => warn!(
                "Vector store unreachable at {}: {e}. It is not retried; restart the service once it is up",
                settings.chroma_url()
            ),
        }

        if let Some(path) = &settings.local_store_path {
            match DatabaseConnection::open(path).await {
                Ok(connection) => {
                    warn!(
                        "Using local SQLite store at {} - data persists, semantic search is lexical only",
                        path.display()
                    );
                    return Self::new(
                        Box::new(DbMessageStore::new(connection)),
                        StoreMode::Local,
                        collection,
                        limits,
                    );
                }
                Err(e) => warn!("Local store at {} unavailable: {e}", path.display()),
            }
        }

        warn!("Using in-memory store - all data will be lost when the service stops!");
        Self::in_memory(collection, limits)
    }

    async fn connect_remote(settings: &Settings) -> Result<ChromaStore, StoreError> {
        let embedder = OllamaEmbedder::from_settings(settings)?;
        ChromaStore::from_settings(settings, Arc::new(embedder)).await
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }

    pub fn is_degraded(&self) -> bool {
        self.mode != StoreMode::Remote
    }

    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Checks a message against every invariant and turns it into a record with a
    /// fresh id. Nothing is written.
    pub fn validate(&self, message: NewMessage) -> Result<MessageRecord, ValidationError> {
        let conversation_id = conversation_key(&message.conversation_id)?.to_owned();
        let role: Role = message.role.parse()?;

        if message.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        if message.content.chars().count() > self.limits.max_message_length {
            return Err(ValidationError::ContentTooLong {
                max: self.limits.max_message_length,
            });
        }

        let timestamp = match message.timestamp {
            Some(ts) if parse_timestamp(&ts).is_some() => ts,
            Some(_) => return Err(ValidationError::InvalidTimestamp),
            None => now_timestamp(),
        };

        let extra = message.metadata.unwrap_or_default();
        for (key, value) in &extra {
            if RESERVED_METADATA_KEYS.contains(&key.as_str()) {
                return Err(ValidationError::ReservedMetadataKey(key.clone()));
            }
            if !(value.is_string() || value.is_number() || value.is_boolean()) {
                return Err(ValidationError::InvalidMetadataValue(key.clone()));
            }
        }

        Ok(MessageRecord {
            id: format!("msg_{conversation_id}_{}", Uuid::new_v4().simple()),
            conversation_id,
            role,
            content: message.content,
            timestamp,
            created_at: now_timestamp(),
            is_first_message: message.is_first_message,
            extra,
        })
    }

    pub async fn append(&self, message: NewMessage) -> Result<String, StoreError> {
        let record = self.validate(message)?;
        let id = record.id.clone();
        let conversation_id = record.conversation_id.clone();

        self.backend.insert(record).await?;

        debug!("Message added: {id} (conversation: {conversation_id})");
        Ok(id)
    }

    /// Messages of a conversation in ascending timestamp order. At most
    /// `max_conversation_messages` are returned, the most recent ones.
    pub async fn list(&self, conversation_id: &str) -> Result<Vec<StoredMessage>, StoreError> {
        let key = conversation_key(conversation_id)?;
        let cap = self.limits.max_conversation_messages;
        let messages = self.backend.fetch(key, cap).await?;
        Ok(order_and_cap(messages, cap))
    }

    pub async fn search(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<SearchHit>, StoreError> {
        let key = conversation_key(conversation_id)?;
        if query.trim().is_empty() {
            return Err(ValidationError::EmptyQuery.into());
        }
        if limit == 0 {
            return Err(ValidationError::InvalidResultCount.into());
        }

        let hits = self
            .backend
            .nearest(key, query, limit)
            .await?
            .into_iter()
            .map(|(message, distance)| SearchHit {
                message,
                score: 1.0 - distance,
            })
            .collect();
        Ok(hits)
    }

    /// Deletes every message of a conversation. Deleting an empty conversation
    /// succeeds.
    pub async fn delete(&self, conversation_id: &str) -> Result<bool, StoreError> {
        let key = conversation_key(conversation_id)?;
        match self.backend.remove(key).await? {
            Some(removed) => info!("Deleted {removed} messages of conversation {key}"),
            None => info!("Deleted conversation {key}"),
        }
        Ok(true)
    }

    pub async fn stats(&self, conversation_id: &str) -> Result<ConversationStats, StoreError> {
        let key = conversation_key(conversation_id)?;
        let messages = self.list(key).await?;
        Ok(ConversationStats::from_messages(key, &messages))
    }

    pub async fn health(&self) -> StoreHealth {
        let (status, detail) = match (self.backend.ping().await, self.is_degraded()) {
            (Ok(detail), false) => ("healthy", detail),
            (Ok(detail), true) => (
                "degraded",
                format!("{detail}; vector store is only probed at startup, restart once it is up"),
            ),
            (Err(e), _) => ("unhealthy", e.to_string()),
        };

        StoreHealth {
            status,
            backend: self.mode,
            degraded: self.is_degraded(),
            persistent: self.mode != StoreMode::InMemory,
            collection: self.collection.clone(),
            detail,
        }
    }
}
