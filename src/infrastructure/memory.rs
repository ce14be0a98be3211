//! In-process fallback store.
//!
//! Keeps everything in memory for the lifetime of the process. Used when neither
//! the vector store nor the local SQLite file can be opened.

use crate::error::StoreError;
use crate::infrastructure::entities::{MessageRecord, StoredMessage};
use crate::infrastructure::similarity;
use crate::infrastructure::traits::MessageStore;
use async_trait::async_trait;
use std::sync::{PoisonError, RwLock};

pub struct InMemoryStore {
    collection: String,
    records: RwLock<Vec<MessageRecord>>,
}

impl InMemoryStore {
    pub fn new(collection: &str) -> InMemoryStore {
        InMemoryStore {
            collection: collection.to_owned(),
            records: RwLock::new(Vec::new()),
        }
    }

    fn conversation(&self, conversation_id: &str) -> Vec<StoredMessage> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|r| r.conversation_id == conversation_id)
            .map(MessageRecord::to_stored)
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryStore {
    async fn insert(&self, record: MessageRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
        Ok(())
    }

    async fn fetch(
        &self,
        conversation_id: &str,
        _limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        Ok(self.conversation(conversation_id))
    }

    async fn nearest(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(StoredMessage, f64)>, StoreError> {
        Ok(similarity::rank(
            self.conversation(conversation_id),
            query,
            limit,
        ))
    }

    async fn remove(&self, conversation_id: &str) -> Result<Option<usize>, StoreError> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let before = records.len();
        records.retain(|r| r.conversation_id != conversation_id);
        Ok(Some(before - records.len()))
    }

    async fn ping(&self) -> Result<String, StoreError> {
        let count = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        Ok(format!(
            "in-memory collection '{}' holds {count} messages; data is lost on shutdown",
            self.collection
        ))
    }
}
