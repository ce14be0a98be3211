//! SQLite backed message store, the persistent local fallback

use crate::error::StoreError;
use crate::infrastructure::database::DatabaseConnection;
use crate::infrastructure::entities::{MessageRecord, MessageRow, StoredMessage};
use crate::infrastructure::similarity;
use crate::infrastructure::traits::MessageStore;
use async_trait::async_trait;
use log::error;
use serde_json::Value;

pub struct DbMessageStore {
    connection: DatabaseConnection,
}

impl DbMessageStore {
    pub fn new(connection: DatabaseConnection) -> DbMessageStore {
        DbMessageStore { connection }
    }
}

#[async_trait]
impl MessageStore for DbMessageStore {
    async fn insert(&self, record: MessageRecord) -> Result<(), StoreError> {
        let metadata = Value::Object(record.metadata()).to_string();

        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, timestamp, metadata) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&record.id)
        .bind(&record.conversation_id)
        .bind(record.role.as_str())
        .bind(&record.content)
        .bind(&record.timestamp)
        .bind(metadata)
        .execute(&*self.connection)
        .await
        .map_err(|e| {
            error!("{e}");
            StoreError::from(e)
        })?;

        Ok(())
    }

    async fn fetch(
        &self,
        conversation_id: &str,
        _limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        // timestamps may mix formats, so ordering and capping happen after parsing
        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, conversation_id, role, content, timestamp FROM messages WHERE conversation_id = ?",
        )
        .bind(conversation_id)
        .fetch_all(&*self.connection)
        .await
        .map_err(|e| {
            error!("{e}");
            StoreError::from(e)
        })?;

        rows.into_iter().map(StoredMessage::try_from).collect()
    }

    async fn nearest(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(StoredMessage, f64)>, StoreError> {
        let messages = self.fetch(conversation_id, usize::MAX).await?;
        Ok(similarity::rank(messages, query, limit))
    }

    async fn remove(&self, conversation_id: &str) -> Result<Option<usize>, StoreError> {
        let result = sqlx::query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&*self.connection)
            .await
            .map_err(|e| {
                error!("{e}");
                StoreError::from(e)
            })?;

        Ok(Some(result.rows_affected() as usize))
    }

    async fn ping(&self) -> Result<String, StoreError> {
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM messages")
            .fetch_one(&*self.connection)
            .await?;

        Ok(format!(
            "local SQLite store holds {count} messages; semantic search is lexical only"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::entities::Role;
    use serde_json::Map;

    fn record(id: &str, conversation_id: &str, role: Role, content: &str) -> MessageRecord {
        MessageRecord {
            id: id.into(),
            conversation_id: conversation_id.into(),
            role,
            content: content.into(),
            timestamp: "2024-05-01T10:00:00Z".into(),
            created_at: "2024-05-01T10:00:00Z".into(),
            is_first_message: false,
            extra: Map::new(),
        }
    }

    async fn store() -> DbMessageStore {
        DbMessageStore::new(DatabaseConnection::in_memory().await.unwrap())
    }

    #[tokio::test]
    async fn test_insert_and_fetch_by_conversation() {
        let store = store().await;
        store
            .insert(record("m1", "c1", Role::User, "Hello"))
            .await
            .unwrap();
        store
            .insert(record("m2", "c2", Role::User, "Other"))
            .await
            .unwrap();

        let messages = store.fetch("c1", 10).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].id, "m1");
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
    }

    #[tokio::test]
    async fn test_remove_reports_deleted_rows() {
        let store = store().await;
        store
            .insert(record("m1", "c1", Role::User, "Hello"))
            .await
            .unwrap();
        store
            .insert(record("m2", "c1", Role::Assistant, "Xin chào"))
            .await
            .unwrap();

        assert_eq!(store.remove("c1").await.unwrap(), Some(2));
        assert_eq!(store.remove("c1").await.unwrap(), Some(0));
        assert!(store.fetch("c1", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_role_fails_closed() {
        let store = store().await;
        sqlx::query(
            "INSERT INTO messages (id, conversation_id, role, content, timestamp, metadata) VALUES ('m1', 'c1', 'bot', 'hi', '2024-05-01T10:00:00Z', '{}')",
        )
        .execute(&*store.connection)
        .await
        .unwrap();

        let err = store.fetch("c1", 10).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));
    }

    #[tokio::test]
    async fn test_nearest_ranks_lexically() {
        let store = store().await;
        store
            .insert(record("m1", "c1", Role::User, "Suggest travel vocabulary"))
            .await
            .unwrap();
        store
            .insert(record("m2", "c1", Role::User, "How old are you?"))
            .await
            .unwrap();

        let results = store.nearest("c1", "travel", 1).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "m1");
    }
}
