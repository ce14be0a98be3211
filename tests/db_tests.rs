//! Database and schema tests
//!
//! Tests SQLite migrations and the persistent local store

use sqlx::SqlitePool;
use tokio_tutor_chat_api::infrastructure::database::DatabaseConnection;
use tokio_tutor_chat_api::infrastructure::repositories::DbMessageStore;
use tokio_tutor_chat_api::infrastructure::store::{
    ConversationStore, NewMessage, StoreLimits, StoreMode,
};
use uuid::Uuid;

/// Setup test database with migrations
async fn setup_test_db() -> SqlitePool {
    let pool = SqlitePool::connect(":memory:").await.unwrap();
    sqlx::migrate!().run(&pool).await.unwrap();
    pool
}

fn limits() -> StoreLimits {
    StoreLimits {
        max_message_length: 10_000,
        max_conversation_messages: 1_000,
    }
}

#[tokio::test]
async fn test_database_migrations_work() {
    let pool = setup_test_db().await;

    let tables: Vec<(String,)> =
        sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' AND name = 'messages'")
            .fetch_all(&pool)
            .await
            .unwrap();

    assert_eq!(tables.len(), 1);
}

#[tokio::test]
async fn test_message_id_is_unique() {
    let pool = setup_test_db().await;
    let insert = "INSERT INTO messages (id, conversation_id, role, content, timestamp, metadata) VALUES ('m1', 'c1', 'user', 'hi', '2024-05-01T10:00:00Z', '{}')";

    sqlx::query(insert).execute(&pool).await.unwrap();
    let duplicate = sqlx::query(insert).execute(&pool).await;

    assert!(duplicate.is_err());
}

#[tokio::test]
async fn test_local_store_survives_reopen() {
    let dir = std::env::temp_dir().join(format!("tutor-chat-db-{}", Uuid::new_v4().simple()));
    let path = dir.join("messages.db");

    let message_id = {
        let connection = DatabaseConnection::open(&path).await.unwrap();
        let store = ConversationStore::new(
            Box::new(DbMessageStore::new(connection)),
            StoreMode::Local,
            "chat_messages",
            limits(),
        );
        store
            .append(NewMessage::new("c1", "user", "Xin chào").first_in_conversation(true))
            .await
            .unwrap()
    };

    let connection = DatabaseConnection::open(&path).await.unwrap();
    let (metadata,): (String,) = sqlx::query_as("SELECT metadata FROM messages WHERE id = ?")
        .bind(&message_id)
        .fetch_one(&*connection)
        .await
        .unwrap();
    let store = ConversationStore::new(
        Box::new(DbMessageStore::new(connection)),
        StoreMode::Local,
        "chat_messages",
        limits(),
    );
    let messages = store.list("c1").await.unwrap();

    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, message_id);
    assert_eq!(messages[0].content, "Xin chào");
    assert!(metadata.contains(r#""is_first_message":true"#));

    let health = store.health().await;
    assert!(health.persistent);
    assert!(health.degraded);

    let _ = std::fs::remove_dir_all(dir);
}
