//! Chroma vector store over its v2 HTTP API.
//!
//! Documents are embedded client side (see [`Embedder`]) because the server does
//! not run an embedding function for raw HTTP callers. Every message carries its
//! conversation id as metadata, and all reads are scoped with a `$eq` filter on it.

use crate::config::Settings;
use crate::error::{StoreError, ValidationError};
use crate::infrastructure::entities::{MessageRecord, Role, StoredMessage};
use crate::infrastructure::traits::{Embedder, MessageStore};
use async_trait::async_trait;
use log::{debug, info};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::sync::Arc;
use std::time::Duration;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

pub struct ChromaStore {
    http: reqwest::Client,
    base_url: String,
    collections_url: String,
    collection_id: String,
    collection_name: String,
    embedder: Arc<dyn Embedder>,
}

#[derive(Deserialize, Debug)]
struct Collection {
    id: String,
}

#[derive(Serialize, Debug)]
struct AddRequest<'a> {
    ids: [&'a str; 1],
    embeddings: [Vec<f32>; 1],
    documents: [&'a str; 1],
    metadatas: [Map<String, Value>; 1],
}

#[derive(Deserialize, Debug, Default)]
struct GetResponse {
    ids: Vec<String>,
    #[serde(default)]
    documents: Option<Vec<Option<String>>>,
    #[serde(default)]
    metadatas: Option<Vec<Option<Map<String, Value>>>>,
}

#[derive(Deserialize, Debug, Default)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<Map<String, Value>>>>>,
    #[serde(default)]
    distances: Option<Vec<Vec<Option<f64>>>>,
}

impl ChromaStore {
    /// Checks the server is alive and gets or creates the collection.
    pub async fn connect(
        base_url: &str,
        tenant: &str,
        database: &str,
        collection_name: &str,
        embedder: Arc<dyn Embedder>,
    ) -> Result<ChromaStore, StoreError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        let base_url = base_url.trim_end_matches('/').to_owned();
        let collections_url =
            format!("{base_url}/api/v2/tenants/{tenant}/databases/{database}/collections");

        check(
            http.get(format!("{base_url}/api/v2/heartbeat"))
                .send()
                .await,
        )
        .await?;

        let collection: Collection = parse(
            http.post(&collections_url)
                .json(&json!({
                    "name": collection_name,
                    "metadata": {
                        "hnsw:space": "cosine",
                        "description": "Chat messages with conversation tracking",
                    },
                    "get_or_create": true,
                }))
                .send()
                .await,
        )
        .await?;

        info!("Chroma collection '{collection_name}' ready ({})", collection.id);

        Ok(ChromaStore {
            http,
            base_url,
            collections_url,
            collection_id: collection.id,
            collection_name: collection_name.to_owned(),
            embedder,
        })
    }

    pub async fn from_settings(
        settings: &Settings,
        embedder: Arc<dyn Embedder>,
    ) -> Result<ChromaStore, StoreError> {
        Self::connect(
            &settings.chroma_url(),
            &settings.chroma_tenant,
            &settings.chroma_database,
            &settings.collection_name,
            embedder,
        )
        .await
    }

    fn collection_url(&self, action: &str) -> String {
        format!("{}/{}/{action}", self.collections_url, self.collection_id)
    }
}

/// Chroma nests query results one level per query embedding; we only send one.
fn first_row<T>(rows: Option<Vec<Vec<T>>>) -> Vec<T> {
    rows.and_then(|r| r.into_iter().next()).unwrap_or_default()
}

fn conversation_filter(conversation_id: &str) -> Value {
    json!({ "conversation_id": { "$eq": conversation_id } })
}

async fn check(result: reqwest::Result<Response>) -> Result<Response, StoreError> {
    let response = result.map_err(|e| StoreError::Unavailable(e.to_string()))?;
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    let message = format!("Chroma responded with {status}: {body}");
    if status.is_server_error() || status == StatusCode::NOT_FOUND {
        Err(StoreError::Unavailable(message))
    } else {
        Err(StoreError::Backend(message))
    }
}

async fn parse<T: DeserializeOwned>(result: reqwest::Result<Response>) -> Result<T, StoreError> {
    check(result)
        .await?
        .json()
        .await
        .map_err(|e| StoreError::Backend(format!("parsing Chroma response: {e}")))
}

/// Rebuilds a message from a document and its metadata. Unknown roles and missing
/// keys are rejected rather than rendered blank.
fn stored_message(
    id: String,
    document: Option<String>,
    metadata: Option<Map<String, Value>>,
) -> Result<StoredMessage, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptRecord {
        id: id.clone(),
        reason,
    };
    let metadata = metadata.ok_or_else(|| corrupt("missing metadata".to_owned()))?;
    let text = |key: &str| {
        metadata
            .get(key)
            .and_then(Value::as_str)
            .map(str::to_owned)
            .ok_or_else(|| corrupt(format!("missing '{key}' metadata")))
    };

    let role: Role = text("role")?
        .parse()
        .map_err(|e: ValidationError| corrupt(e.to_string()))?;
    let conversation_id = text("conversation_id")?;
    let timestamp = text("timestamp")?;

    Ok(StoredMessage {
        id: id.clone(),
        conversation_id,
        role,
        content: document.unwrap_or_default(),
        timestamp,
    })
}

#[async_trait]
impl MessageStore for ChromaStore {
    async fn insert(&self, record: MessageRecord) -> Result<(), StoreError> {
        let embedding = self.embedder.embed(&record.content).await?;

        check(
            self.http
                .post(self.collection_url("add"))
                .json(&AddRequest {
                    ids: [record.id.as_str()],
                    embeddings: [embedding],
                    documents: [record.content.as_str()],
                    metadatas: [record.metadata()],
                })
                .send()
                .await,
        )
        .await?;

        debug!("added {} to '{}'", record.id, self.collection_name);
        Ok(())
    }

    async fn fetch(
        &self,
        conversation_id: &str,
        limit: usize,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let response: GetResponse = parse(
            self.http
                .post(self.collection_url("get"))
                .json(&json!({
                    "where": conversation_filter(conversation_id),
                    "limit": limit,
                    "include": ["documents", "metadatas"],
                }))
                .send()
                .await,
        )
        .await?;

        let mut documents = response.documents.unwrap_or_default().into_iter();
        let mut metadatas = response.metadatas.unwrap_or_default().into_iter();

        response
            .ids
            .into_iter()
            .map(|id| stored_message(id, documents.next().flatten(), metadatas.next().flatten()))
            .collect()
    }

    async fn nearest(
        &self,
        conversation_id: &str,
        query: &str,
        limit: usize,
    ) -> Result<Vec<(StoredMessage, f64)>, StoreError> {
        let embedding = self.embedder.embed(query).await?;

        let response: QueryResponse = parse(
            self.http
                .post(self.collection_url("query"))
                .json(&json!({
                    "query_embeddings": [embedding],
                    "n_results": limit,
                    "where": conversation_filter(conversation_id),
                    "include": ["documents", "metadatas", "distances"],
                }))
                .send()
                .await,
        )
        .await?;

        let ids = first_row(Some(response.ids));
        let mut documents = first_row(response.documents).into_iter();
        let mut metadatas = first_row(response.metadatas).into_iter();
        let mut distances = first_row(response.distances).into_iter();

        ids.into_iter()
            .map(|id| {
                let message =
                    stored_message(id, documents.next().flatten(), metadatas.next().flatten())?;
                let distance = distances.next().flatten().unwrap_or(1.0);
                Ok((message, distance))
            })
            .collect()
    }

    async fn remove(&self, conversation_id: &str) -> Result<Option<usize>, StoreError> {
        check(
            self.http
                .post(self.collection_url("delete"))
                .json(&json!({ "where": conversation_filter(conversation_id) }))
                .send()
                .await,
        )
        .await?;

        Ok(None)
    }

    async fn ping(&self) -> Result<String, StoreError> {
        let count: u64 = parse(
            self.http
                .get(self.collection_url("count"))
                .send()
                .await,
        )
        .await?;

        Ok(format!(
            "Chroma at {} holds {count} messages in '{}'",
            self.base_url, self.collection_name
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::entities::Role;
    use mockito::{Matcher, Server, ServerGuard};

    const COLLECTIONS: &str = "/api/v2/tenants/default_tenant/databases/default_database/collections";

    struct FixedEmbedder;

    #[async_trait]
    impl Embedder for FixedEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, StoreError> {
            Ok(vec![0.5, 0.5])
        }
    }

    async fn connected(server: &mut ServerGuard) -> ChromaStore {
        let _heartbeat = server
            .mock("GET", "/api/v2/heartbeat")
            .with_status(200)
            .with_body(r#"{"nanosecond heartbeat": 1}"#)
            .create_async()
            .await;
        let _collection = server
            .mock("POST", COLLECTIONS)
            .match_body(Matcher::PartialJsonString(
                r#"{"name": "chat_messages", "get_or_create": true}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"id": "col-1", "name": "chat_messages"}"#)
            .create_async()
            .await;

        ChromaStore::connect(
            &server.url(),
            "default_tenant",
            "default_database",
            "chat_messages",
            Arc::new(FixedEmbedder),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_connect_fails_when_server_is_down() {
        let result = ChromaStore::connect(
            "http://127.0.0.1:1",
            "default_tenant",
            "default_database",
            "chat_messages",
            Arc::new(FixedEmbedder),
        )
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable(_))));
    }

    #[tokio::test]
    async fn test_fetch_scopes_by_conversation() {
        let mut server = Server::new_async().await;
        let store = connected(&mut server).await;
        let get = server
            .mock("POST", format!("{COLLECTIONS}/col-1/get").as_str())
            .match_body(Matcher::PartialJsonString(
                r#"{"where": {"conversation_id": {"$eq": "c1"}}, "limit": 1000}"#.to_string(),
            ))
            .with_status(200)
            .with_body(
                r#"{
                    "ids": ["msg_c1_a"],
                    "documents": ["Hello"],
                    "metadatas": [{"conversation_id": "c1", "role": "user", "timestamp": "2024-05-01T10:00:00Z"}]
                }"#,
            )
            .create_async()
            .await;

        let messages = store.fetch("c1", 1000).await.unwrap();

        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Hello");
        get.assert_async().await;
    }

    #[tokio::test]
    async fn test_nearest_returns_distances() {
        let mut server = Server::new_async().await;
        let store = connected(&mut server).await;
        let _query = server
            .mock("POST", format!("{COLLECTIONS}/col-1/query").as_str())
            .with_status(200)
            .with_body(
                r#"{
                    "ids": [["msg_c1_a"]],
                    "documents": [["Hello"]],
                    "metadatas": [[{"conversation_id": "c1", "role": "user", "timestamp": "2024-05-01T10:00:00Z"}]],
                    "distances": [[0.2]]
                }"#,
            )
            .create_async()
            .await;

        let results = store.nearest("c1", "greeting", 3).await.unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].0.id, "msg_c1_a");
        assert!((results[0].1 - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_role_is_rejected() {
        let mut server = Server::new_async().await;
        let store = connected(&mut server).await;
        let _get = server
            .mock("POST", format!("{COLLECTIONS}/col-1/get").as_str())
            .with_status(200)
            .with_body(
                r#"{
                    "ids": ["msg_c1_a"],
                    "documents": ["Hello"],
                    "metadatas": [{"conversation_id": "c1", "role": "narrator", "timestamp": "2024-05-01T10:00:00Z"}]
                }"#,
            )
            .create_async()
            .await;

        let err = store.fetch("c1", 10).await.unwrap_err();
        assert!(matches!(err, StoreError::CorruptRecord { .. }));
    }

    #[tokio::test]
    async fn test_insert_sends_embedding_and_metadata() {
        let mut server = Server::new_async().await;
        let store = connected(&mut server).await;
        let add = server
            .mock("POST", format!("{COLLECTIONS}/col-1/add").as_str())
            .match_body(Matcher::PartialJsonString(
                r#"{"ids": ["msg_c1_a"], "documents": ["Hello"], "embeddings": [[0.5, 0.5]]}"#
                    .to_string(),
            ))
            .with_status(201)
            .with_body("{}")
            .create_async()
            .await;

        store
            .insert(MessageRecord {
                id: "msg_c1_a".into(),
                conversation_id: "c1".into(),
                role: Role::User,
                content: "Hello".into(),
                timestamp: "2024-05-01T10:00:00Z".into(),
                created_at: "2024-05-01T10:00:00Z".into(),
                is_first_message: true,
                extra: Map::new(),
            })
            .await
            .unwrap();

        add.assert_async().await;
    }
}
