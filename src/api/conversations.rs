//! Conversations endpoints

use crate::api::conversations::schemas::{
    ConversationMessages, CreateMessage, Deleted, MessageCreated, SearchRequest, SearchResults,
};
use crate::api::{ApiJson, ExtractConversation};
use crate::core::traits::ConversationService;
use crate::error::ServiceError;
use crate::infrastructure::entities::ConversationStats;
use crate::infrastructure::store::NewMessage;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;

/// Top level `/messages` and `/search`.
pub fn router() -> Router {
    Router::new()
        .route("/messages", post(post_message))
        .route("/search", post(search))
}

/// Routes under `/conversations`.
pub fn conversation_router() -> Router {
    Router::new()
        .route("/:id", get(conversation_messages).delete(delete_conversation))
        .route("/:id/stats", get(conversation_stats))
}

async fn post_message(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ApiJson(message): ApiJson<CreateMessage>,
) -> Result<(StatusCode, Json<MessageCreated>), ServiceError> {
    let message_id = conversation_service
        .post_message(
            NewMessage::new(message.conversation_id, message.role, message.content)
                .with_timestamp(message.timestamp)
                .with_metadata(message.metadata),
        )
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(MessageCreated {
            status: "success",
            message_id,
        }),
    ))
}

async fn conversation_messages(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractConversation(conversation_id): ExtractConversation,
) -> Result<Json<ConversationMessages>, ServiceError> {
    let messages = conversation_service.list_messages(&conversation_id).await?;

    Ok(Json(ConversationMessages {
        status: "success",
        total_messages: messages.len(),
        conversation_id,
        messages: messages.into_iter().map(schemas::Message::from).collect(),
    }))
}

async fn delete_conversation(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractConversation(conversation_id): ExtractConversation,
) -> Result<Json<Deleted>, ServiceError> {
    conversation_service
        .delete_conversation(&conversation_id)
        .await?;

    Ok(Json(Deleted {
        status: "success",
        message: format!("Conversation {conversation_id} deleted successfully"),
    }))
}

async fn conversation_stats(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ExtractConversation(conversation_id): ExtractConversation,
) -> Result<Json<ConversationStats>, ServiceError> {
    Ok(Json(
        conversation_service
            .conversation_stats(&conversation_id)
            .await?,
    ))
}

async fn search(
    Inject(conversation_service): Inject<dyn ConversationService>,
    ApiJson(request): ApiJson<SearchRequest>,
) -> Result<Json<SearchResults>, ServiceError> {
    let hits = conversation_service
        .search(&request.conversation_id, &request.query, request.n_results)
        .await?;

    Ok(Json(SearchResults {
        status: "success",
        query: request.query,
        results: hits.into_iter().map(schemas::SearchResult::from).collect(),
    }))
}

pub mod schemas {
    use crate::infrastructure::entities::{Role, StoredMessage};
    use crate::infrastructure::store::SearchHit;
    use serde::{Deserialize, Serialize};
    use serde_json::{Map, Value};

    fn default_n_results() -> i64 {
        3
    }

    #[derive(Deserialize, Debug)]
    pub struct CreateMessage {
        pub conversation_id: String,
        pub role: String,
        pub content: String,
        pub timestamp: Option<String>,
        pub metadata: Option<Map<String, Value>>,
    }

    #[derive(Serialize, Debug)]
    pub struct MessageCreated {
        pub status: &'static str,
        pub message_id: String,
    }

    #[derive(Serialize, Debug)]
    pub struct Message {
        pub id: String,
        pub role: Role,
        pub content: String,
        pub timestamp: String,
    }

    impl From<StoredMessage> for Message {
        fn from(message: StoredMessage) -> Self {
            Message {
                id: message.id,
                role: message.role,
                content: message.content,
                timestamp: message.timestamp,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ConversationMessages {
        pub status: &'static str,
        pub conversation_id: String,
        pub messages: Vec<Message>,
        pub total_messages: usize,
    }

    #[derive(Serialize, Debug)]
    pub struct Deleted {
        pub status: &'static str,
        pub message: String,
    }

    #[derive(Deserialize, Debug)]
    pub struct SearchRequest {
        pub conversation_id: String,
        pub query: String,
        #[serde(default = "default_n_results")]
        pub n_results: i64,
    }

    #[derive(Serialize, Debug)]
    pub struct SearchResult {
        pub id: String,
        pub role: Role,
        pub content: String,
        pub timestamp: String,
        pub score: f64,
    }

    impl From<SearchHit> for SearchResult {
        fn from(hit: SearchHit) -> Self {
            SearchResult {
                id: hit.message.id,
                role: hit.message.role,
                content: hit.message.content,
                timestamp: hit.message.timestamp,
                score: hit.score,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct SearchResults {
        pub status: &'static str,
        pub query: String,
        pub results: Vec<SearchResult>,
    }
}
