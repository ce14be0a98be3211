//! Stored chat endpoints

use crate::api::ApiJson;
use crate::api::chat::schemas::{ChatBody, ChatResponse, MessagePart, StreamDone, StreamError, StreamStarted};
use crate::core::traits::{ChatService, ChatStream};
use crate::error::ServiceError;
use async_stream::stream;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::post;
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::{Stream, StreamExt};
use log::{error, info};
use serde::Serialize;
use std::convert::Infallible;

pub fn router() -> Router {
    Router::new()
        .route("/chat", post(chat))
        .route("/chat/stream", post(chat_stream))
}

/// Named SSE event with a JSON payload.
pub(crate) fn json_event<T: Serialize>(name: &str, data: &T) -> Event {
    Event::default()
        .event(name)
        .json_data(data)
        .unwrap_or_else(|e| Event::default().event("error").data(e.to_string()))
}

async fn chat(
    Inject(chat_service): Inject<dyn ChatService>,
    ApiJson(body): ApiJson<ChatBody>,
) -> Result<Json<ChatResponse>, ServiceError> {
    let outcome = chat_service.chat(body.into()).await?;
    Ok(Json(ChatResponse::from(outcome)))
}

async fn chat_stream(
    Inject(chat_service): Inject<dyn ChatService>,
    ApiJson(body): ApiJson<ChatBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let ChatStream {
        conversation_id,
        user_message_id,
        is_first_message,
        total_messages,
        context_used,
        mut chunks,
    } = chat_service.start_stream(body.into()).await?;

    let stream = stream! {
        yield Ok(json_event("new_message", &StreamStarted {
            conversation_id: conversation_id.clone(),
            user_message_id,
            is_first_message,
            total_messages,
            context_used,
        }));

        let mut reply = String::new();
        while let Some(part) = chunks.next().await {
            match part {
                Ok(chunk) => {
                    reply.push_str(&chunk);
                    yield Ok(json_event("message_part", &MessagePart { chunk }));
                }
                Err(e) => {
                    error!("Streaming reply for {conversation_id} failed: {e}");
                    yield Ok(json_event("error", &StreamError { error: e.to_string() }));
                    return;
                }
            }
        }

        match chat_service.record_reply(&conversation_id, &reply).await {
            Ok(ai_message_id) => {
                info!("Streamed reply stored in {conversation_id}");
                yield Ok(json_event("done", &StreamDone { ai_message_id }));
            }
            Err(e) => {
                error!("Storing streamed reply for {conversation_id} failed: {e}");
                yield Ok(json_event("error", &StreamError { error: e.to_string() }));
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub mod schemas {
    use crate::core::traits::{ChatOutcome, ChatRequest, GenerationOverrides};
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Debug)]
    pub struct ChatBody {
        pub conversation_id: String,
        pub message: String,
        pub max_tokens: Option<i64>,
        pub temperature: Option<f64>,
    }

    impl From<ChatBody> for ChatRequest {
        fn from(body: ChatBody) -> Self {
            ChatRequest {
                conversation_id: body.conversation_id,
                message: body.message,
                overrides: GenerationOverrides {
                    max_tokens: body.max_tokens,
                    temperature: body.temperature,
                },
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct ChatResponse {
        pub status: &'static str,
        #[serde(flatten)]
        pub outcome: ChatOutcome,
    }

    impl From<ChatOutcome> for ChatResponse {
        fn from(outcome: ChatOutcome) -> Self {
            ChatResponse {
                status: "success",
                outcome,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct StreamStarted {
        pub conversation_id: String,
        pub user_message_id: String,
        pub is_first_message: bool,
        pub total_messages: usize,
        pub context_used: String,
    }

    #[derive(Serialize, Debug)]
    pub struct MessagePart {
        pub chunk: String,
    }

    #[derive(Serialize, Debug)]
    pub struct StreamDone {
        pub ai_message_id: String,
    }

    #[derive(Serialize, Debug)]
    pub struct StreamError {
        pub error: String,
    }
}
