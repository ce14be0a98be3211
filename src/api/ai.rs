//! Stateless inference endpoints under `/ai`

use crate::api::ApiJson;
use crate::api::ai::schemas::{AiChatBody, AiChatResponse, GenerateBody, GenerateResponse, StreamData};
use crate::core::prompt::ExchangePair;
use crate::core::traits::{ChatService, InferenceHealth};
use crate::error::ServiceError;
use async_stream::stream;
use axum::http::StatusCode;
use axum::response::Sse;
use axum::response::sse::{Event, KeepAlive};
use axum::routing::{get, post};
use axum::{Json, Router};
use di_axum::Inject;
use futures_util::{Stream, StreamExt};
use std::convert::Infallible;

pub fn router() -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/stream", post(generate_stream))
        .route("/chat", post(chat))
        .route("/health", get(health))
}

fn data_event(data: &StreamData) -> Event {
    Event::default()
        .json_data(data)
        .unwrap_or_else(|e| Event::default().data(e.to_string()))
}

async fn generate(
    Inject(chat_service): Inject<dyn ChatService>,
    ApiJson(body): ApiJson<GenerateBody>,
) -> Result<Json<GenerateResponse>, ServiceError> {
    let generation = chat_service
        .generate(&body.prompt, body.overrides())
        .await?;

    Ok(Json(GenerateResponse {
        success: true,
        response: generation.response,
        max_tokens: generation.max_tokens,
        temperature: generation.temperature,
    }))
}

async fn generate_stream(
    Inject(chat_service): Inject<dyn ChatService>,
    ApiJson(body): ApiJson<GenerateBody>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ServiceError> {
    let mut chunks = chat_service
        .generate_stream(&body.prompt, body.overrides())
        .await?;

    let stream = stream! {
        while let Some(part) = chunks.next().await {
            match part {
                Ok(chunk) => yield Ok(data_event(&StreamData::chunk(chunk))),
                Err(e) => {
                    yield Ok(data_event(&StreamData::failed(e.to_string())));
                    return;
                }
            }
        }
        yield Ok(data_event(&StreamData::finished()));
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn chat(
    Inject(chat_service): Inject<dyn ChatService>,
    ApiJson(body): ApiJson<AiChatBody>,
) -> Result<Json<AiChatResponse>, ServiceError> {
    let overrides = body.overrides();
    let mut history = body.history.unwrap_or_default();

    let response = chat_service
        .stateless_chat(&body.message, &history, overrides)
        .await?;

    history.push(ExchangePair {
        user: body.message.clone(),
        ai: response.clone(),
    });

    Ok(Json(AiChatResponse {
        success: true,
        response,
        message: body.message,
        conversation_history: history,
    }))
}

async fn health(
    Inject(chat_service): Inject<dyn ChatService>,
) -> (StatusCode, Json<InferenceHealth>) {
    let health = chat_service.inference_health().await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(health))
}

pub mod schemas {
    use crate::core::prompt::ExchangePair;
    use crate::core::traits::GenerationOverrides;
    use serde::{Deserialize, Serialize};

    #[derive(Deserialize, Debug)]
    pub struct GenerateBody {
        pub prompt: String,
        pub max_tokens: Option<i64>,
        pub temperature: Option<f64>,
    }

    impl GenerateBody {
        pub fn overrides(&self) -> GenerationOverrides {
            GenerationOverrides {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct GenerateResponse {
        pub success: bool,
        pub response: String,
        pub max_tokens: u32,
        pub temperature: f32,
    }

    #[derive(Deserialize, Debug)]
    pub struct AiChatBody {
        pub message: String,
        pub history: Option<Vec<ExchangePair>>,
        pub max_tokens: Option<i64>,
        pub temperature: Option<f64>,
    }

    impl AiChatBody {
        pub fn overrides(&self) -> GenerationOverrides {
            GenerationOverrides {
                max_tokens: self.max_tokens,
                temperature: self.temperature,
            }
        }
    }

    #[derive(Serialize, Debug)]
    pub struct AiChatResponse {
        pub success: bool,
        pub response: String,
        pub message: String,
        pub conversation_history: Vec<ExchangePair>,
    }

    /// Payload of one `/ai/stream` event.
    #[derive(Serialize, Debug)]
    pub struct StreamData {
        pub chunk: String,
        pub done: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        pub error: Option<String>,
    }

    impl StreamData {
        pub fn chunk(chunk: String) -> Self {
            StreamData {
                chunk,
                done: false,
                error: None,
            }
        }

        pub fn finished() -> Self {
            StreamData {
                chunk: String::new(),
                done: true,
                error: None,
            }
        }

        pub fn failed(error: String) -> Self {
            StreamData {
                chunk: String::new(),
                done: true,
                error: Some(error),
            }
        }
    }
}
