use crate::error::{ServiceError, ValidationError};
use async_trait::async_trait;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequest, FromRequestParts, Path, Request};
use axum::http::request::Parts;
use axum::Json;

pub mod ai;
pub mod chat;
pub mod conversations;
pub mod health;

/// Every route of the service.
pub fn router() -> Router {
    Router::new()
        .merge(chat::router())
        .merge(conversations::router())
        .nest("/conversations", conversations::conversation_router())
        .nest("/ai", ai::router())
        .route("/health", axum::routing::get(health::store_health))
}

/// JSON body whose rejections use the service error body.
#[derive(Debug)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &S) -> Result<Self, ServiceError> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(ApiJson(value)),
            Err(rejection) => Err(ValidationError::MalformedBody(rejection.body_text()).into()),
        }
    }
}

/// Trimmed, non-empty conversation id from the `:id` path segment.
#[derive(Debug)]
pub struct ExtractConversation(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for ExtractConversation
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, ServiceError> {
        let Path(conversation_id) = Path::<String>::from_request_parts(parts, state)
            .await
            .map_err(|e| ValidationError::MalformedBody(e.body_text()))?;

        let conversation_id = conversation_id.trim();
        if conversation_id.is_empty() {
            return Err(ValidationError::EmptyConversationId.into());
        }
        Ok(ExtractConversation(conversation_id.to_owned()))
    }
}
