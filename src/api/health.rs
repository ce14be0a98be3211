//! Store health endpoint

use crate::core::traits::ConversationService;
use crate::infrastructure::store::StoreHealth;
use axum::Json;
use axum::http::StatusCode;
use di_axum::Inject;

/// 200 only when the primary store answers; any fallback reports 503 with
/// `degraded` set.
pub async fn store_health(
    Inject(conversation_service): Inject<dyn ConversationService>,
) -> (StatusCode, Json<StoreHealth>) {
    let health = conversation_service.store_health().await;
    let status = if health.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status, Json(health))
}
