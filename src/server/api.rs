use axum::{
    extract::{ rejection::JsonRejection, State },
    http::{ HeaderMap, StatusCode },
    response::IntoResponse,
    routing::{ get, post },
    Json,
    Router,
};
use log::{ info, warn };
use std::sync::Arc;
use tower_http::cors::{ Any, CorsLayer };

use crate::error::RelayError;
use crate::models::chat::ChatRequest;
use crate::ratelimit::{ CounterStore, Decision };
use crate::upstream::shape::{ shape, HistoryMode };
use crate::upstream::UpstreamClient;

#[derive(Clone)]
pub struct AppState {
    pub upstream: Arc<dyn UpstreamClient>,
    pub limiter: Option<Arc<dyn CounterStore>>,
    pub history_mode: HistoryMode,
}

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/chat", post(chat_handler).options(preflight_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn preflight_handler() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn chat_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<ChatRequest>, JsonRejection>
) -> Result<impl IntoResponse, RelayError> {
    if let Some(limiter) = &state.limiter {
        let ip = client_ip(&headers);
        if let Decision::Limited { retry_after } = limiter.check_and_increment(&ip).await {
            warn!("rate limit exceeded for {}", ip);
            return Err(RelayError::RateLimited {
                message: "too many requests".to_string(),
                retry_after: Some(retry_after),
            });
        }
    }

    // A malformed body is a validation failure, never an unhandled rejection.
    let Json(request) = body.map_err(|rejection| RelayError::Validation(rejection.body_text()))?;

    let payload = shape(&request, state.history_mode)?;
    let reply = state.upstream.generate(&payload).await?;
    info!("chat turn completed ({} chars)", reply.text.len());

    Ok(Json(reply.raw))
}

/// Best-effort client key for the advisory rate limit, taken from the
/// forwarding headers the way the hosting platforms populate them.
fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .or_else(|| {
            headers
                .get("client-ip")
                .and_then(|v| v.to_str().ok())
                .map(|v| v.trim().to_string())
        })
        .unwrap_or_else(|| "unknown".to_string())
}
