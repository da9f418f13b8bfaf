//! HTTP surface: subscribe, explicit removal and stats

use axum::{
    extract::State,
    http::{header, HeaderName, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use alerts_core::{
    cancelled, ConditionBlock, ConditionKey, RemovalRequest, StoreError, SubscriptionError,
    SubscriptionRequest,
};
use alerts_price_feed::SubscriptionStore;

use crate::queue::{QueueError, QueuePublisher};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SubscriptionStore>,
    pub publisher: QueuePublisher,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<SubscriptionError> for ApiError {
    fn from(e: SubscriptionError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::NotFound(e.to_string())
    }
}

impl From<QueueError> for ApiError {
    fn from(e: QueueError) -> Self {
        ApiError::ServiceUnavailable(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, code) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            ApiError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, msg, "SERVICE_UNAVAILABLE")
            }
        };

        let body = Json(json!({
            "error": code,
            "message": message
        }));

        (status, body).into_response()
    }
}

/// Path prefix existing front-ends call
pub const API_PREFIX: &str = "/api/v1";

pub fn create_router(state: AppState, request_timeout: Duration) -> Router {
    let api_routes = Router::new()
        .route("/alert", post(subscribe))
        .route("/delete", post(remove))
        .route("/stats", get(stats));

    Router::new()
        .nest(API_PREFIX, api_routes)
        .layer(TimeoutLayer::new(request_timeout))
        .layer(cors())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Browser front-ends call from their own origin, which is echoed back
fn cors() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(AllowOrigin::mirror_request())
        .allow_methods([
            Method::GET,
            Method::HEAD,
            Method::PUT,
            Method::POST,
            Method::DELETE,
        ])
        .allow_headers([
            header::ACCEPT,
            header::CONTENT_TYPE,
            header::CONTENT_LENGTH,
            header::ACCEPT_ENCODING,
            HeaderName::from_static("x-csrf-token"),
            header::AUTHORIZATION,
        ])
}

/// Validate and publish to the subscription queue
async fn subscribe(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request = SubscriptionRequest::from_slice(&body)?;
    // Reject early so front-ends get a 400 instead of a silent drop
    ConditionBlock::try_from(request)?;

    state.publisher.publish(body.to_vec()).await?;
    Ok((StatusCode::OK, Json(json!({ "result": "subscribe" }))))
}

/// Explicit removal outside the fire-and-evict path
async fn remove(
    State(state): State<AppState>,
    body: axum::body::Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let request: RemovalRequest = serde_json::from_slice(&body)
        .map_err(|e| SubscriptionError::Malformed(e.to_string()))?;
    let key = ConditionKey::try_from(request)?;

    state.store.delete(&key)?;
    info!("Removed {} on request", key);
    Ok((StatusCode::CREATED, Json(json!({ "result": "ok" }))))
}

async fn stats(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.stats())
}

/// Serve until shutdown is signalled
pub async fn serve(
    listener: TcpListener,
    router: Router,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("HTTP listening on {}{}", listener.local_addr()?, API_PREFIX);

    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            cancelled(&mut shutdown).await;
            info!("HTTP shutdown requested");
        })
        .await
}
