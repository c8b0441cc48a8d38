//! HTTP route handlers.

pub mod health;
pub mod template;

use std::sync::Arc;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tplfetch_core::{Error, ErrorKind};
use tracing::error;

use crate::state::AppState;

/// Build the main Axum router with all routes.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::routes())
        .nest("/api", api_routes())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new().merge(template::routes())
}

/// Error response wrapper mapping the error taxonomy onto status codes.
pub struct ApiError {
    pub error: Error,
    /// Target URL known to the handler, for errors that do not carry one.
    pub target_url: Option<String>,
}

impl ApiError {
    pub fn new(error: Error, target_url: Option<String>) -> Self {
        Self { error, target_url }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self.error.kind() {
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = match self.error {
            Error::Validation(message) => serde_json::json!({ "error": message }),
            Error::Extraction {
                reason,
                target_url,
                iframe_url_tried,
            } => serde_json::json!({
                "error": reason,
                "targetUrl": target_url,
                "iframeUrlTried": iframe_url_tried,
            }),
            err => {
                error!("Template fetch failed: {}", err);
                serde_json::json!({
                    "error": "failed to fetch template",
                    "message": err.to_string(),
                    "targetUrl": err.target_url().map(String::from).or(self.target_url),
                })
            }
        };
        (status, Json(body)).into_response()
    }
}
