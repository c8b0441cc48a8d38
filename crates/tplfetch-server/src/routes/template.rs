//! Template extraction routes.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tplfetch_browser::TemplateId;

use super::ApiError;
use crate::state::AppState;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/template", get(template_by_query))
        .route("/template/{id}", get(template_by_path))
}

#[derive(Debug, Deserialize)]
struct TemplateQuery {
    id: Option<String>,
}

/// GET /api/template?id={id}
async fn template_by_query(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TemplateQuery>,
) -> Result<Response, ApiError> {
    fetch(&state, query.id.as_deref().unwrap_or_default()).await
}

/// GET /api/template/{id}
async fn template_by_path(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    fetch(&state, &id).await
}

async fn fetch(state: &AppState, raw_id: &str) -> Result<Response, ApiError> {
    let target_url = TemplateId::parse(raw_id)
        .ok()
        .map(|id| state.extractor.target_url(&id));

    let found = state
        .extractor
        .fetch_template_html(raw_id)
        .await
        .map_err(|e| ApiError::new(e, target_url))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        found.html,
    )
        .into_response())
}
