//! HTTP gateway for `aot-pipeline`.
//!
//! Each sibling module exports a subrouter over [`AppState`]; this gateway
//! merges them so `main.rs` only sees [`router`]. Pipeline errors become JSON
//! responses through [`ApiError`].

use std::sync::Arc;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json, Router,
};
use serde_json::json;
use tokio::sync::Mutex;

use aot_pipeline::{Config, PgStore, Pipeline, PipelineError};

mod catalog;
mod health;
mod ingest;
mod observations;
mod reset;
mod stored;

// ---

/// Shared handler state.
///
/// `ingest_lock` serializes every path that assigns observation ids or
/// rewrites tables.
#[derive(Clone)]
pub struct AppState {
    // ---
    pub store: PgStore,
    pub http: reqwest::Client,
    pub config: Arc<Config>,
    pub ingest_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn pipeline(&self) -> Pipeline<'_> {
        Pipeline::new(&self.http, &self.config, &self.store)
    }
}

pub fn router(state: AppState) -> Router {
    // ---
    Router::new()
        .merge(ingest::router())
        .merge(observations::router())
        .merge(catalog::router())
        .merge(stored::router())
        .merge(reset::router())
        .merge(health::router())
        .with_state(state)
}

// ---

/// Pipeline failure rendered as `{"error": "..."}`.
pub struct ApiError(PipelineError);

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        ApiError(e)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        // ---
        match &self.0 {
            PipelineError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            PipelineError::Fetch(_)
            | PipelineError::Parse(_)
            | PipelineError::SchemaMismatch { .. } => StatusCode::BAD_GATEWAY,
            PipelineError::Store(_) | PipelineError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        // ---
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self.0);
        } else {
            tracing::warn!("Request rejected: {}", self.0);
        }
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}
