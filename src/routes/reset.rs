use axum::{extract::State, routing::post, Json, Router};
use serde_json::{json, Value};

use aot_pipeline::{schema, PipelineError};

use super::{ApiError, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/reset", post(handler))
}

/// `POST /reset`: drop and recreate all tables. Irreversible.
async fn handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    // ---
    let _guard = state.ingest_lock.lock().await;
    schema::reset_schema(state.store.pool())
        .await
        .map_err(PipelineError::from)?;

    Ok(Json(json!({ "status": "reset" })))
}
