use axum::{extract::Query, extract::State, routing::post, Json, Router};
use serde::Deserialize;
use tracing::info;

use aot_pipeline::IngestionReport;

use super::{ApiError, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/ingest", post(handler))
}

#[derive(Debug, Deserialize)]
struct IngestQuery {
    date: String,
}

/// `POST /ingest?date=2019-04-15` (also `A-to-B` weekly, `A..B` daily range).
async fn handler(
    Query(params): Query<IngestQuery>,
    State(state): State<AppState>,
) -> Result<Json<IngestionReport>, ApiError> {
    // ---
    info!("POST /ingest - date={}", params.date);

    let _guard = state.ingest_lock.lock().await;
    let report = state.pipeline().run_ingestion(&params.date).await?;

    Ok(Json(report))
}
