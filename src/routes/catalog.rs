use std::collections::BTreeMap;

use axum::{extract::State, routing::get, routing::post, Json, Router};
use tracing::info;

use aot_pipeline::{CatalogReport, CatalogSnapshot};

use super::{ApiError, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new()
        .route("/catalog/initialize", post(initialize))
        .route("/catalog/measures", get(measures))
}

/// `POST /catalog/initialize`: one-shot; a second call without `/reset`
/// fails on the sensor primary key.
async fn initialize(State(state): State<AppState>) -> Result<Json<CatalogReport>, ApiError> {
    // ---
    info!("POST /catalog/initialize");

    let _guard = state.ingest_lock.lock().await;
    let report = state.pipeline().initialize_catalog().await?;

    Ok(Json(report))
}

/// `GET /catalog/measures`: sensor type → measures from the curated mapping.
async fn measures(
    State(state): State<AppState>,
) -> Result<Json<BTreeMap<String, Vec<String>>>, ApiError> {
    // ---
    let snapshot = CatalogSnapshot::load(&state.config.catalog)?;
    Ok(Json(snapshot.sensor_types()))
}
