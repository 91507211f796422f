use axum::{extract::Query, extract::State, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use aot_pipeline::acquire::FetchSummary;
use aot_pipeline::config::check_lookback_minutes;
use aot_pipeline::{ObservationView, PipelineError};

use super::{ApiError, AppState};

// ---

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/observations", get(handler))
}

#[derive(Debug, Deserialize)]
struct ObservationsQuery {
    measure: String,
    lookback_minutes: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ObservationsResponse {
    partial: bool,
    count: usize,
    fetches: Vec<FetchSummary>,
    observations: Vec<ObservationView>,
}

/// `GET /observations?measure=Temperature[&lookback_minutes=60]`
///
/// Live and read-only: nothing fetched here is written to the store.
async fn handler(
    Query(params): Query<ObservationsQuery>,
    State(state): State<AppState>,
) -> Result<Json<ObservationsResponse>, ApiError> {
    // ---
    info!("GET /observations - measure={}", params.measure);

    if let Some(minutes) = params.lookback_minutes {
        check_lookback_minutes(minutes).map_err(PipelineError::InvalidRequest)?;
    }

    let query = state
        .pipeline()
        .query_observations(&params.measure, params.lookback_minutes)
        .await?;

    let partial = query.is_partial();
    if partial {
        warn!("Returning partial live result for {}", params.measure);
    }
    let observations: Vec<ObservationView> = query.rows.iter().map(ObservationView::from).collect();

    Ok(Json(ObservationsResponse {
        partial,
        count: observations.len(),
        fetches: query.fetches,
        observations,
    }))
}
