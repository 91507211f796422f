use axum::{extract::Query, extract::State, routing::get, Json, Router};
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use tracing::debug;

use aot_pipeline::{PipelineError, StoredObservation};

use super::{ApiError, AppState};

// ---

const DEFAULT_DAYS: i64 = 7;

pub fn router() -> Router<AppState> {
    // ---
    Router::new().route("/stored", get(handler))
}

#[derive(Debug, Deserialize)]
struct StoredQuery {
    sensor_type: String,
    measure: String,
    days: Option<i64>,
}

/// `now - days`, rejecting non-positive or unrepresentable windows.
fn window_start(now: DateTime<Utc>, days: i64) -> Result<DateTime<Utc>, PipelineError> {
    // ---
    let invalid = || {
        PipelineError::InvalidRequest(format!("days must be positive and in range, got {days}"))
    };
    if days <= 0 {
        return Err(invalid());
    }
    Duration::try_days(days)
        .and_then(|d| now.checked_sub_signed(d))
        .ok_or_else(invalid)
}

/// `GET /stored?sensor_type=TSYS01&measure=Temperature[&days=7]`
async fn handler(
    Query(params): Query<StoredQuery>,
    State(state): State<AppState>,
) -> Result<Json<Vec<StoredObservation>>, ApiError> {
    // ---
    let since = window_start(Utc::now(), params.days.unwrap_or(DEFAULT_DAYS))?;

    let rows = state
        .store
        .stored_observations(&params.sensor_type, &params.measure, since)
        .await
        .map_err(PipelineError::from)?;
    debug!(rows = rows.len(), "GET /stored - {} / {}", params.sensor_type, params.measure);

    Ok(Json(rows))
}
