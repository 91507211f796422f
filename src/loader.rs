//! Surrogate id assignment and bulk load.
//!
//! The read-max-id, assign, append sequence is not safe under concurrent
//! invocation: two batches reading the same `max_id` would hand out the same
//! ids. Only one ingestion batch may run at a time; callers must serialize
//! around `load_batch` (the HTTP layer holds a mutex for this).

use std::collections::HashSet;

use serde::Serialize;
use tracing::info;

use crate::error::Result;
use crate::models::{LoadableObservation, NormalizedObservation};
use crate::store::ObservationStore;

// ---

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    // ---
    pub received: usize,
    pub dropped_unknown_sensor: usize,
    pub inserted: u64,
    pub first_id: Option<i64>,
    pub last_id: Option<i64>,
}

/// Keep only rows whose `sensor_path` is cataloged.
pub fn restrict_to_known(
    batch: Vec<NormalizedObservation>,
    known: &HashSet<String>,
) -> Vec<NormalizedObservation> {
    // ---
    let before = batch.len();
    let kept: Vec<_> = batch
        .into_iter()
        .filter(|row| known.contains(&row.sensor_path))
        .collect();
    let removed = before - kept.len();
    if removed > 0 {
        info!(
            stage = "load",
            removed,
            reason = "sensor_path not in catalog",
            "removed {} rows: sensor_path not in catalog",
            removed
        );
    }
    kept
}

/// Number rows `max_id + 1, max_id + 2, ...` in batch order.
pub fn assign_ids(batch: Vec<NormalizedObservation>, max_id: i64) -> Vec<LoadableObservation> {
    // ---
    (max_id + 1..)
        .zip(batch)
        .map(|(id, obs)| LoadableObservation::from_normalized(id, obs))
        .collect()
}

/// Filter, stamp and append one normalized batch.
pub async fn load_batch(
    store: &dyn ObservationStore,
    batch: Vec<NormalizedObservation>,
) -> Result<LoadSummary> {
    // ---
    let received = batch.len();
    let known = store.known_sensor_paths().await?;
    let batch = restrict_to_known(batch, &known);
    let dropped_unknown_sensor = received - batch.len();

    if batch.is_empty() {
        info!(received, "Nothing to load after filtering");
        return Ok(LoadSummary {
            received,
            dropped_unknown_sensor,
            ..LoadSummary::default()
        });
    }

    let max_id = store.max_observation_id().await?;
    let rows = assign_ids(batch, max_id);
    let inserted = store.append_observations(&rows).await?;

    let summary = LoadSummary {
        received,
        dropped_unknown_sensor,
        inserted,
        first_id: rows.first().map(|r| r.id),
        last_id: rows.last().map(|r| r.id),
    };
    info!(
        inserted,
        first_id = ?summary.first_id,
        last_id = ?summary.last_id,
        "Loaded observation batch"
    );
    Ok(summary)
}
