//! Record types for each stage of the pipeline.
//!
//! Raw shapes (`LiveRecord`, `ArchiveRecord`) mirror the upstream payloads,
//! `NormalizedObservation` is the normalizer's canonical output, and
//! `LoadableObservation` is a normalized row stamped with its surrogate id.

use chrono::{DateTime, Utc};
use chrono_tz::America::Chicago;
use serde::{Deserialize, Deserializer, Serialize};

// ---

/// Join a taxonomy triple into the dot-separated `sensor_path` key.
pub fn sensor_path(subsystem: &str, sensor: &str, parameter: &str) -> String {
    format!("{subsystem}.{sensor}.{parameter}")
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    // ---
    pub lat: f64,
    pub lon: f64,
}

/// Physical sensor-pole deployment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    // ---
    /// Hardware identifier, as it appears on archive rows.
    pub node_id: String,
    /// Zero-padded version serial reported by the live feed.
    pub vsn: String,
    pub lat: f64,
    pub lon: f64,
    pub community_area: Option<String>,
    pub description: Option<String>,
}

/// One cataloged sensor channel with a curated human-facing measure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sensor {
    // ---
    pub sensor_path: String,
    pub sensor_type: Option<String>,
    pub sensor_measure: String,
    pub hrf_unit: Option<String>,
    pub hrf_minval: Option<f64>,
    pub hrf_maxval: Option<f64>,
}

/// A row of the curated `sensor_mapping.csv` file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorMapping {
    // ---
    #[serde(default, deserialize_with = "empty_as_none")]
    pub sensor_measure: Option<String>,
    pub sensor_path: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub sensor_type: Option<String>,
}

/// Observation as delivered by the live paginated feed.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveRecord {
    // ---
    pub node_vsn: String,
    pub sensor_path: String,
    pub timestamp: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub value: Option<f64>,
    #[serde(default)]
    pub uom: Option<String>,
    pub location: LiveLocation,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LiveLocation {
    pub geometry: LiveGeometry,
}

/// GeoJSON point; coordinates are `[lon, lat]`.
#[derive(Debug, Clone, Deserialize)]
pub struct LiveGeometry {
    pub coordinates: [f64; 2],
}

/// Observation as found in the archive bundle's CSV member.
#[derive(Debug, Clone, Deserialize)]
pub struct ArchiveRecord {
    // ---
    pub timestamp: String,
    pub node_id: String,
    pub subsystem: String,
    pub sensor: String,
    pub parameter: String,
    #[serde(default)]
    pub value_hrf: String,
}

/// Canonical normalizer output: one averaged reading per 30-minute bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedObservation {
    // ---
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub sensor_path: String,
    pub value_hrf: f64,
    /// Present for live-feed rows only.
    pub location: Option<GeoPoint>,
}

/// Normalized row carrying the surrogate id assigned by the loader.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct LoadableObservation {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub sensor_path: String,
    pub value_hrf: f64,
}

impl LoadableObservation {
    pub fn from_normalized(id: i64, obs: NormalizedObservation) -> Self {
        // ---
        LoadableObservation {
            id,
            timestamp: obs.timestamp,
            node_id: obs.node_id,
            sensor_path: obs.sensor_path,
            value_hrf: obs.value_hrf,
        }
    }
}

/// Response shape handed to the presentation layer.
#[derive(Debug, Clone, Serialize)]
pub struct ObservationView {
    // ---
    pub timestamp_utc: DateTime<Utc>,
    pub timestamp_central: String,
    pub node_id: String,
    pub sensor_path: String,
    pub value_hrf: f64,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl From<&NormalizedObservation> for ObservationView {
    fn from(obs: &NormalizedObservation) -> Self {
        // ---
        ObservationView {
            timestamp_utc: obs.timestamp,
            timestamp_central: obs.timestamp.with_timezone(&Chicago).to_rfc3339(),
            node_id: obs.node_id.clone(),
            sensor_path: obs.sensor_path.clone(),
            value_hrf: obs.value_hrf,
            lat: obs.location.map(|p| p.lat),
            lon: obs.location.map(|p| p.lon),
        }
    }
}

/// Stored observation joined with its node's location.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct StoredObservation {
    // ---
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub node_id: String,
    pub sensor_path: String,
    pub value_hrf: f64,
    pub lat: f64,
    pub lon: f64,
}

// ---

pub(crate) fn empty_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|s| {
        let trimmed = s.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    }))
}

/// Accept a JSON number, a numeric string, or null. Anything unparseable is
/// treated as missing.
fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(serde_json::Value::Number(n)) => n.as_f64(),
        Some(serde_json::Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    })
}
