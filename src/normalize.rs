//! Observation normalizer.
//!
//! Turns raw feed or archive records into `NormalizedObservation`s:
//! timestamps parsed to UTC, live-feed coordinates flattened and corrected,
//! unusable rows dropped, and the remainder averaged into fixed-width time
//! buckets per `(node_id, sensor_path)`.
//!
//! Every filtering step reports what it removed through `tracing` at `info`
//! level with `removed` and `reason` fields. Nothing here returns an error;
//! row-level problems are filtered, not propagated.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::Chicago;
use tracing::info;

use crate::catalog::CatalogSnapshot;
use crate::config::{ArchiveTimeZone, NormalizeConfig};
use crate::models::{
    sensor_path, ArchiveRecord, GeoPoint, LiveRecord, Node, NormalizedObservation,
};

// ---

const NAIVE_FORMATS: &[&str] = &[
    "%Y/%m/%d %H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
];

/// Anything that may carry a geographic fix subject to the region rules.
pub trait HasLocation {
    fn location(&self) -> Option<GeoPoint>;
    fn set_location(&mut self, point: GeoPoint);
}

impl HasLocation for NormalizedObservation {
    fn location(&self) -> Option<GeoPoint> {
        self.location
    }

    fn set_location(&mut self, point: GeoPoint) {
        self.location = Some(point);
    }
}

impl HasLocation for Node {
    fn location(&self) -> Option<GeoPoint> {
        Some(GeoPoint {
            lat: self.lat,
            lon: self.lon,
        })
    }

    fn set_location(&mut self, point: GeoPoint) {
        self.lat = point.lat;
        self.lon = point.lon;
    }
}

fn audit(stage: &str, removed: usize, reason: &str) {
    // ---
    if removed > 0 {
        info!(stage, removed, reason, "removed {} rows: {}", removed, reason);
    }
}

/// Apply sign correction, the zero-fix filter and the region filter, in
/// that order. Rows without a location pass through untouched.
pub fn apply_geo_rules<T: HasLocation>(mut rows: Vec<T>, min_latitude: f64, stage: &str) -> Vec<T> {
    // ---
    // Some upstream records report a positive longitude for a western-hemisphere fix
    let mut fixed = 0usize;
    for row in rows.iter_mut() {
        if let Some(mut point) = row.location() {
            if point.lon > 0.0 {
                point.lon = -point.lon;
                row.set_location(point);
                fixed += 1;
            }
        }
    }
    if fixed > 0 {
        info!(stage, fixed, reason = "positive longitude", "negated longitude on {} rows", fixed);
    }

    // A zero on either axis is the upstream sentinel for "no fix"
    let before = rows.len();
    rows.retain(|r| r.location().map_or(true, |p| p.lat != 0.0 && p.lon != 0.0));
    audit(stage, before - rows.len(), "lat/lon at 0");

    let before = rows.len();
    rows.retain(|r| r.location().map_or(true, |p| p.lat > min_latitude));
    audit(stage, before - rows.len(), "outside Chicago region");

    rows
}

/// Parse a live-feed timestamp. Values without a zone are taken as UTC.
pub fn parse_live_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    // ---
    parse_timestamp(raw, ArchiveTimeZone::Utc)
}

/// Parse a timestamp, reading zone-less values in `zone`.
pub fn parse_timestamp(raw: &str, zone: ArchiveTimeZone) -> Option<DateTime<Utc>> {
    // ---
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }

    let naive = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())?;

    match zone {
        ArchiveTimeZone::Utc => Some(Utc.from_utc_datetime(&naive)),
        // Ambiguous fall-back hours resolve to the earlier instant; skipped
        // spring-forward hours do not exist and yield None.
        ArchiveTimeZone::Central => Chicago
            .from_local_datetime(&naive)
            .earliest()
            .map(|dt| dt.with_timezone(&Utc)),
    }
}

/// Floor a timestamp to the start of its bucket.
pub fn bucket_start(ts: DateTime<Utc>, interval: Duration) -> Option<DateTime<Utc>> {
    // ---
    let width = interval.num_seconds().max(1);
    let start = ts.timestamp().div_euclid(width) * width;
    DateTime::<Utc>::from_timestamp(start, 0)
}

struct Bucket {
    sum: f64,
    count: usize,
    location: Option<GeoPoint>,
}

/// Average rows into fixed buckets per `(node_id, sensor_path)`.
///
/// Output is ordered by `(node_id, sensor_path, bucket)`. Empty buckets are
/// never emitted. The bucket keeps the first location seen for it.
pub fn resample(rows: Vec<NormalizedObservation>, interval: Duration) -> Vec<NormalizedObservation> {
    // ---
    let mut buckets: BTreeMap<(String, String, DateTime<Utc>), Bucket> = BTreeMap::new();
    let mut out_of_range = 0usize;

    for row in rows {
        let Some(start) = bucket_start(row.timestamp, interval) else {
            out_of_range += 1;
            continue;
        };
        let bucket = buckets
            .entry((row.node_id, row.sensor_path, start))
            .or_insert(Bucket {
                sum: 0.0,
                count: 0,
                location: row.location,
            });
        bucket.sum += row.value_hrf;
        bucket.count += 1;
    }
    audit("resample", out_of_range, "timestamp out of range");

    buckets
        .into_iter()
        .map(|((node_id, sensor_path, timestamp), b)| NormalizedObservation {
            timestamp,
            node_id,
            sensor_path,
            value_hrf: b.sum / b.count as f64,
            location: b.location,
        })
        .collect()
}

/// Stateless normalizer parameterized by configuration.
#[derive(Debug, Clone, Copy)]
pub struct Normalizer {
    settings: NormalizeConfig,
    archive_zone: ArchiveTimeZone,
}

impl Default for Normalizer {
    fn default() -> Self {
        Normalizer::new(NormalizeConfig::default(), ArchiveTimeZone::Utc)
    }
}

impl Normalizer {
    pub fn new(settings: NormalizeConfig, archive_zone: ArchiveTimeZone) -> Self {
        Normalizer {
            settings,
            archive_zone,
        }
    }

    /// Normalize live-feed records. The feed reports node vsn; it is re-keyed
    /// to the hardware node id whenever the catalog knows it.
    pub fn normalize_live(
        &self,
        records: Vec<LiveRecord>,
        catalog: &CatalogSnapshot,
    ) -> Vec<NormalizedObservation> {
        // ---
        let total = records.len();
        let mut bad_timestamp = 0usize;
        let mut missing_value = 0usize;
        let mut rows = Vec::with_capacity(total);

        for rec in records {
            let Some(timestamp) = parse_live_timestamp(&rec.timestamp) else {
                bad_timestamp += 1;
                continue;
            };
            let Some(value_hrf) = rec.value.filter(|v| v.is_finite()) else {
                missing_value += 1;
                continue;
            };
            let [lon, lat] = rec.location.geometry.coordinates;
            let node_id = catalog
                .node_id_for_vsn(&rec.node_vsn)
                .map(str::to_string)
                .unwrap_or(rec.node_vsn);

            rows.push(NormalizedObservation {
                timestamp,
                node_id,
                sensor_path: rec.sensor_path,
                value_hrf,
                location: Some(GeoPoint { lat, lon }),
            });
        }
        audit("live", bad_timestamp, "unparseable timestamp");
        audit("live", missing_value, "missing or non-finite value");

        let rows = self.finish(rows);
        tracing::debug!(input = total, output = rows.len(), "normalized live records");
        rows
    }

    /// Normalize archive records: derive `sensor_path`, coerce `value_hrf`,
    /// then resample.
    pub fn normalize_archive(&self, records: Vec<ArchiveRecord>) -> Vec<NormalizedObservation> {
        // ---
        let total = records.len();
        let mut bad_timestamp = 0usize;
        let mut bad_value = 0usize;
        let mut rows = Vec::with_capacity(total);

        for rec in records {
            let Some(timestamp) = parse_timestamp(&rec.timestamp, self.archive_zone) else {
                bad_timestamp += 1;
                continue;
            };
            let value = rec.value_hrf.trim().parse::<f64>().ok().filter(|v| v.is_finite());
            let Some(value_hrf) = value else {
                bad_value += 1;
                continue;
            };

            rows.push(NormalizedObservation {
                timestamp,
                sensor_path: sensor_path(&rec.subsystem, &rec.sensor, &rec.parameter),
                node_id: rec.node_id,
                value_hrf,
                location: None,
            });
        }
        audit("archive", bad_timestamp, "unparseable timestamp");
        audit("archive", bad_value, "non-numeric or non-finite value_hrf");

        let rows = self.finish(rows);
        tracing::debug!(input = total, output = rows.len(), "normalized archive records");
        rows
    }

    /// Shared tail of both paths: geographic rules, then resampling.
    /// Applying it to its own output changes nothing.
    pub fn finish(&self, rows: Vec<NormalizedObservation>) -> Vec<NormalizedObservation> {
        // ---
        let rows = apply_geo_rules(rows, self.settings.min_latitude, "normalize");
        resample(rows, self.settings.resample_interval)
    }
}
