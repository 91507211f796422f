//! Shared fixtures for the integration tests.
//!
//! A fake upstream is served by axum on an ephemeral port and stands in for
//! the live feed, the tarball host and the listing page. Archive bundles are
//! built in memory with `tar` and `flate2`.
#![allow(dead_code)]

use std::{collections::HashMap, fs, io::Write, path::Path, sync::Arc, time::Duration};

use aot_pipeline::config::{
    ArchiveConfig, ArchiveTimeZone, CatalogConfig, FeedConfig, NormalizeConfig,
};
use aot_pipeline::{acquire, Config, MemoryStore, ObservationStore, Pipeline, Sensor};
use axum::{
    extract::{Path as UrlPath, Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    routing::get,
    Json, Router,
};
use flate2::{write::GzEncoder, Compression};
use serde_json::{json, Value};
use tempfile::TempDir;

// ---

pub const TSYS01: &str = "metsense.tsys01.temperature";
pub const HTU21D: &str = "metsense.htu21d.temperature";
pub const BROKEN: &str = "metsense.broken.humidity";

const SLOW_RESPONSE: Duration = Duration::from_secs(3);
pub const SHORT_TIMEOUT: Duration = Duration::from_millis(200);

pub const ARCHIVE_HEADER: &str = "timestamp,node_id,subsystem,sensor,parameter,value_raw,value_hrf";

const SENSOR_MAPPING: &str = "\
sensor_measure,sensor_path,sensor_type
Temperature,metsense.tsys01.temperature,TSYS01
Temperature,metsense.htu21d.temperature,HTU21D
Humidity,metsense.broken.humidity,BROKEN
,metsense.bmp180.pressure,BMP180
";

const NODES_CSV: &str = "\
node_id,vsn,lat,lon
001e0610ba46,4,41.87,-87.62
";

pub const LISTING: &str = r#"
<html><body>
<h2>Sensors</h2>
<table>
  <tr><th>Subsystem</th><th>Sensor</th><th>Parameter</th><th>HRF Unit</th><th>HRF Minval</th><th>HRF Maxval</th></tr>
  <tr><td>metsense</td><td>tsys01</td><td>temperature</td><td>C</td><td>-40</td><td>125</td></tr>
  <tr><td>metsense</td><td>htu21d</td><td>temperature</td><td>C</td><td>-40</td><td></td></tr>
  <tr><td>metsense</td><td>bmp180</td><td>pressure</td><td>hPa</td><td>300</td><td>1100</td></tr>
  <tr><td>chemsense</td><td>co</td><td>concentration</td><td>ppm</td><td></td><td></td></tr>
</table>
<h2>Nodes</h2>
<table>
  <tr><th>Node ID</th><th>VSN</th><th>Lat</th><th>Lon</th><th>Community Area</th><th>Description</th></tr>
  <tr><td>001e0610ba46</td><td>4</td><td>41.87</td><td>87.62</td><td>Loop</td><td>State St</td></tr>
  <tr><td>001e0610ba8f</td><td>18</td><td>0</td><td>0</td><td></td><td>not deployed</td></tr>
  <tr><td>001e0610bbe5</td><td>23</td><td>41.9</td><td>-87.7</td><td>Humboldt Park</td><td></td></tr>
  <tr><td>001e0610ee33</td><td>40</td><td>38.0</td><td>-90.0</td><td></td><td>St. Louis</td></tr>
</table>
</body></html>
"#;

#[derive(Clone)]
struct UpstreamState {
    base: String,
    bundles: Arc<HashMap<String, Vec<u8>>>,
}

fn create_test_live_record(vsn: &str, path: &str, ts: &str, value: Value, lon: f64, lat: f64) -> Value {
    // ---
    json!({
        "node_vsn": vsn,
        "sensor_path": path,
        "timestamp": ts,
        "value": value,
        "uom": "C",
        "location": {
            "type": "Feature",
            "geometry": { "type": "Point", "coordinates": [lon, lat] }
        }
    })
}

fn live_page(base: &str, sensor: &str, page: u32) -> Option<Value> {
    // ---
    let next = |path: &str| format!("{base}/api/observations?sensor={path}&page=2");
    match (sensor, page) {
        (TSYS01, 1) => Some(json!({
            "data": [
                create_test_live_record("004", TSYS01, "2018-06-03T10:05:00", json!(20.0), 87.62, 41.87),
                create_test_live_record("004", TSYS01, "2018-06-03T10:20:00", json!(22.0), 87.62, 41.87),
            ],
            "meta": { "links": { "next": next(TSYS01) } }
        })),
        (TSYS01, 2) => Some(json!({
            "data": [
                create_test_live_record("099", TSYS01, "2018-06-03T10:40:00", json!("18.5"), -87.7, 41.9),
                create_test_live_record("004", TSYS01, "2018-06-03T10:50:00", json!(19.0), 0.0, 41.9),
            ],
            "meta": { "links": { "next": null } }
        })),
        (HTU21D, 1) => Some(json!({
            "data": [
                create_test_live_record("004", HTU21D, "2018-06-03T10:10:00", json!(30.0), -87.62, 41.87),
            ],
            "meta": { "links": { "next": next(HTU21D) } }
        })),
        _ => None,
    }
}

async fn observations(
    State(state): State<UpstreamState>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    // ---
    let sensor = params.get("sensor").map(String::as_str).unwrap_or_default();
    let page = params
        .get("page")
        .and_then(|p| p.parse().ok())
        .unwrap_or(1);
    match live_page(&state.base, sensor, page) {
        Some(body) => Json(body).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn tarball(State(state): State<UpstreamState>, UrlPath(name): UrlPath<String>) -> Response {
    // ---
    match state.bundles.get(&name) {
        Some(bytes) => (StatusCode::OK, bytes.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn listing() -> Html<&'static str> {
    Html(LISTING)
}

/// Answers long after any test client has given up.
async fn slow() -> StatusCode {
    tokio::time::sleep(SLOW_RESPONSE).await;
    StatusCode::NOT_FOUND
}

/// Serve the fake upstream and return its base URL. `bundles` maps tar file
/// names to their bytes.
pub async fn spawn_upstream(bundles: HashMap<String, Vec<u8>>) -> String {
    // ---
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let state = UpstreamState {
        base: base.clone(),
        bundles: Arc::new(bundles),
    };
    let app = Router::new()
        .route("/api/observations", get(observations))
        .route("/tarballs/{name}", get(tarball))
        .route("/listing", get(listing))
        .route("/slow/{*rest}", get(slow))
        .with_state(state);

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    base
}

/// A tar bundle holding `<stem>/data.csv.gz` with `csv` as its content.
pub fn create_test_bundle(stem: &str, csv: &str) -> (String, Vec<u8>) {
    // ---
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(csv.as_bytes()).unwrap();
    let member = gz.finish().unwrap();

    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(member.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{stem}/data.csv.gz"), member.as_slice())
        .unwrap();

    (format!("{stem}.tar"), builder.into_inner().unwrap())
}

pub struct Fixture {
    // ---
    pub base: String,
    pub config: Config,
    pub client: reqwest::Client,
    pub scratch: TempDir,
    _files: TempDir,
}

impl Fixture {
    pub fn pipeline<'a>(&'a self, store: &'a MemoryStore) -> Pipeline<'a> {
        Pipeline::new(&self.client, &self.config, store)
    }

    /// Route every feed and archive request to the slow endpoint and give the
    /// client a timeout well below its response time.
    pub fn use_slow_upstream(&mut self) {
        // ---
        self.config.feed.api_url = format!("{}/slow/api/observations", self.base);
        self.config.archive.base_url = format!("{}/slow/tarballs", self.base);
        self.config.http_timeout = SHORT_TIMEOUT;
        self.client = acquire::http_client(SHORT_TIMEOUT).unwrap();
    }

    /// True when no fetch has left anything behind in the scratch parent.
    pub fn scratch_is_empty(&self) -> bool {
        fs::read_dir(self.scratch.path()).unwrap().next().is_none()
    }
}

pub fn create_test_config(base: &str, scratch: &Path, files: &Path) -> Config {
    // ---
    Config {
        db_url: "postgres://unused@localhost/aot".to_string(),
        db_pool_max: 1,
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        http_timeout: Duration::from_secs(5),
        feed: FeedConfig {
            api_url: format!("{base}/api/observations"),
            page_size: 2,
            page_limit: 10,
            lookback_minutes: 60,
            clock_offset_hours: 5,
        },
        archive: ArchiveConfig {
            base_url: format!("{base}/tarballs"),
            timestamp_zone: ArchiveTimeZone::Utc,
            scratch_dir: Some(scratch.to_path_buf()),
        },
        catalog: CatalogConfig {
            listing_url: format!("{base}/listing"),
            sensor_mapping_path: files.join("sensor_mapping.csv"),
            nodes_csv_path: Some(files.join("nodes.csv")),
        },
        normalize: NormalizeConfig::default(),
    }
}

pub async fn create_test_fixture(bundles: Vec<(String, Vec<u8>)>) -> Fixture {
    // ---
    let base = spawn_upstream(bundles.into_iter().collect()).await;
    let scratch = TempDir::new().unwrap();
    let files = TempDir::new().unwrap();
    fs::write(files.path().join("sensor_mapping.csv"), SENSOR_MAPPING).unwrap();
    fs::write(files.path().join("nodes.csv"), NODES_CSV).unwrap();

    Fixture {
        config: create_test_config(&base, scratch.path(), files.path()),
        base,
        client: acquire::http_client(Duration::from_secs(5)).unwrap(),
        scratch,
        _files: files,
    }
}

/// A memory store whose sensor table already holds `paths`.
pub async fn create_test_store(paths: &[&str]) -> MemoryStore {
    // ---
    let store = MemoryStore::new();
    let sensors: Vec<Sensor> = paths
        .iter()
        .map(|p| Sensor {
            sensor_path: p.to_string(),
            sensor_type: None,
            sensor_measure: "Temperature".to_string(),
            hrf_unit: Some("C".to_string()),
            hrf_minval: None,
            hrf_maxval: None,
        })
        .collect();
    store.append_catalog(&sensors, &[]).await.unwrap();
    store
}
