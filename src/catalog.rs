//! Sensor and node catalog.
//!
//! The catalog has two faces:
//! - `CatalogSnapshot`: the curated sensor mapping (plus the vsn → node id
//!   index) read from local files on demand and passed explicitly into the
//!   acquirer and normalizer
//! - `prepare_catalog`: the one-shot bootstrap that scrapes the public listing,
//!   joins it against the curated mapping and produces `Sensor`/`Node` rows
//!
//! Listing tables are located by their header columns rather than their
//! position on the page.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fs::File,
    io::Read,
};

use csv::StringRecord;
use scraper::{ElementRef, Html, Selector};
use serde::{de::DeserializeOwned, Deserialize};
use tracing::{debug, info};

use crate::acquire::fetch_text;
use crate::config::{CatalogConfig, NormalizeConfig};
use crate::error::{PipelineError, Result};
use crate::models::{empty_as_none, sensor_path, Node, Sensor, SensorMapping};
use crate::normalize::apply_geo_rules;

// ---

pub const SENSOR_TABLE_COLUMNS: &[&str] = &["subsystem", "sensor", "parameter", "hrf_unit"];
pub const NODE_TABLE_COLUMNS: &[&str] = &["node_id", "vsn", "lat", "lon"];

/// Read-only view of the curated mapping used by live queries.
#[derive(Debug, Clone, Default)]
pub struct CatalogSnapshot {
    mappings: Vec<SensorMapping>,
    nodes_by_vsn: HashMap<String, String>,
}

impl CatalogSnapshot {
    pub fn new(mappings: Vec<SensorMapping>, nodes_by_vsn: HashMap<String, String>) -> Self {
        CatalogSnapshot {
            mappings,
            nodes_by_vsn,
        }
    }

    /// Load the snapshot from the configured files.
    pub fn load(config: &CatalogConfig) -> Result<Self> {
        // ---
        let mappings = read_mappings(File::open(&config.sensor_mapping_path)?)?;
        let nodes_by_vsn = match &config.nodes_csv_path {
            Some(path) => read_node_rows(File::open(path)?)?
                .into_iter()
                .map(|row| (pad_vsn(&row.vsn), row.node_id))
                .collect(),
            None => HashMap::new(),
        };
        debug!(
            mappings = mappings.len(),
            nodes = nodes_by_vsn.len(),
            "Loaded catalog snapshot"
        );
        Ok(CatalogSnapshot::new(mappings, nodes_by_vsn))
    }

    /// Add vsn → node id entries (typically the stored `node` table) without
    /// overriding ones already loaded from the nodes file.
    pub fn merge_nodes(&mut self, nodes_by_vsn: HashMap<String, String>) {
        // ---
        for (vsn, node_id) in nodes_by_vsn {
            self.nodes_by_vsn.entry(pad_vsn(&vsn)).or_insert(node_id);
        }
    }

    /// Distinct sensor paths mapped to `measure`, in file order.
    pub fn sensor_paths_for(&self, measure: &str) -> Vec<String> {
        // ---
        let mut seen = HashSet::new();
        self.mappings
            .iter()
            .filter(|m| m.sensor_measure.as_deref() == Some(measure))
            .filter(|m| seen.insert(m.sensor_path.as_str()))
            .map(|m| m.sensor_path.clone())
            .collect()
    }

    pub fn node_id_for_vsn(&self, vsn: &str) -> Option<&str> {
        self.nodes_by_vsn.get(&pad_vsn(vsn)).map(String::as_str)
    }

    /// Measures grouped by sensor type, for dashboard selectors.
    pub fn sensor_types(&self) -> BTreeMap<String, Vec<String>> {
        // ---
        let mut types: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for m in &self.mappings {
            if let (Some(kind), Some(measure)) = (&m.sensor_type, &m.sensor_measure) {
                let measures = types.entry(kind.clone()).or_default();
                if !measures.contains(measure) {
                    measures.push(measure.clone());
                }
            }
        }
        types
    }
}

/// Zero-pad a version serial to three characters.
pub fn pad_vsn(vsn: &str) -> String {
    format!("{:0>3}", vsn.trim())
}

pub fn read_mappings<R: Read>(reader: R) -> Result<Vec<SensorMapping>> {
    // ---
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let rows = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<SensorMapping>, csv::Error>>()?;
    Ok(rows)
}

/// Sensor row of the public listing.
#[derive(Debug, Clone, Deserialize)]
pub struct ListedSensor {
    // ---
    pub subsystem: String,
    pub sensor: String,
    pub parameter: String,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub hrf_unit: Option<String>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub hrf_minval: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub hrf_maxval: Option<f64>,
}

impl ListedSensor {
    pub fn sensor_path(&self) -> String {
        sensor_path(self.subsystem.trim(), self.sensor.trim(), self.parameter.trim())
    }
}

/// Node row, from either the bundled file or the listing.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeRow {
    // ---
    pub node_id: String,
    pub vsn: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lat: Option<f64>,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub lon: Option<f64>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub community_area: Option<String>,
    #[serde(default, deserialize_with = "empty_as_none")]
    pub description: Option<String>,
}

pub fn read_node_rows<R: Read>(reader: R) -> Result<Vec<NodeRow>> {
    // ---
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);
    let rows = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<NodeRow>, csv::Error>>()?;
    Ok(rows)
}

/// An HTML table flattened to a header record and data records.
#[derive(Debug, Clone)]
pub struct HtmlTable {
    pub headers: StringRecord,
    pub rows: Vec<StringRecord>,
}

impl HtmlTable {
    pub fn has_columns(&self, required: &[&str]) -> bool {
        required.iter().all(|c| self.headers.iter().any(|h| h == *c))
    }

    /// Deserialize rows by header name. Rows whose width differs from the
    /// header are skipped.
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<Vec<T>> {
        // ---
        let width = self.headers.len();
        let mut out = Vec::with_capacity(self.rows.len());
        let mut ragged = 0usize;
        for row in &self.rows {
            if row.len() != width {
                ragged += 1;
                continue;
            }
            out.push(row.deserialize::<T>(Some(&self.headers))?);
        }
        if ragged > 0 {
            info!(removed = ragged, reason = "ragged table row", "removed {} listing rows", ragged);
        }
        Ok(out)
    }
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| PipelineError::parse(format!("selector {css}: {e:?}")))
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text().collect::<String>().trim().to_string()
}

fn header_key(text: &str) -> String {
    text.trim().to_ascii_lowercase().replace(' ', "_")
}

/// Parse every `<table>` in `html`. The first row made of `<th>` cells is
/// the header; rows of `<td>` cells are data.
pub fn parse_tables(html: &str) -> Result<Vec<HtmlTable>> {
    // ---
    let document = Html::parse_document(html);
    let table_sel = selector("table")?;
    let row_sel = selector("tr")?;
    let th_sel = selector("th")?;
    let td_sel = selector("td")?;

    let mut tables = Vec::new();
    for table in document.select(&table_sel) {
        let mut headers: Option<StringRecord> = None;
        let mut rows = Vec::new();
        for tr in table.select(&row_sel) {
            let th: Vec<String> = tr.select(&th_sel).map(|c| header_key(&cell_text(c))).collect();
            if headers.is_none() && !th.is_empty() {
                headers = Some(StringRecord::from(th));
                continue;
            }
            let td: Vec<String> = tr.select(&td_sel).map(cell_text).collect();
            if !td.is_empty() {
                rows.push(StringRecord::from(td));
            }
        }
        if let Some(headers) = headers {
            tables.push(HtmlTable { headers, rows });
        }
    }
    Ok(tables)
}

/// Locate the first table carrying all `required` header columns.
pub fn find_table<'t>(tables: &'t [HtmlTable], required: &[&str], name: &str) -> Result<&'t HtmlTable> {
    // ---
    tables
        .iter()
        .find(|t| t.has_columns(required))
        .ok_or_else(|| PipelineError::SchemaMismatch {
            source_name: format!("{name} listing table"),
            missing: required.iter().map(|c| c.to_string()).collect(),
        })
}

/// Inner-join listed sensors with curated mappings on `sensor_path`, keeping
/// only mappings with a `sensor_measure`.
pub fn join_sensors(listed: Vec<ListedSensor>, mappings: &[SensorMapping]) -> Vec<Sensor> {
    // ---
    let mut curated: HashMap<&str, &SensorMapping> = HashMap::new();
    for m in mappings.iter().filter(|m| m.sensor_measure.is_some()) {
        curated.entry(m.sensor_path.as_str()).or_insert(m);
    }

    let total = listed.len();
    let mut seen = HashSet::new();
    let mut duplicates = 0usize;
    let mut sensors = Vec::new();

    for item in listed {
        let path = item.sensor_path();
        let Some(mapping) = curated.get(path.as_str()) else {
            continue;
        };
        let Some(measure) = mapping.sensor_measure.clone() else {
            continue;
        };
        if !seen.insert(path.clone()) {
            duplicates += 1;
            continue;
        }
        sensors.push(Sensor {
            sensor_path: path,
            sensor_type: mapping.sensor_type.clone(),
            sensor_measure: measure,
            hrf_unit: item.hrf_unit,
            hrf_minval: item.hrf_minval,
            hrf_maxval: item.hrf_maxval,
        });
    }

    let unmapped = total - sensors.len() - duplicates;
    if unmapped > 0 {
        info!(removed = unmapped, reason = "no curated measure", "removed {} listed sensors", unmapped);
    }
    if duplicates > 0 {
        info!(removed = duplicates, reason = "duplicate sensor_path", "removed {} listed sensors", duplicates);
    }
    sensors
}

/// Turn node rows into `Node`s: pad vsn, drop rows without coordinates or
/// with a repeated id, and apply the same region rules as observations.
pub fn prepare_nodes(rows: Vec<NodeRow>, min_latitude: f64) -> Vec<Node> {
    // ---
    let total = rows.len();
    let mut seen = HashSet::new();
    let mut nodes = Vec::with_capacity(total);

    for row in rows {
        let (Some(lat), Some(lon)) = (row.lat, row.lon) else {
            continue;
        };
        let node_id = row.node_id.trim().to_string();
        if !seen.insert(node_id.clone()) {
            continue;
        }
        nodes.push(Node {
            node_id,
            vsn: pad_vsn(&row.vsn),
            lat,
            lon,
            community_area: row.community_area,
            description: row.description,
        });
    }
    let removed = total - nodes.len();
    if removed > 0 {
        info!(removed, reason = "missing coordinates or duplicate node_id", "removed {} node rows", removed);
    }

    apply_geo_rules(nodes, min_latitude, "catalog")
}

/// Scrape the listing and build the dimension rows to seed the store.
pub async fn prepare_catalog(
    client: &reqwest::Client,
    config: &CatalogConfig,
    normalize: &NormalizeConfig,
) -> Result<(Vec<Sensor>, Vec<Node>)> {
    // ---
    let html = fetch_text(client, &config.listing_url).await?;
    let tables = parse_tables(&html)?;
    debug!("Listing page has {} tables", tables.len());

    let listed: Vec<ListedSensor> =
        find_table(&tables, SENSOR_TABLE_COLUMNS, "sensor")?.deserialize()?;
    let mappings = read_mappings(File::open(&config.sensor_mapping_path)?)?;
    let sensors = join_sensors(listed, &mappings);

    let node_rows = match &config.nodes_csv_path {
        Some(path) => read_node_rows(File::open(path)?)?,
        None => find_table(&tables, NODE_TABLE_COLUMNS, "node")?.deserialize()?,
    };
    let nodes = prepare_nodes(node_rows, normalize.min_latitude);

    info!(sensors = sensors.len(), nodes = nodes.len(), "Prepared catalog");
    Ok((sensors, nodes))
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    const LISTING: &str = r#"
        <html><body>
        <table class="table"><tr><th>Name</th><th>Size</th></tr>
            <tr><td>data.csv.gz</td><td>1 GB</td></tr></table>
        <table class="table">
          <thead><tr><th>node_id</th><th>project_id</th><th>vsn</th><th>address</th>
                     <th>lat</th><th>lon</th><th>description</th></tr></thead>
          <tbody>
            <tr><td>001e0610ba46</td><td>AoT_Chicago</td><td>4</td><td>State St</td>
                <td>41.87</td><td>87.62</td><td>AoT Chicago (S)</td></tr>
            <tr><td>001e0610ba3b</td><td>AoT_Chicago</td><td>01F</td><td>Lake St</td>
                <td>0</td><td>0</td><td></td></tr>
          </tbody>
        </table>
        <table class="table">
          <thead><tr><th>ontology</th><th>subsystem</th><th>sensor</th><th>parameter</th>
                     <th>hrf_unit</th><th>hrf_minval</th><th>hrf_maxval</th><th>datasheet</th></tr></thead>
          <tbody>
            <tr><td>/sensing/meteorology/temperature</td><td>metsense</td><td>tsys01</td>
                <td>temperature</td><td>C</td><td>-40</td><td>125</td><td>x.pdf</td></tr>
            <tr><td>/sensing/meteorology/humidity</td><td>metsense</td><td>htu21d</td>
                <td>humidity</td><td>RH</td><td>0</td><td>100</td><td>y.pdf</td></tr>
            <tr><td>/system/other</td><td>wagman</td><td>wagman</td>
                <td>uptime</td><td>s</td><td>-</td><td></td><td></td></tr>
          </tbody>
        </table>
        </body></html>"#;

    fn create_test_mappings() -> Vec<SensorMapping> {
        // ---
        let data = "sensor_measure,sensor_path,sensor_type\n\
                    Temperature,metsense.tsys01.temperature,Environmental\n\
                    ,metsense.htu21d.humidity,Environmental\n\
                    Temperature,metsense.htu21d.temperature,Environmental\n\
                    Uptime,wagman.wagman.uptime,System\n\
                    Temperature,metsense.tsys01.temperature,Environmental\n";
        read_mappings(data.as_bytes()).unwrap()
    }

    #[test]
    fn test_tables_found_by_header() {
        // ---
        let tables = parse_tables(LISTING).unwrap();
        assert_eq!(tables.len(), 3);

        let sensors = find_table(&tables, SENSOR_TABLE_COLUMNS, "sensor").unwrap();
        assert_eq!(sensors.rows.len(), 3);
        let nodes = find_table(&tables, NODE_TABLE_COLUMNS, "node").unwrap();
        assert_eq!(nodes.rows.len(), 2);

        let err = find_table(&tables, &["caption_that_is_absent"], "other").unwrap_err();
        assert!(matches!(err, PipelineError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_join_drops_unmapped_and_null_measures() {
        // ---
        let tables = parse_tables(LISTING).unwrap();
        let listed: Vec<ListedSensor> = find_table(&tables, SENSOR_TABLE_COLUMNS, "sensor")
            .unwrap()
            .deserialize()
            .unwrap();
        let sensors = join_sensors(listed, &create_test_mappings());

        let paths: Vec<&str> = sensors.iter().map(|s| s.sensor_path.as_str()).collect();
        assert_eq!(paths, vec!["metsense.tsys01.temperature", "wagman.wagman.uptime"]);

        assert_eq!(sensors[0].sensor_measure, "Temperature");
        assert_eq!(sensors[0].hrf_unit.as_deref(), Some("C"));
        assert_eq!(sensors[0].hrf_minval, Some(-40.0));
        assert_eq!(sensors[1].hrf_minval, None);
        assert_eq!(sensors[1].hrf_maxval, None);
    }

    #[test]
    fn test_null_measure_never_produces_sensor() {
        // ---
        let listed = vec![ListedSensor {
            subsystem: "metsense".to_string(),
            sensor: "htu21d".to_string(),
            parameter: "humidity".to_string(),
            hrf_unit: None,
            hrf_minval: None,
            hrf_maxval: None,
        }];
        assert!(join_sensors(listed, &create_test_mappings()).is_empty());
    }

    #[test]
    fn test_nodes_from_listing() {
        // ---
        let tables = parse_tables(LISTING).unwrap();
        let rows: Vec<NodeRow> = find_table(&tables, NODE_TABLE_COLUMNS, "node")
            .unwrap()
            .deserialize()
            .unwrap();
        let nodes = prepare_nodes(rows, 40.0);

        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].node_id, "001e0610ba46");
        assert_eq!(nodes[0].vsn, "004");
        assert_eq!(nodes[0].lon, -87.62);
        assert_eq!(nodes[0].description.as_deref(), Some("AoT Chicago (S)"));
    }

    #[test]
    fn test_nodes_from_csv() {
        // ---
        let data = "node_id,project_id,vsn,address,lat,lon,description,start_timestamp,end_timestamp\n\
                    001e0610ba46,AoT_Chicago,4,State St,41.87,-87.62,S,2017/09/08 00:00:00,\n\
                    001e0610ba47,AoT_Chicago,5,Lake St,,,,2017/09/08 00:00:00,\n\
                    001e0610ba46,AoT_Chicago,4,State St,41.87,-87.62,dup,2017/09/08 00:00:00,\n";
        let nodes = prepare_nodes(read_node_rows(data.as_bytes()).unwrap(), 40.0);
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].community_area, None);
        assert_eq!(nodes[0].description.as_deref(), Some("S"));
    }

    #[test]
    fn test_snapshot_queries() {
        // ---
        let snapshot = CatalogSnapshot::new(
            create_test_mappings(),
            [("004".to_string(), "001e0610ba46".to_string())].into_iter().collect(),
        );

        assert_eq!(
            snapshot.sensor_paths_for("Temperature"),
            vec!["metsense.tsys01.temperature", "metsense.htu21d.temperature"]
        );
        assert!(snapshot.sensor_paths_for("Ozone").is_empty());
        assert_eq!(snapshot.node_id_for_vsn("4"), Some("001e0610ba46"));
        assert_eq!(snapshot.node_id_for_vsn("005"), None);

        let mut merged = snapshot.clone();
        merged.merge_nodes(
            [
                ("4".to_string(), "ignored".to_string()),
                ("5".to_string(), "001e0610ba47".to_string()),
            ]
            .into_iter()
            .collect(),
        );
        assert_eq!(merged.node_id_for_vsn("004"), Some("001e0610ba46"));
        assert_eq!(merged.node_id_for_vsn("5"), Some("001e0610ba47"));

        let types = snapshot.sensor_types();
        assert_eq!(types["Environmental"], vec!["Temperature"]);
        assert_eq!(types["System"], vec!["Uptime"]);
    }
}
