//! In-process store.
//!
//! Enforces the same keys as the PostgreSQL schema (observation id, the
//! `(timestamp, node_id, sensor_path)` business key, sensor and node primary
//! keys) and commits a batch only when every row passes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::ObservationStore;
use crate::catalog::pad_vsn;
use crate::error::StoreError;
use crate::models::{LoadableObservation, Node, Sensor};

// ---

#[derive(Debug, Default)]
struct Tables {
    sensors: BTreeMap<String, Sensor>,
    nodes: BTreeMap<String, Node>,
    observations: Vec<LoadableObservation>,
    ids: HashSet<i64>,
    business_keys: HashSet<(DateTime<Utc>, String, String)>,
    unavailable: bool,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Tables>, StoreError> {
        // ---
        let tables = self
            .tables
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store poisoned".to_string()))?;
        if tables.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(tables)
    }

    /// Simulate losing the connection; every call fails until restored.
    pub fn set_unavailable(&self, unavailable: bool) {
        if let Ok(mut tables) = self.tables.lock() {
            tables.unavailable = unavailable;
        }
    }

    pub fn observations(&self) -> Vec<LoadableObservation> {
        self.tables
            .lock()
            .map(|t| t.observations.clone())
            .unwrap_or_default()
    }

    pub fn sensors(&self) -> Vec<Sensor> {
        self.tables
            .lock()
            .map(|t| t.sensors.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn nodes(&self) -> Vec<Node> {
        self.tables
            .lock()
            .map(|t| t.nodes.values().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ObservationStore for MemoryStore {
    async fn known_sensor_paths(&self) -> Result<HashSet<String>, StoreError> {
        Ok(self.lock()?.sensors.keys().cloned().collect())
    }

    async fn max_observation_id(&self) -> Result<i64, StoreError> {
        Ok(self.lock()?.ids.iter().copied().max().unwrap_or(0))
    }

    async fn node_ids_by_vsn(&self) -> Result<HashMap<String, String>, StoreError> {
        // ---
        Ok(self
            .lock()?
            .nodes
            .values()
            .map(|n| (pad_vsn(&n.vsn), n.node_id.clone()))
            .collect())
    }

    async fn append_observations(&self, rows: &[LoadableObservation]) -> Result<u64, StoreError> {
        // ---
        let mut tables = self.lock()?;

        // Validate the whole batch before touching the tables
        let mut ids = HashSet::new();
        let mut keys = HashSet::new();
        for row in rows {
            if tables.ids.contains(&row.id) || !ids.insert(row.id) {
                return Err(StoreError::Constraint(format!("duplicate id {}", row.id)));
            }
            if !tables.sensors.contains_key(&row.sensor_path) {
                return Err(StoreError::Constraint(format!(
                    "unknown sensor_path {}",
                    row.sensor_path
                )));
            }
            let key = (row.timestamp, row.node_id.clone(), row.sensor_path.clone());
            if tables.business_keys.contains(&key) || !keys.insert(key.clone()) {
                return Err(StoreError::Constraint(format!(
                    "duplicate observation ({}, {}, {})",
                    key.0, key.1, key.2
                )));
            }
        }

        tables.ids.extend(ids);
        tables.business_keys.extend(keys);
        tables.observations.extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn append_catalog(&self, sensors: &[Sensor], nodes: &[Node]) -> Result<(), StoreError> {
        // ---
        let mut tables = self.lock()?;

        let mut paths = HashSet::new();
        for s in sensors {
            if tables.sensors.contains_key(&s.sensor_path) || !paths.insert(&s.sensor_path) {
                return Err(StoreError::Constraint(format!(
                    "duplicate sensor {}",
                    s.sensor_path
                )));
            }
        }
        let mut node_ids = HashSet::new();
        for n in nodes {
            if tables.nodes.contains_key(&n.node_id) || !node_ids.insert(&n.node_id) {
                return Err(StoreError::Constraint(format!("duplicate node {}", n.node_id)));
            }
        }

        for s in sensors {
            tables.sensors.insert(s.sensor_path.clone(), s.clone());
        }
        for n in nodes {
            tables.nodes.insert(n.node_id.clone(), n.clone());
        }
        Ok(())
    }
}
