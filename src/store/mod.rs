//! Persistent store seam.
//!
//! The pipeline writes through `ObservationStore`; `PgStore` is the real
//! PostgreSQL backend and `MemoryStore` an in-process stand-in with the same
//! append-only, all-or-nothing semantics.
//!
//! Bulk append is the only write path. Nothing here updates or deletes rows.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{LoadableObservation, Node, Sensor};

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

// ---

#[async_trait]
pub trait ObservationStore: Send + Sync {
    /// Every `sensor_path` currently in the Sensor table.
    async fn known_sensor_paths(&self) -> Result<HashSet<String>, StoreError>;

    /// Highest observation id, or 0 for an empty store.
    async fn max_observation_id(&self) -> Result<i64, StoreError>;

    /// Zero-padded vsn → hardware `node_id` for every stored node.
    async fn node_ids_by_vsn(&self) -> Result<HashMap<String, String>, StoreError>;

    /// Append all rows in one transaction. On error nothing is committed.
    async fn append_observations(&self, rows: &[LoadableObservation]) -> Result<u64, StoreError>;

    /// Append the dimension rows in one transaction. Not an upsert: loading
    /// the same catalog twice is a primary-key violation.
    async fn append_catalog(&self, sensors: &[Sensor], nodes: &[Node]) -> Result<(), StoreError>;
}
