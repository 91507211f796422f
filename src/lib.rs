//! Ingestion pipeline for Chicago Array of Things sensor readings.
//!
//! Raw readings are pulled from the live paginated feed or from daily/weekly
//! archive bundles, normalized (coordinate correction, filtering, 30-minute
//! resampling), stamped with contiguous surrogate ids and bulk-appended to
//! PostgreSQL. A small catalog of sensors and nodes is seeded once from the
//! public listing and a curated mapping file.
//!
//! Module layout follows the Explicit Module Boundary Pattern (EMBP): each
//! module exposes a narrow surface, re-exported here for the binary and tests.

pub mod acquire;
pub mod catalog;
pub mod config;
pub mod error;
pub mod loader;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod store;

pub use catalog::CatalogSnapshot;
pub use config::Config;
pub use error::{FetchError, PipelineError, StoreError};
pub use models::{
    ArchiveRecord, GeoPoint, LiveRecord, LoadableObservation, Node, NormalizedObservation,
    ObservationView, Sensor, SensorMapping, StoredObservation,
};
pub use normalize::Normalizer;
pub use pipeline::{CatalogReport, IngestionReport, LiveQuery, Pipeline};
pub use store::{MemoryStore, ObservationStore, PgStore};
