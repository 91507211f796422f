//! Pipeline entry points used by the HTTP layer.
//!
//! - `run_ingestion`: archive bundle(s) → normalizer → loader
//! - `query_observations`: live feed → normalizer, nothing stored
//! - `initialize_catalog`: listing + curated mapping → sensor/node tables
//!
//! Ingestion must not run concurrently with itself (see `loader`).

use serde::Serialize;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::acquire::{
    feed_window_start, ArchiveBundle, ArchiveFetcher, ArchiveRequest, FetchSummary, LiveFeed,
};
use crate::catalog::{prepare_catalog, CatalogSnapshot};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::loader::{load_batch, LoadSummary};
use crate::models::NormalizedObservation;
use crate::normalize::Normalizer;
use crate::store::ObservationStore;

// ---

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub bundle: String,
    pub batch_id: Uuid,
    #[serde(flatten)]
    pub summary: LoadSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestionFailure {
    pub bundle: String,
    pub error: String,
}

/// Outcome of `run_ingestion`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestionReport {
    // ---
    pub inserted_count: u64,
    pub batches: Vec<BatchReport>,
    pub errors: Vec<IngestionFailure>,
}

/// Normalized live rows plus a per-sensor account of how fetching went.
#[derive(Debug, Default)]
pub struct LiveQuery {
    // ---
    pub rows: Vec<NormalizedObservation>,
    pub fetches: Vec<FetchSummary>,
}

impl LiveQuery {
    pub fn is_partial(&self) -> bool {
        self.fetches.iter().any(FetchSummary::is_partial)
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct CatalogReport {
    pub sensors_loaded: usize,
    pub nodes_loaded: usize,
}

pub struct Pipeline<'a> {
    client: &'a reqwest::Client,
    config: &'a Config,
    store: &'a dyn ObservationStore,
}

impl<'a> Pipeline<'a> {
    pub fn new(client: &'a reqwest::Client, config: &'a Config, store: &'a dyn ObservationStore) -> Self {
        Pipeline {
            client,
            config,
            store,
        }
    }

    fn normalizer(&self) -> Normalizer {
        Normalizer::new(self.config.normalize, self.config.archive.timestamp_zone)
    }

    /// Fetch, normalize and load a single bundle as one batch.
    pub async fn ingest_bundle(&self, bundle: ArchiveBundle) -> Result<BatchReport> {
        // ---
        let batch_id = Uuid::new_v4();
        let span = info_span!("ingest", %batch_id, bundle = %bundle);

        async move {
            let records = ArchiveFetcher::new(self.client, &self.config.archive)
                .fetch(bundle)
                .await?;
            let normalized = self.normalizer().normalize_archive(records);
            let summary = load_batch(self.store, normalized).await?;
            Ok::<_, PipelineError>(BatchReport {
                bundle: bundle.stem(),
                batch_id,
                summary,
            })
        }
        .instrument(span)
        .await
    }

    /// Ingest a date (`YYYY-MM-DD`), a weekly bundle
    /// (`YYYY-MM-DD-to-YYYY-MM-DD`) or a range of days (`YYYY-MM-DD..YYYY-MM-DD`).
    ///
    /// A single bundle's failure is returned as the error. For a range, each
    /// day is its own batch; failed days are listed in `errors` and the rest
    /// still load.
    pub async fn run_ingestion(&self, date_or_range: &str) -> Result<IngestionReport> {
        // ---
        let request: ArchiveRequest = date_or_range.parse()?;
        let mut report = IngestionReport::default();

        match request {
            ArchiveRequest::Bundle(bundle) => {
                let batch = self.ingest_bundle(bundle).await?;
                report.inserted_count = batch.summary.inserted;
                report.batches.push(batch);
            }
            ArchiveRequest::DailyRange { .. } => {
                for bundle in request.bundles() {
                    match self.ingest_bundle(bundle).await {
                        Ok(batch) => {
                            report.inserted_count += batch.summary.inserted;
                            report.batches.push(batch);
                        }
                        Err(e) => {
                            error!(bundle = %bundle, "Ingestion failed: {}", e);
                            report.errors.push(IngestionFailure {
                                bundle: bundle.stem(),
                                error: e.to_string(),
                            });
                        }
                    }
                }
            }
        }

        info!(
            inserted = report.inserted_count,
            failed = report.errors.len(),
            "Ingestion finished for {}",
            date_or_range
        );
        Ok(report)
    }

    /// Pull the live feed for `measure` over the lookback window and
    /// normalize it. Nothing is written to the store.
    ///
    /// Live rows carry the node's vsn; they are re-keyed to `node_id` through
    /// the nodes file when configured and the stored `node` table otherwise.
    /// If the store cannot be read the rows keep their vsn.
    pub async fn query_observations(
        &self,
        measure: &str,
        lookback_minutes: Option<i64>,
    ) -> Result<LiveQuery> {
        // ---
        let feed = &self.config.feed;
        let mut catalog = CatalogSnapshot::load(&self.config.catalog)?;
        match self.store.node_ids_by_vsn().await {
            Ok(stored) => catalog.merge_nodes(stored),
            Err(e) => warn!("Stored nodes unavailable, live rows keep their vsn: {}", e),
        }
        let since = feed_window_start(
            chrono::Local::now().naive_local(),
            lookback_minutes.unwrap_or(feed.lookback_minutes),
            feed.clock_offset_hours,
        )?;

        let batch = LiveFeed::new(self.client, feed)
            .fetch_measure(&catalog, measure, &since)
            .await?;
        let rows = self.normalizer().normalize_live(batch.records, &catalog);

        Ok(LiveQuery {
            rows,
            fetches: batch.fetches,
        })
    }

    /// One-shot catalog bootstrap. Calling it twice without a reset is a
    /// primary-key violation reported as a store error.
    pub async fn initialize_catalog(&self) -> Result<CatalogReport> {
        // ---
        let (sensors, nodes) =
            prepare_catalog(self.client, &self.config.catalog, &self.config.normalize).await?;
        self.store.append_catalog(&sensors, &nodes).await?;

        let report = CatalogReport {
            sensors_loaded: sensors.len(),
            nodes_loaded: nodes.len(),
        };
        info!(
            sensors = report.sensors_loaded,
            nodes = report.nodes_loaded,
            "Catalog initialized"
        );
        Ok(report)
    }
}
