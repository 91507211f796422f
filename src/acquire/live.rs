//! Live observations feed.
//!
//! A `sensor_measure` is resolved to its sensor paths through the catalog
//! snapshot; each path is queried with `size`, `sensor` and `timestamp=ge:`
//! filters and pages are followed through `meta.links.next` until the feed
//! runs out, the page limit is hit, or a transport error aborts iteration.

use chrono::{Duration, NaiveDateTime};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::get_checked;
use crate::catalog::CatalogSnapshot;
use crate::config::FeedConfig;
use crate::error::{FetchError, PipelineError, Result};
use crate::models::LiveRecord;

// ---

/// How page iteration for one sensor path ended.
#[derive(Debug)]
pub enum PageOutcome {
    /// The feed reported no further pages.
    Completed,
    /// More pages existed but the configured page limit was reached.
    PageLimitReached,
    /// A transport error after at least one page; the collected pages are kept.
    Aborted(FetchError),
}

/// Records collected for one sensor path, plus how collection ended.
#[derive(Debug)]
pub struct Pages<T> {
    // ---
    pub records: Vec<T>,
    pub pages: u32,
    pub outcome: PageOutcome,
}

/// Serializable per-path account of a live fetch.
#[derive(Debug, Clone, Serialize)]
pub struct FetchSummary {
    // ---
    pub sensor_path: String,
    pub pages: u32,
    pub records: usize,
    pub status: &'static str,
    pub error: Option<String>,
}

impl FetchSummary {
    fn new<T>(sensor_path: &str, pages: &Pages<T>) -> Self {
        // ---
        let (status, error) = match &pages.outcome {
            PageOutcome::Completed => ("completed", None),
            PageOutcome::PageLimitReached => ("page_limit_reached", None),
            PageOutcome::Aborted(e) => ("aborted", Some(e.to_string())),
        };
        FetchSummary {
            sensor_path: sensor_path.to_string(),
            pages: pages.pages,
            records: pages.records.len(),
            status,
            error,
        }
    }

    pub fn is_partial(&self) -> bool {
        self.error.is_some()
    }
}

/// Raw records for a measure, concatenated across its sensor paths.
#[derive(Debug, Default)]
pub struct LiveBatch {
    // ---
    pub records: Vec<LiveRecord>,
    pub fetches: Vec<FetchSummary>,
}

/// Lower bound for the feed's `timestamp` filter.
///
/// The feed's clock is UTC while `now_local` is local civil time; the gap is
/// bridged with a fixed `clock_offset_hours`. With the historical default of
/// 5 this is correct for Central Standard Time only and an hour off during
/// daylight saving.
///
/// A lookback or offset that leaves the representable date range is an
/// `InvalidRequest`.
pub fn feed_window_start(
    now_local: NaiveDateTime,
    lookback_minutes: i64,
    clock_offset_hours: i64,
) -> Result<String> {
    // ---
    let out_of_range = || {
        PipelineError::InvalidRequest(format!(
            "lookback of {lookback_minutes} minutes (offset {clock_offset_hours} h) is out of range"
        ))
    };
    let lookback = Duration::try_minutes(lookback_minutes).ok_or_else(out_of_range)?;
    let offset = Duration::try_hours(clock_offset_hours).ok_or_else(out_of_range)?;
    let start = now_local
        .checked_sub_signed(lookback)
        .and_then(|t| t.checked_add_signed(offset))
        .ok_or_else(out_of_range)?;
    Ok(start.format("%Y-%m-%dT%H:%M:%S").to_string())
}

/// Split one page body into its records and the next-page link.
pub fn parse_page(body: &[u8]) -> Result<(Vec<LiveRecord>, Option<String>)> {
    // ---
    let page: serde_json::Value = serde_json::from_slice(body)?;

    let data = page
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| PipelineError::SchemaMismatch {
            source_name: "live feed page".to_string(),
            missing: vec!["data".to_string()],
        })?;

    let records = data
        .iter()
        .map(|item| serde_json::from_value::<LiveRecord>(item.clone()))
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let next = page
        .pointer("/meta/links/next")
        .and_then(|n| n.as_str())
        .filter(|n| !n.is_empty())
        .map(String::from);

    Ok((records, next))
}

pub struct LiveFeed<'a> {
    client: &'a reqwest::Client,
    config: &'a FeedConfig,
}

impl<'a> LiveFeed<'a> {
    pub fn new(client: &'a reqwest::Client, config: &'a FeedConfig) -> Self {
        LiveFeed { client, config }
    }

    /// Fetch pages for one sensor path.
    ///
    /// A transport failure before the first page is an error. After that the
    /// pages already collected are returned with `PageOutcome::Aborted`.
    /// Malformed page bodies are always errors.
    pub async fn fetch_sensor(&self, sensor_path: &str, since: &str) -> Result<Pages<LiveRecord>> {
        // ---
        let page_limit = self.config.page_limit.max(1);
        let mut url = self.config.api_url.clone();
        let mut filters = Some([
            ("size", self.config.page_size.to_string()),
            ("sensor", sensor_path.to_string()),
            ("timestamp", format!("ge:{since}")),
        ]);
        let mut records = Vec::new();
        let mut pages = 0u32;

        loop {
            let mut request = self.client.get(&url);
            if let Some(filters) = filters.take() {
                request = request.query(&filters);
            }

            debug!("Fetching page {} for {} from: {}", pages + 1, sensor_path, url);

            let fetched = match get_checked(request, &url).await {
                Ok(response) => response
                    .bytes()
                    .await
                    .map_err(|e| FetchError::from_transport(&url, e)),
                Err(e) => Err(e),
            };

            let body = match fetched {
                Ok(body) => body,
                Err(e) if pages == 0 => return Err(e.into()),
                Err(e) => {
                    warn!(
                        sensor_path,
                        pages,
                        records = records.len(),
                        "Pagination aborted, keeping collected pages: {}",
                        e
                    );
                    return Ok(Pages {
                        records,
                        pages,
                        outcome: PageOutcome::Aborted(e),
                    });
                }
            };

            let (batch, next) = parse_page(&body)?;
            pages += 1;
            debug!("Page {} returned {} records", pages, batch.len());
            records.extend(batch);

            match next {
                None => {
                    return Ok(Pages {
                        records,
                        pages,
                        outcome: PageOutcome::Completed,
                    })
                }
                Some(_) if pages >= page_limit => {
                    info!(sensor_path, page_limit, "Hit page limit, stopping pagination");
                    return Ok(Pages {
                        records,
                        pages,
                        outcome: PageOutcome::PageLimitReached,
                    });
                }
                Some(next_url) => url = next_url,
            }
        }
    }

    /// Fetch every sensor path mapped to `measure` and concatenate the results.
    /// An unknown measure yields an empty batch.
    pub async fn fetch_measure(
        &self,
        catalog: &CatalogSnapshot,
        measure: &str,
        since: &str,
    ) -> Result<LiveBatch> {
        // ---
        let paths = catalog.sensor_paths_for(measure);
        if paths.is_empty() {
            info!(measure, "No sensor paths mapped to measure");
            return Ok(LiveBatch::default());
        }

        let mut batch = LiveBatch::default();
        for path in &paths {
            let pages = self.fetch_sensor(path, since).await?;
            batch.fetches.push(FetchSummary::new(path, &pages));
            batch.records.extend(pages.records);
        }

        info!(
            measure,
            sensors = paths.len(),
            records = batch.records.len(),
            "Finished live fetch"
        );
        Ok(batch)
    }
}
