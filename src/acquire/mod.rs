//! Raw feed acquisition.
//!
//! Two independent retrieval modes produce raw, unnormalized records:
//! - `live`: the paginated observations API, filtered by sensor path and time
//! - `archive`: daily/weekly tar bundles holding one gzip-compressed CSV
//!
//! Both modes share the HTTP client built here. Every request carries an
//! explicit timeout; expiry surfaces as `FetchError::Timeout`.

use std::time::Duration;

use crate::error::FetchError;

pub mod archive;
pub mod live;

pub use archive::{ArchiveBundle, ArchiveFetcher, ArchiveRequest};
pub use live::{feed_window_start, FetchSummary, LiveBatch, LiveFeed, PageOutcome, Pages};

// ---

/// Build the outbound HTTP client with a request timeout.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    // ---
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("aot-pipeline/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Send a GET request and reject non-success statuses.
pub(crate) async fn get_checked(
    request: reqwest::RequestBuilder,
    url: &str,
) -> Result<reqwest::Response, FetchError> {
    // ---
    let response = request
        .send()
        .await
        .map_err(|e| FetchError::from_transport(url, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::Status {
            url: url.to_string(),
            status,
        });
    }
    Ok(response)
}

/// Fetch a page as text (used for the catalog listing).
pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String, FetchError> {
    // ---
    tracing::debug!("Fetching {}", url);
    let response = get_checked(client.get(url), url).await?;
    response
        .text()
        .await
        .map_err(|e| FetchError::from_transport(url, e))
}
