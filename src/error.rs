//! Error taxonomy for the ingestion pipeline.
//!
//! Only batch-level failures live here. Row-level data-quality problems (bad
//! coordinates, unparseable values, unknown sensor paths) are filtered and
//! audit-logged by the normalizer and loader, never surfaced as errors.

use thiserror::Error;

/// A remote collaborator could not be reached or refused the request.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request to {url} failed: {source}")]
    Unreachable {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("request to {url} timed out")]
    Timeout { url: String },

    #[error("{url} returned status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },
}

impl FetchError {
    /// Classify a transport error from `reqwest`, separating timeouts.
    pub fn from_transport(url: &str, source: reqwest::Error) -> Self {
        // ---
        if source.is_timeout() {
            FetchError::Timeout {
                url: url.to_string(),
            }
        } else {
            FetchError::Unreachable {
                url: url.to_string(),
                source,
            }
        }
    }
}

/// Store-level failure. Any of these means the batch was rolled back.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("constraint violated: {0}")]
    Constraint(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("schema mismatch in {source_name}: missing {missing:?}")]
    SchemaMismatch {
        source_name: String,
        missing: Vec<String>,
    },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("scratch I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl PipelineError {
    pub fn parse(msg: impl std::fmt::Display) -> Self {
        PipelineError::Parse(msg.to_string())
    }
}

impl From<csv::Error> for PipelineError {
    fn from(e: csv::Error) -> Self {
        PipelineError::Parse(format!("csv: {e}"))
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(e: serde_json::Error) -> Self {
        PipelineError::Parse(format!("json: {e}"))
    }
}

impl From<sqlx::Error> for PipelineError {
    fn from(e: sqlx::Error) -> Self {
        PipelineError::Store(StoreError::Database(e))
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
