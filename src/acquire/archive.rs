//! Archive bundle acquisition.
//!
//! Bundles are plain tar files named `chicago-complete.daily.<date>.tar` or
//! `chicago-complete.weekly.<start>-to-<end>.tar`, each holding a
//! `<stem>/data.csv.gz` member. A bundle is downloaded into a fresh scratch
//! directory, the one member is extracted and parsed, and the directory is
//! removed when the fetch ends, whichever way it ends.

use std::{
    fmt,
    fs::File,
    io::{self, Read},
    path::{Path, PathBuf},
    str::FromStr,
};

use chrono::NaiveDate;
use flate2::read::GzDecoder;
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::get_checked;
use crate::config::ArchiveConfig;
use crate::error::{FetchError, PipelineError, Result};
use crate::models::ArchiveRecord;

// ---

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Columns the CSV member must provide.
pub const REQUIRED_COLUMNS: &[&str] = &[
    "timestamp",
    "node_id",
    "subsystem",
    "sensor",
    "parameter",
    "value_hrf",
];

/// One downloadable bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveBundle {
    Daily(NaiveDate),
    Weekly { start: NaiveDate, end: NaiveDate },
}

impl ArchiveBundle {
    /// Bundle name without extension; also the member's directory.
    pub fn stem(&self) -> String {
        // ---
        match self {
            ArchiveBundle::Daily(date) => {
                format!("chicago-complete.daily.{}", date.format(DATE_FORMAT))
            }
            ArchiveBundle::Weekly { start, end } => format!(
                "chicago-complete.weekly.{}-to-{}",
                start.format(DATE_FORMAT),
                end.format(DATE_FORMAT)
            ),
        }
    }

    pub fn url(&self, base_url: &str) -> String {
        format!("{}/{}.tar", base_url.trim_end_matches('/'), self.stem())
    }

    pub fn member(&self) -> String {
        format!("{}/data.csv.gz", self.stem())
    }
}

impl fmt::Display for ArchiveBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.stem())
    }
}

/// What an ingestion caller asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveRequest {
    /// `YYYY-MM-DD` or `YYYY-MM-DD-to-YYYY-MM-DD`.
    Bundle(ArchiveBundle),
    /// `YYYY-MM-DD..YYYY-MM-DD`: every daily bundle in the inclusive range.
    DailyRange { start: NaiveDate, end: NaiveDate },
}

fn parse_date(s: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(s.trim(), DATE_FORMAT)
        .map_err(|e| PipelineError::InvalidRequest(format!("bad date '{}': {}", s.trim(), e)))
}

fn ordered(start: NaiveDate, end: NaiveDate) -> Result<(NaiveDate, NaiveDate)> {
    if start > end {
        return Err(PipelineError::InvalidRequest(format!(
            "range start {start} is after end {end}"
        )));
    }
    Ok((start, end))
}

impl FromStr for ArchiveRequest {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        // ---
        let s = s.trim();
        if let Some((a, b)) = s.split_once("..") {
            let (start, end) = ordered(parse_date(a)?, parse_date(b)?)?;
            return Ok(ArchiveRequest::DailyRange { start, end });
        }
        if let Some((a, b)) = s.split_once("-to-") {
            let (start, end) = ordered(parse_date(a)?, parse_date(b)?)?;
            return Ok(ArchiveRequest::Bundle(ArchiveBundle::Weekly { start, end }));
        }
        Ok(ArchiveRequest::Bundle(ArchiveBundle::Daily(parse_date(s)?)))
    }
}

impl ArchiveRequest {
    /// Bundles to ingest, in date order.
    pub fn bundles(&self) -> Vec<ArchiveBundle> {
        // ---
        match *self {
            ArchiveRequest::Bundle(bundle) => vec![bundle],
            ArchiveRequest::DailyRange { start, end } => start
                .iter_days()
                .take_while(|d| *d <= end)
                .map(ArchiveBundle::Daily)
                .collect(),
        }
    }
}

/// Parse the archive CSV member, checking its header first.
pub fn read_archive_csv<R: Read>(reader: R, source_name: &str) -> Result<Vec<ArchiveRecord>> {
    // ---
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_reader(reader);

    let headers = rdr.headers()?.clone();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|col| !headers.iter().any(|h| h == **col))
        .map(|col| col.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(PipelineError::SchemaMismatch {
            source_name: source_name.to_string(),
            missing,
        });
    }

    let records = rdr
        .deserialize()
        .collect::<std::result::Result<Vec<ArchiveRecord>, csv::Error>>()?;
    Ok(records)
}

/// Extract `member` from the tar at `tar_path` into `dest` and parse it.
pub fn read_member(tar_path: &Path, member: &str, dest: &Path) -> Result<Vec<ArchiveRecord>> {
    // ---
    let tar_err = |e: io::Error| PipelineError::parse(format!("tar: {e}"));

    let mut archive = tar::Archive::new(File::open(tar_path)?);
    let mut extracted: Option<PathBuf> = None;

    for entry in archive.entries().map_err(tar_err)? {
        let mut entry = entry.map_err(tar_err)?;
        let path = entry.path().map_err(tar_err)?.into_owned();
        let relative = path.strip_prefix("./").unwrap_or(&path).to_path_buf();
        if relative == Path::new(member) {
            entry.unpack_in(dest).map_err(tar_err)?;
            extracted = Some(dest.join(relative));
            break;
        }
    }

    let Some(csv_path) = extracted else {
        return Err(PipelineError::parse(format!(
            "archive member {member} not found"
        )));
    };
    debug!("Extracted {} to {}", member, csv_path.display());

    read_archive_csv(GzDecoder::new(File::open(&csv_path)?), member)
}

pub struct ArchiveFetcher<'a> {
    client: &'a reqwest::Client,
    config: &'a ArchiveConfig,
}

impl<'a> ArchiveFetcher<'a> {
    pub fn new(client: &'a reqwest::Client, config: &'a ArchiveConfig) -> Self {
        ArchiveFetcher { client, config }
    }

    fn scratch_dir(&self) -> io::Result<TempDir> {
        // ---
        let mut builder = tempfile::Builder::new();
        builder.prefix("aot-archive-");
        match &self.config.scratch_dir {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        }
    }

    /// Download `bundle`, extract its CSV member and parse it.
    pub async fn fetch(&self, bundle: ArchiveBundle) -> Result<Vec<ArchiveRecord>> {
        // ---
        let url = bundle.url(&self.config.base_url);
        info!("Downloading archive bundle: {}", url);

        // Dropping the TempDir removes the tar, the member and its directory
        let scratch = self.scratch_dir()?;
        let tar_path = scratch.path().join("bundle.tar");

        let mut response = get_checked(self.client.get(&url), &url).await?;
        let mut file = tokio::fs::File::create(&tar_path).await?;
        let mut bytes = 0usize;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| FetchError::from_transport(&url, e))?
        {
            file.write_all(&chunk).await?;
            bytes += chunk.len();
        }
        file.flush().await?;
        drop(file);
        debug!("Downloaded {} bytes to {}", bytes, tar_path.display());

        let member = bundle.member();
        let records = tokio::task::spawn_blocking(move || {
            let result = read_member(&tar_path, &member, scratch.path());
            drop(scratch);
            result
        })
        .await
        .map_err(|e| PipelineError::Io(io::Error::new(io::ErrorKind::Other, e)))??;

        info!(bundle = %bundle, records = records.len(), "Parsed archive bundle");
        Ok(records)
    }
}
