//! Configuration loader for the `aot-pipeline` service.
//!
//! This module centralizes all runtime configuration values and their defaults,
//! loading from environment variables (with optional `.env` file support
//! provided by the caller). By consolidating configuration logic here, we
//! avoid scattering `env::var` calls throughout the codebase.
//!
use std::{env, net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use anyhow::{anyhow, Result};

/// Parse an optional environment variable with a default value.
macro_rules! parse_env {
    ($var_name:expr, $ty:ty, $default:expr) => {
        env::var($var_name)
            .ok()
            .map(|v| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| anyhow!("Invalid {}: {}", $var_name, e))?
            .unwrap_or($default)
    };
}

/// Parse a required string environment variable.
macro_rules! require_env {
    ($var_name:expr) => {
        env::var($var_name)
            .map_err(|_| anyhow!("{} must be set in .env or environment", $var_name))?
    };
}

/// Read an optional string environment variable with a default value.
macro_rules! string_env {
    ($var_name:expr, $default:expr) => {
        env::var($var_name).unwrap_or_else(|_| $default.to_string())
    };
}

pub const DEFAULT_API_URL: &str = "https://api.arrayofthings.org/api/observations";
pub const DEFAULT_ARCHIVE_BASE_URL: &str = "https://s3.amazonaws.com/aot-tarballs";
pub const DEFAULT_LISTING_URL: &str = "https://aot-file-browser.plenar.io/data-sets/chicago-complete";

/// Longest accepted live-feed lookback: ten years.
pub const MAX_LOOKBACK_MINUTES: i64 = 10 * 366 * 24 * 60;
const MAX_CLOCK_OFFSET_HOURS: i64 = 24;

/// Accept a lookback in `1..=MAX_LOOKBACK_MINUTES`.
pub fn check_lookback_minutes(minutes: i64) -> std::result::Result<i64, String> {
    // ---
    if (1..=MAX_LOOKBACK_MINUTES).contains(&minutes) {
        Ok(minutes)
    } else {
        Err(format!(
            "lookback must be between 1 and {MAX_LOOKBACK_MINUTES} minutes, got {minutes}"
        ))
    }
}

/// How archive timestamps, which carry no zone designator, are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveTimeZone {
    Utc,
    Central,
}

impl FromStr for ArchiveTimeZone {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "utc" => Ok(ArchiveTimeZone::Utc),
            "central" | "us/central" | "america/chicago" => Ok(ArchiveTimeZone::Central),
            other => Err(format!("expected 'utc' or 'central', got '{other}'")),
        }
    }
}

/// Live feed settings.
#[derive(Debug, Clone)]
pub struct FeedConfig {
    // ---
    pub api_url: String,
    pub page_size: u32,
    pub page_limit: u32,
    pub lookback_minutes: i64,
    /// Hours added to local civil "now" to reach the feed's UTC clock. The
    /// default of 5 assumes Central Standard Time and is an hour off during
    /// daylight saving; set it explicitly to 5 or 6 as appropriate.
    pub clock_offset_hours: i64,
}

/// Archive bundle settings.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    // ---
    pub base_url: String,
    pub timestamp_zone: ArchiveTimeZone,
    /// Parent of the per-fetch temporary directory; system temp when `None`.
    pub scratch_dir: Option<PathBuf>,
}

/// Catalog bootstrap settings.
#[derive(Debug, Clone)]
pub struct CatalogConfig {
    // ---
    pub listing_url: String,
    pub sensor_mapping_path: PathBuf,
    /// Node file used for the catalog bootstrap and, ahead of the stored
    /// `node` table, for re-keying live vsn values. Unset: listing + store.
    pub nodes_csv_path: Option<PathBuf>,
}

/// Normalizer settings.
#[derive(Debug, Clone, Copy)]
pub struct NormalizeConfig {
    // ---
    pub resample_interval: chrono::Duration,
    pub min_latitude: f64,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        NormalizeConfig {
            resample_interval: chrono::Duration::minutes(30),
            min_latitude: 40.0,
        }
    }
}

/// Strongly typed application configuration.
///
/// All fields are immutable after loading, ensuring a consistent configuration
/// snapshot for the lifetime of the application.
#[derive(Debug, Clone)]
pub struct Config {
    // ---
    /// PostgreSQL connection string.
    pub db_url: String,

    /// Maximum number of database connections in the pool.
    pub db_pool_max: u32,

    /// Address the HTTP surface binds to.
    pub listen_addr: SocketAddr,

    /// Timeout applied to every outbound request.
    pub http_timeout: Duration,

    pub feed: FeedConfig,
    pub archive: ArchiveConfig,
    pub catalog: CatalogConfig,
    pub normalize: NormalizeConfig,
}

/// Load configuration from environment variables with defaults.
///
/// Required:
/// - `DATABASE_URL` – PostgreSQL connection string
///
/// Everything else is optional; see `Config::log_config` for the full list.
///
/// Returns an error if any required variable is missing or invalid.
pub fn load_from_env() -> Result<Config> {
    // ---
    let db_url = require_env!("DATABASE_URL");
    let db_pool_max = parse_env!("DB_POOL_MAX", u32, 5);
    let listen_addr = parse_env!("LISTEN_ADDR", SocketAddr, SocketAddr::from(([0, 0, 0, 0], 8080)));
    let http_timeout = Duration::from_secs(parse_env!("HTTP_TIMEOUT_SECS", u64, 120));

    let feed = FeedConfig {
        api_url: string_env!("AOT_API_URL", DEFAULT_API_URL),
        page_size: parse_env!("FEED_PAGE_SIZE", u32, 100_000),
        page_limit: parse_env!("FEED_PAGE_LIMIT", u32, 1),
        lookback_minutes: check_lookback_minutes(parse_env!("FEED_LOOKBACK_MINUTES", i64, 12 * 60))
            .map_err(|e| anyhow!("Invalid FEED_LOOKBACK_MINUTES: {}", e))?,
        clock_offset_hours: parse_env!("FEED_CLOCK_OFFSET_HOURS", i64, 5),
    };
    if !(-MAX_CLOCK_OFFSET_HOURS..=MAX_CLOCK_OFFSET_HOURS).contains(&feed.clock_offset_hours) {
        return Err(anyhow!(
            "FEED_CLOCK_OFFSET_HOURS must be within ±{} hours",
            MAX_CLOCK_OFFSET_HOURS
        ));
    }

    let archive = ArchiveConfig {
        base_url: string_env!("ARCHIVE_BASE_URL", DEFAULT_ARCHIVE_BASE_URL),
        timestamp_zone: parse_env!("ARCHIVE_TIMESTAMP_ZONE", ArchiveTimeZone, ArchiveTimeZone::Utc),
        scratch_dir: env::var("SCRATCH_DIR").ok().map(PathBuf::from),
    };

    let catalog = CatalogConfig {
        listing_url: string_env!("CATALOG_LISTING_URL", DEFAULT_LISTING_URL),
        sensor_mapping_path: PathBuf::from(string_env!(
            "SENSOR_MAPPING_PATH",
            "data/sensor_mapping.csv"
        )),
        nodes_csv_path: env::var("NODES_CSV_PATH").ok().map(PathBuf::from),
    };

    let resample_minutes = parse_env!("RESAMPLE_INTERVAL_MINUTES", i64, 30);
    if resample_minutes <= 0 {
        return Err(anyhow!("RESAMPLE_INTERVAL_MINUTES must be positive"));
    }
    let normalize = NormalizeConfig {
        resample_interval: chrono::Duration::minutes(resample_minutes),
        min_latitude: parse_env!("MIN_LATITUDE", f64, 40.0),
    };

    Ok(Config {
        db_url,
        db_pool_max,
        listen_addr,
        http_timeout,
        feed,
        archive,
        catalog,
        normalize,
    })
}

/// Mask the password portion of a connection URL.
fn mask_db_url(db_url: &str) -> String {
    // ---
    if let Some(at_pos) = db_url.rfind('@') {
        if let Some(colon_pos) = db_url[..at_pos].rfind(':') {
            // Skip the scheme separator in "postgres://host" style URLs
            if db_url[colon_pos..].starts_with("://") {
                return db_url.to_string();
            }
            return format!("{}:****{}", &db_url[..colon_pos], &db_url[at_pos..]);
        }
    }
    db_url.to_string()
}

impl Config {
    /// Log the loaded configuration for debugging purposes.
    ///
    /// Masks the database password while showing all configuration values
    /// that were loaded.
    pub fn log_config(&self) {
        // ---
        tracing::info!("Configuration loaded:");
        tracing::info!("  DATABASE_URL            : {}", mask_db_url(&self.db_url));
        tracing::info!("  DB_POOL_MAX             : {}", self.db_pool_max);
        tracing::info!("  LISTEN_ADDR             : {}", self.listen_addr);
        tracing::info!("  HTTP_TIMEOUT_SECS       : {}", self.http_timeout.as_secs());
        tracing::info!("  AOT_API_URL             : {}", self.feed.api_url);
        tracing::info!("  FEED_PAGE_SIZE          : {}", self.feed.page_size);
        tracing::info!("  FEED_PAGE_LIMIT         : {}", self.feed.page_limit);
        tracing::info!("  FEED_LOOKBACK_MINUTES   : {}", self.feed.lookback_minutes);
        tracing::info!("  FEED_CLOCK_OFFSET_HOURS : {}", self.feed.clock_offset_hours);
        tracing::info!("  ARCHIVE_BASE_URL        : {}", self.archive.base_url);
        tracing::info!("  ARCHIVE_TIMESTAMP_ZONE  : {:?}", self.archive.timestamp_zone);
        tracing::info!("  SCRATCH_DIR             : {:?}", self.archive.scratch_dir);
        tracing::info!("  CATALOG_LISTING_URL     : {}", self.catalog.listing_url);
        tracing::info!(
            "  SENSOR_MAPPING_PATH     : {}",
            self.catalog.sensor_mapping_path.display()
        );
        tracing::info!("  NODES_CSV_PATH          : {:?}", self.catalog.nodes_csv_path);
        tracing::info!(
            "  RESAMPLE_INTERVAL       : {} min",
            self.normalize.resample_interval.num_minutes()
        );
        tracing::info!("  MIN_LATITUDE            : {}", self.normalize.min_latitude);
    }
}
