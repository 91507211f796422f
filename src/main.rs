//! `aot-pipeline` service binary.
//!
//! Startup: `.env` and environment → tracing → config → PostgreSQL pool →
//! idempotent schema creation → HTTP surface (`routes`, EMBP gateway).
//! The pipeline itself lives in the `aot_pipeline` library; this binary only
//! wires it to a database and a listener.
//!
//! Only `DATABASE_URL` is required. Logging is tuned with `AOT_LOG_LEVEL`,
//! `AOT_SPAN_EVENTS` and `FORCE_COLOR`; every other setting is documented in
//! the library's `config` module.
use std::{env, sync::Arc};

use anyhow::{Context, Result};
use dotenvy::dotenv;
use is_terminal::IsTerminal;
use sqlx::postgres::PgPoolOptions;
use tokio::sync::Mutex;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use aot_pipeline::{acquire, config, schema, PgStore};

mod routes;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    dotenv().ok();
    init_tracing();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .context("connecting to DATABASE_URL")?;
    schema::create_schema(&pool)
        .await
        .context("creating schema")?;
    tracing::info!("Database ready");

    let http = acquire::http_client(cfg.http_timeout)?;
    let addr = cfg.listen_addr;

    let state = routes::AppState {
        store: PgStore::new(pool),
        http,
        config: Arc::new(cfg),
        ingest_lock: Arc::new(Mutex::new(())),
    };
    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!("Serving on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}

// ---

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Install the global `tracing` subscriber. Call once, before anything logs.
///
/// `RUST_LOG` takes precedence; otherwise `AOT_LOG_LEVEL` picks one of
/// [`LOG_LEVELS`] (default `debug`) with sqlx statement logging held at warn.
/// Output is compact and carries target, file and line.
fn init_tracing() {
    // ---
    let env_filter = if env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        let requested = env::var("AOT_LOG_LEVEL").unwrap_or_default().to_ascii_lowercase();
        let level = LOG_LEVELS
            .iter()
            .find(|l| **l == requested)
            .copied()
            .unwrap_or("debug");
        EnvFilter::new(format!("{level},sqlx::query=warn"))
    };

    tracing_subscriber::fmt()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(span_events())
        .with_env_filter(env_filter)
        .with_ansi(color_enabled())
        .compact()
        .init();
}

/// `AOT_SPAN_EVENTS`: `full` (enter, exit, close with timing), `enter_exit`,
/// or anything else for close events only. The `ingest` span's close event
/// carries each batch's elapsed time.
fn span_events() -> FmtSpan {
    // ---
    match env::var("AOT_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        Ok("enter_exit") => FmtSpan::ENTER | FmtSpan::EXIT,
        _ => FmtSpan::CLOSE,
    }
}

/// `FORCE_COLOR` overrides TTY detection in either direction.
fn color_enabled() -> bool {
    // ---
    match env::var("FORCE_COLOR").as_deref() {
        Ok("1" | "true" | "yes") => true,
        Ok("0" | "false" | "no") => false,
        _ => std::io::stdout().is_terminal(),
    }
}
