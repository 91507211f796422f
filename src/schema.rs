//! Database schema management for `aot-pipeline`.
//!
//! Ensures the `node`, `sensor` and `observation` tables exist before the
//! pipeline runs. Applied once on startup from `main.rs`; `reset_schema` is
//! the only path that ever removes rows.

use sqlx::{PgConnection, PgPool};

use crate::error::StoreError;

// ---

async fn create_tables(conn: &mut PgConnection) -> Result<(), sqlx::Error> {
    // ---
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS node (
            node_id        TEXT PRIMARY KEY,
            vsn            TEXT,
            lat            DOUBLE PRECISION NOT NULL,
            lon            DOUBLE PRECISION NOT NULL,
            community_area TEXT,
            description    TEXT
        );
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sensor (
            sensor_path    TEXT PRIMARY KEY,
            sensor_type    TEXT,
            sensor_measure TEXT NOT NULL,
            hrf_unit       TEXT,
            hrf_minval     DOUBLE PRECISION,
            hrf_maxval     DOUBLE PRECISION
        );
        "#,
    )
    .execute(&mut *conn)
    .await?;

    // id is assigned by the loader, not by a sequence; node_id carries no
    // foreign key because archive rows may name nodes missing from the listing
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS observation (
            id          BIGINT PRIMARY KEY,
            timestamp   TIMESTAMPTZ      NOT NULL,
            node_id     TEXT             NOT NULL,
            sensor_path TEXT             NOT NULL REFERENCES sensor (sensor_path),
            value_hrf   DOUBLE PRECISION NOT NULL,
            CONSTRAINT observation_business_key UNIQUE (timestamp, node_id, sensor_path)
        );
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_observation_sensor_path
            ON observation (sensor_path);
        "#,
    )
    .execute(&mut *conn)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_observation_node_id
            ON observation (node_id);
        "#,
    )
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Create the schema (idempotent). Safe to call on every startup.
pub async fn create_schema(pool: &PgPool) -> Result<(), StoreError> {
    // ---
    let mut tx = pool.begin().await?;
    create_tables(&mut *tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Drop all three tables and recreate them empty, in one transaction.
pub async fn reset_schema(pool: &PgPool) -> Result<(), StoreError> {
    // ---
    let mut tx = pool.begin().await?;
    sqlx::query("DROP TABLE IF EXISTS observation, sensor, node")
        .execute(&mut *tx)
        .await?;
    create_tables(&mut *tx).await?;
    tx.commit().await?;

    tracing::warn!("Store reset: all observations, sensors and nodes removed");
    Ok(())
}
