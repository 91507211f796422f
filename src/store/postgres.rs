//! PostgreSQL implementation of the observation store.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, QueryBuilder};

use super::ObservationStore;
use crate::catalog::pad_vsn;
use crate::error::StoreError;
use crate::models::{LoadableObservation, Node, Sensor, StoredObservation};

// ---

// PostgreSQL caps a statement at 65535 bind parameters
const OBSERVATION_CHUNK: usize = 10_000;
const CATALOG_CHUNK: usize = 5_000;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        PgStore { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Stored observations for one measure since `since`, joined with node
    /// coordinates.
    pub async fn stored_observations(
        &self,
        sensor_type: &str,
        sensor_measure: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<StoredObservation>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, StoredObservation>(
            r#"
            SELECT observation.id, observation.timestamp, observation.node_id,
                   observation.sensor_path, observation.value_hrf,
                   node.lat, node.lon
            FROM observation
            INNER JOIN node   ON observation.node_id = node.node_id
            INNER JOIN sensor ON observation.sensor_path = sensor.sensor_path
            WHERE observation.timestamp >= $1
              AND sensor.sensor_type = $2
              AND sensor.sensor_measure = $3
            ORDER BY observation.timestamp, observation.node_id
            "#,
        )
        .bind(since)
        .bind(sensor_type)
        .bind(sensor_measure)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }
}

#[async_trait]
impl ObservationStore for PgStore {
    async fn known_sensor_paths(&self) -> Result<HashSet<String>, StoreError> {
        // ---
        let paths = sqlx::query_scalar::<_, String>("SELECT sensor_path FROM sensor")
            .fetch_all(&self.pool)
            .await?;
        Ok(paths.into_iter().collect())
    }

    async fn max_observation_id(&self) -> Result<i64, StoreError> {
        // ---
        let max_id = sqlx::query_scalar::<_, Option<i64>>("SELECT MAX(id) FROM observation")
            .fetch_one(&self.pool)
            .await?;
        Ok(max_id.unwrap_or(0))
    }

    async fn node_ids_by_vsn(&self) -> Result<HashMap<String, String>, StoreError> {
        // ---
        let rows = sqlx::query_as::<_, (Option<String>, String)>(
            "SELECT vsn, node_id FROM node WHERE vsn IS NOT NULL",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .filter_map(|(vsn, node_id)| vsn.map(|v| (pad_vsn(&v), node_id)))
            .collect())
    }

    async fn append_observations(&self, rows: &[LoadableObservation]) -> Result<u64, StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0u64;

        for chunk in rows.chunks(OBSERVATION_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO observation (id, timestamp, node_id, sensor_path, value_hrf) ",
            );
            qb.push_values(chunk, |mut b, row| {
                b.push_bind(row.id)
                    .push_bind(row.timestamp)
                    .push_bind(row.node_id.clone())
                    .push_bind(row.sensor_path.clone())
                    .push_bind(row.value_hrf);
            });
            inserted += qb.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    async fn append_catalog(&self, sensors: &[Sensor], nodes: &[Node]) -> Result<(), StoreError> {
        // ---
        let mut tx = self.pool.begin().await?;

        for chunk in sensors.chunks(CATALOG_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO sensor (sensor_path, sensor_type, sensor_measure, hrf_unit, hrf_minval, hrf_maxval) ",
            );
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(s.sensor_path.clone())
                    .push_bind(s.sensor_type.clone())
                    .push_bind(s.sensor_measure.clone())
                    .push_bind(s.hrf_unit.clone())
                    .push_bind(s.hrf_minval)
                    .push_bind(s.hrf_maxval);
            });
            qb.build().execute(&mut *tx).await?;
        }

        for chunk in nodes.chunks(CATALOG_CHUNK) {
            let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
                "INSERT INTO node (node_id, vsn, lat, lon, community_area, description) ",
            );
            qb.push_values(chunk, |mut b, n| {
                b.push_bind(n.node_id.clone())
                    .push_bind(n.vsn.clone())
                    .push_bind(n.lat)
                    .push_bind(n.lon)
                    .push_bind(n.community_area.clone())
                    .push_bind(n.description.clone());
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
