//! PostgreSQL storage backend
//!
//! Pins live in the `domain_keys` table with a unique `(app_id, file, fqdn)`
//! key, so one database can serve several service instances. Saves are
//! transactional; lookups resolve rotation overlap by taking the
//! earliest-expiring row per FQDN.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pinning_core::PinRecord;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, warn};

use super::{FileQuery, PinStore, PoolSettings, ProbeReport, StorageError, FRESHNESS_WINDOW};

/// PostgreSQL pin store
#[derive(Debug, Clone)]
pub struct PostgresStore {
    app_id: String,
    pool: PgPool,
}

impl PostgresStore {
    /// Connect, size the pool from the storage settings and ensure the
    /// schema exists.
    pub async fn connect(
        dsn: &str,
        pool: PoolSettings,
        app_id: String,
    ) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(pool.max_open_conns)
            .min_connections(pool.max_idle_conns.min(pool.max_open_conns))
            .idle_timeout(Some(pool.conn_max_idle_time))
            .max_lifetime(Some(pool.conn_max_lifetime))
            .connect(dsn)
            .await
            .map_err(|err| {
                StorageError::Connection(format!("failed to connect to postgres: {err}"))
            })?;

        info!("connected to postgres");

        let store = Self { app_id, pool };
        store.ensure_schema().await?;

        Ok(store)
    }

    /// Create from an existing pool (tests).
    pub fn from_pool(pool: PgPool, app_id: String) -> Self {
        Self { app_id, pool }
    }

    /// Create the `domain_keys` table and its unique key if missing.
    /// Runs once on open.
    async fn ensure_schema(&self) -> Result<(), StorageError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS domain_keys (
                id          BIGSERIAL PRIMARY KEY,
                app_id      VARCHAR(64) NOT NULL,
                date        TIMESTAMPTZ,
                domain_name TEXT        NOT NULL DEFAULT '',
                expire      BIGINT      NOT NULL DEFAULT 0,
                file        TEXT        NOT NULL,
                fqdn        TEXT        NOT NULL,
                key         TEXT        NOT NULL DEFAULT '',
                last_error  TEXT        NOT NULL DEFAULT '',
                created_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                updated_at  TIMESTAMPTZ NOT NULL DEFAULT now(),
                UNIQUE (app_id, file, fqdn)
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|err| StorageError::Database(format!("failed to ensure schema: {err}")))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_domain_keys_file ON domain_keys(file)")
            .execute(&self.pool)
            .await
            .map_err(|err| StorageError::Database(format!("failed to ensure schema: {err}")))?;

        info!("database schema ensured");
        Ok(())
    }
}

#[async_trait]
impl PinStore for PostgresStore {
    /// Upserts every probed record in one transaction; a row failure rolls
    /// the whole tick back (the next tick retries with fresh data).
    async fn save_keys(&self, keys: &HashMap<String, PinRecord>) -> Result<(), StorageError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|err| StorageError::Database(format!("failed to begin tx: {err}")))?;

        for record in keys.values() {
            if record.key.is_empty() {
                continue;
            }

            sqlx::query(
                r#"
                INSERT INTO domain_keys (
                    app_id, date, domain_name, expire, file, fqdn, key, last_error
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ON CONFLICT (app_id, file, fqdn) DO UPDATE
                SET
                    date        = EXCLUDED.date,
                    domain_name = EXCLUDED.domain_name,
                    expire      = EXCLUDED.expire,
                    key         = EXCLUDED.key,
                    last_error  = EXCLUDED.last_error,
                    updated_at  = now()
                "#,
            )
            .bind(&self.app_id)
            .bind(record.date)
            .bind(&record.domain_name)
            .bind(record.expire)
            .bind(&record.file)
            .bind(&record.fqdn)
            .bind(&record.key)
            .bind(&record.last_error)
            .execute(&mut *tx)
            .await
            .map_err(|err| {
                error!(error = %err, fqdn = %record.fqdn, "failed to save key to postgres");
                StorageError::Database(err.to_string())
            })?;
        }

        tx.commit()
            .await
            .map_err(|err| StorageError::Database(format!("failed to commit tx: {err}")))
    }

    /// One row per FQDN, earliest expiry wins (`DISTINCT ON` ordered by
    /// `expire ASC`); unprobed rows are excluded in the query.
    async fn get_by_file(&self, file: &str) -> Result<FileQuery, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT ON (fqdn)
                   date, domain_name, expire, fqdn, key, last_error
            FROM domain_keys
            WHERE file = $1
              AND key <> ''
            ORDER BY fqdn, expire ASC
            "#,
        )
        .bind(file)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| {
            error!(error = %err, file = %file, "failed to query domain_keys by file");
            StorageError::Database("failed to query keys from postgres".into())
        })?;

        let records: Vec<PinRecord> = rows
            .iter()
            .map(|row| PinRecord {
                date: row.get::<Option<DateTime<Utc>>, _>("date"),
                domain_name: row.get("domain_name"),
                expire: row.get("expire"),
                fqdn: row.get("fqdn"),
                key: row.get("key"),
                last_error: row.get("last_error"),
                ..PinRecord::default()
            })
            .collect();

        debug!(file = %file, count = records.len(), "selected best keys by file");

        Ok(FileQuery::Records(records))
    }

    async fn close(&self) -> Result<(), StorageError> {
        warn!("closing postgres storage");
        self.pool.close().await;
        Ok(())
    }

    async fn probe_readiness(&self) -> ProbeReport {
        let mut report = ProbeReport::ok();
        let mut valid = 0usize;

        let rows = match self.fetch_own_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                report.push(format!("failed to query postgres: {err}"));
                return report;
            }
        };

        if rows.is_empty() {
            report.push("no keys found in postgres for app");
            return report;
        }

        for row in &rows {
            if row.key.is_empty() {
                report.push(format!(
                    "empty key for fqdn={:?} domain={:?} file={:?}",
                    row.fqdn, row.domain_name, row.file
                ));
                continue;
            }

            if row.date.is_none() {
                report.push(format!(
                    "missing date for fqdn={} file={}",
                    row.fqdn, row.file
                ));
                continue;
            }

            valid += 1;
        }

        if valid == 0 {
            report.push("no valid keys found in postgres");
        }

        report
    }

    async fn probe_liveness(&self) -> ProbeReport {
        let now = Utc::now();
        let mut report = ProbeReport::ok();
        let mut fresh = 0usize;

        let rows = match self.fetch_own_rows().await {
            Ok(rows) => rows,
            Err(err) => {
                report.push(format!("failed to query postgres: {err}"));
                return report;
            }
        };

        if rows.is_empty() {
            report.push("no keys found in postgres for app");
            return report;
        }

        for row in &rows {
            if !row.last_error.is_empty() {
                report.push(format!(
                    "key for {} ({}) has last_error: {}",
                    row.fqdn, row.domain_name, row.last_error
                ));
                continue;
            }

            let Some(age) = super::age_of(row.date.as_ref(), now) else {
                report.push(format!(
                    "missing date for key {} ({})",
                    row.fqdn, row.domain_name
                ));
                continue;
            };

            if age >= FRESHNESS_WINDOW {
                report.push(format!(
                    "key for {} ({}) appears stale (age={:?} >= {:?})",
                    row.fqdn, row.domain_name, age, FRESHNESS_WINDOW
                ));
                continue;
            }

            fresh += 1;
        }

        if fresh == 0 {
            report.push("no fresh keys found in postgres");
        }

        report
    }
}

impl PostgresStore {
    /// All probed rows belonging to this instance, for the health probes.
    async fn fetch_own_rows(&self) -> Result<Vec<PinRecord>, StorageError> {
        let rows = sqlx::query(
            r#"
            SELECT date, domain_name, expire, file, fqdn, key, last_error
            FROM domain_keys
            WHERE app_id = $1
              AND key <> ''
            "#,
        )
        .bind(&self.app_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StorageError::Database(err.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| PinRecord {
                date: row.get::<Option<DateTime<Utc>>, _>("date"),
                domain_name: row.get("domain_name"),
                expire: row.get("expire"),
                file: row.get("file"),
                fqdn: row.get("fqdn"),
                key: row.get("key"),
                last_error: row.get("last_error"),
                ..PinRecord::default()
            })
            .collect())
    }
}
