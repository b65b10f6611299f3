// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - PostgreSQL Persistence Layer
 * Domain/hostname stores with batched upserts over a deadpool pool
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use async_trait::async_trait;
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use tokio_postgres::NoTls;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::errors::DbError;
use crate::types::{Domain, GeneralScanSettings, Hostname, ScanSettings};

/// Rows per multi-row upsert statement
const BATCH_SIZE: usize = 250;

/// Build the connection pool and verify connectivity
pub async fn create_pool(config: &DatabaseConfig) -> Result<Pool, DbError> {
    let mut pg_config = Config::new();
    pg_config.host = Some(config.location.clone());
    pg_config.port = Some(config.port);
    pg_config.dbname = Some(config.database.clone());
    pg_config.user = Some(config.username.clone());
    pg_config.password = Some(config.password.clone());
    pg_config.options = Some(format!("-c search_path={}", config.schema));
    pg_config.manager = Some(ManagerConfig {
        recycling_method: RecyclingMethod::Fast,
    });

    let pool = pg_config
        .create_pool(Some(Runtime::Tokio1), NoTls)
        .map_err(|e| DbError::Connection {
            reason: e.to_string(),
        })?;

    let client = pool.get().await?;
    client.query("SELECT 1", &[]).await?;
    info!(
        host = %config.location,
        database = %config.database,
        "[SUCCESS] PostgreSQL connected"
    );

    Ok(pool)
}

/// Readiness ping
pub async fn ping(pool: &Pool) -> Result<(), DbError> {
    let client = pool.get().await?;
    client.query("SELECT 1", &[]).await?;
    Ok(())
}

/// Seed domains, consumed shape only
#[async_trait]
pub trait DomainStore: Send + Sync {
    async fn get_all_enabled(&self) -> Result<Vec<Domain>, DbError>;
}

/// Discovered hostnames under the seed domains
#[async_trait]
pub trait HostnameStore: Send + Sync {
    async fn get_all_by_domain(&self, domain_id: Uuid) -> Result<Vec<Hostname>, DbError>;

    /// Batch-upsert hostnames keyed by name; `live` is refreshed on
    /// conflict. Returns true iff any row was inserted or had its
    /// `live` flag flipped.
    async fn insert_batch(
        &self,
        domain_id: Uuid,
        enabled: bool,
        names: &[String],
    ) -> Result<bool, DbError>;

    async fn update_live_by_domain(&self, domain_id: Uuid, live: bool) -> Result<u64, DbError>;

    async fn update_live_by_name(&self, name: &str, live: bool) -> Result<u64, DbError>;
}

/// General scan settings, read-only here
#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn get(&self) -> Result<GeneralScanSettings, DbError>;
}

#[derive(Clone)]
pub struct PgDomainStore {
    pool: Pool,
}

impl PgDomainStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DomainStore for PgDomainStore {
    async fn get_all_enabled(&self) -> Result<Vec<Domain>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, name, enabled FROM cptm8domain WHERE enabled = true ORDER BY name",
                &[],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| Domain {
                id: row.get("id"),
                name: row.get("name"),
                enabled: row.get("enabled"),
            })
            .collect())
    }
}

#[derive(Clone)]
pub struct PgHostnameStore {
    pool: Pool,
}

impl PgHostnameStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostnameStore for PgHostnameStore {
    async fn get_all_by_domain(&self, domain_id: Uuid) -> Result<Vec<Hostname>, DbError> {
        let client = self.pool.get().await?;
        let rows = client
            .query(
                "SELECT id, name, foundfirsttime, live, domainid, enabled \
                 FROM cptm8hostname WHERE domainid = $1",
                &[&domain_id],
            )
            .await?;
        Ok(rows
            .iter()
            .map(|row| Hostname {
                id: row.get("id"),
                name: row.get("name"),
                found_first_time: row.get("foundfirsttime"),
                live: row.get("live"),
                domain_id: row.get("domainid"),
                enabled: row.get("enabled"),
            })
            .collect())
    }

    async fn insert_batch(
        &self,
        domain_id: Uuid,
        enabled: bool,
        names: &[String],
    ) -> Result<bool, DbError> {
        if names.is_empty() {
            return Ok(false);
        }

        let mut client = self.pool.get().await?;
        let transaction = client.transaction().await?;
        let mut changed_rows: u64 = 0;

        for chunk in names.chunks(BATCH_SIZE) {
            // Multi-row upsert; the conflict clause only touches rows
            // whose live flag actually changes, so rows-affected counts
            // exactly the inserts plus the live flips.
            let mut query = String::with_capacity(256 + chunk.len() * 16);
            query.push_str(
                "INSERT INTO cptm8hostname(name, foundfirsttime, live, enabled, domainid) VALUES ",
            );
            let mut params: Vec<&(dyn tokio_postgres::types::ToSql + Sync)> =
                Vec::with_capacity(chunk.len() * 3);

            for (i, name) in chunk.iter().enumerate() {
                if i > 0 {
                    query.push_str(", ");
                }
                let base = i * 3;
                query.push_str(&format!(
                    "(${}, NOW(), true, ${}, ${})",
                    base + 1,
                    base + 2,
                    base + 3
                ));
                params.push(name);
                params.push(&enabled);
                params.push(&domain_id);
            }

            query.push_str(
                " ON CONFLICT (name) DO UPDATE SET live = EXCLUDED.live \
                 WHERE cptm8hostname.live IS DISTINCT FROM EXCLUDED.live",
            );

            let affected = transaction.execute(query.as_str(), &params).await?;
            changed_rows += affected;
            debug!(
                domain_id = %domain_id,
                batch = chunk.len(),
                affected,
                "hostname batch upserted"
            );
        }

        transaction.commit().await?;
        Ok(changed_rows > 0)
    }

    async fn update_live_by_domain(&self, domain_id: Uuid, live: bool) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "UPDATE cptm8hostname SET live = $1 WHERE domainid = $2",
                &[&live, &domain_id],
            )
            .await?;
        Ok(affected)
    }

    async fn update_live_by_name(&self, name: &str, live: bool) -> Result<u64, DbError> {
        let client = self.pool.get().await?;
        let affected = client
            .execute(
                "UPDATE cptm8hostname SET live = $1 WHERE name = $2",
                &[&live, &name],
            )
            .await?;
        Ok(affected)
    }
}

#[derive(Clone)]
pub struct PgSettingsStore {
    pool: Pool,
}

impl PgSettingsStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SettingsStore for PgSettingsStore {
    async fn get(&self) -> Result<GeneralScanSettings, DbError> {
        let client = self.pool.get().await?;
        let row = client
            .query_opt("SELECT id, settings FROM cptm8generalscansettings", &[])
            .await?
            .ok_or_else(|| DbError::Query {
                reason: "general scan settings row is missing".to_string(),
            })?;

        let settings_value: serde_json::Value = row.get("settings");
        let settings: ScanSettings =
            serde_json::from_value(settings_value).map_err(|e| DbError::Query {
                reason: format!("invalid settings JSON: {}", e),
            })?;

        Ok(GeneralScanSettings {
            id: row.get("id"),
            settings,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_query_parameter_numbering() {
        // Mirrors the statement construction in insert_batch for a
        // three-name chunk; a numbering mistake here once produced
        // rows bound to the wrong columns.
        let names = ["a", "b", "c"];
        let mut query = String::new();
        for (i, _) in names.iter().enumerate() {
            if i > 0 {
                query.push_str(", ");
            }
            let base = i * 3;
            query.push_str(&format!(
                "(${}, NOW(), true, ${}, ${})",
                base + 1,
                base + 2,
                base + 3
            ));
        }

        assert_eq!(
            query,
            "($1, NOW(), true, $2, $3), ($4, NOW(), true, $5, $6), ($7, NOW(), true, $8, $9)"
        );
    }

    #[test]
    fn settings_json_shape() {
        let settings: ScanSettings =
            serde_json::from_str(r#"{"scannewlyfoundhostname": true}"#).unwrap();
        assert!(settings.scan_newly_found_hostname);
    }
}
