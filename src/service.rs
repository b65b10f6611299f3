// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - Service Composition
 * Single bootstrap that wires config, database, broker pool, shared
 * state, orchestrator and the scan pipeline into one value. No hidden
 * init-once globals.
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use anyhow::{Context, Result};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

use crate::api::{self, AppState};
use crate::broker::{AmqpConnector, ConnectionPool, ConnectionPoolConfig, PoolManager, SharedBrokerState};
use crate::config::{AppConfig, SERVICE_NAME};
use crate::db::{self, PgDomainStore, PgHostnameStore, PgSettingsStore};
use crate::enumeration::CommandResolver;
use crate::orchestrator::Orchestrator;
use crate::scan::{ScanDeps, ScanOrchestrator, SystemToolInstaller};

const DEFAULT_POOL: &str = "default";
const TMP_DIR: &str = "tmp";

/// Interval and cap for the ready-poll that gates consumer activation
const READY_POLL_INTERVAL: Duration = Duration::from_secs(5);
const READY_POLL_MAX_ATTEMPTS: u32 = 60;

pub struct Service {
    pub config: Arc<AppConfig>,
    pub pools: Arc<PoolManager>,
    pub orchestrator: Arc<Orchestrator>,
    pub state: AppState,
}

impl Service {
    /// Compose the full service: database pool, broker pool and
    /// topology, scan orchestrator and HTTP state.
    pub async fn bootstrap(config: AppConfig) -> Result<Self> {
        std::fs::create_dir_all("configs").context("failed to create configs directory")?;
        std::fs::create_dir_all(TMP_DIR).context("failed to create tmp directory")?;

        let config = Arc::new(config);

        let db_pool = db::create_pool(&config.database)
            .await
            .context("error connecting to the database")?;

        let amqp_pool = ConnectionPool::new(
            ConnectionPoolConfig::default(),
            config.rabbitmq.url(),
            AmqpConnector,
        )
        .await
        .context("error connecting to the broker")?;

        let pools = PoolManager::new();
        pools.register_pool(DEFAULT_POOL, amqp_pool);
        pools
            .set_default(DEFAULT_POOL)
            .context("error selecting the default broker pool")?;

        let broker_state = SharedBrokerState::new();
        let orchestrator = Arc::new(
            Orchestrator::new(config.clone(), broker_state, pools.clone())
                .map_err(|e| anyhow::anyhow!(e.to_string()))?,
        );
        orchestrator
            .init()
            .await
            .map_err(|e| anyhow::anyhow!("error bringing up the broker exchanges: {}", e))?;
        orchestrator
            .activate_queue_by_service(SERVICE_NAME)
            .await
            .map_err(|e| anyhow::anyhow!("error bringing up the service queues: {}", e))?;

        let scan = Arc::new(ScanOrchestrator::new(ScanDeps {
            config: config.clone(),
            domains: Arc::new(PgDomainStore::new(db_pool.clone())),
            hostnames: Arc::new(PgHostnameStore::new(db_pool.clone())),
            settings: Arc::new(PgSettingsStore::new(db_pool.clone())),
            orchestrator: orchestrator.clone(),
            resolver: Arc::new(CommandResolver),
            installer: Arc::new(SystemToolInstaller),
            tmp_dir: TMP_DIR.into(),
        }));

        let state = AppState {
            config: config.clone(),
            scan,
            orchestrator: orchestrator.clone(),
            db: db_pool,
        };

        Ok(Self {
            config,
            pools,
            orchestrator,
            state,
        })
    }

    pub fn router(&self) -> Router {
        api::router(self.state.clone())
    }

    /// Activate the broker consumer only after this service's own HTTP
    /// surface is up. Consumed deliveries are dispatched as local API
    /// calls, so consuming before the server listens would bounce them.
    pub fn activate_consumer_when_ready(&self) {
        let config = self.config.clone();
        let orchestrator = self.orchestrator.clone();
        tokio::spawn(async move {
            let base = match config.orchestrator.service_url(SERVICE_NAME) {
                Ok(url) => url.clone(),
                Err(e) => {
                    error!(error = %e, "cannot poll service health, consumer will not be activated");
                    return;
                }
            };
            let ready_url = format!("{}/health", base.trim_end_matches('/'));
            let client = reqwest::Client::new();

            info!("waiting for the API service to become ready before activating the consumer");
            let mut attempts = 0;
            loop {
                match client.get(&ready_url).send().await {
                    Ok(response) if response.status().is_success() => break,
                    _ => {}
                }
                attempts += 1;
                if attempts >= READY_POLL_MAX_ATTEMPTS {
                    error!("timeout waiting for the API service to become ready, consumer will not be activated");
                    return;
                }
                tokio::time::sleep(READY_POLL_INTERVAL).await;
            }

            match orchestrator.activate_consumer_by_service(SERVICE_NAME).await {
                Ok(()) => info!("[SUCCESS] broker consumer activated"),
                Err(e) => error!(error = %e, "error activating the broker consumer"),
            }
        });
    }

    /// Pool teardown on shutdown
    pub async fn shutdown(&self) {
        info!("shutdown signal received, cleaning up connection pools");
        self.pools.close_all().await;
    }
}
