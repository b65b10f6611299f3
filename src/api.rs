// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ASM HTTP Surface
 * Scan trigger endpoints plus health and readiness probes
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary
 */

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json};
use axum::routing::get;
use axum::Router;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error};

use crate::config::{AppConfig, SERVICE_NAME};
use crate::db;
use crate::orchestrator::OrchestratorApi;
use crate::scan::{LaunchOutcome, ScanOrchestrator};

pub const DELIVERY_TAG_HEADER: &str = "X-RabbitMQ-Delivery-Tag";

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub scan: Arc<ScanOrchestrator>,
    pub orchestrator: Arc<dyn OrchestratorApi>,
    pub db: deadpool_postgres::Pool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/scan", get(launch_scan))
        .route("/scan/passive", get(launch_passive))
        .route("/scan/active", get(launch_active))
        .route("/scan/check", get(launch_check_live))
        .route("/health", get(health))
        .route("/ready", get(ready))
        .with_state(state)
}

/// Delivery tag set by the broker message handler; 0 when the call
/// came straight over HTTP
fn delivery_tag(headers: &HeaderMap) -> u64 {
    let Some(raw) = headers.get(DELIVERY_TAG_HEADER) else {
        return 0;
    };
    match raw.to_str().ok().and_then(|v| v.parse::<u64>().ok()) {
        Some(tag) => {
            debug!(delivery_tag = tag, "scan triggered via broker message");
            tag
        }
        None => {
            error!("invalid delivery tag header, treating trigger as HTTP-originated");
            0
        }
    }
}

async fn launch_scan(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let tag = delivery_tag(&headers);
    match state.scan.launch_full(tag).await {
        LaunchOutcome::Started => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Launching ASMM8 full scans. Please, check the notifications.",
            })),
        ),
        LaunchOutcome::NoTargets => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "ASMM8 full scans finished. No target in scope.",
            })),
        ),
        LaunchOutcome::BrokerNotReady => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "msg": "ASMM8 full scans cannot launch at this moment: broker queues do not exist. A scan may already be in progress.",
            })),
        ),
        LaunchOutcome::LoadFailed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "msg": "ASMM8 full scans failed. Error fetching enabled domains.",
            })),
        ),
        LaunchOutcome::InstallFailed => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "msg": "ASMM8 full scans cannot launch: the enumeration tools are unavailable. Please, check the notifications.",
            })),
        ),
    }
}

async fn launch_passive(State(state): State<AppState>) -> impl IntoResponse {
    match state.scan.launch_passive().await {
        LaunchOutcome::Started => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Launching passive scans. Please, check the notifications.",
            })),
        ),
        LaunchOutcome::NoTargets => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Passive scans finished. No target in scope.",
            })),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "msg": "Passive scans failed to launch.",
            })),
        ),
    }
}

async fn launch_active(State(state): State<AppState>) -> impl IntoResponse {
    match state.scan.launch_active().await {
        LaunchOutcome::Started => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Launching active scans. Please, check the notifications.",
            })),
        ),
        LaunchOutcome::NoTargets => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Active scans finished. No target in scope.",
            })),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "msg": "Active scans failed to launch.",
            })),
        ),
    }
}

async fn launch_check_live(State(state): State<AppState>) -> impl IntoResponse {
    match state.scan.launch_check_live().await {
        LaunchOutcome::Started => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Check live scans are running.",
            })),
        ),
        LaunchOutcome::NoTargets => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "msg": "Check live scans finished. No target in scope.",
            })),
        ),
        LaunchOutcome::LoadFailed => (
            StatusCode::BAD_GATEWAY,
            Json(json!({
                "status": "error",
                "msg": "Check live scans failed. Error fetching enabled domains.",
            })),
        ),
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "status": "error",
                "msg": "Check live scans failed to launch.",
            })),
        ),
    }
}

async fn health() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(json!({
            "status": "healthy",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "service": SERVICE_NAME,
        })),
    )
}

/// Composite readiness: database ping AND the service queue existing
/// with a live consumer, answered from the local broker registry
async fn ready(State(state): State<AppState>) -> impl IntoResponse {
    let db_healthy = match db::ping(&state.db).await {
        Ok(()) => true,
        Err(e) => {
            error!(error = %e, "database ping failed during readiness check");
            false
        }
    };

    let broker_healthy = match state
        .config
        .orchestrator
        .service_messaging(SERVICE_NAME)
        .and_then(|m| m.queue_spec().map(|spec| (spec, m.queue_arguments.clone())))
    {
        Ok((spec, args)) => {
            state.orchestrator.exist_queue(&spec.name, &args)
                && state.orchestrator.exist_consumers_for_queue(&spec.name, &args)
        }
        Err(e) => {
            error!(error = %e, "queue configuration is unusable");
            false
        }
    };

    let checks = json!({
        "database": if db_healthy { "healthy" } else { "unhealthy" },
        "rabbitmq": if broker_healthy { "healthy" } else { "unhealthy" },
    });

    if db_healthy && broker_healthy {
        (
            StatusCode::OK,
            Json(json!({
                "status": "ready",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "service": SERVICE_NAME,
                "checks": checks,
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "not ready",
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "service": SERVICE_NAME,
                "checks": checks,
            })),
        )
    }
}
