//! Health check endpoints
//!
//! Kubernetes-style probes:
//! - /health, /healthz - liveness (is the service running?)
//! - /ready, /readyz - readiness (can the ledger take traffic?)
//!
//! Liveness always returns 200 while the process serves. Readiness
//! exercises the ledger store with a real read, so a wedged backend
//! takes the instance out of rotation.

use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use crate::routes::{full_body, BoxBody};
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall health status (true if service is running)
    pub healthy: bool,
    /// 'online' or 'degraded' for status dashboards
    pub status: &'static str,
    /// Service version
    pub version: &'static str,
    /// Seconds since process start
    pub uptime: u64,
    /// Current timestamp
    pub timestamp: String,
    /// Operating mode
    pub mode: String,
    /// Node identifier
    pub node_id: String,
    /// Ledger backend status
    pub ledger: LedgerHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct LedgerHealth {
    /// "mongodb" or "memory"
    pub backend: &'static str,
    /// Whether the last probe read succeeded
    pub reachable: bool,
}

fn build_health_response(state: &AppState, reachable: bool, error: Option<String>) -> HealthResponse {
    let args = &state.args;

    HealthResponse {
        healthy: true,
        status: if reachable { "online" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if args.dev_mode {
            "development".to_string()
        } else {
            "production".to_string()
        },
        node_id: args.node_id.to_string(),
        ledger: LedgerHealth {
            backend: state.ledger_backend,
            reachable,
        },
        error,
    }
}

/// Handle liveness probe (/health, /healthz)
pub fn health_check(state: Arc<AppState>) -> Response<BoxBody> {
    let response = build_health_response(&state, true, None);

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":true,"error":"Serialization failed"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(body))
        .unwrap()
}

/// Handle readiness probe (/ready, /readyz)
///
/// Issues a throwaway ledger read; a failing store returns 503 so load
/// balancers stop routing purchases here.
pub async fn readiness_check(state: Arc<AppState>) -> Response<BoxBody> {
    let probe = state.authority.store().get_account("__readiness_probe__").await;
    let (reachable, error) = match probe {
        Ok(_) => (true, None),
        Err(e) => (false, Some(e.to_string())),
    };

    let response = build_health_response(&state, reachable, error);
    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"healthy":false,"error":"Serialization failed"}"#.to_string());

    let status = if reachable {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    Response::builder()
        .status(status)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(body))
        .unwrap()
}

/// Version information for deployment verification
#[derive(Serialize)]
pub struct VersionResponse {
    /// Cargo package version
    pub version: &'static str,
    /// Git commit hash (short)
    pub commit: &'static str,
    /// Build timestamp
    pub build_time: &'static str,
    /// Service name
    pub service: &'static str,
}

/// Handle version endpoint (/version)
pub fn version_info() -> Response<BoxBody> {
    let response = VersionResponse {
        version: env!("CARGO_PKG_VERSION"),
        commit: option_env!("GIT_COMMIT_SHORT").unwrap_or("unknown"),
        build_time: option_env!("BUILD_TIMESTAMP").unwrap_or("unknown"),
        service: "bursar",
    };

    let body = serde_json::to_string(&response)
        .unwrap_or_else(|_| r#"{"version":"unknown","commit":"unknown"}"#.to_string());

    Response::builder()
        .status(StatusCode::OK)
        .header("Content-Type", "application/json")
        .header("Access-Control-Allow-Origin", "*")
        .body(full_body(body))
        .unwrap()
}
