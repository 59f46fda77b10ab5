//! Operator HTTP endpoint
//!
//! Read-only JSON views of the gateway's state, plus a counter reset.
//! Client ids in paths are the full hex digests found in status output and
//! in the `client_id` of rate-limit denials in the audit trail.

use crate::access_control::{ClientId, RequestContext};
use crate::audit::{AuditQuery, AuditRecord};
use crate::config::DashboardConfigToml;
use crate::dashboard::metrics::{GateMetrics, MetricsSnapshot};
use crate::gateway::{AccessGateway, StatusReport};
use crate::rate_limit::RateLimitStatus;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Default port for the operator endpoint
pub const DEFAULT_DASHBOARD_PORT: u16 = 19893;

/// Operator endpoint bind configuration
#[derive(Debug, Clone)]
pub struct DashboardConfig {
    /// Address to bind the server
    pub bind: SocketAddr,
    /// Enable the endpoint (default: true)
    pub enabled: bool,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], DEFAULT_DASHBOARD_PORT)),
            enabled: true,
        }
    }
}

impl DashboardConfig {
    /// Create config from host and port
    pub fn new(host: &str, port: u16) -> Result<Self, std::net::AddrParseError> {
        let bind: SocketAddr = format!("{}:{}", host, port).parse()?;
        Ok(Self {
            bind,
            enabled: true,
        })
    }

    pub fn from_toml(config: &DashboardConfigToml) -> Result<Self, std::net::AddrParseError> {
        let mut dashboard = Self::new(&config.host, config.port)?;
        dashboard.enabled = config.enabled;
        Ok(dashboard)
    }
}

/// Shared state for handlers
#[derive(Clone)]
pub struct DashboardState {
    pub gateway: Arc<AccessGateway>,
    pub metrics: Arc<GateMetrics>,
}

#[derive(Serialize)]
struct StatusResponse {
    version: &'static str,
    tracked_counters: usize,
    audit_records: u64,
    audit_failed_writes: u64,
    #[serde(flatten)]
    report: StatusReport,
    metrics: MetricsSnapshot,
}

#[derive(Serialize)]
struct ResetResponse {
    client_id: String,
    removed: usize,
}

/// Build the router; exposed so tests can drive it without a socket
pub fn router(state: DashboardState) -> Router {
    Router::new()
        .route("/api/status", get(api_status))
        .route("/api/rate-limits/{client}", get(api_rate_limits))
        .route("/api/rate-limits/{client}/reset", post(api_reset))
        .route("/api/audit", get(api_audit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the operator endpoint until the task is cancelled
pub async fn run_dashboard(config: DashboardConfig, state: DashboardState) -> anyhow::Result<()> {
    if !config.enabled {
        info!("Dashboard is disabled");
        return Ok(());
    }

    let listener = bind_available(config.bind).await?;
    info!("Dashboard server running at http://{}", listener.local_addr()?);

    axum::serve(listener, router(state)).await?;

    Ok(())
}

/// Bind the preferred address, then the next 10 ports, then any port
async fn bind_available(preferred: SocketAddr) -> std::io::Result<TcpListener> {
    if let Ok(listener) = TcpListener::bind(preferred).await {
        return Ok(listener);
    }

    for offset in 1..=10u16 {
        let Some(port) = preferred.port().checked_add(offset) else {
            break;
        };
        if let Ok(listener) = TcpListener::bind(SocketAddr::new(preferred.ip(), port)).await {
            warn!(preferred = preferred.port(), port, "Preferred dashboard port in use");
            return Ok(listener);
        }
    }

    warn!(preferred = preferred.port(), "No nearby port free, letting the OS choose");
    TcpListener::bind(SocketAddr::new(preferred.ip(), 0)).await
}

async fn api_status(State(state): State<DashboardState>) -> Json<StatusResponse> {
    let gateway = &state.gateway;
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        tracked_counters: gateway.limiter().tracked_counters(),
        audit_records: gateway.audit().recorded(),
        audit_failed_writes: gateway.audit().failed_writes(),
        report: StatusReport::collect(gateway, &RequestContext::anonymous()),
        metrics: state.metrics.snapshot(),
    })
}

fn parse_client(raw: String) -> Result<ClientId, Response> {
    if ClientId::is_well_formed(&raw) {
        return Ok(ClientId::from_raw(raw));
    }
    Err((
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "client id must be 1-64 hex characters" })),
    )
        .into_response())
}

async fn api_rate_limits(State(state): State<DashboardState>, Path(client): Path<String>) -> Response {
    match parse_client(client) {
        Ok(client) => Json::<RateLimitStatus>(state.gateway.limiter().status(&client)).into_response(),
        Err(rejected) => rejected,
    }
}

async fn api_reset(State(state): State<DashboardState>, Path(client): Path<String>) -> Response {
    let client = match parse_client(client) {
        Ok(client) => client,
        Err(rejected) => return rejected,
    };
    match state.gateway.limiter().reset(&client) {
        Ok(removed) => {
            info!(client = %client, removed, "Rate limit counters reset by operator");
            Json(ResetResponse {
                client_id: client.as_str().to_string(),
                removed,
            })
            .into_response()
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn api_audit(State(state): State<DashboardState>, Query(query): Query<AuditQuery>) -> Response {
    match state.gateway.audit().memory() {
        Some(store) => Json::<Vec<AuditRecord>>(store.query(&query)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "audit trail is not kept in memory" })),
        )
            .into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dashboard_config_default() {
        let config = DashboardConfig::default();
        assert_eq!(config.bind.port(), DEFAULT_DASHBOARD_PORT);
        assert!(config.enabled);
    }

    #[test]
    fn test_dashboard_config_from_toml() {
        let config = DashboardConfig::from_toml(&DashboardConfigToml {
            enabled: false,
            host: "127.0.0.1".into(),
            port: 8080,
        })
        .unwrap();
        assert_eq!(config.bind.port(), 8080);
        assert!(!config.enabled);
    }

    #[tokio::test]
    async fn test_bind_available_falls_back() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let listener = bind_available(addr).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), addr.port());
    }
}
