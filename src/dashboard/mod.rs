//! Operator dashboard module
//!
//! A small JSON API for operators: configured modes and limits, gateway
//! decision counters, per-client rate-limit usage and the audit trail.

pub mod metrics;
pub mod server;

pub use metrics::{DenialRecord, GateMetrics, MetricsSnapshot};
pub use server::{DEFAULT_DASHBOARD_PORT, DashboardConfig, DashboardState, router, run_dashboard};
