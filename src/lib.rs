//! site-gate
//!
//! Access control, rate limiting and audit logging for a CMS tool server.
//!
//! ## Features
//!
//! - **Scope resolution** from API keys, a request header, a query parameter
//!   or the process environment, capped by a configured ceiling
//! - **Site-wide modes**: read-only, and config-only with an allow-list of
//!   write kinds
//! - **Fixed-window rate limits** per client and operation category, with
//!   atomic check-and-increment
//! - **Audit trail** with secret redaction, written off the request path
//! - **Declarative policy tables** for values such as upload extensions
//!
//! ## Decision Order
//!
//! ```text
//! validate → classify → scope check → rate limit → allow
//! ```
//!
//! A denial at any stage stops evaluation, consumes no rate budget and is
//! written to the audit log.
//!
//! ## Example Configuration
//!
//! ```toml
//! [access]
//! read_only_mode = false
//! config_only_mode = true
//! config_only_allowed_write_kinds = ["config", "ops"]
//! allowed_scopes = ["read", "write"]
//!
//! [rate_limiting]
//! enabled = true
//! max_writes_per_minute = 30
//! max_deletes_per_hour = 50
//! ```

pub mod access_control;
pub mod audit;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod gateway;
pub mod rate_limit;

// Re-export main types
pub use access_control::{AccessDecision, ClientId, ErrorCode, RequestContext, Scope, ScopeSet};
pub use audit::AuditLog;
pub use config::{AppConfig, load_config, load_config_from_str};
pub use error::{AppError, ConfigError, GateError, Result};
pub use gateway::{AccessGateway, Authorization, Permit, StatusReport};
pub use rate_limit::RateLimiter;
