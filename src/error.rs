//! Error types for site-gate
//!
//! Policy denials are never errors: they travel as `AccessDecision` data.
//! The enums here cover configuration problems, caller misuse of the
//! gateway API, and infrastructure failures in the counter store or the
//! audit sink.

use thiserror::Error;

/// Top-level application error
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Gateway misuse: {0}")]
    Gate(#[from] GateError),

    #[error("Counter store error: {0}")]
    Store(#[from] StoreError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(String),

    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Invalid regex pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },
}

/// Programming errors made by a caller of the gateway.
///
/// These are not runtime policy outcomes; a correct call site never
/// produces one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("action must not be empty")]
    MissingAction,

    #[error("resource type must not be empty")]
    MissingResourceType,

    #[error("unknown policy table '{0}'")]
    UnknownPolicy(String),
}

/// Failures of the rate-limit counter store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),
}

/// Failures while writing to an audit sink
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit sink unavailable: {0}")]
    Unavailable(String),

    #[error("failed to serialize audit record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for the application
pub type Result<T> = std::result::Result<T, AppError>;

/// Result type alias for gateway calls
pub type GateResult<T> = std::result::Result<T, GateError>;
