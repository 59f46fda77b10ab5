//! Access decisions
//!
//! The structured allow/deny value every gated call returns. A decision is
//! either fully allowed (no reason, no code) or fully denied (reason and
//! code always present); the constructors are the only way to build one.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Machine-readable denial code surfaced to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    InsufficientScope,
    AccessDenied,
    RateLimitExceeded,
    ReadOnlyMode,
    ConfigOnlyRestriction,
}

impl ErrorCode {
    pub const fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InsufficientScope => "INSUFFICIENT_SCOPE",
            ErrorCode::AccessDenied => "ACCESS_DENIED",
            ErrorCode::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ErrorCode::ReadOnlyMode => "READ_ONLY_MODE",
            ErrorCode::ConfigOnlyRestriction => "CONFIG_ONLY_RESTRICTION",
        }
    }

    pub const fn all() -> &'static [ErrorCode] {
        &[
            ErrorCode::InsufficientScope,
            ErrorCode::AccessDenied,
            ErrorCode::RateLimitExceeded,
            ErrorCode::ReadOnlyMode,
            ErrorCode::ConfigOnlyRestriction,
        ]
    }

    /// Whether resubmitting later can succeed without operator action
    pub const fn is_retryable(&self) -> bool {
        matches!(self, ErrorCode::RateLimitExceeded)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an access check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessDecision {
    allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<ErrorCode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after: Option<u64>,
}

impl AccessDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
            code: None,
            retry_after: None,
        }
    }

    pub fn deny(code: ErrorCode, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            code: Some(code),
            retry_after: None,
        }
    }

    /// Rate-limit denial carrying the seconds until the window rolls over
    pub fn rate_limited(reason: impl Into<String>, retry_after: u64) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
            code: Some(ErrorCode::RateLimitExceeded),
            retry_after: Some(retry_after),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    pub fn is_denied(&self) -> bool {
        !self.allowed
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }

    pub fn code(&self) -> Option<ErrorCode> {
        self.code
    }

    pub fn retry_after(&self) -> Option<u64> {
        self.retry_after
    }
}

impl fmt::Display for AccessDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.code, &self.reason) {
            (Some(code), Some(reason)) => write!(f, "denied [{}]: {}", code, reason),
            _ => f.write_str("allowed"),
        }
    }
}
