//! Audit records and queries

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

const SENSITIVE_KEYS: &[&str] = &[
    "password",
    "pass",
    "secret",
    "token",
    "key",
    "credentials",
    "api_key",
];

const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The operation ran and succeeded
    Success,
    /// The operation ran and failed
    Failure,
    /// The gateway refused the operation; nothing ran
    Denied,
}

impl AuditOutcome {
    pub const fn as_str(&self) -> &'static str {
        match self {
            AuditOutcome::Success => "success",
            AuditOutcome::Failure => "failure",
            AuditOutcome::Denied => "denied",
        }
    }
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a caller reports; the log turns it into an `AuditRecord`
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub actor_id: String,
    pub context: Value,
}

impl AuditEvent {
    pub fn new(
        outcome: AuditOutcome,
        action: impl Into<String>,
        resource_type: impl Into<String>,
        resource_id: Option<&str>,
    ) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.map(String::from),
            outcome,
            actor_id: "anonymous".to_string(),
            context: Value::Null,
        }
    }

    pub fn actor(mut self, actor_id: impl Into<String>) -> Self {
        self.actor_id = actor_id.into();
        self
    }

    pub fn context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// One immutable entry of the audit trail
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Monotonic per log, starting at 1
    pub sequence: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp_ms: u64,
    pub action: String,
    pub resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub outcome: AuditOutcome,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub context: Value,
}

impl AuditRecord {
    pub(crate) fn from_event(sequence: u64, event: AuditEvent) -> Self {
        Self {
            sequence,
            timestamp_ms: now_ms(),
            action: event.action,
            resource_type: event.resource_type,
            resource_id: event.resource_id,
            outcome: event.outcome,
            actor_id: event.actor_id,
            context: sanitize_context(event.context),
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn is_sensitive(key: &str) -> bool {
    let lower = key.to_ascii_lowercase();
    SENSITIVE_KEYS.iter().any(|s| lower.contains(s))
}

/// Replace the values of sensitive keys with a marker, at any depth
pub fn sanitize_context(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| {
                    let v = if is_sensitive(&k) {
                        Value::String(REDACTED.to_string())
                    } else {
                        sanitize_context(v)
                    };
                    (k, v)
                })
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => Value::Array(items.into_iter().map(sanitize_context).collect()),
        other => other,
    }
}

/// Filter over stored records; unset fields match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AuditQuery {
    pub resource_type: Option<String>,
    pub resource_id: Option<String>,
    pub outcome: Option<AuditOutcome>,
    pub actor_id: Option<String>,
    /// Inclusive lower bound, milliseconds
    pub since: Option<u64>,
    /// Exclusive upper bound, milliseconds
    pub until: Option<u64>,
    /// Keep only the newest `limit` matches
    pub limit: Option<usize>,
}

impl AuditQuery {
    pub fn matches(&self, record: &AuditRecord) -> bool {
        self.resource_type
            .as_ref()
            .is_none_or(|t| *t == record.resource_type)
            && self
                .resource_id
                .as_ref()
                .is_none_or(|id| record.resource_id.as_ref() == Some(id))
            && self.outcome.is_none_or(|o| o == record.outcome)
            && self.actor_id.as_ref().is_none_or(|a| *a == record.actor_id)
            && self.since.is_none_or(|s| record.timestamp_ms >= s)
            && self.until.is_none_or(|u| record.timestamp_ms < u)
    }
}
