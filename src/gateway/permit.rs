//! Permits for allowed operations
//!
//! `AccessGateway::authorize` hands out a `Permit` only for an allowed
//! decision, and the permit is the only way to write the matching
//! success/failure record. Consuming it writes exactly one record.

use crate::access_control::AccessDecision;
use crate::audit::{AuditEvent, AuditLog, AuditOutcome};
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Result of `AccessGateway::authorize`
#[derive(Debug)]
pub enum Authorization {
    Granted(Permit),
    Denied(AccessDecision),
}

impl Authorization {
    pub fn is_granted(&self) -> bool {
        matches!(self, Authorization::Granted(_))
    }

    /// The permit, or the denial to hand back to the caller
    pub fn into_result(self) -> Result<Permit, AccessDecision> {
        match self {
            Authorization::Granted(permit) => Ok(permit),
            Authorization::Denied(decision) => Err(decision),
        }
    }
}

#[must_use = "report the outcome with `succeeded` or `failed`"]
#[derive(Debug)]
pub struct Permit {
    audit: Arc<AuditLog>,
    request_id: String,
    actor_id: String,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    reported: bool,
}

impl Permit {
    pub(crate) fn new(
        audit: Arc<AuditLog>,
        request_id: &str,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> Self {
        Self {
            audit,
            request_id: request_id.to_string(),
            actor_id: actor_id.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            resource_id: resource_id.map(String::from),
            reported: false,
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn action(&self) -> &str {
        &self.action
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn resource_id(&self) -> Option<&str> {
        self.resource_id.as_deref()
    }

    /// The operation ran and succeeded
    pub fn succeeded(self, context: Value) {
        self.finish(AuditOutcome::Success, context);
    }

    /// The operation ran and failed
    pub fn failed(self, context: Value) {
        self.finish(AuditOutcome::Failure, context);
    }

    fn finish(mut self, outcome: AuditOutcome, context: Value) {
        self.reported = true;
        self.audit.record(
            AuditEvent::new(
                outcome,
                self.action.as_str(),
                self.resource_type.as_str(),
                self.resource_id.as_deref(),
            )
            .actor(self.actor_id.as_str())
            .context(context),
        );
    }
}

impl Drop for Permit {
    fn drop(&mut self) {
        if !self.reported {
            warn!(
                request_id = %self.request_id,
                action = %self.action,
                resource_type = %self.resource_type,
                "Permit dropped without reporting an outcome"
            );
        }
    }
}
