//! The access gateway
//!
//! Each check walks one state machine and never retries in place:
//!
//! ```text
//! START -> SCOPE_CHECKED -> DENIED
//!                        -> RATE_CHECKED -> DENIED
//!                                        -> ALLOWED
//! ```
//!
//! Scope and mode denials happen before the rate limiter is consulted, so
//! a refused operation never spends rate budget. Every denial is written
//! to the audit log as `denied`; rate-limit denials carry the full client
//! id so an operator can look up or reset that client's counters.

use super::permit::{Authorization, Permit};
use super::settings::GateSettings;
use crate::access_control::{
    AccessDecision, ClientId, ErrorCode, Operation, RequestContext, ResolvedScopes, Verdict,
};
use crate::audit::{AuditEvent, AuditLog, AuditOutcome};
use crate::config::AppConfig;
use crate::dashboard::GateMetrics;
use crate::error::{ConfigError, GateError, GateResult};
use crate::rate_limit::{RateLimitStatus, RateLimiter};
use serde_json::{Value, json};
use std::sync::{Arc, RwLock};
use tracing::{debug, trace, warn};

pub struct AccessGateway {
    settings: RwLock<Arc<GateSettings>>,
    limiter: Arc<RateLimiter>,
    audit: Arc<AuditLog>,
    metrics: Option<Arc<GateMetrics>>,
}

impl std::fmt::Debug for AccessGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessGateway")
            .field("settings", &self.settings())
            .field("limiter", &self.limiter)
            .field("audit", &self.audit)
            .finish()
    }
}

impl AccessGateway {
    pub fn new(settings: GateSettings, limiter: Arc<RateLimiter>, audit: Arc<AuditLog>) -> Self {
        Self {
            settings: RwLock::new(Arc::new(settings)),
            limiter,
            audit,
            metrics: None,
        }
    }

    /// Gateway with an in-memory limiter and the configured audit sink
    pub fn from_config(config: &AppConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(
            GateSettings::from_config(config)?,
            Arc::new(RateLimiter::new(config.rate_limiting.clone())),
            Arc::new(AuditLog::from_config(config)),
        ))
    }

    pub fn with_metrics(mut self, metrics: Arc<GateMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current settings snapshot
    pub fn settings(&self) -> Arc<GateSettings> {
        let guard = self.settings.read().unwrap_or_else(|poisoned| {
            warn!("Gateway settings lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    /// Swap the settings; checks already past START keep their snapshot
    pub fn update_settings(&self, settings: GateSettings) {
        let mut guard = self.settings.write().unwrap_or_else(|poisoned| {
            warn!("Gateway settings lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = Arc::new(settings);
        debug!("Gateway settings updated");
    }

    /// Rebuild settings and limiter configuration from `config`
    pub fn reconfigure(&self, config: &AppConfig) -> Result<(), ConfigError> {
        let settings = GateSettings::from_config(config)?;
        self.limiter.reconfigure(config.rate_limiting.clone());
        self.update_settings(settings);
        Ok(())
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn audit(&self) -> &Arc<AuditLog> {
        &self.audit
    }

    pub fn metrics(&self) -> Option<&Arc<GateMetrics>> {
        self.metrics.as_ref()
    }

    pub fn resolve_scopes(&self, ctx: &RequestContext) -> ResolvedScopes {
        self.settings().resolver.resolve(ctx)
    }

    pub fn can_read(&self, ctx: &RequestContext) -> bool {
        self.resolve_scopes(ctx).can_read()
    }

    pub fn can_write(&self, ctx: &RequestContext) -> bool {
        self.resolve_scopes(ctx).can_write()
    }

    pub fn can_write_config(&self, ctx: &RequestContext) -> bool {
        self.resolve_scopes(ctx).can_write_config()
    }

    pub fn can_admin(&self, ctx: &RequestContext) -> bool {
        self.resolve_scopes(ctx).can_admin()
    }

    pub fn read_access_denied(&self, ctx: &RequestContext) -> AccessDecision {
        self.resolve_scopes(ctx).read_denied()
    }

    pub fn write_access_denied(&self, ctx: &RequestContext) -> AccessDecision {
        self.resolve_scopes(ctx).write_denied()
    }

    pub fn client_id(&self, ctx: &RequestContext) -> ClientId {
        ClientId::derive(ctx, self.settings().trust_client_id_header)
    }

    pub fn rate_limit_status(&self, ctx: &RequestContext) -> RateLimitStatus {
        self.limiter.status(&self.client_id(ctx))
    }

    /// Decide whether `action` on `resource_type` may proceed.
    ///
    /// Denials are returned as data and already recorded in the audit log.
    /// `Err` means the call itself was malformed.
    pub fn check_access(
        &self,
        ctx: &RequestContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> GateResult<AccessDecision> {
        validate(action, resource_type)?;
        let settings = self.settings();
        let operation = settings.classifier.operation(action, resource_type);
        Ok(self.evaluate(&settings, ctx, action, operation, resource_type, resource_id))
    }

    /// Like `check_access`, with the operation already classified.
    ///
    /// `action` is only recorded, so audit trails keep the caller's name
    /// for what it did.
    pub fn check_access_as(
        &self,
        ctx: &RequestContext,
        action: &str,
        operation: Operation,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> GateResult<AccessDecision> {
        validate(action, resource_type)?;
        let settings = self.settings();
        Ok(self.evaluate(&settings, ctx, action, operation, resource_type, resource_id))
    }

    /// `check_access`, returning a permit that records the outcome
    pub fn authorize(
        &self,
        ctx: &RequestContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> GateResult<Authorization> {
        let decision = self.check_access(ctx, action, resource_type, resource_id)?;
        if decision.is_denied() {
            return Ok(Authorization::Denied(decision));
        }
        Ok(Authorization::Granted(Permit::new(
            Arc::clone(&self.audit),
            &ctx.request_id,
            ctx.actor_id(),
            action,
            resource_type,
            resource_id,
        )))
    }

    fn evaluate(
        &self,
        settings: &GateSettings,
        ctx: &RequestContext,
        action: &str,
        operation: Operation,
        resource_type: &str,
        resource_id: Option<&str>,
    ) -> AccessDecision {
        trace!(
            request_id = %ctx.request_id,
            action,
            resource_type,
            operation = %operation,
            "START"
        );

        let scopes = settings.resolver.resolve(ctx);
        let scope_decision = match operation {
            Operation::Read if !scopes.can_read() => Some(scopes.read_denied()),
            Operation::Admin => {
                let kind = settings.classifier.write_kind(resource_type);
                (!scopes.can_admin_kind(kind)).then(|| scopes.admin_kind_denied(resource_type, kind))
            }
            Operation::Mutate(_) => {
                let kind = settings.classifier.write_kind(resource_type);
                (!scopes.can_write_kind(kind)).then(|| scopes.write_kind_denied(resource_type, kind))
            }
            _ => None,
        };
        trace!(request_id = %ctx.request_id, granted = %scopes.granted(), "SCOPE_CHECKED");

        if let Some(denied) = scope_decision {
            return self.deny(ctx, action, operation, resource_type, resource_id, None, denied);
        }

        if let Some(category) = operation.category() {
            let client = ClientId::derive(ctx, settings.trust_client_id_header);
            let admitted = self.limiter.admit(&client, category);
            trace!(
                request_id = %ctx.request_id,
                client = %client,
                category = %category,
                allowed = admitted.is_allowed(),
                "RATE_CHECKED"
            );
            if admitted.is_denied() {
                return self.deny(
                    ctx,
                    action,
                    operation,
                    resource_type,
                    resource_id,
                    Some(&client),
                    admitted,
                );
            }
        }

        debug!(
            request_id = %ctx.request_id,
            action,
            resource_type,
            actor = ctx.actor_id(),
            "ALLOWED"
        );
        let decision = AccessDecision::allow();
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(&ctx.request_id, action, resource_type, operation, &decision);
        }
        decision
    }

    #[allow(clippy::too_many_arguments)]
    fn deny(
        &self,
        ctx: &RequestContext,
        action: &str,
        operation: Operation,
        resource_type: &str,
        resource_id: Option<&str>,
        client: Option<&ClientId>,
        decision: AccessDecision,
    ) -> AccessDecision {
        let reason = decision.reason().unwrap_or_default();
        let code = decision.code().map(|c| c.as_str());
        debug!(
            request_id = %ctx.request_id,
            action,
            resource_type,
            code = code.unwrap_or_default(),
            reason,
            "DENIED"
        );
        match client {
            Some(client) => {
                let mut context = json!({ "reason": reason, "client_id": client.as_str() });
                if let Some(code) = code {
                    context["code"] = json!(code);
                }
                self.audit.record(
                    AuditEvent::new(AuditOutcome::Denied, action, resource_type, resource_id)
                        .actor(ctx.actor_id())
                        .context(context),
                );
            }
            None => self
                .audit
                .log_denied(ctx.actor_id(), action, resource_type, resource_id, reason, code),
        }
        if let Some(metrics) = &self.metrics {
            metrics.record_decision(&ctx.request_id, action, resource_type, operation, &decision);
        }
        decision
    }

    pub fn log_success(
        &self,
        ctx: &RequestContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Value,
    ) {
        self.audit
            .log_success(ctx.actor_id(), action, resource_type, resource_id, context);
    }

    pub fn log_failure(
        &self,
        ctx: &RequestContext,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Value,
    ) {
        self.audit
            .log_failure(ctx.actor_id(), action, resource_type, resource_id, context);
    }

    /// Run `value` through the named policy table
    pub fn check_policy(&self, name: &str, value: &str) -> GateResult<AccessDecision> {
        let settings = self.settings();
        let outcome = settings
            .policies
            .evaluate(name, value)
            .ok_or_else(|| GateError::UnknownPolicy(name.to_string()))?;

        Ok(match outcome.verdict {
            Verdict::Allow => AccessDecision::allow(),
            Verdict::Deny => {
                let reason = match outcome.matched {
                    Some(rule) => format!("'{}' is not allowed by policy '{}' (rule {})", value, name, rule),
                    None => format!("'{}' is not allowed by policy '{}'", value, name),
                };
                AccessDecision::deny(ErrorCode::AccessDenied, reason)
            }
        })
    }
}

fn validate(action: &str, resource_type: &str) -> GateResult<()> {
    if action.trim().is_empty() {
        return Err(GateError::MissingAction);
    }
    if resource_type.trim().is_empty() {
        return Err(GateError::MissingResourceType);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access_control::{RateCategory, Scope};
    use crate::audit::{AuditOutcome, AuditQuery};
    use serde_json::json;

    fn gateway(config: AppConfig) -> AccessGateway {
        let audit = Arc::new(AuditLog::in_memory(100));
        AccessGateway::new(
            GateSettings::from_config(&config).unwrap(),
            Arc::new(RateLimiter::new(config.rate_limiting.clone())),
            audit,
        )
        .with_metrics(Arc::new(GateMetrics::new()))
    }

    fn writer_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.access.default_scopes = vec![Scope::Read, Scope::Write];
        config
    }

    fn records(gate: &AccessGateway) -> Vec<crate::audit::AuditRecord> {
        gate.audit().flush_blocking();
        gate.audit().memory().unwrap().query(&AuditQuery::default())
    }

    #[test]
    fn test_misuse_is_error() {
        let gate = gateway(AppConfig::default());
        let ctx = RequestContext::anonymous();
        assert_eq!(
            gate.check_access(&ctx, " ", "node", None),
            Err(GateError::MissingAction)
        );
        assert_eq!(
            gate.check_access(&ctx, "update", "", None),
            Err(GateError::MissingResourceType)
        );
        assert!(records(&gate).is_empty());
    }

    #[test]
    fn test_read_allowed_and_not_charged() {
        let gate = gateway(AppConfig::default());
        let ctx = RequestContext::anonymous();
        for _ in 0..100 {
            assert!(gate.check_access(&ctx, "list", "node", None).unwrap().is_allowed());
        }
        assert_eq!(gate.limiter().tracked_counters(), 0);
    }

    #[test]
    fn test_scope_denial_is_audited_and_not_charged() {
        let gate = gateway(AppConfig::default());
        let ctx = RequestContext::anonymous();
        let decision = gate.check_access(&ctx, "update", "node", Some("5")).unwrap();
        assert_eq!(decision.code(), Some(ErrorCode::InsufficientScope));
        assert_eq!(gate.limiter().tracked_counters(), 0);

        let trail = records(&gate);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].outcome, AuditOutcome::Denied);
        assert_eq!(trail[0].resource_id.as_deref(), Some("5"));
        assert_eq!(trail[0].context["code"], "INSUFFICIENT_SCOPE");
        assert_eq!(
            gate.metrics().unwrap().denied(ErrorCode::InsufficientScope),
            1
        );
    }

    #[test]
    fn test_check_access_as() {
        let gate = gateway(writer_config());
        let ctx = RequestContext::anonymous();
        let decision = gate
            .check_access_as(&ctx, "purge", Operation::Mutate(RateCategory::Deletes), "node", None)
            .unwrap();
        assert!(decision.is_allowed());
        let status = gate.rate_limit_status(&ctx);
        assert_eq!(status.usage.unwrap()[&RateCategory::Deletes].hour, 1);
        assert_eq!(
            gate.check_access_as(&ctx, "", Operation::Read, "node", None),
            Err(GateError::MissingAction)
        );
    }

    #[test]
    fn test_check_access_as_audits_caller_action() {
        let gate = gateway(AppConfig::default());
        let ctx = RequestContext::anonymous();
        let decision = gate
            .check_access_as(&ctx, "purge", Operation::Mutate(RateCategory::Deletes), "node", Some("3"))
            .unwrap();
        assert_eq!(decision.code(), Some(ErrorCode::InsufficientScope));

        let trail = records(&gate);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].action, "purge");
        assert_eq!(trail[0].resource_type, "node");
        assert_eq!(trail[0].resource_id.as_deref(), Some("3"));
    }

    #[test]
    fn test_rate_denial_audits_full_client_id() {
        let mut config = writer_config();
        config.rate_limiting.max_writes_per_minute = 1;
        let gate = gateway(config);
        let ctx = RequestContext::anonymous();
        assert!(gate.check_access(&ctx, "update", "node", None).unwrap().is_allowed());
        let denied = gate.check_access(&ctx, "update", "node", None).unwrap();
        assert_eq!(denied.code(), Some(ErrorCode::RateLimitExceeded));

        let trail = records(&gate);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].context["code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(trail[0].context["client_id"], gate.client_id(&ctx).as_str());
    }

    #[test]
    fn test_scope_denial_has_no_client_id() {
        let gate = gateway(AppConfig::default());
        gate.check_access(&RequestContext::anonymous(), "update", "node", None)
            .unwrap();
        assert!(records(&gate)[0].context.get("client_id").is_none());
    }

    #[test]
    fn test_permit_records_outcome() {
        let gate = gateway(writer_config());
        let ctx = RequestContext::anonymous();
        let permit = gate
            .authorize(&ctx, "update", "node", Some("9"))
            .unwrap()
            .into_result()
            .unwrap();
        permit.succeeded(json!({ "title": "x", "token": "t" }));

        let trail = records(&gate);
        assert_eq!(trail.len(), 1);
        assert_eq!(trail[0].outcome, AuditOutcome::Success);
        assert_eq!(trail[0].context["token"], "[REDACTED]");
    }

    #[test]
    fn test_denied_authorization_has_no_permit() {
        let gate = gateway(AppConfig::default());
        let auth = gate
            .authorize(&RequestContext::anonymous(), "delete", "node", None)
            .unwrap();
        assert!(!auth.is_granted());
        assert_eq!(records(&gate).len(), 1);
    }

    #[test]
    fn test_update_settings_takes_effect() {
        let gate = gateway(AppConfig::default());
        let ctx = RequestContext::anonymous();
        assert!(!gate.can_write(&ctx));
        gate.update_settings(GateSettings::from_config(&writer_config()).unwrap());
        assert!(gate.can_write(&ctx));
    }

    #[test]
    fn test_check_policy() {
        let gate = gateway(AppConfig::default());
        let denied = gate.check_policy("uri_scheme", "javascript:alert(1)").unwrap();
        assert_eq!(denied.code(), Some(ErrorCode::AccessDenied));
        assert!(gate.check_policy("role_name", "editor").unwrap().is_allowed());
        assert_eq!(
            gate.check_policy("nope", "x"),
            Err(GateError::UnknownPolicy("nope".into()))
        );
    }
}
