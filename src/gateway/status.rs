//! Operator-facing summary of the gateway's configuration

use super::gate::AccessGateway;
use crate::access_control::{RequestContext, ScopeSet, WriteKind};
use crate::rate_limit::RateLimitStatus;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub read_only_mode: bool,
    pub config_only_mode: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_only_allowed_write_kinds: Option<Vec<WriteKind>>,
    pub allowed_scopes: ScopeSet,
    pub default_scopes: ScopeSet,
    /// Scopes the reported context holds
    pub current_scopes: ScopeSet,
    pub can_read: bool,
    pub can_write: bool,
    pub can_write_config: bool,
    pub can_admin: bool,
    pub rate_limiting: RateLimitStatus,
    pub audit_enabled: bool,
    pub policies: Vec<String>,
    pub recommendations: Vec<String>,
}

impl StatusReport {
    /// Summarise `gateway` as seen by `ctx`
    pub fn collect(gateway: &AccessGateway, ctx: &RequestContext) -> Self {
        let settings = gateway.settings();
        let resolver = &settings.resolver;
        let scopes = resolver.resolve(ctx);
        let rate_limiting = gateway.rate_limit_status(ctx);
        let audit_enabled = gateway.audit().is_enabled();

        let mut recommendations = Vec::new();
        if !resolver.is_read_only() && !resolver.is_config_only() {
            recommendations.push(
                "Read-only mode is disabled. Enable read-only or config-only mode for production."
                    .to_string(),
            );
        }
        if !rate_limiting.enabled {
            recommendations.push("Rate limiting is disabled. Enable it for production.".to_string());
        }
        if scopes.can_write_config() || scopes.can_admin() {
            recommendations.push("Write/admin scopes are active. Use read-only for production.".to_string());
        }
        if !audit_enabled {
            recommendations.push("Audit logging is disabled.".to_string());
        }

        Self {
            read_only_mode: resolver.is_read_only(),
            config_only_mode: resolver.is_config_only(),
            config_only_allowed_write_kinds: scopes.config_only_kinds().map(<[WriteKind]>::to_vec),
            allowed_scopes: resolver.ceiling(),
            default_scopes: resolver.defaults(),
            current_scopes: scopes.effective(),
            can_read: scopes.can_read(),
            can_write: scopes.can_write(),
            can_write_config: scopes.can_write_config(),
            can_admin: scopes.can_admin(),
            rate_limiting,
            audit_enabled,
            policies: settings.policies.names().into_iter().map(String::from).collect(),
            recommendations,
        }
    }

    pub fn is_hardened(&self) -> bool {
        self.recommendations.is_empty()
    }
}
