//! Scope resolution
//!
//! Turns a `RequestContext` plus the access settings into the scopes the
//! caller effectively holds for one request. Resolution is pure and is
//! repeated on every request; nothing is cached between calls.
//!
//! ## Precedence
//!
//! 1. An authenticated API key's scopes
//! 2. The scope header (when `trust_scopes_via_header`)
//! 3. The scope query parameter (when `trust_scopes_via_query`)
//! 4. The scope environment variable (when `trust_scopes_via_env`)
//! 5. The configured default scopes
//!
//! Every source is intersected with `allowed_scopes`; an override that
//! intersects to nothing is skipped. The modes are applied last:
//! `read_only_mode` strips `write` and `admin`, `config_only_mode` limits
//! both `write` and `admin` to targets of the configured write kinds.

use super::context::{Credential, RequestContext};
use super::decision::{AccessDecision, ErrorCode};
use super::types::{Scope, ScopeSet, WriteKind};
use crate::config::AccessConfig;
use serde::Serialize;
use tracing::trace;

/// Where the granted scopes came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeSource {
    ApiKey,
    Header,
    Query,
    Environment,
    Default,
}

#[derive(Debug, Clone)]
pub struct ScopeResolver {
    ceiling: ScopeSet,
    defaults: ScopeSet,
    read_only: bool,
    config_only: Option<Vec<WriteKind>>,
    trust_header: bool,
    trust_query: bool,
    trust_env: bool,
}

impl ScopeResolver {
    pub fn from_config(config: &AccessConfig) -> Self {
        let mut ceiling: ScopeSet = config.allowed_scopes.iter().collect();
        if ceiling.is_empty() {
            ceiling = ScopeSet::EMPTY.with(Scope::Read);
        }

        let mut defaults = config
            .default_scopes
            .iter()
            .collect::<ScopeSet>()
            .intersection(ceiling);
        if defaults.is_empty() {
            defaults = ceiling;
        }

        let config_only = config.config_only_mode.then(|| {
            let mut kinds = config.config_only_allowed_write_kinds.clone();
            kinds.dedup();
            if kinds.is_empty() {
                kinds.push(WriteKind::Config);
            }
            kinds
        });

        Self {
            ceiling,
            defaults,
            read_only: config.read_only_mode,
            config_only,
            trust_header: config.trust_scopes_via_header,
            trust_query: config.trust_scopes_via_query,
            trust_env: config.trust_scopes_via_env,
        }
    }

    pub fn ceiling(&self) -> ScopeSet {
        self.ceiling
    }

    pub fn defaults(&self) -> ScopeSet {
        self.defaults
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn is_config_only(&self) -> bool {
        self.config_only.is_some()
    }

    /// Scopes `ctx` holds for this request
    pub fn resolve(&self, ctx: &RequestContext) -> ResolvedScopes {
        let (granted, source) = self.granted(ctx);
        trace!(
            request_id = %ctx.request_id,
            granted = %granted,
            source = ?source,
            "Resolved scopes"
        );
        ResolvedScopes {
            granted,
            read_only: self.read_only,
            config_only: self.config_only.clone(),
            source,
        }
    }

    fn granted(&self, ctx: &RequestContext) -> (ScopeSet, ScopeSource) {
        let api_key = ctx.credentials.iter().find_map(|c| match c {
            Credential::ApiKey { scopes, .. } => Some(*scopes),
            _ => None,
        });
        if let Some(scopes) = api_key.map(|s| s.intersection(self.ceiling))
            && !scopes.is_empty()
        {
            return (scopes, ScopeSource::ApiKey);
        }

        let overrides = [
            (self.trust_header, ScopeSource::Header),
            (self.trust_query, ScopeSource::Query),
            (self.trust_env, ScopeSource::Environment),
        ];
        for (trusted, source) in overrides {
            if !trusted {
                continue;
            }
            if let Some(raw) = raw_override(ctx, source) {
                let scopes = ScopeSet::parse(raw).intersection(self.ceiling);
                if !scopes.is_empty() {
                    return (scopes, source);
                }
            }
        }

        (self.defaults, ScopeSource::Default)
    }
}

fn raw_override(ctx: &RequestContext, source: ScopeSource) -> Option<&str> {
    ctx.credentials.iter().find_map(|c| match (c, source) {
        (Credential::ScopeHeader(raw), ScopeSource::Header)
        | (Credential::ScopeQuery(raw), ScopeSource::Query)
        | (Credential::ScopeEnv(raw), ScopeSource::Environment) => Some(raw.as_str()),
        _ => None,
    })
}

/// Scopes effective for one request, with the modes already folded in
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedScopes {
    granted: ScopeSet,
    read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    config_only: Option<Vec<WriteKind>>,
    source: ScopeSource,
}

impl ResolvedScopes {
    /// Scopes granted before the modes are applied
    pub fn granted(&self) -> ScopeSet {
        self.granted
    }

    /// Scopes left after read-only mode
    pub fn effective(&self) -> ScopeSet {
        if self.read_only {
            self.granted.without(Scope::Write).without(Scope::Admin)
        } else {
            self.granted
        }
    }

    pub fn source(&self) -> ScopeSource {
        self.source
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Write kinds still honoured, if config-only mode is on
    pub fn config_only_kinds(&self) -> Option<&[WriteKind]> {
        self.config_only.as_deref()
    }

    pub fn can_read(&self) -> bool {
        self.effective().contains(Scope::Read)
    }

    /// Write to any kind of target
    pub fn can_write(&self) -> bool {
        WriteKind::all().iter().all(|k| self.can_write_kind(*k))
    }

    pub fn can_write_config(&self) -> bool {
        self.can_write_kind(WriteKind::Config)
    }

    pub fn can_write_kind(&self, kind: WriteKind) -> bool {
        self.effective().contains(Scope::Write) && self.kind_allowed(kind)
    }

    pub fn can_admin(&self) -> bool {
        self.effective().contains(Scope::Admin)
    }

    /// Admin on a target of `kind`; config-only mode restricts admin too
    pub fn can_admin_kind(&self, kind: WriteKind) -> bool {
        self.can_admin() && self.kind_allowed(kind)
    }

    fn kind_allowed(&self, kind: WriteKind) -> bool {
        self.config_only
            .as_ref()
            .is_none_or(|kinds| kinds.contains(&kind))
    }

    pub fn read_denied(&self) -> AccessDecision {
        AccessDecision::deny(
            ErrorCode::InsufficientScope,
            format!(
                "Read operations not allowed for this connection. Scope: {}",
                self.granted
            ),
        )
    }

    pub fn write_denied(&self) -> AccessDecision {
        if self.read_only {
            return AccessDecision::deny(
                ErrorCode::ReadOnlyMode,
                "Write operations are disabled. Site is in read-only mode.",
            );
        }
        AccessDecision::deny(
            ErrorCode::InsufficientScope,
            format!(
                "Write operations not allowed for this connection. Scope: {}",
                self.granted
            ),
        )
    }

    pub fn admin_denied(&self) -> AccessDecision {
        if self.read_only {
            return AccessDecision::deny(
                ErrorCode::ReadOnlyMode,
                "Admin operations are disabled. Site is in read-only mode.",
            );
        }
        AccessDecision::deny(
            ErrorCode::InsufficientScope,
            format!(
                "Admin operations not allowed for this connection. Scope: {}",
                self.granted
            ),
        )
    }

    /// Denial for a write whose kind config-only mode blocks
    pub fn kind_denied(&self, resource_type: &str, kind: WriteKind) -> AccessDecision {
        let allowed: Vec<&str> = self
            .config_only
            .iter()
            .flatten()
            .map(|k| k.as_str())
            .collect();
        AccessDecision::deny(
            ErrorCode::ConfigOnlyRestriction,
            format!(
                "Config-only mode is enabled: {} writes to '{}' are not allowed. Allowed write kinds: {}",
                kind,
                resource_type,
                allowed.join(",")
            ),
        )
    }

    /// Denial for whatever `write` check failed for a target of `kind`
    pub fn write_kind_denied(&self, resource_type: &str, kind: WriteKind) -> AccessDecision {
        if self.effective().contains(Scope::Write) && !self.kind_allowed(kind) {
            self.kind_denied(resource_type, kind)
        } else {
            self.write_denied()
        }
    }

    /// Denial for whatever `admin` check failed for a target of `kind`
    pub fn admin_kind_denied(&self, resource_type: &str, kind: WriteKind) -> AccessDecision {
        if self.can_admin() && !self.kind_allowed(kind) {
            self.kind_denied(resource_type, kind)
        } else {
            self.admin_denied()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(config: AccessConfig) -> ScopeResolver {
        ScopeResolver::from_config(&config)
    }

    #[test]
    fn test_defaults_bounded_by_ceiling() {
        let r = resolver(AccessConfig {
            default_scopes: vec![Scope::Read, Scope::Admin],
            allowed_scopes: vec![Scope::Read, Scope::Write],
            ..Default::default()
        });
        let resolved = r.resolve(&RequestContext::anonymous());
        assert_eq!(resolved.granted(), ScopeSet::EMPTY.with(Scope::Read));
        assert_eq!(resolved.source(), ScopeSource::Default);
    }

    #[test]
    fn test_empty_ceiling_falls_back_to_read() {
        let r = resolver(AccessConfig {
            default_scopes: vec![],
            allowed_scopes: vec![],
            ..Default::default()
        });
        assert_eq!(r.ceiling(), ScopeSet::EMPTY.with(Scope::Read));
        assert!(r.resolve(&RequestContext::anonymous()).can_read());
    }

    #[test]
    fn test_untrusted_header_ignored() {
        let r = resolver(AccessConfig::default());
        let ctx = RequestContext::anonymous().with_credential(Credential::ScopeHeader("write".into()));
        let resolved = r.resolve(&ctx);
        assert!(!resolved.can_write());
        assert_eq!(resolved.source(), ScopeSource::Default);
    }

    #[test]
    fn test_trusted_header_used() {
        let r = resolver(AccessConfig {
            trust_scopes_via_header: true,
            ..Default::default()
        });
        let ctx = RequestContext::anonymous().with_credential(Credential::ScopeHeader("read, write".into()));
        let resolved = r.resolve(&ctx);
        assert!(resolved.can_write());
        assert_eq!(resolved.source(), ScopeSource::Header);
    }

    #[test]
    fn test_override_outside_ceiling_skipped() {
        let r = resolver(AccessConfig {
            allowed_scopes: vec![Scope::Read],
            trust_scopes_via_query: true,
            ..Default::default()
        });
        let ctx = RequestContext::anonymous().with_credential(Credential::ScopeQuery("admin".into()));
        let resolved = r.resolve(&ctx);
        assert!(!resolved.can_admin());
        assert_eq!(resolved.source(), ScopeSource::Default);
    }

    #[test]
    fn test_api_key_beats_header() {
        let r = resolver(AccessConfig {
            trust_scopes_via_header: true,
            ..Default::default()
        });
        let ctx = RequestContext::anonymous()
            .with_credential(Credential::ScopeHeader("read".into()))
            .with_credential(Credential::ApiKey {
                key_id: "k".into(),
                scopes: ScopeSet::EMPTY.with(Scope::Admin),
            });
        let resolved = r.resolve(&ctx);
        assert_eq!(resolved.source(), ScopeSource::ApiKey);
        assert!(resolved.can_admin());
        assert!(!resolved.can_read());
    }

    #[test]
    fn test_read_only_strips_write_and_admin() {
        let r = resolver(AccessConfig {
            read_only_mode: true,
            default_scopes: vec![Scope::Read, Scope::Write, Scope::Admin],
            ..Default::default()
        });
        let resolved = r.resolve(&RequestContext::anonymous());
        assert!(resolved.can_read());
        assert!(!resolved.can_write());
        assert!(!resolved.can_write_config());
        assert!(!resolved.can_admin());
        assert_eq!(resolved.write_denied().code(), Some(ErrorCode::ReadOnlyMode));
        assert_eq!(resolved.admin_denied().code(), Some(ErrorCode::ReadOnlyMode));
    }

    #[test]
    fn test_config_only_limits_write_kinds() {
        let r = resolver(AccessConfig {
            config_only_mode: true,
            default_scopes: vec![Scope::Read, Scope::Write],
            ..Default::default()
        });
        let resolved = r.resolve(&RequestContext::anonymous());
        assert!(resolved.can_write_config());
        assert!(!resolved.can_write());
        assert!(!resolved.can_write_kind(WriteKind::Content));
        assert_eq!(
            resolved.write_kind_denied("node", WriteKind::Content).code(),
            Some(ErrorCode::ConfigOnlyRestriction)
        );
    }

    #[test]
    fn test_config_only_limits_admin_kinds() {
        let r = resolver(AccessConfig {
            config_only_mode: true,
            default_scopes: vec![Scope::Read, Scope::Admin],
            ..Default::default()
        });
        let resolved = r.resolve(&RequestContext::anonymous());
        assert!(resolved.can_admin());
        assert!(resolved.can_admin_kind(WriteKind::Config));
        assert!(!resolved.can_admin_kind(WriteKind::Ops));
        assert_eq!(
            resolved.admin_kind_denied("cache_render", WriteKind::Ops).code(),
            Some(ErrorCode::ConfigOnlyRestriction)
        );

        let plain = resolver(AccessConfig::default()).resolve(&RequestContext::anonymous());
        assert_eq!(
            plain.admin_kind_denied("node", WriteKind::Content).code(),
            Some(ErrorCode::InsufficientScope)
        );
    }

    #[test]
    fn test_config_only_empty_kinds_means_config() {
        let r = resolver(AccessConfig {
            config_only_mode: true,
            config_only_allowed_write_kinds: vec![],
            default_scopes: vec![Scope::Write],
            ..Default::default()
        });
        let resolved = r.resolve(&RequestContext::anonymous());
        assert_eq!(resolved.config_only_kinds(), Some(&[WriteKind::Config][..]));
    }

    #[test]
    fn test_denial_wording() {
        let r = resolver(AccessConfig::default());
        let resolved = r.resolve(&RequestContext::anonymous());
        let denied = resolved.write_denied();
        assert_eq!(denied.code(), Some(ErrorCode::InsufficientScope));
        assert_eq!(
            denied.reason(),
            Some("Write operations not allowed for this connection. Scope: read")
        );
    }
}
