//! Configuration types for site-gate
//!
//! This module defines the configuration structure that can be loaded from
//! TOML files and/or environment variables. Every section has serde
//! defaults, so an empty file yields a working read-only gateway.

use crate::access_control::policy::Verdict;
use crate::access_control::{RateCategory, Scope, WriteKind};
use crate::rate_limit::Ceilings;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    /// Master switch for the audit trail; overrides `audit.enabled` when set
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit_logging: Option<bool>,

    /// Scope defaults and site-wide operating modes
    pub access: AccessConfig,

    /// Per-category rate limits
    pub rate_limiting: RateLimitConfig,

    /// Audit sink settings
    pub audit: AuditConfig,

    /// Resource-type families
    pub resources: ResourceConfig,

    /// Declarative validation tables, keyed by table name
    pub policies: HashMap<String, PolicyTableConfig>,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Operator endpoint configuration
    pub dashboard: DashboardConfigToml,
}

impl AppConfig {
    /// Whether audit records should be written at all
    pub fn audit_enabled(&self) -> bool {
        self.audit_logging.unwrap_or(self.audit.enabled)
    }
}

/// Scope and mode configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AccessConfig {
    /// Block every write and admin operation
    pub read_only_mode: bool,

    /// Honour writes only for the kinds in `config_only_allowed_write_kinds`
    pub config_only_mode: bool,

    /// Write kinds still permitted while config-only mode is on
    pub config_only_allowed_write_kinds: Vec<WriteKind>,

    /// Scopes granted when no trusted override is present
    pub default_scopes: Vec<Scope>,

    /// Ceiling on anything a request can obtain, overrides included
    pub allowed_scopes: Vec<Scope>,

    /// Honour a scope list sent in a request header
    pub trust_scopes_via_header: bool,

    /// Honour a scope list sent as a query parameter
    pub trust_scopes_via_query: bool,

    /// Honour a scope list taken from the process environment
    pub trust_scopes_via_env: bool,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            read_only_mode: false,
            config_only_mode: false,
            config_only_allowed_write_kinds: vec![WriteKind::Config],
            default_scopes: vec![Scope::Read],
            allowed_scopes: vec![Scope::Read, Scope::Write, Scope::Admin],
            trust_scopes_via_header: false,
            trust_scopes_via_query: false,
            trust_scopes_via_env: false,
        }
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// When false every mutating operation is admitted
    pub enabled: bool,

    pub max_writes_per_minute: u32,
    pub max_writes_per_hour: u32,

    /// Unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_deletes_per_minute: Option<u32>,
    pub max_deletes_per_hour: u32,

    /// Unbounded when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_structure_changes_per_minute: Option<u32>,
    pub max_structure_changes_per_hour: u32,

    /// Mix the client-supplied client-id header into the client identity
    pub trust_client_id_header: bool,

    /// Counters idle for this long are dropped by `evict_idle`
    pub idle_eviction_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_writes_per_minute: 30,
            max_writes_per_hour: 500,
            max_deletes_per_minute: None,
            max_deletes_per_hour: 50,
            max_structure_changes_per_minute: None,
            max_structure_changes_per_hour: 100,
            trust_client_id_header: false,
            idle_eviction_secs: 7200,
        }
    }
}

impl RateLimitConfig {
    /// Minute and hour ceilings for a category
    pub fn ceilings(&self, category: RateCategory) -> Ceilings {
        match category {
            RateCategory::Writes => Ceilings {
                per_minute: Some(self.max_writes_per_minute),
                per_hour: Some(self.max_writes_per_hour),
            },
            RateCategory::Deletes => Ceilings {
                per_minute: self.max_deletes_per_minute,
                per_hour: Some(self.max_deletes_per_hour),
            },
            RateCategory::StructureChanges => Ceilings {
                per_minute: self.max_structure_changes_per_minute,
                per_hour: Some(self.max_structure_changes_per_hour),
            },
        }
    }
}

/// Audit configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuditConfig {
    pub enabled: bool,

    /// Records kept by the in-memory sink before the oldest are dropped
    pub capacity: usize,

    pub sink: AuditSinkKind,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: 10_000,
            sink: AuditSinkKind::Memory,
        }
    }
}

/// Where audit records go
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditSinkKind {
    /// Bounded in-memory store, queryable by the operator endpoint
    #[default]
    Memory,
    /// Structured tracing events
    Tracing,
    /// Both of the above
    Both,
}

/// Resource-type families (regex patterns, case-insensitive).
///
/// A resource type matching `content` or `ops` gets that write kind;
/// everything else counts as configuration. `structure` marks the types
/// whose writes are charged to `structure_changes`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ResourceConfig {
    pub content: Vec<String>,
    pub ops: Vec<String>,
    pub structure: Vec<String>,
}

fn patterns(list: &[&str]) -> Vec<String> {
    list.iter().map(|p| p.to_string()).collect()
}

impl Default for ResourceConfig {
    fn default() -> Self {
        Self {
            content: patterns(&[
                "^node$",
                "^taxonomy_term$",
                "^user$",
                "^media$",
                "^file$",
                "^comment$",
                "^menu_link_content$",
                "^paragraph$",
                "^block_content$",
                "^redirect$",
                "^path_alias$",
                "^webform_submission$",
                "^content_moderation_state$",
            ]),
            ops: patterns(&[
                "^cache",
                "^cron$",
                "^ultimate_cron",
                "^queue",
                "^state$",
                "^search_index$",
                "^sitemap$",
            ]),
            structure: patterns(&[
                "^node_type$",
                "^field_config$",
                "^field_storage_config$",
                "^taxonomy_vocabulary$",
                "^user_role$",
                "^view$",
                "^menu$",
                "^media_type$",
                "^comment_type$",
                "^block_content_type$",
                "^paragraphs_type$",
                "^entity_form_display$",
                "^entity_view_display$",
                "^webform$",
                "^image_style$",
            ]),
        }
    }
}

/// One declarative validation table
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PolicyTableConfig {
    /// Verdict when no rule matches
    pub default: Verdict,

    /// Ordered rules; the first matching pattern decides
    pub rules: Vec<PolicyRuleConfig>,
}

impl Default for PolicyTableConfig {
    fn default() -> Self {
        Self {
            default: Verdict::Allow,
            rules: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyRuleConfig {
    pub pattern: String,
    pub verdict: Verdict,
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Output format (pretty, json)
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable output
    #[default]
    Pretty,
    /// JSON structured output
    Json,
}

/// Operator endpoint configuration (TOML format)
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfigToml {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

impl Default for DashboardConfigToml {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 19893,
        }
    }
}
