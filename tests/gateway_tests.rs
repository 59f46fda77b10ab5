//! Access gateway integration tests
//!
//! Drive `AccessGateway::check_access` end to end with a manual clock and
//! an in-memory audit log.

use serde_json::json;
use site_gate::access_control::{
    Credential, ErrorCode, Principal, RequestContext, ScopeSet, Transport,
};
use site_gate::audit::{AuditLog, AuditOutcome, AuditQuery};
use site_gate::config::{AppConfig, load_config_from_str};
use site_gate::gateway::{AccessGateway, Authorization, GateSettings};
use site_gate::rate_limit::{ManualClock, MemoryCounterStore, RateLimiter};
use site_gate::GateError;
use std::sync::Arc;
use std::time::Duration;

const T0: u64 = 1_700_000_000;

struct Harness {
    gateway: AccessGateway,
    clock: Arc<ManualClock>,
    audit: Arc<AuditLog>,
}

fn harness(config: &AppConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(T0));
    let limiter = RateLimiter::with_parts(
        config.rate_limiting.clone(),
        Arc::new(MemoryCounterStore::new()),
        clock.clone(),
    );
    let audit = Arc::new(AuditLog::in_memory(1_000));
    let gateway = AccessGateway::new(
        GateSettings::from_config(config).unwrap(),
        Arc::new(limiter),
        audit.clone(),
    );
    Harness {
        gateway,
        clock,
        audit,
    }
}

fn user(id: &str, scopes: &str) -> RequestContext {
    RequestContext::anonymous()
        .with_principal(Principal::new(id))
        .with_credential(Credential::ApiKey {
            key_id: format!("key-{}", id),
            scopes: ScopeSet::parse(scopes),
        })
}

fn denied(audit: &AuditLog) -> usize {
    audit.flush_blocking();
    audit
        .memory()
        .unwrap()
        .query(&AuditQuery {
            outcome: Some(AuditOutcome::Denied),
            ..Default::default()
        })
        .len()
}

#[test]
fn test_writes_throttled_per_minute_then_recover() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
enabled = true
max_writes_per_minute = 2
max_writes_per_hour = 100
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read,write");

    let first = h.gateway.check_access(&ctx, "update", "node", Some("1")).unwrap();
    h.clock.advance(Duration::from_secs(1));
    let second = h.gateway.check_access(&ctx, "update", "node", Some("2")).unwrap();
    h.clock.advance(Duration::from_secs(1));
    let third = h.gateway.check_access(&ctx, "update", "node", Some("3")).unwrap();

    assert!(first.is_allowed());
    assert!(second.is_allowed());
    assert!(third.is_denied());
    assert_eq!(third.code(), Some(ErrorCode::RateLimitExceeded));
    assert_eq!(third.retry_after(), Some(58));
    assert_eq!(
        third.reason(),
        Some("Rate limit exceeded: Maximum 2 write operations per minute. Try again in 58 seconds.")
    );

    h.clock.set(T0 + 61);
    let fourth = h.gateway.check_access(&ctx, "update", "node", Some("4")).unwrap();
    assert!(fourth.is_allowed());
}

#[test]
fn test_config_only_blocks_content_allows_config() {
    let config = load_config_from_str(
        r#"
[access]
config_only_mode = true
config_only_allowed_write_kinds = ["config"]
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read,write");

    let content = h.gateway.check_access(&ctx, "update", "node", Some("7")).unwrap();
    assert!(content.is_denied());
    assert_eq!(content.code(), Some(ErrorCode::ConfigOnlyRestriction));
    assert!(content.reason().unwrap().contains("'node'"));

    let entity = h
        .gateway
        .check_access(&ctx, "update", "config_entity", Some("system.site"))
        .unwrap();
    assert!(entity.is_allowed());

    assert!(h.gateway.can_write_config(&ctx));
    assert!(!h.gateway.can_write(&ctx));
}

#[test]
fn test_config_only_restricts_admin_by_write_kind() {
    let config = load_config_from_str(
        r#"
[access]
config_only_mode = true
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read,write,admin");

    for rt in ["node", "cache_render"] {
        let decision = h.gateway.check_access(&ctx, "admin", rt, None).unwrap();
        assert_eq!(decision.code(), Some(ErrorCode::ConfigOnlyRestriction), "{}", rt);
        assert!(decision.reason().unwrap().contains(&format!("'{}'", rt)));
    }

    let config_target = h.gateway.check_access(&ctx, "admin", "config_entity", None).unwrap();
    assert!(config_target.is_allowed());
    assert_eq!(denied(&h.audit), 2);
}

#[test]
fn test_api_key_budget_survives_changing_agent() {
    let config = load_config_from_str(
        r#"
[access]
allowed_scopes = ["read", "write"]

[rate_limiting]
max_writes_per_minute = 1
"#,
    )
    .unwrap();
    let h = harness(&config);

    let keyed = |agent: &str| {
        RequestContext::anonymous()
            .with_transport(Transport::Http {
                remote_addr: Some("198.51.100.4".into()),
                user_agent: Some(agent.into()),
                accept_language: None,
                client_id_header: None,
                trusted_client_id: None,
            })
            .with_credential(Credential::ApiKey {
                key_id: "k1".into(),
                scopes: ScopeSet::parse("read,write"),
            })
    };

    let first = h.gateway.check_access(&keyed("agent/1"), "update", "node", None).unwrap();
    assert!(first.is_allowed());
    let second = h.gateway.check_access(&keyed("agent/2"), "update", "node", None).unwrap();
    assert_eq!(second.code(), Some(ErrorCode::RateLimitExceeded));
}

#[test]
fn test_read_only_takes_precedence_over_config_only() {
    let config = load_config_from_str(
        r#"
[access]
read_only_mode = true
config_only_mode = true
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read,write,admin");

    for (action, rt) in [("update", "config_entity"), ("update", "node"), ("admin", "module")] {
        let decision = h.gateway.check_access(&ctx, action, rt, None).unwrap();
        assert_eq!(decision.code(), Some(ErrorCode::ReadOnlyMode), "{} {}", action, rt);
    }

    let read = h.gateway.check_access(&ctx, "view", "node", Some("1")).unwrap();
    assert!(read.is_allowed());
}

#[test]
fn test_scope_denial_spends_no_budget() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
max_writes_per_minute = 1
"#,
    )
    .unwrap();
    let h = harness(&config);

    // Same principal, so both contexts share one rate key
    let reader = user("u1", "read");
    let writer = user("u1", "read,write");

    for _ in 0..5 {
        let d = h.gateway.check_access(&reader, "update", "node", None).unwrap();
        assert_eq!(d.code(), Some(ErrorCode::InsufficientScope));
    }

    let d = h.gateway.check_access(&writer, "update", "node", None).unwrap();
    assert!(d.is_allowed());
}

#[test]
fn test_categories_are_independent() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
max_writes_per_minute = 1
max_deletes_per_hour = 1
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read,write");

    assert!(h.gateway.check_access(&ctx, "update", "node", None).unwrap().is_allowed());
    assert!(h.gateway.check_access(&ctx, "delete", "node", None).unwrap().is_allowed());
    assert!(h.gateway.check_access(&ctx, "update", "node_type", None).unwrap().is_allowed());

    assert!(h.gateway.check_access(&ctx, "update", "node", None).unwrap().is_denied());
    let delete = h.gateway.check_access(&ctx, "delete", "node", None).unwrap();
    assert_eq!(delete.code(), Some(ErrorCode::RateLimitExceeded));
    assert!(delete.reason().unwrap().contains("delete operations per hour"));
}

#[test]
fn test_disabled_limiter_admits_everything() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
enabled = false
max_writes_per_minute = 1
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read,write");

    for _ in 0..10_000 {
        assert!(h.gateway.check_access(&ctx, "update", "node", None).unwrap().is_allowed());
    }
    assert_eq!(h.gateway.limiter().tracked_counters(), 0);
}

#[test]
fn test_clients_have_separate_budgets() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
max_writes_per_minute = 1
"#,
    )
    .unwrap();
    let h = harness(&config);

    let a = user("alice", "read,write");
    let b = user("bob", "read,write");
    assert!(h.gateway.check_access(&a, "create", "node", None).unwrap().is_allowed());
    assert!(h.gateway.check_access(&b, "create", "node", None).unwrap().is_allowed());
    assert!(h.gateway.check_access(&a, "create", "node", None).unwrap().is_denied());
}

#[test]
fn test_reads_are_never_rate_limited() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
max_writes_per_minute = 0
max_writes_per_hour = 0
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "read");

    for _ in 0..100 {
        assert!(h.gateway.check_access(&ctx, "get", "node", None).unwrap().is_allowed());
    }
    assert_eq!(h.gateway.limiter().tracked_counters(), 0);
}

#[test]
fn test_every_denial_is_audited() {
    let config = load_config_from_str(
        r#"
[access]
default_scopes = []
allowed_scopes = ["write"]
"#,
    )
    .unwrap();
    let h = harness(&config);
    let ctx = user("u1", "write");

    let read = h.gateway.check_access(&ctx, "view", "node", Some("3")).unwrap();
    assert_eq!(read.code(), Some(ErrorCode::InsufficientScope));
    let admin = h.gateway.check_access(&ctx, "admin", "module", None).unwrap();
    assert_eq!(admin.code(), Some(ErrorCode::InsufficientScope));

    assert_eq!(denied(&h.audit), 2);

    let records = h.audit.memory().unwrap().query(&AuditQuery::default());
    assert_eq!(records[0].actor_id, "u1");
    assert_eq!(records[0].resource_id.as_deref(), Some("3"));
    assert_eq!(records[0].context["code"], "INSUFFICIENT_SCOPE");
}

#[test]
fn test_empty_action_is_an_error() {
    let h = harness(&AppConfig::default());
    let ctx = user("u1", "read,write");

    assert!(matches!(
        h.gateway.check_access(&ctx, "", "node", None),
        Err(GateError::MissingAction)
    ));
    assert!(matches!(
        h.gateway.check_access(&ctx, "update", "  ", None),
        Err(GateError::MissingResourceType)
    ));
    assert_eq!(denied(&h.audit), 0);
}

#[test]
fn test_permit_records_outcome() {
    let h = harness(&AppConfig::default());
    let ctx = user("u1", "read,write");

    let auth = h.gateway.authorize(&ctx, "update", "node", Some("9")).unwrap();
    let Authorization::Granted(permit) = auth else {
        panic!("expected a permit");
    };
    permit.succeeded(json!({ "title": "New", "password": "x" }));
    h.audit.flush_blocking();

    let records = h.audit.memory().unwrap().query(&AuditQuery {
        outcome: Some(AuditOutcome::Success),
        ..Default::default()
    });
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].context["password"], "[REDACTED]");
    assert_eq!(records[0].context["title"], "New");
}

#[test]
fn test_reconfigure_takes_effect() {
    let h = harness(&AppConfig::default());
    let ctx = user("u1", "read,write");
    assert!(h.gateway.check_access(&ctx, "update", "node", None).unwrap().is_allowed());

    let mut config = AppConfig::default();
    config.access.read_only_mode = true;
    h.gateway.reconfigure(&config).unwrap();

    let d = h.gateway.check_access(&ctx, "update", "node", None).unwrap();
    assert_eq!(d.code(), Some(ErrorCode::ReadOnlyMode));
}

#[test]
fn test_policy_tables() {
    let h = harness(&AppConfig::default());

    assert!(h.gateway.check_policy("upload_extension", "php").unwrap().is_denied());
    assert!(h.gateway.check_policy("upload_extension", "png").unwrap().is_allowed());
    assert!(matches!(
        h.gateway.check_policy("no_such_table", "x"),
        Err(GateError::UnknownPolicy(name)) if name == "no_such_table"
    ));
}

#[test]
fn test_concurrent_checks_respect_ceiling() {
    let config = load_config_from_str(
        r#"
[rate_limiting]
max_writes_per_minute = 25
max_writes_per_hour = 1000
"#,
    )
    .unwrap();
    let h = Arc::new(harness(&config));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let h = Arc::clone(&h);
            std::thread::spawn(move || {
                let ctx = user("shared", "read,write");
                (0..10)
                    .filter(|_| {
                        h.gateway
                            .check_access(&ctx, "update", "node", None)
                            .unwrap()
                            .is_allowed()
                    })
                    .count()
            })
        })
        .collect();

    let admitted: usize = handles.into_iter().map(|t| t.join().unwrap()).sum();
    assert_eq!(admitted, 25);
}
