//! Per-category fixed-window rate limiter

use super::clock::{Clock, SystemClock};
use super::store::{Admission, Ceilings, CounterKey, CounterStore, MemoryCounterStore, WindowUsage};
use crate::access_control::{AccessDecision, ClientId, ErrorCode, RateCategory};
use crate::config::RateLimitConfig;
use crate::error::StoreError;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Snapshot of one client's limits and usage
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub enabled: bool,
    pub client_id: String,
    pub limits: BTreeMap<RateCategory, Ceilings>,
    /// Omitted while rate limiting is disabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<BTreeMap<RateCategory, WindowUsage>>,
}

pub struct RateLimiter {
    config: RwLock<Arc<RateLimitConfig>>,
    store: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("config", &self.config())
            .field("tracked_counters", &self.store.len())
            .finish()
    }
}

fn operation_noun(category: RateCategory) -> &'static str {
    match category {
        RateCategory::Writes => "write",
        RateCategory::Deletes => "delete",
        RateCategory::StructureChanges => "structure",
    }
}

impl RateLimiter {
    /// Limiter backed by an in-memory store and the wall clock
    pub fn new(config: RateLimitConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(MemoryCounterStore::new()),
            Arc::new(SystemClock),
        )
    }

    pub fn with_parts(
        config: RateLimitConfig,
        store: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config: RwLock::new(Arc::new(config)),
            store,
            clock,
        }
    }

    /// Current settings snapshot
    pub fn config(&self) -> Arc<RateLimitConfig> {
        let guard = self.config.read().unwrap_or_else(|poisoned| {
            warn!("Rate limit settings lock was poisoned, recovering");
            poisoned.into_inner()
        });
        Arc::clone(&guard)
    }

    /// Swap in new settings; existing counters are kept
    pub fn reconfigure(&self, config: RateLimitConfig) {
        let mut guard = self.config.write().unwrap_or_else(|poisoned| {
            warn!("Rate limit settings lock was poisoned, recovering");
            poisoned.into_inner()
        });
        *guard = Arc::new(config);
    }

    pub fn is_enabled(&self) -> bool {
        self.config().enabled
    }

    /// Count one operation of `category` for `client` if both windows allow it
    pub fn admit(&self, client: &ClientId, category: RateCategory) -> AccessDecision {
        let config = self.config();
        if !config.enabled {
            return AccessDecision::allow();
        }

        let key = CounterKey::new(client.clone(), category);
        let now = self.clock.now();
        match self.store.admit(&key, config.ceilings(category), now) {
            Ok(Admission::Admitted { minute, hour }) => {
                debug!(client = %client, category = %category, minute, hour, "Admitted");
                AccessDecision::allow()
            }
            Ok(Admission::Rejected {
                window,
                ceiling,
                retry_after,
            }) => {
                warn!(
                    client = %client,
                    category = %category,
                    window = %window,
                    ceiling,
                    retry_after,
                    "Rate limit exceeded"
                );
                AccessDecision::rate_limited(
                    format!(
                        "Rate limit exceeded: Maximum {} {} operations per {}. Try again in {} seconds.",
                        ceiling,
                        operation_noun(category),
                        window,
                        retry_after
                    ),
                    retry_after,
                )
            }
            Err(e) => {
                error!(client = %client, category = %category, error = %e, "Counter store failed, denying");
                AccessDecision::deny(
                    ErrorCode::AccessDenied,
                    "Rate limit state is unavailable; operation denied.",
                )
            }
        }
    }

    pub fn status(&self, client: &ClientId) -> RateLimitStatus {
        let config = self.config();
        let limits: BTreeMap<RateCategory, Ceilings> = RateCategory::all()
            .iter()
            .map(|c| (*c, config.ceilings(*c)))
            .collect();

        let usage = config.enabled.then(|| {
            let now = self.clock.now();
            RateCategory::all()
                .iter()
                .map(|category| {
                    let key = CounterKey::new(client.clone(), *category);
                    let usage = match self.store.usage(&key, now) {
                        Ok(usage) => usage.unwrap_or_default(),
                        Err(e) => {
                            warn!(category = %category, error = %e, "Could not read usage");
                            WindowUsage::default()
                        }
                    };
                    (*category, usage)
                })
                .collect()
        });

        RateLimitStatus {
            enabled: config.enabled,
            client_id: client.as_str().to_string(),
            limits,
            usage,
        }
    }

    /// Forget every counter of `client`
    pub fn reset(&self, client: &ClientId) -> Result<usize, StoreError> {
        let removed = self.store.reset(client)?;
        debug!(client = %client, removed, "Reset rate limit counters");
        Ok(removed)
    }

    /// Drop counters idle for at least `max_idle`
    pub fn evict_idle(&self, max_idle: Duration) -> Result<usize, StoreError> {
        let removed = self.store.evict_idle(self.clock.now(), max_idle.as_secs())?;
        if removed > 0 {
            debug!(removed, "Evicted idle rate limit counters");
        }
        Ok(removed)
    }

    pub fn tracked_counters(&self) -> usize {
        self.store.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::ManualClock;

    fn limiter(config: RateLimitConfig) -> (RateLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_700_000_000));
        let limiter = RateLimiter::with_parts(
            config,
            Arc::new(MemoryCounterStore::new()),
            clock.clone(),
        );
        (limiter, clock)
    }

    #[test]
    fn test_reason_names_ceiling_and_category() {
        let (limiter, _) = limiter(RateLimitConfig {
            max_deletes_per_hour: 1,
            ..Default::default()
        });
        let client = ClientId::from_raw("c1");
        assert!(limiter.admit(&client, RateCategory::Deletes).is_allowed());
        let denied = limiter.admit(&client, RateCategory::Deletes);
        assert_eq!(denied.code(), Some(ErrorCode::RateLimitExceeded));
        assert_eq!(denied.retry_after(), Some(3600));
        assert_eq!(
            denied.reason(),
            Some("Rate limit exceeded: Maximum 1 delete operations per hour. Try again in 3600 seconds.")
        );
    }

    #[test]
    fn test_disabled_status_omits_usage() {
        let (limiter, _) = limiter(RateLimitConfig {
            enabled: false,
            ..Default::default()
        });
        let status = limiter.status(&ClientId::from_raw("0123456789abcdef"));
        assert!(!status.enabled);
        assert!(status.usage.is_none());
        assert_eq!(status.client_id, "0123456789abcdef");
        let json = serde_json::to_value(&status).unwrap();
        assert!(json.get("usage").is_none());
        assert_eq!(json["limits"]["writes"]["per_minute"], 30);
    }

    #[test]
    fn test_status_reports_usage() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        let client = ClientId::from_raw("c1");
        limiter.admit(&client, RateCategory::Writes);
        limiter.admit(&client, RateCategory::Writes);
        clock.advance(Duration::from_secs(61));

        let usage = limiter.status(&client).usage.unwrap();
        assert_eq!(usage[&RateCategory::Writes].minute, 0);
        assert_eq!(usage[&RateCategory::Writes].hour, 2);
        assert_eq!(usage[&RateCategory::Deletes].hour, 0);
    }

    #[test]
    fn test_reconfigure_keeps_counters() {
        let (limiter, _) = limiter(RateLimitConfig::default());
        let client = ClientId::from_raw("c1");
        limiter.admit(&client, RateCategory::Writes);
        limiter.reconfigure(RateLimitConfig {
            max_writes_per_minute: 1,
            ..Default::default()
        });
        assert!(limiter.admit(&client, RateCategory::Writes).is_denied());
    }

    #[test]
    fn test_evict_idle_uses_clock() {
        let (limiter, clock) = limiter(RateLimitConfig::default());
        limiter.admit(&ClientId::from_raw("c1"), RateCategory::Writes);
        assert_eq!(limiter.evict_idle(Duration::from_secs(60)).unwrap(), 0);
        clock.advance(Duration::from_secs(7200));
        assert_eq!(limiter.evict_idle(Duration::from_secs(60)).unwrap(), 1);
        assert_eq!(limiter.tracked_counters(), 0);
    }
}
