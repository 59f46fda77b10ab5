//! Decision metrics for the operator endpoint
//!
//! Thread-safe counters for gateway decisions: checks, allows, denials by
//! code, admissions by rate category, plus a short ring of recent denials.

use crate::access_control::{AccessDecision, ErrorCode, Operation, RateCategory};
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Instant, SystemTime};

/// Gateway metrics collector
pub struct GateMetrics {
    start_time: Instant,
    start_system_time: SystemTime,
    total_checks: AtomicU64,
    total_allowed: AtomicU64,
    data: RwLock<MetricsData>,
    max_recent_denials: usize,
}

#[derive(Default)]
struct MetricsData {
    denied_by_code: BTreeMap<ErrorCode, u64>,
    admitted_by_category: BTreeMap<RateCategory, u64>,
    recent_denials: VecDeque<DenialRecord>,
}

/// One recent denial
#[derive(Debug, Clone, Serialize)]
pub struct DenialRecord {
    pub request_id: String,
    pub action: String,
    pub resource_type: String,
    pub code: ErrorCode,
    pub reason: String,
    /// Seconds since the Unix epoch
    pub timestamp: u64,
}

/// Overall metrics snapshot for the API
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub start_time: u64,
    pub total_checks: u64,
    pub total_allowed: u64,
    pub total_denied: u64,
    pub denied_by_code: BTreeMap<ErrorCode, u64>,
    pub admitted_by_category: BTreeMap<RateCategory, u64>,
    pub recent_denials: Vec<DenialRecord>,
}

fn unix_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl GateMetrics {
    pub fn new() -> Self {
        Self::with_capacity(100)
    }

    /// Collector keeping at most `max_recent_denials` denials
    pub fn with_capacity(max_recent_denials: usize) -> Self {
        Self {
            start_time: Instant::now(),
            start_system_time: SystemTime::now(),
            total_checks: AtomicU64::new(0),
            total_allowed: AtomicU64::new(0),
            data: RwLock::new(MetricsData {
                recent_denials: VecDeque::with_capacity(max_recent_denials),
                ..Default::default()
            }),
            max_recent_denials,
        }
    }

    fn write_data(&self) -> RwLockWriteGuard<'_, MetricsData> {
        self.data.write().unwrap_or_else(|poisoned| {
            tracing::warn!("metrics data lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn read_data(&self) -> RwLockReadGuard<'_, MetricsData> {
        self.data.read().unwrap_or_else(|poisoned| {
            tracing::warn!("metrics data lock poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Record the outcome of one check
    pub fn record_decision(
        &self,
        request_id: &str,
        action: &str,
        resource_type: &str,
        operation: Operation,
        decision: &AccessDecision,
    ) {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        if decision.is_allowed() {
            self.total_allowed.fetch_add(1, Ordering::Relaxed);
            if let Some(category) = operation.category() {
                *self
                    .write_data()
                    .admitted_by_category
                    .entry(category)
                    .or_default() += 1;
            }
            return;
        }

        let code = decision.code().unwrap_or(ErrorCode::AccessDenied);
        let mut data = self.write_data();
        *data.denied_by_code.entry(code).or_default() += 1;

        if self.max_recent_denials == 0 {
            return;
        }
        if data.recent_denials.len() >= self.max_recent_denials {
            data.recent_denials.pop_front();
        }
        data.recent_denials.push_back(DenialRecord {
            request_id: request_id.to_string(),
            action: action.to_string(),
            resource_type: resource_type.to_string(),
            code,
            reason: decision.reason().unwrap_or_default().to_string(),
            timestamp: unix_secs(SystemTime::now()),
        });
    }

    pub fn total_checks(&self) -> u64 {
        self.total_checks.load(Ordering::Relaxed)
    }

    pub fn denied(&self, code: ErrorCode) -> u64 {
        self.read_data()
            .denied_by_code
            .get(&code)
            .copied()
            .unwrap_or(0)
    }

    /// Get a snapshot of all metrics; recent denials newest first
    pub fn snapshot(&self) -> MetricsSnapshot {
        let total_checks = self.total_checks.load(Ordering::Relaxed);
        let total_allowed = self.total_allowed.load(Ordering::Relaxed);
        let data = self.read_data();

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            start_time: unix_secs(self.start_system_time),
            total_checks,
            total_allowed,
            total_denied: data.denied_by_code.values().sum(),
            denied_by_code: data.denied_by_code.clone(),
            admitted_by_category: data.admitted_by_category.clone(),
            recent_denials: data.recent_denials.iter().rev().cloned().collect(),
        }
    }
}

impl Default for GateMetrics {
    fn default() -> Self {
        Self::new()
    }
}
