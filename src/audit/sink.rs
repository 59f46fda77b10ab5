//! Audit sinks
//!
//! A sink receives finished records. Sinks may fail; the log swallows the
//! failure after logging it, so a sink can never block or fail a caller.

use super::record::{AuditOutcome, AuditQuery, AuditRecord};
use crate::error::AuditError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, RwLock};
use tracing::{error, info, warn};

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError>;

    /// Short name used in logs
    fn name(&self) -> &str;
}

/// Bounded in-memory ring of records, queryable by the operator endpoint
#[derive(Debug)]
pub struct MemoryAuditSink {
    records: RwLock<VecDeque<AuditRecord>>,
    capacity: usize,
}

impl MemoryAuditSink {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity: capacity.max(1),
        }
    }

    /// Matching records ordered by sequence, newest `limit` kept
    pub fn query(&self, query: &AuditQuery) -> Vec<AuditRecord> {
        let records = self.records.read().unwrap_or_else(|poisoned| {
            warn!("Audit store lock was poisoned, recovering");
            poisoned.into_inner()
        });
        let mut matched: Vec<AuditRecord> = records
            .iter()
            .filter(|r| query.matches(r))
            .cloned()
            .collect();
        drop(records);

        matched.sort_by_key(|r| r.sequence);
        if let Some(limit) = query.limit
            && matched.len() > limit
        {
            matched.drain(..matched.len() - limit);
        }
        matched
    }

    pub fn len(&self) -> usize {
        self.records.read().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut records = self.records.write().unwrap_or_else(|poisoned| {
            warn!("Audit store lock was poisoned, recovering");
            poisoned.into_inner()
        });
        if records.len() >= self.capacity {
            records.pop_front();
        }
        records.push_back(record);
        Ok(())
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Emits every record as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let context = serde_json::to_string(&record.context)?;
        let resource_id = record.resource_id.as_deref().unwrap_or("");
        match record.outcome {
            AuditOutcome::Failure => error!(
                target: "site_gate::audit",
                sequence = record.sequence,
                action = %record.action,
                resource_type = %record.resource_type,
                resource_id,
                actor = %record.actor_id,
                context = %context,
                "Operation failed"
            ),
            outcome => info!(
                target: "site_gate::audit",
                sequence = record.sequence,
                action = %record.action,
                resource_type = %record.resource_type,
                resource_id,
                actor = %record.actor_id,
                outcome = %outcome,
                context = %context,
                "Operation recorded"
            ),
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "tracing"
    }
}

/// Writes each record to every inner sink; fails if any of them fails
pub struct FanoutAuditSink {
    sinks: Vec<Arc<dyn AuditSink>>,
}

impl FanoutAuditSink {
    pub fn new(sinks: Vec<Arc<dyn AuditSink>>) -> Self {
        Self { sinks }
    }
}

#[async_trait]
impl AuditSink for FanoutAuditSink {
    async fn append(&self, record: AuditRecord) -> Result<(), AuditError> {
        let mut first_error = None;
        for sink in &self.sinks {
            if let Err(e) = sink.append(record.clone()).await {
                warn!(sink = sink.name(), error = %e, "Audit sink failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn name(&self) -> &str {
        "fanout"
    }
}
