//! The audit log
//!
//! Writes are fire-and-forget and never run on the caller's thread. Inside
//! a Tokio runtime each record is appended on a tracked background task.
//! Outside one it is queued for a dedicated `audit-writer` thread, started
//! on first use; a full queue drops the record and counts it as failed.
//! `flush` and `shutdown` wait for both paths.

use super::record::{AuditEvent, AuditOutcome, AuditRecord};
use super::sink::{AuditSink, FanoutAuditSink, MemoryAuditSink, TracingAuditSink};
use crate::config::{AppConfig, AuditSinkKind};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, warn};

/// Records the writer thread may hold before new ones are dropped
const WRITER_QUEUE_CAPACITY: usize = 1024;

enum WriterMessage {
    Write(AuditRecord),
    Flush(oneshot::Sender<()>),
}

pub struct AuditLog {
    enabled: bool,
    sink: Arc<dyn AuditSink>,
    memory: Option<Arc<MemoryAuditSink>>,
    sequence: AtomicU64,
    tracker: TaskTracker,
    writer: OnceLock<Option<mpsc::Sender<WriterMessage>>>,
    failures: Arc<AtomicU64>,
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLog")
            .field("enabled", &self.enabled)
            .field("sink", &self.sink.name())
            .field("recorded", &self.recorded())
            .field("failed_writes", &self.failed_writes())
            .finish()
    }
}

impl AuditLog {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            enabled: true,
            sink,
            memory: None,
            sequence: AtomicU64::new(0),
            tracker: TaskTracker::new(),
            writer: OnceLock::new(),
            failures: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Log backed by a memory sink that `memory()` exposes for queries
    pub fn in_memory(capacity: usize) -> Self {
        let memory = Arc::new(MemoryAuditSink::new(capacity));
        let mut log = Self::new(memory.clone());
        log.memory = Some(memory);
        log
    }

    /// Log that records nothing
    pub fn disabled() -> Self {
        let mut log = Self::new(Arc::new(TracingAuditSink));
        log.enabled = false;
        log
    }

    pub fn from_config(config: &AppConfig) -> Self {
        if !config.audit_enabled() {
            debug!("Audit logging disabled");
            return Self::disabled();
        }
        match config.audit.sink {
            AuditSinkKind::Memory => Self::in_memory(config.audit.capacity),
            AuditSinkKind::Tracing => Self::new(Arc::new(TracingAuditSink)),
            AuditSinkKind::Both => {
                let memory = Arc::new(MemoryAuditSink::new(config.audit.capacity));
                let sinks: Vec<Arc<dyn AuditSink>> = vec![memory.clone(), Arc::new(TracingAuditSink)];
                let mut log = Self::new(Arc::new(FanoutAuditSink::new(sinks)));
                log.memory = Some(memory);
                log
            }
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queryable store, when the log writes to one
    pub fn memory(&self) -> Option<&Arc<MemoryAuditSink>> {
        self.memory.as_ref()
    }

    /// Records handed to the sink so far
    pub fn recorded(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Sink writes that failed and were dropped
    pub fn failed_writes(&self) -> u64 {
        self.failures.load(Ordering::SeqCst)
    }

    pub fn record(&self, event: AuditEvent) {
        if !self.enabled {
            return;
        }

        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let record = AuditRecord::from_event(sequence, event);

        match Handle::try_current() {
            Ok(handle) => {
                let write = append(Arc::clone(&self.sink), Arc::clone(&self.failures), record);
                self.tracker.spawn_on(write, &handle);
            }
            Err(_) => self.enqueue(record),
        }
    }

    fn enqueue(&self, record: AuditRecord) {
        let sequence = record.sequence;
        let Some(writer) = self.writer() else {
            self.failures.fetch_add(1, Ordering::SeqCst);
            warn!(sequence, "audit writer unavailable, record dropped");
            return;
        };
        if let Err(e) = writer.try_send(WriterMessage::Write(record)) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            let reason = match e {
                mpsc::error::TrySendError::Full(_) => "queue full",
                mpsc::error::TrySendError::Closed(_) => "writer stopped",
            };
            warn!(sequence, reason, "audit record dropped");
        }
    }

    fn writer(&self) -> Option<&mpsc::Sender<WriterMessage>> {
        self.writer
            .get_or_init(|| spawn_writer(Arc::clone(&self.sink), Arc::clone(&self.failures)))
            .as_ref()
    }

    /// Writer thread handle, only if something was queued already
    fn started_writer(&self) -> Option<mpsc::Sender<WriterMessage>> {
        self.writer.get().and_then(|w| w.clone())
    }

    pub fn log_success(
        &self,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Value,
    ) {
        self.record(
            AuditEvent::new(AuditOutcome::Success, action, resource_type, resource_id)
                .actor(actor_id)
                .context(context),
        );
    }

    pub fn log_failure(
        &self,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        context: Value,
    ) {
        self.record(
            AuditEvent::new(AuditOutcome::Failure, action, resource_type, resource_id)
                .actor(actor_id)
                .context(context),
        );
    }

    /// Record a refusal; `reason` lands in the record context
    pub fn log_denied(
        &self,
        actor_id: &str,
        action: &str,
        resource_type: &str,
        resource_id: Option<&str>,
        reason: &str,
        code: Option<&str>,
    ) {
        let context = match code {
            Some(code) => json!({ "reason": reason, "code": code }),
            None => json!({ "reason": reason }),
        };
        self.record(
            AuditEvent::new(AuditOutcome::Denied, action, resource_type, resource_id)
                .actor(actor_id)
                .context(context),
        );
    }

    /// Wait for every write recorded so far
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
        self.drain_writer().await;
    }

    /// `flush` for code running outside a runtime.
    ///
    /// Panics if called from async code, like any blocking tokio call.
    pub fn flush_blocking(&self) {
        let Some(writer) = self.started_writer() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if writer.blocking_send(WriterMessage::Flush(done)).is_ok() {
            let _ = wait.blocking_recv();
        }
    }

    async fn drain_writer(&self) {
        let Some(writer) = self.started_writer() else {
            return;
        };
        let (done, wait) = oneshot::channel();
        if writer.send(WriterMessage::Flush(done)).await.is_ok() {
            let _ = wait.await;
        }
    }

    /// Wait for in-flight writes; later records still go through
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.drain_writer().await;
        debug!(
            recorded = self.recorded(),
            failed = self.failed_writes(),
            "Audit log drained"
        );
    }
}

async fn append(sink: Arc<dyn AuditSink>, failures: Arc<AtomicU64>, record: AuditRecord) {
    let sequence = record.sequence;
    if let Err(e) = sink.append(record).await {
        failures.fetch_add(1, Ordering::SeqCst);
        warn!(sink = sink.name(), sequence, error = %e, "audit recording failed");
    }
}

/// Start the thread that appends records queued outside a runtime
fn spawn_writer(
    sink: Arc<dyn AuditSink>,
    failures: Arc<AtomicU64>,
) -> Option<mpsc::Sender<WriterMessage>> {
    let (tx, mut rx) = mpsc::channel::<WriterMessage>(WRITER_QUEUE_CAPACITY);
    let spawned = std::thread::Builder::new()
        .name("audit-writer".into())
        .spawn(move || {
            let runtime = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(runtime) => runtime,
                Err(e) => {
                    error!(error = %e, "audit writer could not start a runtime");
                    return;
                }
            };
            runtime.block_on(async move {
                while let Some(message) = rx.recv().await {
                    match message {
                        WriterMessage::Write(record) => {
                            append(Arc::clone(&sink), Arc::clone(&failures), record).await
                        }
                        WriterMessage::Flush(done) => {
                            let _ = done.send(());
                        }
                    }
                }
            });
            debug!("audit writer stopped");
        });

    match spawned {
        Ok(_) => Some(tx),
        Err(e) => {
            error!(error = %e, "failed to spawn audit writer thread");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditQuery;

    #[test]
    fn test_disabled_records_nothing() {
        let log = AuditLog::disabled();
        log.log_success("u1", "update", "node", Some("1"), Value::Null);
        assert_eq!(log.recorded(), 0);
        assert!(log.memory().is_none());
    }

    #[test]
    fn test_writer_thread_without_runtime() {
        let log = AuditLog::in_memory(10);
        log.log_denied("u1", "delete", "node", Some("4"), "no", Some("INSUFFICIENT_SCOPE"));
        log.flush_blocking();
        let records = log.memory().unwrap().query(&AuditQuery::default());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].outcome, AuditOutcome::Denied);
        assert_eq!(records[0].context["code"], "INSUFFICIENT_SCOPE");
    }

    #[tokio::test]
    async fn test_flush_waits_for_spawned_writes() {
        let log = AuditLog::in_memory(100);
        for i in 0..20 {
            log.log_success("u1", "update", "node", Some(&i.to_string()), Value::Null);
        }
        log.flush().await;
        let records = log.memory().unwrap().query(&AuditQuery::default());
        assert_eq!(records.len(), 20);
        assert_eq!(records.first().unwrap().sequence, 1);
        assert_eq!(records.last().unwrap().sequence, 20);
    }

    #[test]
    fn test_flush_blocking_without_writes() {
        let log = AuditLog::in_memory(10);
        log.flush_blocking();
        assert!(log.memory().unwrap().is_empty());
    }

    #[test]
    fn test_from_config_respects_master_switch() {
        let config = AppConfig {
            audit_logging: Some(false),
            ..Default::default()
        };
        assert!(!AuditLog::from_config(&config).is_enabled());

        let mut config = AppConfig::default();
        config.audit.sink = AuditSinkKind::Both;
        let log = AuditLog::from_config(&config);
        assert!(log.is_enabled());
        assert!(log.memory().is_some());
    }
}
