use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};
use uuid::Uuid;

/// One governance audit record for a finished step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the step finished.
    pub timestamp: DateTime<Utc>,
    /// Plan the step belongs to.
    pub plan_id: Uuid,
    /// Step the record is about.
    pub step_id: String,
    /// Agent that ran the step; `None` when it was rejected before a claim.
    pub agent_id: Option<String>,
    /// Whether the step passed governance.
    pub outcome: AuditOutcome,
    /// Measured or reported execution time.
    pub execution_time_ms: u64,
    /// Error text, violation reason or outcome payload.
    #[serde(default)]
    pub detail: serde_json::Value,
}

/// Verdict recorded for a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    /// The step completed and passed its checks.
    Success,
    /// The step failed, timed out or violated governance.
    Failure,
}

/// Destination for audit records.
///
/// `record` is called from inside the scheduler and must return without
/// blocking on I/O.
pub trait AuditSink: Send + Sync {
    /// Accept one record.
    fn record(&self, event: AuditEvent);
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopAuditSink;

impl AuditSink for NoopAuditSink {
    fn record(&self, _event: AuditEvent) {}
}

/// Keeps records in memory; useful for tests and for embedding callers that
/// ship records themselves.
#[derive(Debug, Default)]
pub struct MemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl MemoryAuditSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record, oldest first.
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().clone()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) {
        self.events.lock().push(event);
    }
}

/// Append-only audit log persisted as JSON lines.
///
/// Records are handed to a background writer over an unbounded channel, so
/// `record` never waits on the disk.
pub struct AuditLog {
    tx: mpsc::UnboundedSender<WriterMsg>,
    path: PathBuf,
}

enum WriterMsg {
    Record(AuditEvent),
    Flush(oneshot::Sender<()>),
}

impl AuditLog {
    /// Create a new AuditLog writing to `<log_dir>/audit.jsonl`.
    ///
    /// Spawns the writer task, so this must be called inside a tokio runtime.
    pub fn new(log_dir: PathBuf) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<WriterMsg>();
        let path = log_dir.join("audit.jsonl");
        let log_file = path.clone();

        tokio::spawn(async move {
            if let Err(e) = tokio::fs::create_dir_all(&log_dir).await {
                warn!(dir = %log_dir.display(), error = %e, "audit: cannot create log directory");
                return;
            }
            let mut file = match tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .await
            {
                Ok(file) => file,
                Err(e) => {
                    warn!(file = %log_file.display(), error = %e, "audit: cannot open log file");
                    return;
                }
            };

            while let Some(msg) = rx.recv().await {
                let event = match msg {
                    WriterMsg::Record(event) => event,
                    WriterMsg::Flush(done) => {
                        let _ = done.send(());
                        continue;
                    }
                };
                let Ok(line) = serde_json::to_string(&event) else {
                    continue;
                };
                let line = format!("{line}\n");
                if let Err(e) = file.write_all(line.as_bytes()).await {
                    warn!(error = %e, "audit: write failed");
                    continue;
                }
                let _ = file.flush().await;
            }
        });

        Self { tx, path }
    }

    /// Path of the JSON-lines file.
    pub fn path(&self) -> &PathBuf {
        &self.path
    }

    /// Wait until every record sent before this call has been written.
    ///
    /// Returns immediately if the writer task has stopped.
    pub async fn flush(&self) {
        let (done, written) = oneshot::channel();
        if self.tx.send(WriterMsg::Flush(done)).is_ok() {
            let _ = written.await;
        }
    }
}

impl AuditSink for AuditLog {
    fn record(&self, event: AuditEvent) {
        info!(
            plan_id = %event.plan_id,
            step_id = %event.step_id,
            outcome = ?event.outcome,
            "audit"
        );
        let _ = self.tx.send(WriterMsg::Record(event));
    }
}
