//! Background job queue for sync log writes.
//!
//! Export and import bookkeeping is pushed onto a single tokio worker so the
//! request path never waits on log-table writes. Delivery is at-least-once:
//! a job may be applied more than once after a retry, which the upserting
//! [`SyncLogStore`] tolerates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use libsql::Connection;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::db::{LibSqlSyncLogStore, SyncLogStore};
use crate::error::{Error, Result};
use crate::models::{CollectionId, EntityId, ImportedEntry};

/// A sync log write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncLogJob {
    WriteExported {
        collection_id: CollectionId,
        unique_id: EntityId,
        commit_id: Option<i64>,
    },
    WriteImported(ImportedEntry),
}

impl SyncLogJob {
    /// Task name used in logs
    pub const fn name(&self) -> &'static str {
        match self {
            Self::WriteExported { .. } => "sync_log.write_exported",
            Self::WriteImported(_) => "sync_log.write_imported",
        }
    }

    pub const fn collection_id(&self) -> CollectionId {
        match self {
            Self::WriteExported { collection_id, .. } => *collection_id,
            Self::WriteImported(entry) => entry.collection_id,
        }
    }

    /// Apply the write to a log store
    pub async fn apply<L: SyncLogStore>(&self, logs: &L) -> Result<()> {
        match self {
            Self::WriteExported {
                collection_id,
                unique_id,
                commit_id,
            } => logs.write_exported(*collection_id, unique_id, *commit_id).await,
            Self::WriteImported(entry) => logs.write_imported(entry).await,
        }
    }
}

/// Asynchronous, at-least-once executor for sync log writes
pub trait JobQueue {
    /// Hand a job to the queue without waiting for it to run
    fn enqueue(&self, job: SyncLogJob) -> Result<()>;
}

enum Envelope {
    Job(SyncLogJob),
    Flush(oneshot::Sender<()>),
}

/// Single-worker queue writing into the libSQL sync log tables
pub struct SyncLogQueue {
    sender: mpsc::UnboundedSender<Envelope>,
    worker: JoinHandle<()>,
    failed: Arc<AtomicU64>,
}

impl SyncLogQueue {
    /// Spawn the worker on the current tokio runtime
    pub fn spawn(conn: Connection, config: &EngineConfig) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let failed = Arc::new(AtomicU64::new(0));
        let policy = RetryPolicy {
            max_attempts: config.queue_max_attempts.max(1),
            delay: config.queue_retry_delay(),
        };

        let worker = tokio::spawn(run_worker(conn, receiver, policy, Arc::clone(&failed)));

        Self {
            sender,
            worker,
            failed,
        }
    }

    /// Wait until every job enqueued before this call has been processed
    pub async fn flush(&self) -> Result<()> {
        let (done, waiter) = oneshot::channel();
        self.sender
            .send(Envelope::Flush(done))
            .map_err(|_| Error::Queue("sync log queue is closed".into()))?;
        waiter
            .await
            .map_err(|_| Error::Queue("sync log worker stopped before flushing".into()))
    }

    /// Jobs dropped after exhausting their retries
    pub fn failed_jobs(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Drain pending jobs and stop the worker
    pub async fn shutdown(self) -> Result<()> {
        drop(self.sender);
        self.worker
            .await
            .map_err(|error| Error::Queue(format!("sync log worker failed: {error}")))
    }
}

impl JobQueue for SyncLogQueue {
    fn enqueue(&self, job: SyncLogJob) -> Result<()> {
        tracing::trace!(task = job.name(), collection_id = %job.collection_id(), "Enqueued job");
        self.sender
            .send(Envelope::Job(job))
            .map_err(|_| Error::Queue("sync log queue is closed".into()))
    }
}

#[derive(Debug, Clone, Copy)]
struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

async fn run_worker(
    conn: Connection,
    mut receiver: mpsc::UnboundedReceiver<Envelope>,
    policy: RetryPolicy,
    failed: Arc<AtomicU64>,
) {
    let logs = LibSqlSyncLogStore::new(&conn);

    while let Some(envelope) = receiver.recv().await {
        match envelope {
            Envelope::Job(job) => {
                if let Err(error) = apply_with_retry(&logs, &job, policy).await {
                    failed.fetch_add(1, Ordering::Relaxed);
                    tracing::error!(
                        task = job.name(),
                        collection_id = %job.collection_id(),
                        "Dropping sync log job after {} attempts: {error}",
                        policy.max_attempts
                    );
                }
            }
            Envelope::Flush(done) => {
                // Caller may have stopped waiting
                let _ = done.send(());
            }
        }
    }

    tracing::debug!("Sync log worker stopped");
}

async fn apply_with_retry<L: SyncLogStore>(
    logs: &L,
    job: &SyncLogJob,
    policy: RetryPolicy,
) -> Result<()> {
    let mut attempt = 1;
    loop {
        match job.apply(logs).await {
            Ok(()) => return Ok(()),
            Err(error) if attempt < policy.max_attempts && error.is_retryable() => {
                tracing::warn!(
                    task = job.name(),
                    attempt,
                    "Sync log write failed, retrying: {error}"
                );
                tokio::time::sleep(policy.delay * attempt).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Database, PurgeReport};
    use crate::models::ExportedEntry;
    use std::sync::atomic::AtomicU32;

    fn collection_id() -> CollectionId {
        CollectionId::new(1).unwrap()
    }

    fn export_job(id: &str, commit_id: Option<i64>) -> SyncLogJob {
        SyncLogJob::WriteExported {
            collection_id: collection_id(),
            unique_id: EntityId::from(id),
            commit_id,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flush_waits_for_earlier_jobs() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = SyncLogQueue::spawn(db.background_connection().await.unwrap(), &EngineConfig::default());

        queue.enqueue(export_job("T1", Some(1))).unwrap();
        queue.enqueue(export_job("T2", Some(2))).unwrap();
        queue
            .enqueue(SyncLogJob::WriteImported(ImportedEntry {
                collection_id: collection_id(),
                remote_id: "r-1".into(),
                remote_revision: "a".into(),
                local_id: Some(EntityId::from("T1")),
                local_revision: Some(1),
            }))
            .unwrap();
        queue.flush().await.unwrap();

        let logs = LibSqlSyncLogStore::new(db.connection());
        assert_eq!(logs.get_exported(collection_id()).await.unwrap().len(), 2);
        assert_eq!(logs.get_imported(collection_id()).await.unwrap().len(), 1);
        assert_eq!(queue.failed_jobs(), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_shutdown_drains_and_closes() {
        let db = Database::open_in_memory().await.unwrap();
        let queue = SyncLogQueue::spawn(db.background_connection().await.unwrap(), &EngineConfig::default());

        queue.enqueue(export_job("T1", Some(4))).unwrap();
        queue.shutdown().await.unwrap();

        let logs = LibSqlSyncLogStore::new(db.connection());
        assert_eq!(
            logs.get_exported(collection_id()).await.unwrap(),
            vec![ExportedEntry {
                collection_id: collection_id(),
                unique_id: EntityId::from("T1"),
                commit_id: Some(4),
            }]
        );
    }

    /// Log store failing a fixed number of writes before succeeding
    struct FlakyLogs {
        failures_left: AtomicU32,
        writes: AtomicU32,
    }

    impl FlakyLogs {
        fn failing(times: u32) -> Self {
            Self {
                failures_left: AtomicU32::new(times),
                writes: AtomicU32::new(0),
            }
        }

        fn attempt(&self) -> Result<()> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let left = self.failures_left.load(Ordering::SeqCst);
            if left > 0 {
                self.failures_left.store(left - 1, Ordering::SeqCst);
                return Err(Error::Database("database is locked".into()));
            }
            Ok(())
        }
    }

    impl SyncLogStore for FlakyLogs {
        async fn get_exported(&self, _: CollectionId) -> Result<Vec<ExportedEntry>> {
            Ok(Vec::new())
        }

        async fn get_imported(&self, _: CollectionId) -> Result<Vec<ImportedEntry>> {
            Ok(Vec::new())
        }

        async fn write_exported(&self, _: CollectionId, _: &EntityId, _: Option<i64>) -> Result<()> {
            self.attempt()
        }

        async fn write_imported(&self, _: &ImportedEntry) -> Result<()> {
            self.attempt()
        }

        async fn purge_orphaned(&self) -> Result<PurgeReport> {
            Ok(PurgeReport::default())
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            delay: Duration::from_millis(1),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_recovers_from_transient_failure() {
        let logs = FlakyLogs::failing(2);
        apply_with_retry(&logs, &export_job("T1", Some(1)), policy(3))
            .await
            .unwrap();
        assert_eq!(logs.writes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_retry_gives_up_after_max_attempts() {
        let logs = FlakyLogs::failing(5);
        let result = apply_with_retry(&logs, &export_job("T1", Some(1)), policy(2)).await;
        assert!(result.is_err());
        assert_eq!(logs.writes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_job_names() {
        assert_eq!(export_job("T1", None).name(), "sync_log.write_exported");
        assert_eq!(export_job("T1", None).collection_id(), collection_id());
    }
}
