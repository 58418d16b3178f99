//! SQLite-backed event queue with a background uploader

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::db::Database;
use crate::error::{Error, Result};
use crate::settings::ClientConfig;
use crate::types::Record;
use crate::validator;

use super::client::{HttpTransport, Transport};
use super::events::EventBatch;
use super::{EventQueue, FlushCompletion, FlushReport};

/// Durable queue that uploads on its own runtime
///
/// Flushes are serialized: a flush triggered while another is running waits
/// for it, so an event is never part of two in-flight uploads.
pub struct SqliteEventQueue {
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    config: QueueConfig,
    /// Taken on drop so shutdown never blocks
    runtime: Option<tokio::runtime::Runtime>,
    flush_lock: Arc<tokio::sync::Mutex<()>>,
    debug: Arc<AtomicBool>,
}

impl SqliteEventQueue {
    /// Create a queue over an already-migrated database
    pub fn new(
        db: Arc<Database>,
        transport: Arc<dyn Transport>,
        config: QueueConfig,
    ) -> Result<Self> {
        config.validate()?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("eventkit-upload")
            .enable_all()
            .build()
            .map_err(|e| Error::Config(format!("failed to create upload runtime: {}", e)))?;

        Ok(Self {
            db,
            transport,
            config,
            runtime: Some(runtime),
            flush_lock: Arc::new(tokio::sync::Mutex::new(())),
            debug: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Create a queue that uploads to the endpoint in `client`
    pub fn with_http(db: Arc<Database>, client: &ClientConfig, config: QueueConfig) -> Result<Self> {
        let transport = HttpTransport::new(client, &config)?;
        Self::new(db, Arc::new(transport), config)
    }

    /// Delete queued events without uploading them
    pub fn purge(&self, namespace: Option<&str>) -> Result<usize> {
        let purged = self.db.purge_events(namespace)?;
        tracing::info!(purged, namespace = ?namespace, "Purged queued events");
        Ok(purged)
    }
}

impl EventQueue for SqliteEventQueue {
    fn enqueue(&self, namespace: &str, record: Record) -> Result<()> {
        validator::validate_record(&record)?;

        let event_id = Uuid::new_v4().to_string();
        let inserted = self.db.insert_event(
            namespace,
            &event_id,
            &record,
            Utc::now(),
            self.config.max_queued_events,
        )?;

        match inserted {
            Some(id) => {
                tracing::debug!(namespace = %namespace, id, "Queued event");
                Ok(())
            }
            None => Err(Error::Storage(format!(
                "queue is full ({} events)",
                self.config.max_queued_events
            ))),
        }
    }

    fn flush(&self, namespace: Option<&str>, completion: FlushCompletion) {
        // The snapshot bounds this flush to events queued before the call.
        let up_to_id = match self.db.max_event_id() {
            Ok(id) => id,
            Err(e) => return completion(Err(e)),
        };

        let Some(runtime) = self.runtime.as_ref() else {
            return completion(Err(Error::Config("upload runtime is shut down".to_string())));
        };

        let job = FlushJob {
            db: self.db.clone(),
            transport: self.transport.clone(),
            namespace: namespace.map(str::to_string),
            up_to_id,
            batch_size: self.config.batch_size,
            max_attempts: self.config.max_attempts,
            debug: self.debug.load(Ordering::Relaxed),
        };
        let flush_lock = self.flush_lock.clone();

        runtime.spawn(async move {
            let _guard = flush_lock.lock().await;
            completion(job.run().await);
        });
    }

    fn pending_count(&self, namespace: Option<&str>) -> Result<usize> {
        self.db.count_events(namespace)
    }

    fn set_debug_mode(&self, debug: bool) {
        self.debug.store(debug, Ordering::Relaxed);
    }
}

impl Drop for SqliteEventQueue {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Everything one flush needs, detached from the queue
struct FlushJob {
    db: Arc<Database>,
    transport: Arc<dyn Transport>,
    namespace: Option<String>,
    up_to_id: Option<i64>,
    batch_size: usize,
    max_attempts: u32,
    debug: bool,
}

impl FlushJob {
    async fn run(self) -> Result<FlushReport> {
        let mut report = FlushReport::default();
        let Some(up_to_id) = self.up_to_id else {
            return Ok(report);
        };

        let namespace = self.namespace.as_deref();
        let mut after_id = 0;
        let mut first_rejection: Option<String> = None;

        loop {
            let page = self
                .db
                .pending_events(namespace, after_id, up_to_id, self.batch_size)?;
            report.discarded += page.discarded;
            let Some(last_id) = page.last_id else {
                break;
            };
            after_id = last_id;
            if page.entries.is_empty() {
                continue;
            }

            let batch = EventBatch::from_entries(&page.entries);
            if self.debug {
                tracing::info!(events = batch.len(), body = ?batch.body(), "Uploading batch");
            }

            // Request-level failures leave the whole page queued.
            let outcome = self.transport.send(&batch).await?;

            report.delivered += self.db.delete_events(&outcome.accepted)?;

            if !outcome.rejected.is_empty() {
                let ids: Vec<i64> = outcome.rejected.iter().map(|(id, _)| *id).collect();
                let reason = &outcome.rejected[0].1;
                report.rejected += ids.len();

                let dropped = self
                    .db
                    .record_failed_attempts(&ids, reason, self.max_attempts)?;
                if dropped > 0 {
                    tracing::warn!(
                        dropped,
                        max_attempts = self.max_attempts,
                        "Dropped events rejected too many times"
                    );
                }
                report.dropped += dropped;
                first_rejection.get_or_insert_with(|| reason.clone());
            }

            if self.debug {
                tracing::info!(
                    accepted = outcome.accepted.len(),
                    rejected = outcome.rejected.len(),
                    "Batch uploaded"
                );
            }
        }

        match first_rejection {
            Some(reason) => Err(Error::ServerResponse {
                status: 200,
                message: format!(
                    "{} of {} events rejected: {}",
                    report.rejected,
                    report.rejected + report.delivered,
                    reason
                ),
            }),
            None if report.discarded > 0 => Err(Error::Storage(format!(
                "{} queued events could not be decoded and were discarded",
                report.discarded
            ))),
            None => {
                tracing::debug!(delivered = report.delivered, "Flush complete");
                Ok(report)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::codes;
    use crate::queue::BatchOutcome;
    use async_trait::async_trait;
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Transport that answers from a script and records what it saw
    #[derive(Default)]
    struct ScriptedTransport {
        reject_namespaces: Vec<String>,
        fail_with: Option<u16>,
        batches: Mutex<Vec<usize>>,
        bodies: Mutex<Vec<serde_json::Map<String, serde_json::Value>>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, batch: &EventBatch) -> Result<BatchOutcome> {
            self.batches.lock().unwrap().push(batch.len());
            self.bodies.lock().unwrap().push(batch.body().clone());
            if let Some(status) = self.fail_with {
                return Err(Error::ServerResponse {
                    status,
                    message: "scripted".to_string(),
                });
            }
            let mut response = serde_json::Map::new();
            for (namespace, events) in batch.body() {
                let ok = !self.reject_namespaces.contains(namespace);
                let statuses: Vec<_> = events
                    .as_array()
                    .unwrap()
                    .iter()
                    .map(|_| serde_json::json!({"success": ok, "error": "refused"}))
                    .collect();
                response.insert(namespace.clone(), statuses.into());
            }
            Ok(batch.outcome(&serde_json::Value::Object(response)))
        }
    }

    fn queue_with(transport: ScriptedTransport, config: QueueConfig) -> (SqliteEventQueue, Arc<ScriptedTransport>) {
        let db = Database::open_in_memory().unwrap();
        db.migrate().unwrap();
        let transport = Arc::new(transport);
        let queue = SqliteEventQueue::new(Arc::new(db), transport.clone(), config).unwrap();
        (queue, transport)
    }

    fn flush_and_wait(queue: &SqliteEventQueue, namespace: Option<&str>) -> Result<FlushReport> {
        let (tx, rx) = mpsc::channel();
        queue.flush(
            namespace,
            Box::new(move |result| {
                tx.send(result).unwrap();
            }),
        );
        rx.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    #[test]
    fn test_enqueue_and_flush_delivers_everything() {
        let config = QueueConfig {
            batch_size: 2,
            ..Default::default()
        };
        let (queue, transport) = queue_with(ScriptedTransport::default(), config);
        for n in 0..5 {
            queue.enqueue("db1.tbl1", Record::single("n", n)).unwrap();
        }
        assert_eq!(queue.pending_count(None).unwrap(), 5);

        let report = flush_and_wait(&queue, None).unwrap();
        assert_eq!(report.delivered, 5);
        assert_eq!(queue.pending_count(None).unwrap(), 0);
        assert_eq!(*transport.batches.lock().unwrap(), vec![2, 2, 1]);
    }

    #[test]
    fn test_flush_of_empty_queue_succeeds() {
        let (queue, transport) = queue_with(ScriptedTransport::default(), QueueConfig::default());
        let report = flush_and_wait(&queue, None).unwrap();
        assert_eq!(report, FlushReport::default());
        assert!(transport.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn test_scoped_flush_leaves_other_namespaces() {
        let (queue, _) = queue_with(ScriptedTransport::default(), QueueConfig::default());
        queue.enqueue("db1.tbl1", Record::single("k", "v")).unwrap();
        queue.enqueue("db2.tbl2", Record::single("k", "v")).unwrap();

        let report = flush_and_wait(&queue, Some("db1.tbl1")).unwrap();
        assert_eq!(report.delivered, 1);
        assert_eq!(queue.pending_count(Some("db1.tbl1")).unwrap(), 0);
        assert_eq!(queue.pending_count(Some("db2.tbl2")).unwrap(), 1);
    }

    #[test]
    fn test_request_failure_keeps_events() {
        let transport = ScriptedTransport {
            fail_with: Some(401),
            ..Default::default()
        };
        let (queue, _) = queue_with(transport, QueueConfig::default());
        queue.enqueue("db.tbl", Record::single("k", "v")).unwrap();

        let err = flush_and_wait(&queue, None).unwrap_err();
        assert_eq!(err.error_code(), Some(codes::SERVER_RESPONSE));
        assert_eq!(queue.pending_count(None).unwrap(), 1);
    }

    #[test]
    fn test_rejected_events_are_dropped_after_max_attempts() {
        let transport = ScriptedTransport {
            reject_namespaces: vec!["bad.tbl".to_string()],
            ..Default::default()
        };
        let config = QueueConfig {
            max_attempts: 2,
            ..Default::default()
        };
        let (queue, _) = queue_with(transport, config);
        queue.enqueue("bad.tbl", Record::single("k", "v")).unwrap();
        queue.enqueue("good.tbl", Record::single("k", "v")).unwrap();

        let err = flush_and_wait(&queue, None).unwrap_err();
        assert!(err.to_string().contains("1 of 2 events rejected"));
        assert_eq!(queue.pending_count(None).unwrap(), 1);

        assert!(flush_and_wait(&queue, None).is_err());
        assert_eq!(queue.pending_count(None).unwrap(), 0);
    }

    #[test]
    fn test_enqueue_rejects_when_full() {
        let config = QueueConfig {
            max_queued_events: 1,
            ..Default::default()
        };
        let (queue, _) = queue_with(ScriptedTransport::default(), config);
        queue.enqueue("db.tbl", Record::single("k", "v")).unwrap();

        let err = queue.enqueue("db.tbl", Record::single("k", "v")).unwrap_err();
        assert_eq!(err.error_code(), Some(codes::STORAGE_ERROR));
    }

    #[test]
    fn test_enqueue_rejects_empty_record() {
        let (queue, _) = queue_with(ScriptedTransport::default(), QueueConfig::default());
        let err = queue.enqueue("db.tbl", Record::new()).unwrap_err();
        assert_eq!(err.error_code(), Some(codes::INVALID_EVENT));
        assert_eq!(queue.pending_count(None).unwrap(), 0);
    }

    #[test]
    fn test_purge() {
        let (queue, _) = queue_with(ScriptedTransport::default(), QueueConfig::default());
        queue.enqueue("db.tbl", Record::single("k", "v")).unwrap();
        assert_eq!(queue.purge(None).unwrap(), 1);
        assert_eq!(queue.pending_count(None).unwrap(), 0);
    }

    #[test]
    fn test_undecodable_event_is_discarded_not_sent() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let transport = Arc::new(ScriptedTransport::default());
        let queue =
            SqliteEventQueue::new(db.clone(), transport.clone(), QueueConfig::default()).unwrap();

        queue.enqueue("db.tbl", Record::single("n", 1)).unwrap();
        queue.enqueue("db.tbl", Record::single("n", 2)).unwrap();
        let corrupted = db.max_event_id().unwrap().unwrap();
        db.with_connection(|conn| {
            conn.execute(
                "UPDATE event_queue SET record = 'not json' WHERE id = ?1",
                [corrupted],
            )
        })
        .unwrap();

        let err = flush_and_wait(&queue, None).unwrap_err();
        assert_eq!(err.error_code(), Some(codes::STORAGE_ERROR));
        assert_eq!(queue.pending_count(None).unwrap(), 0);

        let bodies = transport.bodies.lock().unwrap();
        assert_eq!(bodies.len(), 1);
        let events = bodies[0]["db.tbl"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["n"], 1);
    }
}
