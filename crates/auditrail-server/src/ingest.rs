//! The ingestion front door: a bounded buffer drained by a pool of writers.
//!
//! [`Ingestor::submit`] validates an event, serializes it once and places it
//! in a FIFO buffer. When the buffer is full the caller waits for a free
//! slot; nothing is dropped. Writer workers take events off the buffer and
//! append them to the durable stream, retrying transient failures. An event
//! whose retries are exhausted is logged at `error` level together with its
//! full payload so it can be replayed by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use auditrail_stream::DurableStream;
use auditrail_types::{EventRecord, ValidationError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::retry::{retry_with_backoff, RetryConfig};

/// Why an event was not accepted.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("ingestion is shutting down")]
    ShuttingDown,

    #[error("failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Writer pool settings.
#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub stream_name: String,
    /// Entry field that carries the JSON-encoded event.
    pub field_name: String,
    pub buffer_capacity: usize,
    pub workers: usize,
    pub retry: RetryConfig,
}

#[derive(Debug, Default)]
struct Counters {
    submitted: AtomicU64,
    appended: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time ingestion counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct IngestStats {
    /// Events accepted into the buffer.
    pub submitted: u64,
    /// Events written to the stream.
    pub appended: u64,
    /// Events given up on after exhausting append retries.
    pub failed: u64,
    /// Events currently waiting in the buffer.
    pub buffered: usize,
}

/// What a shutdown left behind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Workers cancelled because the drain timeout expired.
    pub aborted_workers: usize,
    /// Accepted events that were never appended: those still buffered plus
    /// those a cancelled worker was holding.
    pub unflushed: usize,
}

#[derive(Clone)]
struct Queued {
    id: String,
    payload: String,
}

type SharedReceiver = Arc<tokio::sync::Mutex<mpsc::Receiver<Queued>>>;

/// The event a writer has taken off the buffer but not yet finished with.
type InFlight = Arc<Mutex<Option<Queued>>>;

struct Writer {
    handle: JoinHandle<()>,
    in_flight: InFlight,
}

/// Accepts events and forwards them to a [`DurableStream`].
pub struct Ingestor {
    sender: RwLock<Option<mpsc::Sender<Queued>>>,
    receiver: SharedReceiver,
    workers: Mutex<Vec<Writer>>,
    counters: Arc<Counters>,
    capacity: usize,
}

impl Ingestor {
    /// Creates the buffer and spawns the writer workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(stream: Arc<dyn DurableStream>, settings: IngestSettings) -> Self {
        let capacity = settings.buffer_capacity.max(1);
        let worker_count = settings.workers.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        let receiver: SharedReceiver = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let settings = Arc::new(settings);

        let workers = (0..worker_count)
            .map(|worker| {
                let in_flight = InFlight::default();
                let handle = tokio::spawn(run_writer(
                    worker,
                    receiver.clone(),
                    in_flight.clone(),
                    stream.clone(),
                    settings.clone(),
                    counters.clone(),
                ));
                Writer { handle, in_flight }
            })
            .collect();

        tracing::info!(
            workers = worker_count,
            capacity,
            stream = %settings.stream_name,
            "ingestion writers started"
        );

        Self {
            sender: RwLock::new(Some(tx)),
            receiver,
            workers: Mutex::new(workers),
            counters,
            capacity,
        }
    }

    /// Validates `event` and queues it for appending.
    ///
    /// Waits while the buffer is full. Returns the id of the accepted event.
    ///
    /// # Errors
    ///
    /// `SubmitError::Validation` if a required field is missing or malformed,
    /// `SubmitError::ShuttingDown` once [`shutdown`](Self::shutdown) has begun.
    pub async fn submit(&self, event: EventRecord) -> Result<String, SubmitError> {
        event.validate()?;

        let sender = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or(SubmitError::ShuttingDown)?;

        let queued = Queued {
            payload: serde_json::to_string(&event)?,
            id: event.id,
        };
        let id = queued.id.clone();

        sender
            .send(queued)
            .await
            .map_err(|_| SubmitError::ShuttingDown)?;
        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        Ok(id)
    }

    pub fn stats(&self) -> IngestStats {
        let buffered = self
            .sender
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .map_or(0, |tx| self.capacity - tx.capacity());
        IngestStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            appended: self.counters.appended.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            buffered,
        }
    }

    /// Stops accepting events and waits up to `timeout` for the buffer to
    /// drain, then cancels the remaining workers.
    ///
    /// Events still buffered after cancellation, and any event a cancelled
    /// worker was appending, are logged at `error` level with their payloads.
    /// Calling this twice is harmless.
    pub async fn shutdown(&self, timeout: Duration) -> DrainReport {
        drop(
            self.sender
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take(),
        );
        let workers = std::mem::take(
            &mut *self
                .workers
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        );

        let deadline = tokio::time::Instant::now() + timeout;
        let mut report = DrainReport::default();
        let mut lost = Vec::new();
        for Writer {
            mut handle,
            in_flight,
        } in workers
        {
            if tokio::time::timeout_at(deadline, &mut handle).await.is_err() {
                handle.abort();
                let _ = handle.await;
                report.aborted_workers += 1;
                lost.extend(in_flight.lock().unwrap_or_else(|p| p.into_inner()).take());
            }
        }

        if report.aborted_workers > 0 {
            let mut rx = self.receiver.lock().await;
            rx.close();
            while let Ok(left) = rx.try_recv() {
                lost.push(left);
            }
            for event in &lost {
                tracing::error!(
                    event_id = %event.id,
                    payload = %event.payload,
                    "event not appended before shutdown deadline"
                );
            }
            report.unflushed = lost.len();
            tracing::warn!(
                aborted_workers = report.aborted_workers,
                unflushed = report.unflushed,
                "ingestion drain timed out"
            );
        } else {
            tracing::info!("ingestion drained");
        }
        report
    }
}

async fn run_writer(
    worker: usize,
    receiver: SharedReceiver,
    in_flight: InFlight,
    stream: Arc<dyn DurableStream>,
    settings: Arc<IngestSettings>,
    counters: Arc<Counters>,
) {
    let stream_name = settings.stream_name.as_str();
    let field_name = settings.field_name.as_str();

    loop {
        let next = receiver.lock().await.recv().await;
        let Some(event) = next else { break };
        *in_flight.lock().unwrap_or_else(|p| p.into_inner()) = Some(event.clone());

        let appended = retry_with_backoff(
            || {
                let fields = HashMap::from([(field_name.to_string(), event.payload.clone())]);
                stream.append(stream_name, fields)
            },
            &settings.retry,
            "stream append",
        )
        .await;

        match appended {
            Ok(entry_id) => {
                counters.appended.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(worker, event_id = %event.id, %entry_id, "event appended");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    worker,
                    event_id = %event.id,
                    payload = %event.payload,
                    error = %e,
                    "giving up on event after exhausting append retries"
                );
            }
        }
        *in_flight.lock().unwrap_or_else(|p| p.into_inner()) = None;
    }

    tracing::debug!(worker, "ingestion writer stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use auditrail_stream::{EntryId, ParkedEntry, ReadCursor, StreamEntry, StreamError};
    use auditrail_types::SubjectType;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Semaphore;

    /// Append-only fake: appends wait for a gate permit, may fail a number
    /// of times, and always fail for payloads containing `poison`.
    #[derive(Default)]
    struct FakeStream {
        gate: Option<Semaphore>,
        failures_left: AtomicU32,
        poison: Option<String>,
        appended: Mutex<Vec<String>>,
    }

    impl FakeStream {
        fn gated() -> Self {
            Self {
                gate: Some(Semaphore::new(0)),
                ..Self::default()
            }
        }

        fn appended_ids(&self) -> Vec<String> {
            self.appended
                .lock()
                .unwrap()
                .iter()
                .map(|payload| {
                    let v: serde_json::Value = serde_json::from_str(payload).unwrap();
                    v["id"].as_str().unwrap().to_string()
                })
                .collect()
        }

        fn unavailable() -> StreamError {
            StreamError::InvalidEntryId("stream unavailable".to_string())
        }
    }

    #[async_trait]
    impl DurableStream for FakeStream {
        async fn append(
            &self,
            _stream: &str,
            fields: HashMap<String, String>,
        ) -> Result<EntryId, StreamError> {
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            let payload = fields["payload"].clone();
            if self.poison.as_ref().is_some_and(|p| payload.contains(p.as_str())) {
                return Err(Self::unavailable());
            }
            if self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Self::unavailable());
            }
            let mut appended = self.appended.lock().unwrap();
            appended.push(payload);
            let seq = appended.len() as i64;
            Ok(EntryId { millis: 0, seq })
        }

        async fn create_group_if_absent(&self, _: &str, _: &str) -> Result<bool, StreamError> {
            unimplemented!()
        }

        async fn read_group(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: usize,
            _: ReadCursor,
            _: Option<Duration>,
        ) -> Result<Vec<StreamEntry>, StreamError> {
            unimplemented!()
        }

        async fn ack(&self, _: &str, _: &str, _: &[EntryId]) -> Result<usize, StreamError> {
            unimplemented!()
        }

        async fn park(&self, _: &str, _: &str, _: EntryId, _: &str) -> Result<bool, StreamError> {
            unimplemented!()
        }

        async fn pending_count(&self, _: &str, _: &str) -> Result<u64, StreamError> {
            unimplemented!()
        }

        async fn parked(&self, _: &str, _: &str) -> Result<Vec<ParkedEntry>, StreamError> {
            unimplemented!()
        }
    }

    fn settings(capacity: usize, workers: usize) -> IngestSettings {
        IngestSettings {
            stream_name: "audit-events".to_string(),
            field_name: "payload".to_string(),
            buffer_capacity: capacity,
            workers,
            retry: RetryConfig {
                max_attempts: 3,
                initial_backoff: Duration::from_millis(1),
                max_backoff: Duration::from_millis(5),
            },
        }
    }

    fn event(id: &str) -> EventRecord {
        EventRecord::builder(SubjectType::User, "alice", "order")
            .id(id)
            .created_at(1_000)
            .build()
    }

    #[tokio::test]
    async fn submitted_events_reach_the_stream() {
        let stream = Arc::new(FakeStream::default());
        let ingestor = Ingestor::start(stream.clone(), settings(16, 4));

        for i in 0..50 {
            let id = ingestor.submit(event(&format!("e{i}"))).await.unwrap();
            assert_eq!(id, format!("e{i}"));
        }
        let report = ingestor.shutdown(Duration::from_secs(5)).await;

        assert_eq!(report, DrainReport::default());
        let mut ids = stream.appended_ids();
        ids.sort();
        let mut expected: Vec<String> = (0..50).map(|i| format!("e{i}")).collect();
        expected.sort();
        assert_eq!(ids, expected);

        let stats = ingestor.stats();
        assert_eq!(stats.submitted, 50);
        assert_eq!(stats.appended, 50);
        assert_eq!(stats.failed, 0);
    }

    #[tokio::test]
    async fn single_writer_preserves_submission_order() {
        let stream = Arc::new(FakeStream::default());
        let ingestor = Ingestor::start(stream.clone(), settings(4, 1));

        for i in 0..10 {
            ingestor.submit(event(&format!("e{i}"))).await.unwrap();
        }
        ingestor.shutdown(Duration::from_secs(5)).await;

        let expected: Vec<String> = (0..10).map(|i| format!("e{i}")).collect();
        assert_eq!(stream.appended_ids(), expected);
    }

    #[tokio::test]
    async fn invalid_events_are_rejected_before_queueing() {
        let stream = Arc::new(FakeStream::default());
        let ingestor = Ingestor::start(stream.clone(), settings(4, 1));

        let blank_subject = EventRecord::builder(SubjectType::User, "  ", "order")
            .created_at(1_000)
            .build();
        let err = ingestor.submit(blank_subject).await.unwrap_err();
        match err {
            SubmitError::Validation(e) => assert_eq!(e.field, "subjectId"),
            other => panic!("expected validation error, got {other:?}"),
        }
        assert_eq!(ingestor.stats().submitted, 0);
    }

    #[tokio::test]
    async fn full_buffer_blocks_until_a_slot_frees() {
        let stream = Arc::new(FakeStream::gated());
        let ingestor = Arc::new(Ingestor::start(stream.clone(), settings(2, 1)));

        // The only writer takes e1 and waits on the gate.
        ingestor.submit(event("e1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        ingestor.submit(event("e2")).await.unwrap();
        ingestor.submit(event("e3")).await.unwrap();
        assert_eq!(ingestor.stats().buffered, 2);

        let blocked = tokio::spawn({
            let ingestor = ingestor.clone();
            async move { ingestor.submit(event("e4")).await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!blocked.is_finished(), "submit should wait for a free slot");

        stream.gate.as_ref().unwrap().add_permits(10);
        assert_eq!(blocked.await.unwrap().unwrap(), "e4");

        ingestor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(stream.appended_ids(), vec!["e1", "e2", "e3", "e4"]);
    }

    #[tokio::test]
    async fn transient_append_failures_are_retried() {
        let stream = Arc::new(FakeStream {
            failures_left: AtomicU32::new(2),
            ..FakeStream::default()
        });
        let ingestor = Ingestor::start(stream.clone(), settings(4, 1));

        ingestor.submit(event("e1")).await.unwrap();
        ingestor.shutdown(Duration::from_secs(5)).await;

        assert_eq!(stream.appended_ids(), vec!["e1"]);
        assert_eq!(ingestor.stats().failed, 0);
    }

    #[tokio::test]
    async fn exhausted_event_does_not_stop_the_writer() {
        let stream = Arc::new(FakeStream {
            poison: Some("\"poison\"".to_string()),
            ..FakeStream::default()
        });
        let ingestor = Ingestor::start(stream.clone(), settings(4, 1));

        ingestor.submit(event("poison")).await.unwrap();
        ingestor.submit(event("e2")).await.unwrap();
        ingestor.shutdown(Duration::from_secs(5)).await;

        assert_eq!(stream.appended_ids(), vec!["e2"]);
        let stats = ingestor.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.appended, 1);
    }

    #[tokio::test]
    async fn submissions_after_shutdown_are_refused() {
        let stream = Arc::new(FakeStream::default());
        let ingestor = Ingestor::start(stream, settings(4, 2));

        ingestor.shutdown(Duration::from_secs(1)).await;
        let err = ingestor.submit(event("late")).await.unwrap_err();
        assert!(matches!(err, SubmitError::ShuttingDown));
        assert_eq!(
            ingestor.shutdown(Duration::from_secs(1)).await,
            DrainReport::default()
        );
    }

    #[tokio::test]
    async fn drain_timeout_cancels_stuck_writers() {
        let stream = Arc::new(FakeStream::gated());
        let ingestor = Ingestor::start(stream.clone(), settings(4, 1));

        ingestor.submit(event("e1")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        ingestor.submit(event("e2")).await.unwrap();

        let report = ingestor.shutdown(Duration::from_millis(50)).await;

        assert_eq!(report.aborted_workers, 1);
        // e1 was held by the cancelled writer, e2 was still buffered.
        assert_eq!(report.unflushed, 2);
        assert!(stream.appended_ids().is_empty());

        let stats = ingestor.stats();
        assert_eq!(
            stats.submitted,
            stats.appended + stats.failed + report.unflushed as u64
        );
    }
}
