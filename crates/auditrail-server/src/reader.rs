//! Consumer-group reader that drains the durable stream into the indexer.
//!
//! The reader moves through `STOPPED -> STARTING -> POLLING <-> PROCESSING
//! -> STOPPED`. Each poll first picks up this consumer's own entries that
//! have been pending longer than the redelivery delay, then waits for new
//! ones. Every entry is indexed on its own and acknowledged only after its
//! own index call succeeded. Failed entries stay pending and come back on a
//! later poll; entries that can never succeed are parked.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use auditrail_search::Indexer;
use auditrail_stream::{DurableStream, ReadCursor, StreamEntry, StreamError};
use serde::Serialize;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;

/// Lifecycle of a [`StreamReader`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReaderState {
    Stopped,
    Starting,
    Polling,
    Processing,
}

impl ReaderState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "STOPPED",
            Self::Starting => "STARTING",
            Self::Polling => "POLLING",
            Self::Processing => "PROCESSING",
        }
    }
}

impl fmt::Display for ReaderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Consumer-group reader settings.
#[derive(Debug, Clone)]
pub struct ReaderSettings {
    pub stream_name: String,
    /// Entry field carrying the JSON-encoded event.
    pub field_name: String,
    pub group: String,
    pub consumer: String,
    pub batch_size: usize,
    /// How long an empty read waits for new entries.
    pub block: Duration,
    /// Sleep after a failed poll or ack cycle.
    pub error_backoff: Duration,
    /// Idle time before a pending entry is read again.
    pub redeliver_after: Duration,
    /// Failed deliveries after which an entry is parked. Store outages do
    /// not park.
    pub max_deliveries: u32,
}

#[derive(Debug, Default)]
struct Counters {
    indexed: AtomicU64,
    failed: AtomicU64,
    parked: AtomicU64,
}

/// Point-in-time reader counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReaderStats {
    pub state: ReaderState,
    /// Entries indexed and acknowledged.
    pub indexed: u64,
    /// Index attempts that failed and left the entry pending or parked.
    pub failed: u64,
    /// Entries moved to the dead-letter table.
    pub parked: u64,
}

struct Shared {
    stream: Arc<dyn DurableStream>,
    indexer: Indexer,
    settings: ReaderSettings,
    running: AtomicBool,
    wake: Notify,
    state: watch::Sender<ReaderState>,
    counters: Counters,
}

/// Drains one consumer group member's share of the stream.
pub struct StreamReader {
    shared: Arc<Shared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StreamReader {
    /// A `batch_size` of zero is raised to one.
    pub fn new(
        stream: Arc<dyn DurableStream>,
        indexer: Indexer,
        mut settings: ReaderSettings,
    ) -> Self {
        settings.batch_size = settings.batch_size.max(1);
        let (state, _) = watch::channel(ReaderState::Stopped);
        Self {
            shared: Arc::new(Shared {
                stream,
                indexer,
                settings,
                running: AtomicBool::new(false),
                wake: Notify::new(),
                state,
                counters: Counters::default(),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn state(&self) -> ReaderState {
        *self.shared.state.borrow()
    }

    /// Watches state transitions.
    pub fn subscribe(&self) -> watch::Receiver<ReaderState> {
        self.shared.state.subscribe()
    }

    pub fn stats(&self) -> ReaderStats {
        let counters = &self.shared.counters;
        ReaderStats {
            state: self.state(),
            indexed: counters.indexed.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
            parked: counters.parked.load(Ordering::Relaxed),
        }
    }

    /// Ensures the consumer group exists and starts the poll loop.
    ///
    /// Starting a running reader does nothing.
    ///
    /// # Errors
    ///
    /// Returns the stream error if the consumer group cannot be created; the
    /// reader is left stopped.
    pub async fn start(&self) -> Result<(), StreamError> {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let settings = &self.shared.settings;
        self.shared.set_state(ReaderState::Starting);

        match self
            .shared
            .stream
            .create_group_if_absent(&settings.stream_name, &settings.group)
            .await
        {
            Ok(created) => {
                tracing::info!(
                    stream = %settings.stream_name,
                    group = %settings.group,
                    consumer = %settings.consumer,
                    created,
                    "stream reader starting"
                );
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::SeqCst);
                self.shared.set_state(ReaderState::Stopped);
                return Err(e);
            }
        }

        let handle = tokio::spawn(self.shared.clone().run());
        *self.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        Ok(())
    }

    /// Clears the running flag and waits up to `timeout` for the loop to
    /// observe it, then cancels the loop.
    ///
    /// Returns `true` if the loop stopped on its own.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.shared.running.store(false, Ordering::SeqCst);
        self.shared.wake.notify_one();

        let handle = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        let graceful = match handle {
            Some(mut handle) => match tokio::time::timeout(timeout, &mut handle).await {
                Ok(_) => true,
                Err(_) => {
                    tracing::warn!(
                        timeout_ms = timeout.as_millis() as u64,
                        "stream reader did not stop in time, cancelling"
                    );
                    handle.abort();
                    let _ = handle.await;
                    false
                }
            },
            None => true,
        };
        self.shared.set_state(ReaderState::Stopped);
        graceful
    }
}

impl Shared {
    fn set_state(&self, state: ReaderState) {
        self.state.send_replace(state);
    }

    async fn run(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            self.set_state(ReaderState::Polling);
            if let Err(e) = self.cycle().await {
                tracing::error!(
                    error = %e,
                    backoff_ms = self.settings.error_backoff.as_millis() as u64,
                    "stream poll cycle failed, backing off"
                );
                if !self.running.load(Ordering::SeqCst) {
                    break;
                }
                tokio::select! {
                    () = tokio::time::sleep(self.settings.error_backoff) => {}
                    () = self.wake.notified() => {}
                }
            }
        }
        self.set_state(ReaderState::Stopped);
        tracing::info!(consumer = %self.settings.consumer, "stream reader stopped");
    }

    /// One poll plus the processing of whatever it returned.
    async fn cycle(&self) -> Result<(), StreamError> {
        let s = &self.settings;
        let mut batch = self
            .stream
            .read_group(
                &s.stream_name,
                &s.group,
                &s.consumer,
                s.batch_size,
                ReadCursor::Pending {
                    min_idle: s.redeliver_after,
                },
                None,
            )
            .await?;
        if batch.is_empty() {
            batch = self
                .stream
                .read_group(
                    &s.stream_name,
                    &s.group,
                    &s.consumer,
                    s.batch_size,
                    ReadCursor::NeverDelivered,
                    Some(s.block),
                )
                .await?;
        }
        if batch.is_empty() {
            return Ok(());
        }

        self.set_state(ReaderState::Processing);
        tracing::debug!(entries = batch.len(), "processing stream batch");
        for entry in batch {
            self.process(entry).await?;
        }
        Ok(())
    }

    async fn process(&self, entry: StreamEntry) -> Result<(), StreamError> {
        let s = &self.settings;
        let Some(raw) = entry.fields.get(&s.field_name) else {
            let reason = format!("entry has no `{}` field", s.field_name);
            return self.park(&entry, &reason).await;
        };

        match self.indexer.index(raw).await {
            Ok(doc) => {
                self.stream.ack(&s.stream_name, &s.group, &[entry.id]).await?;
                self.counters.indexed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    entry_id = %entry.id,
                    document_id = %doc.id,
                    event_id = %doc.event_id,
                    "entry indexed and acknowledged"
                );
                Ok(())
            }
            Err(e) if e.is_permanent() => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                self.park(&entry, &e.to_string()).await
            }
            Err(e) if e.is_transient() => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    entry_id = %entry.id,
                    delivery_count = entry.delivery_count,
                    error = %e,
                    "search store unavailable, entry left pending for redelivery"
                );
                Ok(())
            }
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                if entry.delivery_count >= s.max_deliveries {
                    let reason = format!("gave up after {} deliveries: {e}", entry.delivery_count);
                    return self.park(&entry, &reason).await;
                }
                tracing::warn!(
                    entry_id = %entry.id,
                    delivery_count = entry.delivery_count,
                    error = %e,
                    "indexing failed, entry left pending for redelivery"
                );
                Ok(())
            }
        }
    }

    async fn park(&self, entry: &StreamEntry, reason: &str) -> Result<(), StreamError> {
        let s = &self.settings;
        if self
            .stream
            .park(&s.stream_name, &s.group, entry.id, reason)
            .await?
        {
            self.counters.parked.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    }
}
