//! Durable, append-only event stream with consumer groups.
//!
//! Producers [`append`](DurableStream::append) field maps to a named stream.
//! Consumers join a named group and read with
//! [`read_group`](DurableStream::read_group); every delivered entry stays
//! *pending* for the consumer that received it until it is
//! [`ack`](DurableStream::ack)ed. Pending entries can be read again with
//! [`ReadCursor::Pending`], which is how unacknowledged work is redelivered,
//! and entries that can never succeed are [`park`](DurableStream::park)ed in
//! a dead-letter table.
//!
//! # Delivery guarantees
//!
//! Delivery is at-least-once. Nothing is removed from the pending set except
//! by an explicit acknowledgment or park, so a consumer that crashes between
//! processing and acknowledging sees the entry again.
//!
//! # Usage
//!
//! ```rust,ignore
//! use auditrail_stream::{DurableStream, ReadCursor, SqliteStream};
//!
//! let stream = SqliteStream::new(pool);
//! stream.create_group_if_absent("events", "indexer").await?;
//! stream.append("events", fields).await?;
//!
//! let batch = stream
//!     .read_group("events", "indexer", "indexer-1", 10, ReadCursor::NeverDelivered, block)
//!     .await?;
//! for entry in batch {
//!     // process, then
//!     stream.ack("events", "indexer", &[entry.id]).await?;
//! }
//! ```

mod entry;
mod error;
mod sqlite;

pub use entry::{EntryId, ParkedEntry, ReadCursor, StreamEntry};
pub use error::StreamError;
pub use sqlite::SqliteStream;

use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// An append-only, multi-consumer log.
///
/// Implementations are shared by reference between the ingestion workers and
/// the stream reader and must be safe for concurrent use.
#[async_trait]
pub trait DurableStream: Send + Sync {
    /// Appends one entry and returns its id.
    async fn append(
        &self,
        stream: &str,
        fields: HashMap<String, String>,
    ) -> Result<EntryId, StreamError>;

    /// Creates `group` positioned before the first entry of `stream`.
    ///
    /// Returns `false` when the group already existed.
    async fn create_group_if_absent(&self, stream: &str, group: &str) -> Result<bool, StreamError>;

    /// Reads up to `count` entries for `consumer`.
    ///
    /// With [`ReadCursor::NeverDelivered`] an empty read waits up to `block`
    /// for new appends before returning an empty batch.
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        cursor: ReadCursor,
        block: Option<Duration>,
    ) -> Result<Vec<StreamEntry>, StreamError>;

    /// Acknowledges entries, removing them from the pending set.
    ///
    /// Ids that are not pending are ignored; returns how many were removed.
    async fn ack(&self, stream: &str, group: &str, ids: &[EntryId]) -> Result<usize, StreamError>;

    /// Moves a pending entry to the dead-letter table.
    ///
    /// Returns `false` when the entry was not pending.
    async fn park(
        &self,
        stream: &str,
        group: &str,
        id: EntryId,
        reason: &str,
    ) -> Result<bool, StreamError>;

    /// Number of delivered but unacknowledged entries in `group`.
    async fn pending_count(&self, stream: &str, group: &str) -> Result<u64, StreamError>;

    /// Entries `group` has parked, oldest first.
    async fn parked(&self, stream: &str, group: &str) -> Result<Vec<ParkedEntry>, StreamError>;
}
