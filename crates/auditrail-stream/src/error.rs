//! Error types for the durable stream.

/// Errors that can occur during stream operations.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// A database operation failed.
    #[error("stream database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The connection pool could not be built.
    #[error("stream pool setup failed: {0}")]
    PoolInit(#[from] auditrail_db::PoolError),

    /// The schema could not be migrated.
    #[error("stream migration failed: {0}")]
    Migration(#[from] auditrail_db::MigrationError),

    /// No pooled connection could be obtained.
    #[error("stream pool error: {0}")]
    Pool(#[from] r2d2::Error),

    /// Entry fields could not be encoded or decoded.
    #[error("stream serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The blocking task running the operation panicked or was cancelled.
    #[error("stream task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    /// The consumer group has not been created on this stream.
    #[error("consumer group `{group}` does not exist on stream `{stream}`")]
    UnknownGroup { stream: String, group: String },

    /// An entry id did not have the `<millis>-<seq>` shape.
    #[error("invalid entry id: {0}")]
    InvalidEntryId(String),
}
