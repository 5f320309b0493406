//! Error types for the search layer.

use auditrail_types::ValidationError;

/// Failures talking to the search store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No store client has been installed yet.
    #[error("search store is not connected")]
    NotConnected,

    /// The configured store URL cannot address documents.
    #[error("invalid search store url: {0}")]
    InvalidUrl(String),

    /// The request never produced a response.
    #[error("search store transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The store answered with a non-success status.
    #[error("search store rejected request with status {status}: {body}")]
    Rejected { status: u16, body: String },

    /// The store answered with a body this client does not understand.
    #[error("unexpected search store response: {0}")]
    Decode(String),
}

/// Failures turning a stream payload into a stored document.
#[derive(Debug, thiserror::Error)]
pub enum IndexingError {
    /// The payload is not a valid event and never will be.
    #[error("invalid event payload: {0}")]
    InvalidPayload(String),

    /// The store refused or failed the write.
    #[error("indexing failed: {0}")]
    Store(#[from] StoreError),
}

impl IndexingError {
    /// Whether retrying the same payload can succeed.
    pub fn is_permanent(&self) -> bool {
        matches!(self, Self::InvalidPayload(_))
    }

    /// Whether the failure is about the store being unreachable or
    /// overloaded rather than about this payload.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Store(e) => e.is_transient(),
            Self::InvalidPayload(_) => false,
        }
    }
}

impl StoreError {
    /// Connectivity loss, timeouts, and `429`/`502`/`503`/`504` answers.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotConnected | Self::Transport(_) => true,
            Self::Rejected { status, .. } => matches!(status, 429 | 502 | 503 | 504),
            Self::InvalidUrl(_) | Self::Decode(_) => false,
        }
    }
}

impl From<ValidationError> for IndexingError {
    fn from(e: ValidationError) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}

/// Failures answering a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The caller's parameters violate the query's contract.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// The store could not run the query.
    #[error("query execution failed: {0}")]
    Execution(String),
}
