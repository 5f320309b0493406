//! Indexing and querying of audit events.
//!
//! - [`SearchStore`] is the boundary to the document store, with an
//!   OpenSearch implementation, an in-memory implementation and a
//!   [`StoreSlot`] that fails fast until a real store is installed.
//! - [`Indexer`] turns one JSON-encoded event into one stored document.
//! - [`SearchQuery::from_params`] validates caller input for a
//!   [`SearchKind`], [`compile`] turns it into a [`SearchRequest`], and
//!   [`QueryService`] runs it and normalizes the answer into a
//!   [`SearchEnvelope`](auditrail_types::SearchEnvelope).

mod compiler;
mod error;
mod indexer;
mod kind;
mod params;
mod query;
mod service;
mod store;

pub use compiler::{compile, DEFAULT_HITS, EVENT_TYPE_BUCKETS, FULL_TEXT_FIELDS, LOG_HITS};
pub use error::{IndexingError, QueryError, StoreError};
pub use indexer::{DocumentIds, IndexedDocument, Indexer};
pub use kind::{ParseSearchKindError, SearchKind};
pub use params::{SearchQuery, TimeWindow, DEFAULT_CALLER_SIZE, MAX_SIZE, MIN_SIZE};
pub use query::{
    IndexResponse, Query, SearchRequest, SearchResponse, Sort, SortOrder, TermsAggregation,
};
pub use service::QueryService;
pub use store::{MemorySearchStore, OpenSearchConfig, OpenSearchStore, SearchStore, StoreSlot};
