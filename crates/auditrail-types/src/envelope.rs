//! The normalized query result envelope.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One group of a terms aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bucket {
    /// The grouped field value.
    pub key: String,
    /// Number of matching documents carrying `key`.
    pub count: u64,
}

/// The payload of a [`SearchEnvelope`]: matched documents or aggregation
/// buckets, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SearchResults {
    /// Source payloads of the matched documents, in result order.
    Hits(Vec<Value>),
    /// `(key, count)` pairs ordered by descending count.
    Buckets(Vec<Bucket>),
}

/// The normalized result of any query.
///
/// Serializes as `{"hits": [...], "total", "timedOut", "took"}` for document
/// queries and `{"buckets": [...], "total", "timedOut", "took"}` for
/// aggregations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEnvelope {
    #[serde(flatten)]
    pub results: SearchResults,
    /// Number of documents that matched the query.
    pub total: u64,
    /// Whether the store gave up before searching every shard.
    pub timed_out: bool,
    /// Server-side duration in milliseconds.
    pub took: u64,
}

impl SearchEnvelope {
    /// Matched documents; empty for aggregation envelopes.
    pub fn hits(&self) -> &[Value] {
        match &self.results {
            SearchResults::Hits(hits) => hits,
            SearchResults::Buckets(_) => &[],
        }
    }

    /// Aggregation buckets; empty for document envelopes.
    pub fn buckets(&self) -> &[Bucket] {
        match &self.results {
            SearchResults::Buckets(buckets) => buckets,
            SearchResults::Hits(_) => &[],
        }
    }
}
