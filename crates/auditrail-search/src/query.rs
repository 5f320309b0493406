//! Store-neutral query model and its OpenSearch JSON rendering.

use auditrail_types::Bucket;
use serde_json::{json, Map, Value};

/// A structured query over indexed events.
#[derive(Debug, Clone, PartialEq)]
pub enum Query {
    /// Every document.
    MatchAll,
    /// Exact match of one field against one value.
    Term { field: String, value: String },
    /// Inclusive numeric bounds on one field.
    Range {
        field: String,
        gte: Option<i64>,
        lte: Option<i64>,
    },
    /// Free-text match of `query` against several fields.
    MultiMatch { query: String, fields: Vec<String> },
    /// Conjunction of clauses; no clauses matches everything.
    Bool { must: Vec<Query> },
}

impl Query {
    pub fn term(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn between(field: impl Into<String>, gte: i64, lte: i64) -> Self {
        Self::Range {
            field: field.into(),
            gte: Some(gte),
            lte: Some(lte),
        }
    }

    pub fn all_of(must: Vec<Query>) -> Self {
        Self::Bool { must }
    }

    /// Renders the OpenSearch query DSL for this query.
    ///
    /// Multi-match fields are searched both as exact keywords and through
    /// their analyzed `.text` sub-field.
    pub fn to_json(&self) -> Value {
        match self {
            Self::MatchAll => json!({ "match_all": {} }),
            Self::Term { field, value } => json!({ "term": { field: { "value": value } } }),
            Self::Range { field, gte, lte } => {
                let mut bounds = Map::new();
                if let Some(gte) = gte {
                    bounds.insert("gte".to_string(), json!(gte));
                }
                if let Some(lte) = lte {
                    bounds.insert("lte".to_string(), json!(lte));
                }
                json!({ "range": { field: bounds } })
            }
            Self::MultiMatch { query, fields } => {
                let fields: Vec<String> = fields
                    .iter()
                    .flat_map(|f| [f.clone(), format!("{f}.text")])
                    .collect();
                json!({ "multi_match": { "query": query, "fields": fields } })
            }
            Self::Bool { must } => {
                let must: Vec<Value> = must.iter().map(Query::to_json).collect();
                json!({ "bool": { "must": must } })
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

impl SortOrder {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sort {
    pub field: String,
    pub order: SortOrder,
}

/// Group-by request returning `(key, count)` buckets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermsAggregation {
    pub name: String,
    pub field: String,
    pub size: usize,
}

/// One search round-trip: query, page size, ordering and optional buckets.
///
/// `sort: None` means relevance order.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: Query,
    pub size: usize,
    pub sort: Option<Sort>,
    pub aggregation: Option<TermsAggregation>,
}

impl SearchRequest {
    /// Renders the `_search` request body.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.to_json());
        body.insert("size".to_string(), json!(self.size));
        body.insert("track_total_hits".to_string(), json!(true));
        if let Some(sort) = &self.sort {
            body.insert(
                "sort".to_string(),
                json!([{ &sort.field: { "order": sort.order.as_str() } }]),
            );
        }
        if let Some(agg) = &self.aggregation {
            body.insert(
                "aggs".to_string(),
                json!({ &agg.name: { "terms": { "field": &agg.field, "size": agg.size } } }),
            );
        }
        Value::Object(body)
    }
}

/// What the store returns for a search.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    /// Source payloads of the returned page.
    pub hits: Vec<Value>,
    pub total: u64,
    pub timed_out: bool,
    pub took: u64,
    /// Present when the request asked for an aggregation.
    pub buckets: Option<Vec<Bucket>>,
}

/// What the store returns for an index call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexResponse {
    pub id: String,
    pub version: i64,
}
