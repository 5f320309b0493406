//! In-process [`SearchStore`] used by tests and by deployments without
//! OpenSearch.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Instant;

use async_trait::async_trait;
use auditrail_types::Bucket;
use serde_json::Value;

use super::SearchStore;
use crate::error::StoreError;
use crate::query::{IndexResponse, Query, SearchRequest, SearchResponse, SortOrder};

#[derive(Debug, Clone)]
struct StoredDocument {
    id: String,
    version: i64,
    source: Value,
}

/// Evaluates [`Query`] values against documents held in memory.
///
/// Locks are held only for the duration of a map operation, never across
/// an `.await`.
#[derive(Debug, Default)]
pub struct MemorySearchStore {
    indices: RwLock<HashMap<String, Vec<StoredDocument>>>,
}

impl MemorySearchStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents in `index`.
    pub fn len(&self, index: &str) -> usize {
        self.read_indices()
            .get(index)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn is_empty(&self, index: &str) -> bool {
        self.len(index) == 0
    }

    /// Source of the document stored under `id`.
    pub fn get(&self, index: &str, id: &str) -> Option<Value> {
        self.read_indices()
            .get(index)?
            .iter()
            .find(|doc| doc.id == id)
            .map(|doc| doc.source.clone())
    }

    fn read_indices(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Vec<StoredDocument>>> {
        // A poisoned lock only means another thread panicked mid-operation;
        // every operation leaves the map consistent.
        self.indices.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl SearchStore for MemorySearchStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        let mut indices = self
            .indices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        indices.entry(index.to_string()).or_default();
        Ok(())
    }

    async fn index(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> Result<IndexResponse, StoreError> {
        let mut indices = self
            .indices
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let docs = indices.entry(index.to_string()).or_default();

        let version = match docs.iter_mut().find(|doc| doc.id == id) {
            Some(existing) => {
                existing.version += 1;
                existing.source = document.clone();
                existing.version
            }
            None => {
                docs.push(StoredDocument {
                    id: id.to_string(),
                    version: 1,
                    source: document.clone(),
                });
                1
            }
        };

        Ok(IndexResponse {
            id: id.to_string(),
            version,
        })
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        let started = Instant::now();

        let mut matched: Vec<(u32, Value)> = {
            let indices = self.read_indices();
            indices
                .get(index)
                .map(|docs| {
                    docs.iter()
                        .filter(|doc| matches(&request.query, &doc.source))
                        .map(|doc| (score(&request.query, &doc.source), doc.source.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        match &request.sort {
            Some(sort) => {
                let key = |source: &Value| lookup(source, &sort.field).and_then(Value::as_i64);
                match sort.order {
                    SortOrder::Asc => matched.sort_by_key(|(_, source)| key(source)),
                    SortOrder::Desc => matched.sort_by_key(|(_, source)| Reverse(key(source))),
                }
            }
            None => matched.sort_by_key(|(score, _)| Reverse(*score)),
        }

        let total = matched.len() as u64;
        let buckets = request.aggregation.as_ref().map(|agg| {
            let mut counts: HashMap<String, u64> = HashMap::new();
            for (_, source) in &matched {
                if let Some(key) = lookup(source, &agg.field).and_then(keyword) {
                    *counts.entry(key).or_default() += 1;
                }
            }
            let mut buckets: Vec<Bucket> = counts
                .into_iter()
                .map(|(key, count)| Bucket { key, count })
                .collect();
            buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
            buckets.truncate(agg.size);
            buckets
        });

        let hits = matched
            .into_iter()
            .take(request.size)
            .map(|(_, source)| source)
            .collect();

        Ok(SearchResponse {
            hits,
            total,
            timed_out: false,
            took: started.elapsed().as_millis() as u64,
            buckets,
        })
    }
}

/// Resolves a dotted path such as `data.orderId`.
fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(source, |value, segment| value.get(segment))
}

/// Keyword form of a scalar, the way a keyword mapping would index it.
fn keyword(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Number of query tokens found in the document's fields.
fn text_matches(query: &str, fields: &[String], source: &Value) -> u32 {
    let indexed: Vec<String> = fields
        .iter()
        .filter_map(|field| lookup(source, field).and_then(keyword))
        .flat_map(|value| tokens(&value).collect::<Vec<_>>())
        .collect();
    tokens(query)
        .filter(|token| indexed.contains(token))
        .count() as u32
}

fn matches(query: &Query, source: &Value) -> bool {
    match query {
        Query::MatchAll => true,
        Query::Term { field, value } => {
            lookup(source, field).and_then(keyword).as_deref() == Some(value.as_str())
        }
        Query::Range { field, gte, lte } => match lookup(source, field).and_then(Value::as_i64) {
            Some(v) => gte.map_or(true, |lo| v >= lo) && lte.map_or(true, |hi| v <= hi),
            None => false,
        },
        Query::MultiMatch { query, fields } => text_matches(query, fields, source) > 0,
        Query::Bool { must } => must.iter().all(|clause| matches(clause, source)),
    }
}

fn score(query: &Query, source: &Value) -> u32 {
    match query {
        Query::MultiMatch { query, fields } => text_matches(query, fields, source),
        Query::Bool { must } => must.iter().map(|clause| score(clause, source)).sum(),
        _ => 0,
    }
}
