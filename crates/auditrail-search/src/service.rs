//! The query dispatcher: validated kind + parameters in, envelope out.

use std::sync::Arc;

use auditrail_types::{SearchEnvelope, SearchResults};
use serde_json::{Map, Value};

use crate::compiler::compile;
use crate::error::QueryError;
use crate::kind::SearchKind;
use crate::params::SearchQuery;
use crate::store::SearchStore;

/// Answers search requests against one index.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn SearchStore>,
    index: String,
}

impl QueryService {
    pub fn new(store: Arc<dyn SearchStore>, index: impl Into<String>) -> Self {
        Self {
            store,
            index: index.into(),
        }
    }

    /// Parses `kind`, validates `params` and runs the resulting query.
    ///
    /// # Errors
    ///
    /// `QueryError::InvalidParameter` for an unknown kind or a parameter
    /// contract violation; `QueryError::Execution` when the store fails.
    pub async fn dispatch(
        &self,
        kind: &str,
        params: &Map<String, Value>,
    ) -> Result<SearchEnvelope, QueryError> {
        let kind: SearchKind = kind
            .parse()
            .map_err(|e: crate::kind::ParseSearchKindError| {
                QueryError::InvalidParameter(e.to_string())
            })?;
        let query = SearchQuery::from_params(kind, params)?;
        self.execute(&query).await
    }

    /// Runs an already validated query.
    pub async fn execute(&self, query: &SearchQuery) -> Result<SearchEnvelope, QueryError> {
        let request = compile(query);
        let response = self
            .store
            .search(&self.index, &request)
            .await
            .map_err(|e| {
                tracing::error!(kind = %query.kind(), error = %e, "search query failed");
                QueryError::Execution(e.to_string())
            })?;

        let results = match request.aggregation {
            Some(_) => SearchResults::Buckets(response.buckets.unwrap_or_default()),
            None => SearchResults::Hits(response.hits),
        };

        Ok(SearchEnvelope {
            results,
            total: response.total,
            timed_out: response.timed_out,
            took: response.took,
        })
    }
}
