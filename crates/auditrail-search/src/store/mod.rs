//! Search store abstraction and implementations.

mod memory;
mod opensearch;

pub use memory::MemorySearchStore;
pub use opensearch::{OpenSearchConfig, OpenSearchStore};

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::query::{IndexResponse, SearchRequest, SearchResponse};

/// A document store that can index events and answer structured queries.
///
/// Clients are long-lived and shared by reference across the reader and
/// every HTTP request.
#[async_trait]
pub trait SearchStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Creates `index` with the event mapping when it does not exist yet.
    async fn ensure_index(&self, index: &str) -> Result<(), StoreError>;

    /// Writes `document` under `id`, replacing any previous document with
    /// that id.
    async fn index(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> Result<IndexResponse, StoreError>;

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError>;
}

/// A store that is installed once, after startup.
///
/// Until [`install`](Self::install) succeeds every call fails fast with
/// [`StoreError::NotConnected`], so the indexer and the query layer can be
/// wired before the real store is reachable.
#[derive(Clone, Default)]
pub struct StoreSlot {
    inner: Arc<OnceLock<Arc<dyn SearchStore>>>,
}

impl StoreSlot {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A slot that is connected from the start.
    pub fn with_store(store: Arc<dyn SearchStore>) -> Self {
        let slot = Self::empty();
        slot.install(store);
        slot
    }

    /// Installs the store; returns `false` if one was already installed.
    pub fn install(&self, store: Arc<dyn SearchStore>) -> bool {
        self.inner.set(store).is_ok()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.get().is_some()
    }

    fn store(&self) -> Result<&Arc<dyn SearchStore>, StoreError> {
        self.inner.get().ok_or(StoreError::NotConnected)
    }
}

#[async_trait]
impl SearchStore for StoreSlot {
    async fn ping(&self) -> Result<(), StoreError> {
        self.store()?.ping().await
    }

    async fn ensure_index(&self, index: &str) -> Result<(), StoreError> {
        self.store()?.ensure_index(index).await
    }

    async fn index(
        &self,
        index: &str,
        id: &str,
        document: &Value,
    ) -> Result<IndexResponse, StoreError> {
        self.store()?.index(index, id, document).await
    }

    async fn search(
        &self,
        index: &str,
        request: &SearchRequest,
    ) -> Result<SearchResponse, StoreError> {
        self.store()?.search(index, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;
    use serde_json::json;

    fn match_all() -> SearchRequest {
        SearchRequest {
            query: Query::MatchAll,
            size: 10,
            sort: None,
            aggregation: None,
        }
    }

    #[tokio::test]
    async fn empty_slot_fails_fast() {
        let slot = StoreSlot::empty();
        assert!(!slot.is_connected());

        let err = slot
            .index("events", "doc-1", &json!({}))
            .await
            .expect_err("unconnected slot should fail");
        assert!(matches!(err, StoreError::NotConnected));

        let err = slot
            .search("events", &match_all())
            .await
            .expect_err("unconnected slot should fail");
        assert!(matches!(err, StoreError::NotConnected));
    }

    #[tokio::test]
    async fn installed_slot_delegates_and_installs_once() {
        let slot = StoreSlot::empty();
        let clone = slot.clone();

        assert!(slot.install(Arc::new(MemorySearchStore::new())));
        assert!(!slot.install(Arc::new(MemorySearchStore::new())));
        assert!(clone.is_connected(), "clones share the slot");

        clone
            .index("events", "doc-1", &json!({"id": "e1"}))
            .await
            .expect("index should succeed");
        let response = slot
            .search("events", &match_all())
            .await
            .expect("search should succeed");
        assert_eq!(response.total, 1);
    }
}
