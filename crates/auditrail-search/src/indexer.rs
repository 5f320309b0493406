//! Turns stream payloads into stored documents.

use std::str::FromStr;
use std::sync::Arc;

use auditrail_types::EventRecord;
use serde::Deserialize;

use crate::error::IndexingError;
use crate::store::SearchStore;

/// How the indexer names stored documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DocumentIds {
    /// A fresh random id per write; redelivery produces a second document.
    #[default]
    Random,
    /// The event's own id; redelivery overwrites the earlier document.
    EventId,
}

impl FromStr for DocumentIds {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "random" => Ok(Self::Random),
            "event-id" => Ok(Self::EventId),
            other => Err(format!(
                "unknown document id strategy: {other}. Expected one of: random, event-id"
            )),
        }
    }
}

/// The result of one successful index call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedDocument {
    /// Storage key of the document.
    pub id: String,
    /// Store-assigned version.
    pub version: i64,
    /// `id` of the indexed event.
    pub event_id: String,
}

/// Writes events into one index of a [`SearchStore`].
#[derive(Clone)]
pub struct Indexer {
    store: Arc<dyn SearchStore>,
    index: String,
    ids: DocumentIds,
}

impl Indexer {
    pub fn new(store: Arc<dyn SearchStore>, index: impl Into<String>, ids: DocumentIds) -> Self {
        Self {
            store,
            index: index.into(),
            ids,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index
    }

    /// Parses a JSON-encoded event and stores it.
    ///
    /// # Errors
    ///
    /// `IndexingError::InvalidPayload` when `raw` is not a valid event,
    /// `IndexingError::Store` when the store fails the write (including
    /// `StoreError::NotConnected` before a store is installed).
    pub async fn index(&self, raw: &str) -> Result<IndexedDocument, IndexingError> {
        let value: serde_json::Value = serde_json::from_str(raw)
            .map_err(|e| IndexingError::InvalidPayload(format!("malformed JSON: {e}")))?;
        let event = EventRecord::from_json(value)?;
        self.index_event(&event).await
    }

    pub async fn index_event(&self, event: &EventRecord) -> Result<IndexedDocument, IndexingError> {
        let document = serde_json::to_value(event)
            .map_err(|e| IndexingError::InvalidPayload(e.to_string()))?;
        let doc_id = match self.ids {
            DocumentIds::Random => uuid::Uuid::new_v4().to_string(),
            DocumentIds::EventId => event.id.clone(),
        };

        let response = self.store.index(&self.index, &doc_id, &document).await?;
        tracing::debug!(
            index = %self.index,
            document_id = %response.id,
            version = response.version,
            event_id = %event.id,
            "indexed event"
        );

        Ok(IndexedDocument {
            id: response.id,
            version: response.version,
            event_id: event.id.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::store::{MemorySearchStore, StoreSlot};
    use serde_json::json;

    const INDEX: &str = "events";

    fn raw_event(id: &str) -> String {
        json!({
            "id": id,
            "subjectType": "USER",
            "subjectId": "alice",
            "targetType": "order",
            "targetId": "o-1",
            "createdAt": 1000,
            "data": {"total": 12, "items": ["a", "b"]}
        })
        .to_string()
    }

    #[tokio::test]
    async fn random_ids_duplicate_on_redelivery() {
        let store = Arc::new(MemorySearchStore::new());
        let indexer = Indexer::new(store.clone(), INDEX, DocumentIds::Random);

        let first = indexer.index(&raw_event("e1")).await.expect("first index");
        let second = indexer.index(&raw_event("e1")).await.expect("second index");

        assert_ne!(first.id, second.id);
        assert_ne!(first.id, "e1");
        assert_eq!(first.event_id, "e1");
        assert_eq!(store.len(INDEX), 2);
    }

    #[tokio::test]
    async fn event_ids_overwrite_on_redelivery() {
        let store = Arc::new(MemorySearchStore::new());
        let indexer = Indexer::new(store.clone(), INDEX, DocumentIds::EventId);

        indexer.index(&raw_event("e1")).await.expect("first index");
        let second = indexer.index(&raw_event("e1")).await.expect("second index");

        assert_eq!(second.id, "e1");
        assert_eq!(second.version, 2);
        assert_eq!(store.len(INDEX), 1);
    }

    #[tokio::test]
    async fn data_passes_through_unmodified() {
        let store = Arc::new(MemorySearchStore::new());
        let indexer = Indexer::new(store.clone(), INDEX, DocumentIds::EventId);

        indexer.index(&raw_event("e1")).await.expect("index");

        let stored = store.get(INDEX, "e1").expect("document should exist");
        assert_eq!(stored["data"], json!({"total": 12, "items": ["a", "b"]}));
        assert_eq!(stored["subjectType"], "USER");
        assert_eq!(stored["createdAt"], 1000);
    }

    #[tokio::test]
    async fn invalid_payloads_are_permanent_failures() {
        let indexer = Indexer::new(Arc::new(MemorySearchStore::new()), INDEX, DocumentIds::Random);

        for raw in [
            "not json".to_string(),
            "[1, 2]".to_string(),
            json!({"id": "e1", "subjectType": "USER", "subjectId": "a", "targetType": "t", "createdAt": 1, "data": 5}).to_string(),
            json!({"subjectType": "USER", "subjectId": "a", "targetType": "t", "createdAt": 1}).to_string(),
        ] {
            let err = indexer.index(&raw).await.expect_err("payload should be rejected");
            assert!(err.is_permanent(), "{raw} should be a permanent failure: {err}");
        }
    }

    #[tokio::test]
    async fn unconnected_store_fails_fast_and_is_retryable() {
        let indexer = Indexer::new(Arc::new(StoreSlot::empty()), INDEX, DocumentIds::Random);

        let err = indexer.index(&raw_event("e1")).await.expect_err("no store yet");
        assert!(matches!(err, IndexingError::Store(StoreError::NotConnected)));
        assert!(!err.is_permanent());
        assert!(err.is_transient());
    }

    #[test]
    fn only_outages_are_transient() {
        let rejected = |status| IndexingError::Store(StoreError::Rejected {
            status,
            body: String::new(),
        });
        assert!(rejected(503).is_transient());
        assert!(rejected(429).is_transient());
        assert!(!rejected(400).is_transient());
        assert!(!rejected(500).is_transient());
        assert!(!IndexingError::InvalidPayload("bad".to_string()).is_transient());
        assert!(!IndexingError::Store(StoreError::Decode("x".to_string())).is_transient());
    }

    #[test]
    fn document_id_strategy_parses() {
        assert_eq!("random".parse::<DocumentIds>(), Ok(DocumentIds::Random));
        assert_eq!("event-id".parse::<DocumentIds>(), Ok(DocumentIds::EventId));
        assert!("uuid".parse::<DocumentIds>().is_err());
    }
}
