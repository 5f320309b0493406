//! End-to-end: HTTP ingestion through the durable stream and the reader
//! into the search index, and back out through the query routes.

use std::sync::Arc;
use std::time::Duration;

use auditrail_db::{DbRuntimeSettings, IN_MEMORY};
use auditrail_search::{DocumentIds, Indexer, MemorySearchStore, QueryService, SearchStore, StoreSlot};
use auditrail_server::ingest::{IngestSettings, Ingestor};
use auditrail_server::reader::{ReaderSettings, StreamReader};
use auditrail_server::retry::RetryConfig;
use auditrail_server::{app, AppState};
use auditrail_stream::{DurableStream, SqliteStream};
use auditrail_types::{EventRecord, SubjectType};
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use tower::ServiceExt;

const STREAM: &str = "audit-events";
const GROUP: &str = "audit-indexer";
const INDEX: &str = "audit-events";

fn ingest_settings() -> IngestSettings {
    IngestSettings {
        stream_name: STREAM.to_string(),
        field_name: "payload".to_string(),
        buffer_capacity: 64,
        workers: 4,
        retry: RetryConfig::default(),
    }
}

fn reader_settings() -> ReaderSettings {
    ReaderSettings {
        stream_name: STREAM.to_string(),
        field_name: "payload".to_string(),
        group: GROUP.to_string(),
        consumer: "indexer-1".to_string(),
        batch_size: 25,
        block: Duration::from_millis(50),
        error_backoff: Duration::from_millis(50),
        redeliver_after: Duration::from_millis(200),
        max_deliveries: 5,
    }
}

struct Pipeline {
    stream: Arc<SqliteStream>,
    store: Arc<MemorySearchStore>,
    ingestor: Arc<Ingestor>,
    reader: Arc<StreamReader>,
}

impl Pipeline {
    async fn start(stream: Arc<SqliteStream>) -> Self {
        let store = Arc::new(MemorySearchStore::new());
        let ingestor = Arc::new(Ingestor::start(stream.clone(), ingest_settings()));
        let reader = Arc::new(StreamReader::new(
            stream.clone(),
            Indexer::new(store.clone(), INDEX, DocumentIds::Random),
            reader_settings(),
        ));
        reader.start().await.expect("reader should start");
        Self {
            stream,
            store,
            ingestor,
            reader,
        }
    }

    fn router(&self) -> Router {
        let search: Arc<dyn SearchStore> = self.store.clone();
        app(AppState {
            ingestor: self.ingestor.clone(),
            reader: self.reader.clone(),
            queries: QueryService::new(search.clone(), INDEX),
            store: StoreSlot::with_store(search),
        })
    }

    async fn shutdown(&self) {
        self.ingestor.shutdown(Duration::from_secs(5)).await;
        assert!(self.reader.stop(Duration::from_secs(5)).await);
    }
}

async fn wait_until(what: &str, check: impl Fn() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

async fn call(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.expect("request");
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    (status, serde_json::from_slice(&body).expect("json body"))
}

fn ids(body: &Value) -> Vec<String> {
    body["hits"]
        .as_array()
        .expect("hits")
        .iter()
        .map(|h| h["id"].as_str().expect("id").to_string())
        .collect()
}

#[tokio::test]
async fn logged_event_becomes_searchable_by_time_range() {
    let stream = Arc::new(SqliteStream::open(IN_MEMORY, DbRuntimeSettings::default()).unwrap());
    let pipeline = Pipeline::start(stream).await;
    let app = pipeline.router();

    let (status, body) = call(
        &app,
        Request::builder()
            .method("POST")
            .uri("/api/log")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "id": "e1",
                    "subjectType": "USER",
                    "subjectId": "alice",
                    "targetType": "catalog-item",
                    "targetId": "SKU-1",
                    "type": "CATALOG_ITEM_CREATED",
                    "correlationId": "req-1",
                    "createdAt": 1000,
                    "data": {"price": 12}
                })
                .to_string(),
            ))
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "e1");

    wait_until("e1 indexed", || pipeline.reader.stats().indexed == 1).await;

    let (status, inside) = call(
        &app,
        Request::builder()
            .uri("/search/v1/public/time-range?fromTime=900&toTime=1100")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&inside), vec!["e1"]);
    assert_eq!(inside["hits"][0]["data"], json!({"price": 12}));

    let (_, outside) = call(
        &app,
        Request::builder()
            .uri("/search/v1/public/time-range?fromTime=1100&toTime=1200")
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert!(ids(&outside).is_empty());

    pipeline.shutdown().await;
}

#[tokio::test]
async fn every_submitted_event_is_indexed_and_acknowledged() {
    let stream = Arc::new(SqliteStream::open(IN_MEMORY, DbRuntimeSettings::default()).unwrap());
    let pipeline = Pipeline::start(stream).await;

    let producers: Vec<_> = (0..4)
        .map(|p| {
            let ingestor = pipeline.ingestor.clone();
            tokio::spawn(async move {
                for i in 0..50 {
                    let event = EventRecord::builder(SubjectType::Service, format!("svc-{p}"), "job")
                        .event_type("JOB_RUN")
                        .created_at(1_000 + i)
                        .build();
                    ingestor.submit(event).await.expect("submit");
                }
            })
        })
        .collect();
    for producer in producers {
        producer.await.unwrap();
    }

    wait_until("200 indexed", || pipeline.reader.stats().indexed == 200).await;
    pipeline.shutdown().await;

    assert_eq!(pipeline.store.len(INDEX), 200);
    assert_eq!(pipeline.ingestor.stats().appended, 200);
    assert_eq!(
        pipeline.stream.pending_count(STREAM, GROUP).await.unwrap(),
        0
    );
}

#[tokio::test]
async fn buffered_events_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("stream.db");
    let path = path.to_str().unwrap();

    // Ingest with no reader running, then shut everything down.
    {
        let stream = Arc::new(SqliteStream::open(path, DbRuntimeSettings::default()).unwrap());
        stream
            .create_group_if_absent(STREAM, GROUP)
            .await
            .unwrap();
        let ingestor = Ingestor::start(stream, ingest_settings());
        for i in 0..20 {
            let event = EventRecord::builder(SubjectType::System, "cron", "report")
                .id(format!("r{i}"))
                .created_at(5_000 + i)
                .build();
            ingestor.submit(event).await.unwrap();
        }
        let report = ingestor.shutdown(Duration::from_secs(5)).await;
        assert_eq!(report.unflushed, 0);
    }

    let stream = Arc::new(SqliteStream::open(path, DbRuntimeSettings::default()).unwrap());
    let pipeline = Pipeline::start(stream).await;
    wait_until("backlog indexed", || pipeline.reader.stats().indexed == 20).await;
    pipeline.shutdown().await;

    assert_eq!(pipeline.store.len(INDEX), 20);
}
