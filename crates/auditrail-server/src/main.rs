//! auditrail server binary: the main entry point for the audit pipeline.
//!
//! Opens the durable stream, connects the search store in the background,
//! starts the ingestion writers and the stream reader, and serves the HTTP
//! API until SIGTERM/SIGINT. Shutdown drains ingestion before stopping the
//! reader.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use auditrail_search::{
    Indexer, MemorySearchStore, OpenSearchConfig, OpenSearchStore, QueryService, SearchStore,
    StoreSlot,
};
use auditrail_server::config::{self, Config};
use auditrail_server::ingest::{IngestSettings, Ingestor};
use auditrail_server::reader::{ReaderSettings, StreamReader};
use auditrail_server::{app, AppState};
use auditrail_stream::SqliteStream;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

fn resolve_config_path() -> (Option<String>, &'static str) {
    if let Some(path) = std::env::args()
        .nth(1)
        .filter(|value| !value.trim().is_empty())
    {
        return (Some(path), "cli-arg");
    }

    if let Ok(path) = std::env::var("AUDITRAIL_CONFIG_PATH") {
        if !path.trim().is_empty() {
            return (Some(path), "env-var");
        }
    }

    (None, "default")
}

/// Keeps trying to reach OpenSearch and installs it into `slot` once the
/// index exists. Until then indexing and queries fail fast.
async fn connect_search_store(store: OpenSearchStore, slot: StoreSlot, index: String, retry: Duration) {
    loop {
        let ready = async {
            store.ping().await?;
            store.ensure_index(&index).await
        };
        match ready.await {
            Ok(()) => {
                slot.install(Arc::new(store));
                tracing::info!(index = %index, "search store connected");
                return;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_ms = retry.as_millis() as u64,
                    "search store unavailable, retrying"
                );
                tokio::time::sleep(retry).await;
            }
        }
    }
}

fn store_slot(config: &Config) -> StoreSlot {
    let search = &config.search;
    if search.is_memory() {
        tracing::info!("using in-memory search store");
        return StoreSlot::with_store(Arc::new(MemorySearchStore::new()));
    }

    let store = OpenSearchStore::new(OpenSearchConfig {
        url: search.url.clone(),
        username: search.username.clone(),
        password: search.password.clone(),
        request_timeout: Duration::from_millis(search.request_timeout_ms),
    })
    .expect("invalid search store configuration: check search.url");

    let slot = StoreSlot::empty();
    tokio::spawn(connect_search_store(
        store,
        slot.clone(),
        search.index_name.clone(),
        Duration::from_millis(search.connect_retry_ms),
    ));
    slot
}

#[tokio::main]
async fn main() {
    let (resolved_config_path, config_source) = resolve_config_path();
    let selected_config_path = resolved_config_path.as_deref().or(Some("config.toml"));

    // Load configuration
    let config = config::load_config(selected_config_path)
        .expect("failed to load configuration: the server cannot start without valid config");

    // Initialize tracing
    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    if config.logging.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    tracing::info!(
        source = config_source,
        path = selected_config_path.unwrap_or("<none>"),
        "resolved startup configuration path"
    );

    // Durable stream (runs migrations)
    let stream = Arc::new(
        SqliteStream::open(&config.database.path, config.database.runtime_settings())
            .expect("failed to open the durable stream: check database.path in config"),
    );

    let slot = store_slot(&config);
    let store: Arc<dyn SearchStore> = Arc::new(slot.clone());

    let ingestor = Arc::new(Ingestor::start(
        stream.clone(),
        IngestSettings {
            stream_name: config.stream.stream_name.clone(),
            field_name: config.stream.field_name.clone(),
            buffer_capacity: config.ingest.buffer_capacity,
            workers: config.ingest.workers,
            retry: config.ingest.retry(),
        },
    ));

    let reader = Arc::new(StreamReader::new(
        stream.clone(),
        Indexer::new(
            store.clone(),
            config.search.index_name.clone(),
            config.search.document_ids,
        ),
        ReaderSettings {
            stream_name: config.stream.stream_name.clone(),
            field_name: config.stream.field_name.clone(),
            group: config.stream.consumer_group.clone(),
            consumer: config.stream.consumer_name.clone(),
            batch_size: config.stream.batch_size,
            block: Duration::from_millis(config.stream.block_ms),
            error_backoff: Duration::from_millis(config.stream.error_backoff_ms),
            redeliver_after: Duration::from_millis(config.stream.redeliver_after_ms),
            max_deliveries: config.stream.max_deliveries,
        },
    ));
    reader
        .start()
        .await
        .expect("failed to create the stream consumer group");

    let state = AppState {
        ingestor: ingestor.clone(),
        reader: reader.clone(),
        queries: QueryService::new(store, config.search.index_name.clone()),
        store: slot,
    };

    // Build application
    let app = app(state);
    let addr = SocketAddr::new(config.server.host, config.server.port);

    tracing::info!(%addr, "starting auditrail server");

    let listener = TcpListener::bind(addr)
        .await
        .expect("failed to bind to address: is another process using this port?");

    // Serve with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    // Flush buffered events into the stream before the reader stops.
    ingestor.shutdown(config.ingest.drain_timeout()).await;
    reader
        .stop(Duration::from_millis(config.stream.stop_timeout_ms))
        .await;

    tracing::info!("auditrail server shut down");
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
