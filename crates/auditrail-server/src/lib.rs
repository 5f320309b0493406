//! auditrail server library logic.

pub mod api;
pub mod config;
pub mod ingest;
pub mod middleware;
pub mod reader;
pub mod retry;

use std::sync::Arc;

use auditrail_search::{QueryService, StoreSlot};
use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Extension, Router,
};
use ingest::Ingestor;
use reader::StreamReader;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Application state shared across all request handlers.
pub struct AppState {
    /// Front door for `POST /api/log`.
    pub ingestor: Arc<Ingestor>,
    /// Background reader; only its counters are read here.
    pub reader: Arc<StreamReader>,
    /// Query dispatcher over the search index.
    pub queries: QueryService,
    /// Connection slot shared with the indexer.
    pub store: StoreSlot,
}

/// Maximum request body size (1 MiB).
const MAX_REQUEST_BODY_BYTES: usize = 1024 * 1024;

/// Builds the application router with all routes.
pub fn app(state: AppState) -> Router {
    let public = Router::new()
        .route("/event/{id}", get(api::event_by_id_handler))
        .route("/recent", get(api::recent_handler))
        .route("/target", get(api::target_handler))
        .route("/subject", get(api::subject_handler))
        .route("/event-type/{type}", get(api::event_type_handler))
        .route(
            "/correlation/{correlationId}",
            get(api::correlation_handler),
        )
        .route("/time-range", get(api::time_range_handler))
        .route("/full-text", get(api::full_text_handler))
        .route("/data", get(api::data_handler))
        .route("/multi-conditions", get(api::multi_conditions_handler))
        .route("/version", get(api::version_handler));

    let admin = Router::new()
        .route("/query", post(api::query_handler))
        .route("/stats/event-types", get(api::event_type_stats_handler))
        .route("/date-range", post(api::date_range_handler))
        .route("/by-type", post(api::by_type_handler))
        .route("/by-subject-id", post(api::by_subject_id_handler))
        .route("/count-by-target", post(api::count_by_target_handler))
        .route("/count-by-type", post(api::count_by_type_handler))
        .route("/top-users", post(api::top_users_handler));

    Router::new()
        .route("/health", get(api::health_handler))
        .route("/api/log", post(api::log_event_handler))
        .nest("/search/v1/public", public)
        .nest("/search/v1/admin", admin)
        .layer(DefaultBodyLimit::max(MAX_REQUEST_BODY_BYTES))
        .layer(axum::middleware::from_fn(
            middleware::request_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(Extension(Arc::new(state)))
}
