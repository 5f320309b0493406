//! HTTP handlers for ingestion and search.
//!
//! Every search route funnels into the query dispatcher: path and
//! query-string values are collected into a parameter map and validated by
//! [`SearchQuery::from_params`] exactly like a `POST /search/v1/admin/query`
//! body would be.

use std::collections::HashMap;
use std::sync::Arc;

use auditrail_search::{QueryError, SearchKind, SearchQuery};
use auditrail_types::{EventRecord, SearchEnvelope};
use axum::{
    extract::{Extension, Json, Path, Query},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::ingest::SubmitError;
use crate::middleware::RequestContext;
use crate::AppState;

/// API error type mapping to HTTP status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid input: {0}")]
    BadRequest(String),
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
    #[error("internal server error: {0}")]
    InternalServerError(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg),
            ApiError::InternalServerError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(json!({
            "error": message
        }));

        (status, body).into_response()
    }
}

impl From<SubmitError> for ApiError {
    fn from(e: SubmitError) -> Self {
        match e {
            SubmitError::Validation(e) => ApiError::BadRequest(e.to_string()),
            SubmitError::ShuttingDown => {
                ApiError::ServiceUnavailable("ingestion is shutting down".to_string())
            }
            SubmitError::Encode(e) => ApiError::InternalServerError(e.to_string()),
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        match e {
            QueryError::InvalidParameter(msg) => ApiError::BadRequest(msg),
            QueryError::Execution(msg) => ApiError::InternalServerError(msg),
        }
    }
}

/// Response body for an accepted event.
#[derive(Debug, Serialize)]
pub struct QueuedResponse {
    pub status: &'static str,
    pub id: String,
}

/// Handler for `POST /api/log`.
pub async fn log_event_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(body): Json<Value>,
) -> Result<Json<QueuedResponse>, ApiError> {
    let event = EventRecord::from_json(body).map_err(|e| {
        tracing::debug!(request_id = %ctx.request_id, error = %e, "rejected event");
        ApiError::BadRequest(e.to_string())
    })?;

    let id = state.ingestor.submit(event).await?;
    tracing::debug!(request_id = %ctx.request_id, event_id = %id, "event queued");
    Ok(Json(QueuedResponse {
        status: "queued",
        id,
    }))
}

async fn run_search(
    state: &AppState,
    ctx: &RequestContext,
    kind: SearchKind,
    params: Map<String, Value>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    let query = SearchQuery::from_params(kind, &params).map_err(|e| {
        tracing::debug!(request_id = %ctx.request_id, %kind, error = %e, "invalid search");
        e
    })?;
    let envelope = state.queries.execute(&query).await?;
    Ok(Json(envelope))
}

fn string_params(query: HashMap<String, String>) -> Map<String, Value> {
    query
        .into_iter()
        .map(|(k, v)| (k, Value::String(v)))
        .collect()
}

fn single(name: &str, value: String) -> Map<String, Value> {
    Map::from_iter([(name.to_string(), Value::String(value))])
}

/// Handler for `POST /search/v1/admin/query`.
///
/// The body names the kind in `searchType`; every other member is a
/// parameter.
pub async fn query_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(mut body): Json<Map<String, Value>>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    let kind = match body.remove("searchType") {
        Some(Value::String(kind)) => kind,
        Some(_) => return Err(ApiError::BadRequest("`searchType` must be a string".to_string())),
        None => return Err(ApiError::BadRequest("`searchType` is required".to_string())),
    };
    let kind: SearchKind = kind
        .parse()
        .map_err(|e: auditrail_search::ParseSearchKindError| ApiError::BadRequest(e.to_string()))?;
    run_search(&state, &ctx, kind, body).await
}

/// Handler for `GET /search/v1/admin/stats/event-types`.
pub async fn event_type_stats_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    run_search(&state, &ctx, SearchKind::EventTypeStats, Map::new()).await
}

/// Handler for `GET /search/v1/public/event/{id}`.
pub async fn event_by_id_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(id): Path<String>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    run_search(&state, &ctx, SearchKind::ById, single("id", id)).await
}

/// Handler for `GET /search/v1/public/event-type/{type}`.
pub async fn event_type_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(event_type): Path<String>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    run_search(
        &state,
        &ctx,
        SearchKind::ByEventType,
        single("eventType", event_type),
    )
    .await
}

/// Handler for `GET /search/v1/public/correlation/{correlationId}`.
pub async fn correlation_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Path(correlation_id): Path<String>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    run_search(
        &state,
        &ctx,
        SearchKind::ByCorrelationId,
        single("correlationId", correlation_id),
    )
    .await
}

/// Handler for `GET /search/v1/public/full-text?q=`.
pub async fn full_text_handler(
    Extension(state): Extension<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Query(mut query): Query<HashMap<String, String>>,
) -> Result<Json<SearchEnvelope>, ApiError> {
    let mut params = Map::new();
    if let Some(text) = query.remove("q") {
        params.insert("searchText".to_string(), Value::String(text));
    }
    run_search(&state, &ctx, SearchKind::FullText, params).await
}

/// Builds a handler for a public route whose parameters all come from the
/// query string.
macro_rules! query_string_handler {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        pub async fn $name(
            Extension(state): Extension<Arc<AppState>>,
            Extension(ctx): Extension<RequestContext>,
            Query(query): Query<HashMap<String, String>>,
        ) -> Result<Json<SearchEnvelope>, ApiError> {
            run_search(&state, &ctx, $kind, string_params(query)).await
        }
    };
}

/// Builds a handler for an admin route whose parameters come from a JSON
/// body.
macro_rules! json_body_handler {
    ($(#[$doc:meta])* $name:ident, $kind:expr) => {
        $(#[$doc])*
        pub async fn $name(
            Extension(state): Extension<Arc<AppState>>,
            Extension(ctx): Extension<RequestContext>,
            Json(body): Json<Map<String, Value>>,
        ) -> Result<Json<SearchEnvelope>, ApiError> {
            run_search(&state, &ctx, $kind, body).await
        }
    };
}

query_string_handler!(
    /// Handler for `GET /search/v1/public/recent?size=`.
    recent_handler,
    SearchKind::Recent
);
query_string_handler!(
    /// Handler for `GET /search/v1/public/target?targetType=&targetId=`.
    target_handler,
    SearchKind::ByTarget
);
query_string_handler!(
    /// Handler for `GET /search/v1/public/subject?subjectType=&subjectId=`.
    subject_handler,
    SearchKind::BySubject
);
query_string_handler!(
    /// Handler for `GET /search/v1/public/time-range?fromTime=&toTime=`.
    time_range_handler,
    SearchKind::ByTimeRange
);
query_string_handler!(
    /// Handler for `GET /search/v1/public/data?dataField=&value=`.
    data_handler,
    SearchKind::InData
);
query_string_handler!(
    /// Handler for `GET /search/v1/public/multi-conditions`.
    multi_conditions_handler,
    SearchKind::MultipleConditions
);

json_body_handler!(
    /// Handler for `POST /search/v1/admin/date-range`.
    date_range_handler,
    SearchKind::ByDateRange
);
json_body_handler!(
    /// Handler for `POST /search/v1/admin/by-type`.
    by_type_handler,
    SearchKind::ByType
);
json_body_handler!(
    /// Handler for `POST /search/v1/admin/by-subject-id`.
    by_subject_id_handler,
    SearchKind::BySubjectId
);
json_body_handler!(
    /// Handler for `POST /search/v1/admin/count-by-target`.
    count_by_target_handler,
    SearchKind::CountByTarget
);
json_body_handler!(
    /// Handler for `POST /search/v1/admin/count-by-type`.
    count_by_type_handler,
    SearchKind::CountByType
);
json_body_handler!(
    /// Handler for `POST /search/v1/admin/top-users`.
    top_users_handler,
    SearchKind::TopUsers
);

/// Handler for `GET /search/v1/public/version`.
pub async fn version_handler() -> Json<Value> {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Handler for `GET /health`.
pub async fn health_handler(Extension(state): Extension<Arc<AppState>>) -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "searchConnected": state.store.is_connected(),
        "ingest": state.ingestor.stats(),
        "reader": state.reader.stats(),
    }))
}
