//! Compiles validated [`SearchQuery`] values into [`SearchRequest`]s.

use auditrail_types::fields;

use crate::params::{SearchQuery, TimeWindow};
use crate::query::{Query, SearchRequest, Sort, SortOrder, TermsAggregation};

/// Page size for document queries without a caller-supplied size.
pub const DEFAULT_HITS: usize = 100;
/// Page size for the log-browsing kinds (`byDateRange`, `byType`, ...).
pub const LOG_HITS: usize = 1000;
/// Bucket count for `eventTypeStats`.
pub const EVENT_TYPE_BUCKETS: usize = 100;

/// Fields searched by `fullText`.
pub const FULL_TEXT_FIELDS: [&str; 5] = [
    fields::TARGET_TYPE,
    fields::TARGET_ID,
    fields::SUBJECT_ID,
    fields::EVENT_TYPE,
    fields::CORRELATION_ID,
];

pub fn compile(query: &SearchQuery) -> SearchRequest {
    match query {
        SearchQuery::ById { id } => hits(Query::term(fields::ID, id), DEFAULT_HITS),
        SearchQuery::ByTarget {
            target_type,
            target_id,
        } => hits(
            Query::all_of(vec![
                Query::term(fields::TARGET_TYPE, target_type),
                Query::term(fields::TARGET_ID, target_id),
            ]),
            DEFAULT_HITS,
        ),
        SearchQuery::BySubject {
            subject_type,
            subject_id,
        } => hits(
            Query::all_of(vec![
                Query::term(fields::SUBJECT_TYPE, subject_type.as_str()),
                Query::term(fields::SUBJECT_ID, subject_id),
            ]),
            DEFAULT_HITS,
        ),
        SearchQuery::ByEventType { event_type } => {
            hits(Query::term(fields::EVENT_TYPE, event_type), DEFAULT_HITS)
        }
        SearchQuery::ByCorrelationId { correlation_id } => hits(
            Query::term(fields::CORRELATION_ID, correlation_id),
            DEFAULT_HITS,
        ),
        SearchQuery::ByTimeRange(window) => hits(created_within(window), DEFAULT_HITS),
        SearchQuery::InData { data_field, value } => hits(
            Query::term(format!("{}.{data_field}", fields::DATA), value),
            DEFAULT_HITS,
        ),
        SearchQuery::MultipleConditions {
            target_type,
            event_type,
            window,
        } => {
            let mut must = Vec::new();
            if let Some(target_type) = target_type {
                must.push(Query::term(fields::TARGET_TYPE, target_type));
            }
            if let Some(event_type) = event_type {
                must.push(Query::term(fields::EVENT_TYPE, event_type));
            }
            if let Some(window) = window {
                must.push(created_within(window));
            }
            hits(Query::all_of(must), DEFAULT_HITS)
        }
        SearchQuery::Recent { size } => hits(Query::MatchAll, *size),
        SearchQuery::FullText { text } => SearchRequest {
            query: Query::MultiMatch {
                query: text.clone(),
                fields: FULL_TEXT_FIELDS.iter().map(|f| f.to_string()).collect(),
            },
            size: DEFAULT_HITS,
            sort: None,
            aggregation: None,
        },
        SearchQuery::EventTypeStats => buckets(
            Query::MatchAll,
            "event_types",
            fields::EVENT_TYPE,
            EVENT_TYPE_BUCKETS,
        ),
        SearchQuery::ByDateRange(window) => hits(created_within(window), LOG_HITS),
        SearchQuery::ByType { event_type, window } => hits(
            windowed(window, Query::term(fields::EVENT_TYPE, event_type)),
            LOG_HITS,
        ),
        SearchQuery::ByTargetType {
            target_type,
            window,
        } => hits(
            windowed(window, Query::term(fields::TARGET_TYPE, target_type)),
            LOG_HITS,
        ),
        SearchQuery::BySubjectType {
            subject_type,
            window,
        } => hits(
            windowed(window, Query::term(fields::SUBJECT_TYPE, subject_type.as_str())),
            LOG_HITS,
        ),
        SearchQuery::BySubjectId { subject_id } => {
            hits(Query::term(fields::SUBJECT_ID, subject_id), LOG_HITS)
        }
        SearchQuery::CountByTarget { window, size } => buckets(
            created_within(window),
            "by_target",
            fields::TARGET_ID,
            *size,
        ),
        SearchQuery::CountByType { window, size } => {
            buckets(created_within(window), "by_type", fields::EVENT_TYPE, *size)
        }
        SearchQuery::TopUsers { window, size } => buckets(
            created_within(window),
            "top_users",
            fields::SUBJECT_ID,
            *size,
        ),
    }
}

fn created_within(window: &TimeWindow) -> Query {
    Query::between(fields::CREATED_AT, window.from, window.to)
}

fn windowed(window: &TimeWindow, clause: Query) -> Query {
    Query::all_of(vec![clause, created_within(window)])
}

/// Document query, newest first.
fn hits(query: Query, size: usize) -> SearchRequest {
    SearchRequest {
        query,
        size,
        sort: Some(Sort {
            field: fields::CREATED_AT.to_string(),
            order: SortOrder::Desc,
        }),
        aggregation: None,
    }
}

/// Terms aggregation; no hit documents are transferred.
fn buckets(query: Query, name: &str, field: &str, size: usize) -> SearchRequest {
    SearchRequest {
        query,
        size: 0,
        sort: None,
        aggregation: Some(TermsAggregation {
            name: name.to_string(),
            field: field.to_string(),
            size,
        }),
    }
}
