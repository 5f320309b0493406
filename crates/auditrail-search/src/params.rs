//! Typed, validated search parameters.
//!
//! [`SearchQuery::from_params`] is the only way external input becomes a
//! query: it checks the per-kind required parameters, time windows and
//! result-size bounds before anything is compiled.

use auditrail_types::SubjectType;
use serde_json::{Map, Value};

use crate::error::QueryError;
use crate::kind::SearchKind;

/// Smallest accepted result or bucket count.
pub const MIN_SIZE: usize = 1;
/// Largest accepted result or bucket count.
pub const MAX_SIZE: usize = 1000;
/// Size used by `recent` and the bucket queries when the caller gives none.
pub const DEFAULT_CALLER_SIZE: usize = 10;

/// Inclusive `[from, to]` window over `createdAt`, in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub from: i64,
    pub to: i64,
}

impl TimeWindow {
    /// # Errors
    ///
    /// `QueryError::InvalidParameter` when `from > to`.
    pub fn new(from: i64, to: i64) -> Result<Self, QueryError> {
        if from > to {
            return Err(QueryError::InvalidParameter(format!(
                "invalid time range: fromTime {from} is after toTime {to}"
            )));
        }
        Ok(Self { from, to })
    }
}

/// A fully validated query, one variant per [`SearchKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchQuery {
    ById {
        id: String,
    },
    ByTarget {
        target_type: String,
        target_id: String,
    },
    BySubject {
        subject_type: SubjectType,
        subject_id: String,
    },
    ByEventType {
        event_type: String,
    },
    ByCorrelationId {
        correlation_id: String,
    },
    ByTimeRange(TimeWindow),
    InData {
        data_field: String,
        value: String,
    },
    MultipleConditions {
        target_type: Option<String>,
        event_type: Option<String>,
        window: Option<TimeWindow>,
    },
    Recent {
        size: usize,
    },
    FullText {
        text: String,
    },
    EventTypeStats,
    ByDateRange(TimeWindow),
    ByType {
        event_type: String,
        window: TimeWindow,
    },
    ByTargetType {
        target_type: String,
        window: TimeWindow,
    },
    BySubjectType {
        subject_type: SubjectType,
        window: TimeWindow,
    },
    BySubjectId {
        subject_id: String,
    },
    CountByTarget {
        window: TimeWindow,
        size: usize,
    },
    CountByType {
        window: TimeWindow,
        size: usize,
    },
    TopUsers {
        window: TimeWindow,
        size: usize,
    },
}

impl SearchQuery {
    pub fn kind(&self) -> SearchKind {
        match self {
            Self::ById { .. } => SearchKind::ById,
            Self::ByTarget { .. } => SearchKind::ByTarget,
            Self::BySubject { .. } => SearchKind::BySubject,
            Self::ByEventType { .. } => SearchKind::ByEventType,
            Self::ByCorrelationId { .. } => SearchKind::ByCorrelationId,
            Self::ByTimeRange(_) => SearchKind::ByTimeRange,
            Self::InData { .. } => SearchKind::InData,
            Self::MultipleConditions { .. } => SearchKind::MultipleConditions,
            Self::Recent { .. } => SearchKind::Recent,
            Self::FullText { .. } => SearchKind::FullText,
            Self::EventTypeStats => SearchKind::EventTypeStats,
            Self::ByDateRange(_) => SearchKind::ByDateRange,
            Self::ByType { .. } => SearchKind::ByType,
            Self::ByTargetType { .. } => SearchKind::ByTargetType,
            Self::BySubjectType { .. } => SearchKind::BySubjectType,
            Self::BySubjectId { .. } => SearchKind::BySubjectId,
            Self::CountByTarget { .. } => SearchKind::CountByTarget,
            Self::CountByType { .. } => SearchKind::CountByType,
            Self::TopUsers { .. } => SearchKind::TopUsers,
        }
    }

    /// Validates `params` against the contract of `kind`.
    ///
    /// String parameters must be JSON strings and not blank. Integer
    /// parameters accept JSON numbers or decimal strings, so query-string
    /// values can be passed through unchanged.
    ///
    /// # Errors
    ///
    /// `QueryError::InvalidParameter` naming the offending parameter.
    pub fn from_params(kind: SearchKind, params: &Map<String, Value>) -> Result<Self, QueryError> {
        let p = Params(params);
        let query = match kind {
            SearchKind::ById => Self::ById {
                id: p.string("id")?,
            },
            SearchKind::ByTarget => Self::ByTarget {
                target_type: p.string("targetType")?,
                target_id: p.string("targetId")?,
            },
            SearchKind::BySubject => Self::BySubject {
                subject_type: p.subject_type()?,
                subject_id: p.string("subjectId")?,
            },
            SearchKind::ByEventType => Self::ByEventType {
                event_type: p.string("eventType")?,
            },
            SearchKind::ByCorrelationId => Self::ByCorrelationId {
                correlation_id: p.string("correlationId")?,
            },
            SearchKind::ByTimeRange => Self::ByTimeRange(p.window()?),
            SearchKind::InData => Self::InData {
                data_field: p.string("dataField")?,
                value: p.string("value")?,
            },
            SearchKind::MultipleConditions => Self::MultipleConditions {
                target_type: p.optional_string("targetType")?,
                event_type: p.optional_string("eventType")?,
                window: p.optional_window()?,
            },
            SearchKind::Recent => Self::Recent { size: p.size()? },
            SearchKind::FullText => Self::FullText {
                text: p.string("searchText")?,
            },
            SearchKind::EventTypeStats => Self::EventTypeStats,
            SearchKind::ByDateRange => Self::ByDateRange(p.window()?),
            SearchKind::ByType => Self::ByType {
                event_type: p.string("type")?,
                window: p.window()?,
            },
            SearchKind::ByTargetType => Self::ByTargetType {
                target_type: p.string("targetType")?,
                window: p.window()?,
            },
            SearchKind::BySubjectType => Self::BySubjectType {
                subject_type: p.subject_type()?,
                window: p.window()?,
            },
            SearchKind::BySubjectId => Self::BySubjectId {
                subject_id: p.string("subjectId")?,
            },
            SearchKind::CountByTarget => Self::CountByTarget {
                window: p.window()?,
                size: p.size()?,
            },
            SearchKind::CountByType => Self::CountByType {
                window: p.window()?,
                size: p.size()?,
            },
            SearchKind::TopUsers => Self::TopUsers {
                window: p.window()?,
                size: p.size()?,
            },
        };
        Ok(query)
    }
}

struct Params<'a>(&'a Map<String, Value>);

fn invalid(message: String) -> QueryError {
    QueryError::InvalidParameter(message)
}

impl Params<'_> {
    fn present(&self, name: &str) -> Option<&Value> {
        self.0.get(name).filter(|v| !v.is_null())
    }

    fn optional_string(&self, name: &str) -> Result<Option<String>, QueryError> {
        match self.present(name) {
            None => Ok(None),
            Some(Value::String(s)) if s.trim().is_empty() => {
                Err(invalid(format!("`{name}` must not be blank")))
            }
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(_) => Err(invalid(format!("`{name}` must be a string"))),
        }
    }

    fn string(&self, name: &str) -> Result<String, QueryError> {
        self.optional_string(name)?
            .ok_or_else(|| invalid(format!("missing required parameter `{name}`")))
    }

    fn optional_integer(&self, name: &str) -> Result<Option<i64>, QueryError> {
        let parsed = match self.present(name) {
            None => return Ok(None),
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            Some(_) => None,
        };
        parsed
            .map(Some)
            .ok_or_else(|| invalid(format!("`{name}` must be an integer")))
    }

    fn integer(&self, name: &str) -> Result<i64, QueryError> {
        self.optional_integer(name)?
            .ok_or_else(|| invalid(format!("missing required parameter `{name}`")))
    }

    fn window(&self) -> Result<TimeWindow, QueryError> {
        TimeWindow::new(self.integer("fromTime")?, self.integer("toTime")?)
    }

    fn optional_window(&self) -> Result<Option<TimeWindow>, QueryError> {
        match (
            self.optional_integer("fromTime")?,
            self.optional_integer("toTime")?,
        ) {
            (None, None) => Ok(None),
            (Some(from), Some(to)) => TimeWindow::new(from, to).map(Some),
            _ => Err(invalid(
                "`fromTime` and `toTime` must be given together".to_string(),
            )),
        }
    }

    fn size(&self) -> Result<usize, QueryError> {
        let size = self
            .optional_integer("size")?
            .unwrap_or(DEFAULT_CALLER_SIZE as i64);
        if size < MIN_SIZE as i64 || size > MAX_SIZE as i64 {
            return Err(invalid(format!(
                "`size` must be between {MIN_SIZE} and {MAX_SIZE}, got {size}"
            )));
        }
        Ok(size as usize)
    }

    fn subject_type(&self) -> Result<SubjectType, QueryError> {
        self.string("subjectType")?
            .parse()
            .map_err(|e: auditrail_types::ParseSubjectTypeError| {
                invalid(format!("`subjectType`: {e}"))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test params must be an object"),
        }
    }

    fn parse(kind: SearchKind, value: Value) -> Result<SearchQuery, QueryError> {
        SearchQuery::from_params(kind, &params(value))
    }

    fn assert_invalid(result: Result<SearchQuery, QueryError>, needle: &str) {
        match result {
            Err(QueryError::InvalidParameter(msg)) => {
                assert!(msg.contains(needle), "`{msg}` should mention `{needle}`")
            }
            other => panic!("expected InvalidParameter mentioning {needle}, got {other:?}"),
        }
    }

    #[test]
    fn required_strings_must_be_present_and_not_blank() {
        assert_invalid(parse(SearchKind::ById, json!({})), "id");
        assert_invalid(parse(SearchKind::ById, json!({"id": "   "})), "id");
        assert_invalid(parse(SearchKind::ById, json!({"id": 7})), "id");
        assert_invalid(
            parse(SearchKind::ByTarget, json!({"targetType": "order"})),
            "targetId",
        );
        assert_eq!(
            parse(SearchKind::ById, json!({"id": "e1"})).unwrap(),
            SearchQuery::ById { id: "e1".to_string() }
        );
    }

    #[test]
    fn reversed_windows_fail_for_every_windowed_kind() {
        for kind in [
            SearchKind::ByTimeRange,
            SearchKind::ByDateRange,
            SearchKind::MultipleConditions,
            SearchKind::ByType,
            SearchKind::ByTargetType,
            SearchKind::BySubjectType,
            SearchKind::CountByTarget,
            SearchKind::CountByType,
            SearchKind::TopUsers,
        ] {
            let result = parse(
                kind,
                json!({
                    "fromTime": 2000, "toTime": 1000,
                    "type": "LOGIN", "targetType": "order", "subjectType": "USER"
                }),
            );
            assert_invalid(result, "time range");
        }
    }

    #[test]
    fn equal_bounds_form_a_valid_window() {
        assert_eq!(
            parse(SearchKind::ByTimeRange, json!({"fromTime": 5, "toTime": 5})).unwrap(),
            SearchQuery::ByTimeRange(TimeWindow { from: 5, to: 5 })
        );
    }

    #[test]
    fn integers_accept_numeric_strings() {
        assert_eq!(
            parse(
                SearchKind::ByTimeRange,
                json!({"fromTime": "900", "toTime": 1100})
            )
            .unwrap(),
            SearchQuery::ByTimeRange(TimeWindow { from: 900, to: 1100 })
        );
        assert_invalid(
            parse(SearchKind::ByTimeRange, json!({"fromTime": "soon", "toTime": 1})),
            "fromTime",
        );
        assert_invalid(
            parse(SearchKind::ByTimeRange, json!({"fromTime": 1.5, "toTime": 2})),
            "fromTime",
        );
    }

    #[test]
    fn size_defaults_and_bounds() {
        assert_eq!(
            parse(SearchKind::Recent, json!({})).unwrap(),
            SearchQuery::Recent { size: 10 }
        );
        assert_eq!(
            parse(SearchKind::Recent, json!({"size": 1000})).unwrap(),
            SearchQuery::Recent { size: 1000 }
        );
        assert_invalid(parse(SearchKind::Recent, json!({"size": 0})), "size");
        assert_invalid(parse(SearchKind::Recent, json!({"size": -3})), "size");
        assert_invalid(parse(SearchKind::Recent, json!({"size": 1001})), "size");
        assert_invalid(
            parse(
                SearchKind::CountByType,
                json!({"fromTime": 1, "toTime": 2, "size": 5000})
            ),
            "size",
        );
    }

    #[test]
    fn multiple_conditions_are_all_optional() {
        assert_eq!(
            parse(SearchKind::MultipleConditions, json!({})).unwrap(),
            SearchQuery::MultipleConditions {
                target_type: None,
                event_type: None,
                window: None,
            }
        );
        assert_invalid(
            parse(SearchKind::MultipleConditions, json!({"fromTime": 1})),
            "together",
        );
    }

    #[test]
    fn subject_type_must_be_known() {
        assert_invalid(
            parse(
                SearchKind::BySubject,
                json!({"subjectType": "ROBOT", "subjectId": "r2"})
            ),
            "ROBOT",
        );
        assert_eq!(
            parse(
                SearchKind::BySubject,
                json!({"subjectType": "SERVICE", "subjectId": "billing"})
            )
            .unwrap()
            .kind(),
            SearchKind::BySubject
        );
    }

    #[test]
    fn null_counts_as_missing() {
        assert_invalid(parse(SearchKind::FullText, json!({"searchText": null})), "searchText");
        assert_eq!(
            parse(SearchKind::Recent, json!({"size": null})).unwrap(),
            SearchQuery::Recent { size: 10 }
        );
    }
}
