//! The closed set of search kinds accepted by the dispatcher.

use std::fmt;
use std::str::FromStr;

/// One query surface, named the way callers name it in `searchType`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchKind {
    ById,
    ByTarget,
    BySubject,
    ByEventType,
    ByCorrelationId,
    ByTimeRange,
    InData,
    MultipleConditions,
    Recent,
    FullText,
    EventTypeStats,
    ByDateRange,
    ByType,
    ByTargetType,
    BySubjectType,
    BySubjectId,
    CountByTarget,
    CountByType,
    TopUsers,
}

impl SearchKind {
    pub const ALL: [SearchKind; 19] = [
        Self::ById,
        Self::ByTarget,
        Self::BySubject,
        Self::ByEventType,
        Self::ByCorrelationId,
        Self::ByTimeRange,
        Self::InData,
        Self::MultipleConditions,
        Self::Recent,
        Self::FullText,
        Self::EventTypeStats,
        Self::ByDateRange,
        Self::ByType,
        Self::ByTargetType,
        Self::BySubjectType,
        Self::BySubjectId,
        Self::CountByTarget,
        Self::CountByType,
        Self::TopUsers,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ById => "byId",
            Self::ByTarget => "byTarget",
            Self::BySubject => "bySubject",
            Self::ByEventType => "byEventType",
            Self::ByCorrelationId => "byCorrelationId",
            Self::ByTimeRange => "byTimeRange",
            Self::InData => "inData",
            Self::MultipleConditions => "multipleConditions",
            Self::Recent => "recent",
            Self::FullText => "fullText",
            Self::EventTypeStats => "eventTypeStats",
            Self::ByDateRange => "byDateRange",
            Self::ByType => "byType",
            Self::ByTargetType => "byTargetType",
            Self::BySubjectType => "bySubjectType",
            Self::BySubjectId => "bySubjectId",
            Self::CountByTarget => "countByTarget",
            Self::CountByType => "countByType",
            Self::TopUsers => "topUsers",
        }
    }

    /// Whether results are `(key, count)` buckets rather than documents.
    pub fn is_aggregation(self) -> bool {
        matches!(
            self,
            Self::EventTypeStats | Self::CountByTarget | Self::CountByType | Self::TopUsers
        )
    }
}

impl fmt::Display for SearchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchKind {
    type Err = ParseSearchKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| ParseSearchKindError(s.to_string()))
    }
}

/// Error returned when a `searchType` names no known kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseSearchKindError(pub String);

impl fmt::Display for ParseSearchKindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown searchType: {}", self.0)
    }
}

impl std::error::Error for ParseSearchKindError {}
