//! Shared types and error definitions for the auditrail platform.
//!
//! This crate provides the foundational types used across all auditrail
//! crates: the [`EventRecord`] audit fact, its field names as they appear in
//! the search index, the normalized [`SearchEnvelope`] returned by every
//! query, and the [`ValidationError`] raised when producer input is malformed.
//!
//! No crate in the workspace depends on anything *except* `auditrail-types`
//! for cross-cutting type definitions. This keeps the dependency graph clean
//! and prevents circular dependencies.

mod envelope;
mod event;

pub use envelope::{Bucket, SearchEnvelope, SearchResults};
pub use event::{
    fields, new_event_id, now_millis, EventRecord, EventRecordBuilder, ParseSubjectTypeError,
    SubjectType,
};

/// Raised when an event or request parameter fails input validation.
///
/// Validation errors are the producer's fault: they are never retried and
/// always surface as a 4xx-equivalent response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid field `{field}`: {reason}")]
pub struct ValidationError {
    /// The offending field, using its wire name (e.g. `subjectId`).
    pub field: String,
    /// What is wrong with it.
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a required field that is absent or null.
    pub fn missing(field: impl Into<String>) -> Self {
        Self::new(field, "is required")
    }
}
