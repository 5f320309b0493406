//! The audit event record and its builder.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ValidationError;

/// Field names of an [`EventRecord`] as they appear on the wire and in the
/// search index.
pub mod fields {
    pub const ID: &str = "id";
    pub const SUBJECT_TYPE: &str = "subjectType";
    pub const SUBJECT_ID: &str = "subjectId";
    pub const TARGET_TYPE: &str = "targetType";
    pub const TARGET_ID: &str = "targetId";
    pub const EVENT_TYPE: &str = "type";
    pub const DATA: &str = "data";
    pub const CORRELATION_ID: &str = "correlationId";
    pub const CREATED_AT: &str = "createdAt";
}

/// The kind of actor that caused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SubjectType {
    /// The platform itself (schedulers, migrations, background jobs).
    #[serde(rename = "SYSTEM")]
    System,
    /// An authenticated end user.
    #[serde(rename = "USER")]
    User,
    /// Another service acting on its own behalf.
    #[serde(rename = "SERVICE")]
    Service,
}

impl SubjectType {
    /// Returns the canonical string label for this subject type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "SYSTEM",
            Self::User => "USER",
            Self::Service => "SERVICE",
        }
    }
}

impl std::fmt::Display for SubjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SubjectType {
    type Err = ParseSubjectTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(Self::System),
            "USER" => Ok(Self::User),
            "SERVICE" => Ok(Self::Service),
            _ => Err(ParseSubjectTypeError(s.to_string())),
        }
    }
}

/// Error returned when parsing an unknown subject type string.
#[derive(Debug, Clone)]
pub struct ParseSubjectTypeError(pub String);

impl std::fmt::Display for ParseSubjectTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unknown subject type: {}. Expected one of: SYSTEM, USER, SERVICE",
            self.0
        )
    }
}

impl std::error::Error for ParseSubjectTypeError {}

/// An immutable audit fact.
///
/// Records are serialized once by the producer, appended once to the durable
/// stream, and indexed one or more times (at-least-once delivery). Nothing in
/// the pipeline mutates a record after it is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// Globally unique, time-ordered identifier (UUIDv7 when built here).
    pub id: String,
    /// The kind of actor that caused the event.
    pub subject_type: SubjectType,
    /// Identifier of the actor.
    pub subject_id: String,
    /// Kind of entity acted upon.
    pub target_type: String,
    /// Identifier of the entity acted upon; may only be known after the
    /// causing operation completes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    /// Event type, e.g. `CATALOG_ITEM_CREATED`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    /// Opaque payload. Always a JSON object.
    #[serde(default)]
    pub data: Map<String, Value>,
    /// Caller-supplied tracing identifier; not unique.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Epoch milliseconds at creation.
    pub created_at: i64,
}

/// Generates a fresh time-ordered event identifier.
pub fn new_event_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl EventRecord {
    /// Starts building a record for the given actor and target kind.
    ///
    /// The id and creation timestamp are assigned at [`EventRecordBuilder::build`]
    /// unless set explicitly.
    pub fn builder(
        subject_type: SubjectType,
        subject_id: impl Into<String>,
        target_type: impl Into<String>,
    ) -> EventRecordBuilder {
        EventRecordBuilder {
            id: None,
            subject_type,
            subject_id: subject_id.into(),
            target_type: target_type.into(),
            target_id: None,
            event_type: None,
            data: Map::new(),
            correlation_id: None,
            created_at: None,
        }
    }

    /// Checks that every required field is present and well formed.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ValidationError> {
        require_non_blank(fields::ID, &self.id)?;
        require_non_blank(fields::SUBJECT_ID, &self.subject_id)?;
        require_non_blank(fields::TARGET_TYPE, &self.target_type)?;
        if let Some(event_type) = &self.event_type {
            require_non_blank(fields::EVENT_TYPE, event_type)?;
        }
        if self.created_at <= 0 {
            return Err(ValidationError::new(
                fields::CREATED_AT,
                "must be a positive epoch-millisecond timestamp",
            ));
        }
        Ok(())
    }

    /// Parses and validates an untyped JSON value, naming the offending field
    /// on failure.
    ///
    /// Used at the HTTP boundary where the body may be arbitrary JSON. A
    /// `data` value that is not an object is rejected rather than coerced.
    ///
    /// # Errors
    ///
    /// Returns a [`ValidationError`] if the value is not an object, a
    /// required field is missing, or a field has the wrong type.
    pub fn from_json(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut obj) = value else {
            return Err(ValidationError::new("$", "event must be a JSON object"));
        };

        let id = take_required_string(&mut obj, fields::ID)?;
        let subject_type = take_required_string(&mut obj, fields::SUBJECT_TYPE)?
            .parse::<SubjectType>()
            .map_err(|e| ValidationError::new(fields::SUBJECT_TYPE, e.to_string()))?;
        let subject_id = take_required_string(&mut obj, fields::SUBJECT_ID)?;
        let target_type = take_required_string(&mut obj, fields::TARGET_TYPE)?;
        let target_id = take_optional_string(&mut obj, fields::TARGET_ID)?;
        let event_type = take_optional_string(&mut obj, fields::EVENT_TYPE)?;
        let correlation_id = take_optional_string(&mut obj, fields::CORRELATION_ID)?;

        let data = match obj.remove(fields::DATA) {
            None | Some(Value::Null) => Map::new(),
            Some(Value::Object(map)) => map,
            Some(_) => {
                return Err(ValidationError::new(
                    fields::DATA,
                    "must be a JSON object",
                ))
            }
        };

        let created_at = match obj.remove(fields::CREATED_AT) {
            None | Some(Value::Null) => return Err(ValidationError::missing(fields::CREATED_AT)),
            Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                ValidationError::new(fields::CREATED_AT, "must be an integer")
            })?,
            Some(_) => {
                return Err(ValidationError::new(
                    fields::CREATED_AT,
                    "must be an integer",
                ))
            }
        };

        let record = Self {
            id,
            subject_type,
            subject_id,
            target_type,
            target_id,
            event_type,
            data,
            correlation_id,
            created_at,
        };
        record.validate()?;
        Ok(record)
    }
}

fn require_non_blank(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be blank"));
    }
    Ok(())
}

fn take_required_string(
    obj: &mut Map<String, Value>,
    field: &str,
) -> Result<String, ValidationError> {
    take_optional_string(obj, field)?.ok_or_else(|| ValidationError::missing(field))
}

fn take_optional_string(
    obj: &mut Map<String, Value>,
    field: &str,
) -> Result<Option<String>, ValidationError> {
    match obj.remove(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ValidationError::new(field, "must be a string")),
    }
}

/// Builder for [`EventRecord`].
#[derive(Debug, Clone)]
pub struct EventRecordBuilder {
    id: Option<String>,
    subject_type: SubjectType,
    subject_id: String,
    target_type: String,
    target_id: Option<String>,
    event_type: Option<String>,
    data: Map<String, Value>,
    correlation_id: Option<String>,
    created_at: Option<i64>,
}

impl EventRecordBuilder {
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn target_id(mut self, target_id: impl Into<String>) -> Self {
        self.target_id = Some(target_id.into());
        self
    }

    pub fn event_type(mut self, event_type: impl Into<String>) -> Self {
        self.event_type = Some(event_type.into());
        self
    }

    pub fn data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    pub fn correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn created_at(mut self, created_at: i64) -> Self {
        self.created_at = Some(created_at);
        self
    }

    pub fn build(self) -> EventRecord {
        EventRecord {
            id: self.id.unwrap_or_else(new_event_id),
            subject_type: self.subject_type,
            subject_id: self.subject_id,
            target_type: self.target_type,
            target_id: self.target_id,
            event_type: self.event_type,
            data: self.data,
            correlation_id: self.correlation_id,
            created_at: self.created_at.unwrap_or_else(now_millis),
        }
    }
}
