//! Entry identifiers and the values returned by consumer-group reads.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::time::Duration;

use crate::error::StreamError;

/// Identifier of one appended entry, rendered as `<millis>-<seq>`.
///
/// `seq` is the total order of the stream; `millis` is the append time and
/// only informative. Ordering and equality follow `seq`.
#[derive(Debug, Clone, Copy, Eq)]
pub struct EntryId {
    /// Epoch milliseconds at append time.
    pub millis: i64,
    /// Position in the stream.
    pub seq: i64,
}

impl PartialEq for EntryId {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Hash for EntryId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.seq.hash(state);
    }
}

impl Ord for EntryId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.seq.cmp(&other.seq)
    }
}

impl PartialOrd for EntryId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.millis, self.seq)
    }
}

impl FromStr for EntryId {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || StreamError::InvalidEntryId(s.to_string());
        let (millis, seq) = s.split_once('-').ok_or_else(invalid)?;
        Ok(Self {
            millis: millis.parse().map_err(|_| invalid())?,
            seq: seq.parse().map_err(|_| invalid())?,
        })
    }
}

/// Where a consumer-group read starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadCursor {
    /// Entries the group has never delivered to any consumer.
    NeverDelivered,
    /// Entries already pending for this consumer whose last delivery is at
    /// least `min_idle` old. Reading them counts as a redelivery.
    Pending { min_idle: Duration },
}

/// One entry handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEntry {
    pub id: EntryId,
    pub fields: HashMap<String, String>,
    /// How many times the entry has been delivered, this delivery included.
    pub delivery_count: u32,
}

/// An entry a consumer group gave up on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParkedEntry {
    pub id: EntryId,
    pub fields: HashMap<String, String>,
    pub consumer: String,
    pub delivery_count: u32,
    pub reason: String,
    /// Epoch milliseconds.
    pub parked_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_id_display_and_parse() {
        let id = EntryId {
            millis: 1_700_000_000_123,
            seq: 42,
        };
        assert_eq!(id.to_string(), "1700000000123-42");
        let parsed: EntryId = "1700000000123-42".parse().expect("should parse");
        assert_eq!(parsed, id);
        assert_eq!(parsed.millis, 1_700_000_000_123);
    }

    #[test]
    fn entry_id_rejects_garbage() {
        for raw in ["", "12", "a-1", "1-b", "1-2-3"] {
            assert!(
                matches!(raw.parse::<EntryId>(), Err(StreamError::InvalidEntryId(_))),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn entry_ids_order_by_seq() {
        let early_clock = EntryId { millis: 900, seq: 2 };
        let late_clock = EntryId { millis: 1000, seq: 1 };
        assert!(late_clock < early_clock);
    }
}
